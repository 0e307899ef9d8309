pub mod file_repo;
pub mod preferences_repo;
pub mod printer_repo;
pub mod settings_repo;
