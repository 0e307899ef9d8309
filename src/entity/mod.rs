pub mod app_setting;
pub mod dashboard_preferences;
pub mod printer;
pub mod uploaded_file;
