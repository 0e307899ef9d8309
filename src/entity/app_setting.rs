use crate::schema::app_settings;
use diesel::prelude::*;
use serde::Serialize;

pub const WATCH_FOLDER: &str = "watch_folder";
pub const WATCH_PRINTER_ID: &str = "watch_printer_id";
pub const RELAY_TARGET_IP: &str = "relay_target_ip";
pub const SLICER_PRINTER_ID: &str = "slicer_printer_id";

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = app_settings)]
pub struct AppSetting {
    pub key: String,
    pub value: String,
}
