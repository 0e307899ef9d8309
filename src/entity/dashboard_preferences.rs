use crate::schema::dashboard_preferences;
use diesel::prelude::*;

/// Modules shown for a printer that has never saved preferences.
pub const DEFAULT_MODULES: &[&str] = &["status", "controls", "files", "upload", "console"];

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = dashboard_preferences)]
pub struct DashboardPreferences {
    pub id: i32,
    pub printer_id: i32,
    /// JSON array of module identifiers, in display order.
    pub modules: String,
}

#[derive(Insertable)]
#[diesel(table_name = dashboard_preferences)]
pub struct NewDashboardPreferences<'a> {
    pub printer_id: i32,
    pub modules: &'a str,
}
