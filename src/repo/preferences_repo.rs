use anyhow::Result;
use diesel::prelude::*;

use crate::{
    db::Pool,
    entity::dashboard_preferences::{DEFAULT_MODULES, DashboardPreferences, NewDashboardPreferences},
    schema::dashboard_preferences,
};

struct PreferencesRepoImpl {
    pool: Pool,
}

/// Per-printer dashboard layout. One row per printer at most.
pub trait PreferencesRepo: Send + Sync + 'static {
    /// Enabled modules in order; the default set when nothing was saved.
    fn get_modules(&self, printer_id: i32) -> Result<Vec<String>>;

    fn set_modules(&self, printer_id: i32, modules: &[String]) -> Result<()>;
}

impl PreferencesRepo for PreferencesRepoImpl {
    fn get_modules(&self, printer_id: i32) -> Result<Vec<String>> {
        let mut conn = self.pool.get()?;
        let row = dashboard_preferences::table
            .filter(dashboard_preferences::printer_id.eq(printer_id))
            .select(DashboardPreferences::as_select())
            .first(&mut conn)
            .optional()?;
        match row {
            Some(r) => Ok(serde_json::from_str(&r.modules)?),
            None => Ok(DEFAULT_MODULES.iter().map(|m| m.to_string()).collect()),
        }
    }

    fn set_modules(&self, printer_id: i32, modules: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(modules)?;
        let mut conn = self.pool.get()?;
        diesel::insert_into(dashboard_preferences::table)
            .values(&NewDashboardPreferences {
                printer_id,
                modules: &encoded,
            })
            .on_conflict(dashboard_preferences::printer_id)
            .do_update()
            .set(dashboard_preferences::modules.eq(&encoded))
            .execute(&mut conn)?;
        Ok(())
    }
}

pub fn new_preferences_repo(pool: Pool) -> impl PreferencesRepo {
    PreferencesRepoImpl { pool }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::repo::printer_repo::{PrinterRepo, new_printer_repo};

    #[test]
    fn absent_row_yields_defaults_then_upserts() -> Result<()> {
        let (_dir, pool) = test_pool();
        let printers = new_printer_repo(pool.clone());
        let prefs = new_preferences_repo(pool.clone());
        let p = printers.insert_printer("A350", "192.168.1.20")?;

        assert_eq!(prefs.get_modules(p.id)?, DEFAULT_MODULES);

        let layout = vec!["console".to_string(), "status".to_string()];
        prefs.set_modules(p.id, &layout)?;
        prefs.set_modules(p.id, &layout[..1])?;
        assert_eq!(prefs.get_modules(p.id)?, vec!["console".to_string()]);

        let mut conn = pool.get()?;
        let rows: i64 = dashboard_preferences::table.count().get_result(&mut conn)?;
        assert_eq!(rows, 1);
        Ok(())
    }
}
