use anyhow::Result;
use diesel::prelude::*;

use crate::{db::Pool, entity::app_setting::AppSetting, schema::app_settings};

struct SettingsRepoImpl {
    pool: Pool,
}

/// Generic key/value application settings.
pub trait SettingsRepo: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn delete(&self, key: &str) -> Result<usize>;

    fn list(&self) -> Result<Vec<AppSetting>>;
}

impl SettingsRepo for SettingsRepoImpl {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get()?;
        Ok(app_settings::table
            .find(key)
            .select(app_settings::value)
            .first::<String>(&mut conn)
            .optional()?)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        let row = AppSetting {
            key: key.to_string(),
            value: value.to_string(),
        };
        diesel::insert_into(app_settings::table)
            .values(&row)
            .on_conflict(app_settings::key)
            .do_update()
            .set(app_settings::value.eq(value))
            .execute(&mut conn)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<usize> {
        let mut conn = self.pool.get()?;
        Ok(diesel::delete(app_settings::table.find(key)).execute(&mut conn)?)
    }

    fn list(&self) -> Result<Vec<AppSetting>> {
        let mut conn = self.pool.get()?;
        Ok(app_settings::table
            .order(app_settings::key.asc())
            .select(AppSetting::as_select())
            .load(&mut conn)?)
    }
}

pub fn new_settings_repo(pool: Pool) -> impl SettingsRepo {
    SettingsRepoImpl { pool }
}
