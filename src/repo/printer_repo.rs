use anyhow::{Result, bail};
use diesel::prelude::*;

use crate::{
    db::{Pool, PooledConn},
    entity::printer::{NewPrinter, Printer},
    schema::printers,
};

struct PrinterRepoImpl {
    pool: Pool,
}

impl PrinterRepoImpl {
    fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }
}

/// Repository interface for printer records.
pub trait PrinterRepo: Send + Sync + 'static {
    fn list_printers(&self) -> Result<Vec<Printer>>;

    fn get_printer(&self, id: i32) -> Result<Option<Printer>>;

    /// Lowest-id printer whose address equals `ip`.
    fn find_by_ip(&self, ip: &str) -> Result<Option<Printer>>;

    /// Lowest-id printer overall; the single-printer default.
    fn first_printer(&self) -> Result<Option<Printer>>;

    fn insert_printer(&self, name: &str, ip_address: &str) -> Result<Printer>;

    fn update_printer(&self, id: i32, name: &str, ip_address: &str) -> Result<Option<Printer>>;

    /// Deletes the printer; its files and preferences cascade.
    fn delete_printer(&self, id: i32) -> Result<usize>;

    /// Store a vendor token. Empty tokens are rejected so a captured token is never blanked.
    fn update_token(&self, id: i32, token: &str) -> Result<usize>;

    /// Store a token on every printer at `ip`. Returns the number of rows touched.
    fn set_token_for_ip(&self, ip: &str, token: &str) -> Result<usize>;

    /// Successful poll: connected and seen at `ts`.
    fn mark_seen(&self, id: i32, ts: i64) -> Result<usize>;

    fn mark_disconnected(&self, id: i32) -> Result<usize>;
}

impl PrinterRepo for PrinterRepoImpl {
    fn list_printers(&self) -> Result<Vec<Printer>> {
        let mut conn = self.conn()?;
        Ok(printers::table
            .order(printers::id.asc())
            .select(Printer::as_select())
            .load(&mut conn)?)
    }

    fn get_printer(&self, id: i32) -> Result<Option<Printer>> {
        let mut conn = self.conn()?;
        Ok(printers::table
            .find(id)
            .select(Printer::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn find_by_ip(&self, ip: &str) -> Result<Option<Printer>> {
        let mut conn = self.conn()?;
        Ok(printers::table
            .filter(printers::ip_address.eq(ip))
            .order(printers::id.asc())
            .select(Printer::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn first_printer(&self) -> Result<Option<Printer>> {
        let mut conn = self.conn()?;
        Ok(printers::table
            .order(printers::id.asc())
            .select(Printer::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn insert_printer(&self, name: &str, ip_address: &str) -> Result<Printer> {
        let mut conn = self.conn()?;
        let printer = conn.immediate_transaction(|c| {
            diesel::insert_into(printers::table)
                .values(&NewPrinter {
                    name,
                    ip_address,
                    token: None,
                    connected: 0,
                    last_seen: None,
                })
                .execute(c)?;
            printers::table
                .order(printers::id.desc())
                .select(Printer::as_select())
                .first(c)
        })?;
        Ok(printer)
    }

    fn update_printer(&self, id: i32, name: &str, ip_address: &str) -> Result<Option<Printer>> {
        let mut conn = self.conn()?;
        let updated = diesel::update(printers::table.find(id))
            .set((printers::name.eq(name), printers::ip_address.eq(ip_address)))
            .execute(&mut conn)?;
        if updated == 0 {
            return Ok(None);
        }
        Ok(printers::table
            .find(id)
            .select(Printer::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn delete_printer(&self, id: i32) -> Result<usize> {
        let mut conn = self.conn()?;
        Ok(diesel::delete(printers::table.find(id)).execute(&mut conn)?)
    }

    fn update_token(&self, id: i32, token: &str) -> Result<usize> {
        if token.is_empty() {
            bail!("refusing to store empty token for printer {id}");
        }
        let mut conn = self.conn()?;
        Ok(diesel::update(printers::table.find(id))
            .set(printers::token.eq(Some(token)))
            .execute(&mut conn)?)
    }

    fn set_token_for_ip(&self, ip: &str, token: &str) -> Result<usize> {
        if token.is_empty() {
            bail!("refusing to store empty token for {ip}");
        }
        let mut conn = self.conn()?;
        Ok(
            diesel::update(printers::table.filter(printers::ip_address.eq(ip)))
                .set(printers::token.eq(Some(token)))
                .execute(&mut conn)?,
        )
    }

    fn mark_seen(&self, id: i32, ts: i64) -> Result<usize> {
        let mut conn = self.conn()?;
        Ok(diesel::update(printers::table.find(id))
            .set((printers::connected.eq(1), printers::last_seen.eq(Some(ts))))
            .execute(&mut conn)?)
    }

    fn mark_disconnected(&self, id: i32) -> Result<usize> {
        let mut conn = self.conn()?;
        Ok(diesel::update(printers::table.find(id))
            .set(printers::connected.eq(0))
            .execute(&mut conn)?)
    }
}

/// Create a new printer repository instance. The concrete type is hidden; callers only see the trait.
pub fn new_printer_repo(pool: Pool) -> impl PrinterRepo {
    PrinterRepoImpl::new(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[test]
    fn insert_and_lookup_by_ip() -> Result<()> {
        let (_dir, pool) = test_pool();
        let repo = new_printer_repo(pool);
        let a = repo.insert_printer("A350", "192.168.1.20")?;
        let b = repo.insert_printer("J1", "192.168.1.21")?;
        assert!(b.id > a.id);
        assert!(!a.is_connected());

        let found = repo.find_by_ip("192.168.1.21")?.expect("printer at ip");
        assert_eq!(found.id, b.id);
        assert!(repo.find_by_ip("10.0.0.1")?.is_none());
        assert_eq!(repo.first_printer()?.map(|p| p.id), Some(a.id));
        Ok(())
    }

    #[test]
    fn empty_token_never_overwrites() -> Result<()> {
        let (_dir, pool) = test_pool();
        let repo = new_printer_repo(pool);
        let p = repo.insert_printer("A350", "192.168.1.20")?;
        repo.update_token(p.id, "abc123")?;
        assert!(repo.update_token(p.id, "").is_err());
        assert!(repo.set_token_for_ip("192.168.1.20", "").is_err());

        let stored = repo.get_printer(p.id)?.expect("printer");
        assert_eq!(stored.token(), Some("abc123"));
        Ok(())
    }

    #[test]
    fn seen_and_disconnected_flip_flag() -> Result<()> {
        let (_dir, pool) = test_pool();
        let repo = new_printer_repo(pool);
        let p = repo.insert_printer("A350", "192.168.1.20")?;
        repo.mark_seen(p.id, 1_700_000_000)?;
        let seen = repo.get_printer(p.id)?.expect("printer");
        assert!(seen.is_connected());
        assert_eq!(seen.last_seen, Some(1_700_000_000));

        repo.mark_disconnected(p.id)?;
        let gone = repo.get_printer(p.id)?.expect("printer");
        assert!(!gone.is_connected());
        assert_eq!(gone.last_seen, Some(1_700_000_000));
        Ok(())
    }

    #[test]
    fn update_and_delete_unknown_id() -> Result<()> {
        let (_dir, pool) = test_pool();
        let repo = new_printer_repo(pool);
        assert!(repo.update_printer(99, "x", "1.2.3.4")?.is_none());
        assert_eq!(repo.delete_printer(99)?, 0);

        let p = repo.insert_printer("A350", "192.168.1.20")?;
        let renamed = repo.update_printer(p.id, "Workshop", "192.168.1.30")?;
        assert_eq!(renamed.map(|r| r.name), Some("Workshop".to_string()));
        assert_eq!(repo.delete_printer(p.id)?, 1);
        assert!(repo.list_printers()?.is_empty());
        Ok(())
    }
}
