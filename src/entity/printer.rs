use crate::schema::printers;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = printers)]
pub struct Printer {
    pub id: i32,
    pub name: String,
    pub ip_address: String,
    pub token: Option<String>,
    pub connected: i32,
    pub last_seen: Option<i64>,
}

impl Printer {
    pub fn is_connected(&self) -> bool {
        self.connected != 0
    }

    /// Token usable for authenticated calls; stored empty strings count as absent.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Insertable)]
#[diesel(table_name = printers)]
pub struct NewPrinter<'a> {
    pub name: &'a str,
    pub ip_address: &'a str,
    pub token: Option<&'a str>,
    pub connected: i32,
    pub last_seen: Option<i64>,
}
