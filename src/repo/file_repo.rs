use anyhow::Result;
use diesel::prelude::*;

use crate::{
    db::{Pool, PooledConn},
    entity::uploaded_file::{FileSource, NewUploadedFile, UploadedFile},
    schema::uploaded_files,
};

/// Fields of a file about to be stored.
#[derive(Debug, Clone)]
pub struct FileUpload<'a> {
    pub printer_id: i32,
    pub filename: &'a str,
    pub display_name: Option<&'a str>,
    pub content: Option<&'a str>,
    pub source: FileSource,
    pub uploaded_at: i64,
}

impl<'a> FileUpload<'a> {
    fn as_new_row(&self) -> NewUploadedFile<'a> {
        NewUploadedFile {
            printer_id: self.printer_id,
            filename: self.filename,
            display_name: self.display_name,
            content: self.content,
            source: self.source.as_str(),
            uploaded_at: self.uploaded_at,
        }
    }
}

struct FileRepoImpl {
    pool: Pool,
}

impl FileRepoImpl {
    fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }
}

fn latest_row(conn: &mut SqliteConnection) -> QueryResult<UploadedFile> {
    uploaded_files::table
        .order(uploaded_files::id.desc())
        .select(UploadedFile::as_select())
        .first(conn)
}

/// Repository interface for uploaded file records.
/// Public trait; concrete implementation is private to this module.
pub trait FileRepo: Send + Sync + 'static {
    fn insert_file(&self, upload: &FileUpload<'_>) -> Result<UploadedFile>;

    /// Insert unless the printer already has a file with this filename.
    /// Check and insert share one transaction so concurrent captures cannot double up.
    fn insert_if_absent(&self, upload: &FileUpload<'_>) -> Result<Option<UploadedFile>>;

    fn exists(&self, printer_id: i32, filename: &str) -> Result<bool>;

    /// Newest first.
    fn list_for_printer(&self, printer_id: i32) -> Result<Vec<UploadedFile>>;

    fn get_file(&self, id: i32) -> Result<Option<UploadedFile>>;

    fn delete_file(&self, id: i32) -> Result<usize>;
}

impl FileRepo for FileRepoImpl {
    fn insert_file(&self, upload: &FileUpload<'_>) -> Result<UploadedFile> {
        let mut conn = self.conn()?;
        let row = upload.as_new_row();
        let file = conn.immediate_transaction(|c| {
            diesel::insert_into(uploaded_files::table)
                .values(&row)
                .execute(c)?;
            latest_row(c)
        })?;
        Ok(file)
    }

    fn insert_if_absent(&self, upload: &FileUpload<'_>) -> Result<Option<UploadedFile>> {
        let mut conn = self.conn()?;
        let row = upload.as_new_row();
        let file = conn.immediate_transaction(|c| {
            let existing: i64 = uploaded_files::table
                .filter(uploaded_files::printer_id.eq(row.printer_id))
                .filter(uploaded_files::filename.eq(row.filename))
                .count()
                .get_result(c)?;
            if existing > 0 {
                return Ok(None);
            }
            diesel::insert_into(uploaded_files::table)
                .values(&row)
                .execute(c)?;
            latest_row(c).map(Some)
        })?;
        Ok(file)
    }

    fn exists(&self, printer_id: i32, filename: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let count: i64 = uploaded_files::table
            .filter(uploaded_files::printer_id.eq(printer_id))
            .filter(uploaded_files::filename.eq(filename))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    fn list_for_printer(&self, printer_id: i32) -> Result<Vec<UploadedFile>> {
        let mut conn = self.conn()?;
        Ok(uploaded_files::table
            .filter(uploaded_files::printer_id.eq(printer_id))
            .order((uploaded_files::uploaded_at.desc(), uploaded_files::id.desc()))
            .select(UploadedFile::as_select())
            .load(&mut conn)?)
    }

    fn get_file(&self, id: i32) -> Result<Option<UploadedFile>> {
        let mut conn = self.conn()?;
        Ok(uploaded_files::table
            .find(id)
            .select(UploadedFile::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn delete_file(&self, id: i32) -> Result<usize> {
        let mut conn = self.conn()?;
        Ok(diesel::delete(uploaded_files::table.find(id)).execute(&mut conn)?)
    }
}

/// Create a new file repository instance. The concrete type is hidden; callers only see the trait.
pub fn new_file_repo(pool: Pool) -> impl FileRepo {
    FileRepoImpl::new(pool)
}
