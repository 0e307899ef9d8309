use std::fmt;
use std::str::FromStr;

use crate::schema::uploaded_files;
use diesel::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = uploaded_files)]
pub struct UploadedFile {
    pub id: i32,
    pub printer_id: i32,
    pub filename: String,
    pub display_name: Option<String>,
    pub content: Option<String>,
    pub source: String,
    pub uploaded_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = uploaded_files)]
pub struct NewUploadedFile<'a> {
    pub printer_id: i32,
    pub filename: &'a str,
    pub display_name: Option<&'a str>,
    pub content: Option<&'a str>,
    pub source: &'a str,
    pub uploaded_at: i64,
}

/// How a file reached the store. Persisted as its tag string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource {
    Manual,
    DragDrop,
    Slicer,
    WatchFolder,
    Luban,
    RelayCaptured,
}

impl FileSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FileSource::Manual => "manual",
            FileSource::DragDrop => "drag-drop",
            FileSource::Slicer => "slicer",
            FileSource::WatchFolder => "watch-folder",
            FileSource::Luban => "luban",
            FileSource::RelayCaptured => "relay-captured",
        }
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(FileSource::Manual),
            "drag-drop" => Ok(FileSource::DragDrop),
            "slicer" => Ok(FileSource::Slicer),
            "watch-folder" => Ok(FileSource::WatchFolder),
            "luban" => Ok(FileSource::Luban),
            "relay-captured" => Ok(FileSource::RelayCaptured),
            other => Err(anyhow::anyhow!("unknown file source: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tags_parse_back() {
        assert_eq!("drag-drop".parse::<FileSource>().unwrap(), FileSource::DragDrop);
        assert_eq!(FileSource::RelayCaptured.to_string(), "relay-captured");
        assert!("ftp".parse::<FileSource>().is_err());
    }
}
