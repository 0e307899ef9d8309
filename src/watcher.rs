use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use crate::entity::app_setting::{WATCH_FOLDER, WATCH_PRINTER_ID};
use crate::entity::printer::Printer;
use crate::entity::uploaded_file::FileSource;
use crate::now_epoch;
use crate::repo::file_repo::{FileRepo, FileUpload};
use crate::repo::printer_repo::PrinterRepo;
use crate::repo::settings_repo::SettingsRepo;

const GCODE_EXTENSIONS: &[&str] = &["gcode", "gc", "g", "nc"];

pub fn is_gcode(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| GCODE_EXTENSIONS.iter().any(|g| e.eq_ignore_ascii_case(g)))
        .unwrap_or(false)
}

/// What one scan has learned about the folder so far.
#[derive(Debug, Default)]
pub struct WatchState {
    /// Folder whose existing files have been recorded.
    folder: Option<PathBuf>,
    seen: HashSet<PathBuf>,
    /// Size at the previous scan; a file is imported once its size stops changing.
    pending: HashMap<PathBuf, u64>,
    /// Configured folder last reported as missing.
    unavailable: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Imported {
    Stored,
    Duplicate,
    NoPrinter,
}

/// Polls the configured watch folder and imports new G-code files.
pub struct Watcher {
    printers: Arc<dyn PrinterRepo>,
    files: Arc<dyn FileRepo>,
    settings: Arc<dyn SettingsRepo>,
    scan_interval: Duration,
}

impl Watcher {
    pub fn new(
        printers: Arc<dyn PrinterRepo>,
        files: Arc<dyn FileRepo>,
        settings: Arc<dyn SettingsRepo>,
        scan_interval_secs: u64,
    ) -> Self {
        Self {
            printers,
            files,
            settings,
            scan_interval: Duration::from_secs(scan_interval_secs.max(1)),
        }
    }

    fn watch_folder(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .settings
            .get(WATCH_FOLDER)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from))
    }

    fn target_printer(&self) -> Result<Option<Printer>> {
        let configured = self
            .settings
            .get(WATCH_PRINTER_ID)?
            .and_then(|v| v.trim().parse::<i32>().ok());
        if let Some(id) = configured {
            if let Some(p) = self.printers.get_printer(id)? {
                return Ok(Some(p));
            }
            warn!("watch printer {id} does not exist, using first printer");
        }
        self.printers.first_printer()
    }

    fn list_gcode(folder: &Path) -> Result<Vec<(PathBuf, u64)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(folder).with_context(|| format!("read_dir {:?}", folder))? {
            let entry = entry?;
            let path = entry.path();
            if !is_gcode(&path) {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_file() {
                out.push((path, meta.len()));
            }
        }
        out.sort();
        Ok(out)
    }

    fn import(&self, path: &Path) -> Result<Imported> {
        let Some(printer) = self.target_printer()? else {
            return Ok(Imported::NoPrinter);
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("no file name in {:?}", path))?;
        let bytes = fs::read(path).with_context(|| format!("read {:?}", path))?;
        let content = String::from_utf8_lossy(&bytes);
        let inserted = self.files.insert_if_absent(&FileUpload {
            printer_id: printer.id,
            filename: &filename,
            display_name: None,
            content: Some(&*content),
            source: FileSource::WatchFolder,
            uploaded_at: now_epoch(),
        })?;
        Ok(match inserted {
            Some(f) => {
                info!("imported {} as file {} for printer {}", filename, f.id, printer.id);
                Imported::Stored
            }
            None => {
                debug!("{} already stored for printer {}", filename, printer.id);
                Imported::Duplicate
            }
        })
    }

    /// One pass over the folder. Returns the number of files imported.
    ///
    /// The first successful listing of a newly configured folder only records
    /// what is already there. A file that could not be imported stays pending
    /// and is retried on the next pass.
    pub fn scan_once(&self, state: &mut WatchState) -> Result<usize> {
        let folder = self.watch_folder()?;
        if folder != state.folder {
            state.seen.clear();
            state.pending.clear();
            let Some(dir) = folder else {
                state.folder = None;
                return Ok(0);
            };
            if !dir.is_dir() {
                if state.unavailable.as_ref() != Some(&dir) {
                    warn!("watch folder {:?} is not a directory", dir);
                    state.unavailable = Some(dir);
                }
                return Ok(0);
            }
            let entries = Self::list_gcode(&dir)?;
            info!("watching {:?}, {} existing file(s) left alone", dir, entries.len());
            state.seen.extend(entries.into_iter().map(|(p, _)| p));
            state.unavailable = None;
            state.folder = Some(dir);
            return Ok(0);
        }
        let Some(folder) = folder else {
            return Ok(0);
        };

        let mut imported = 0;
        let mut warned_no_printer = false;
        for (path, size) in Self::list_gcode(&folder)? {
            if state.seen.contains(&path) {
                continue;
            }
            if state.pending.get(&path) != Some(&size) {
                state.pending.insert(path, size);
                continue;
            }
            match self.import(&path) {
                Ok(outcome @ (Imported::Stored | Imported::Duplicate)) => {
                    if outcome == Imported::Stored {
                        imported += 1;
                    }
                    state.pending.remove(&path);
                    state.seen.insert(path);
                }
                Ok(Imported::NoPrinter) => {
                    if !warned_no_printer {
                        warn!("no printer configured, watched files wait in {:?}", folder);
                        warned_no_printer = true;
                    }
                }
                Err(e) => error!("import {:?} failed: {e:#}", path),
            }
        }
        Ok(imported)
    }

    /// Spawn background thread for periodic scanning.
    pub fn start_scheduler(self: &Arc<Self>) {
        let this = Arc::clone(self);
        thread::spawn(move || {
            let mut state = WatchState::default();
            loop {
                match this.scan_once(&mut state) {
                    Ok(0) => debug!("watch scan complete"),
                    Ok(n) => info!("watch scan imported {n} file(s)"),
                    Err(e) => error!("watch scan error: {e}"),
                }
                thread::sleep(this.scan_interval);
            }
        });
    }
}
