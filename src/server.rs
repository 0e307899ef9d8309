use std::{collections::HashMap, path::PathBuf, sync::Arc};

use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{App, HttpResponse, HttpServer, Responder, delete, error, get, post, put, web};
use anyhow::Result;
use futures_util::StreamExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::db::Pool;
use crate::entity::app_setting::{RELAY_TARGET_IP, SLICER_PRINTER_ID};
use crate::entity::printer::Printer;
use crate::entity::uploaded_file::{FileSource, UploadedFile};
use crate::now_epoch;
use crate::printer_client::{Axis, ClientConfig, PrinterClient, PrinterError};
use crate::relay::{RelayConfig, RelaySession};
use crate::repo::file_repo::{FileRepo, FileUpload, new_file_repo};
use crate::repo::preferences_repo::{PreferencesRepo, new_preferences_repo};
use crate::repo::printer_repo::{PrinterRepo, new_printer_repo};
use crate::repo::settings_repo::{SettingsRepo, new_settings_repo};
use crate::watcher::Watcher;

const DEFAULT_FEED_RATE: u32 = 3000;

#[derive(Clone)]
pub struct AppState {
    printers: Arc<dyn PrinterRepo>,
    files: Arc<dyn FileRepo>,
    preferences: Arc<dyn PreferencesRepo>,
    settings: Arc<dyn SettingsRepo>,
    client: PrinterClient,
    relay: Arc<RelaySession>,
}

impl AppState {
    pub fn new(pool: Pool, client: ClientConfig, relay: RelayConfig) -> Result<Self> {
        let printers: Arc<dyn PrinterRepo> = Arc::new(new_printer_repo(pool.clone()));
        let files: Arc<dyn FileRepo> = Arc::new(new_file_repo(pool.clone()));
        let relay = Arc::new(RelaySession::new(relay, printers.clone(), files.clone())?);
        Ok(Self {
            printers,
            files,
            preferences: Arc::new(new_preferences_repo(pool.clone())),
            settings: Arc::new(new_settings_repo(pool)),
            client: PrinterClient::new(client)?,
            relay,
        })
    }

    pub fn relay(&self) -> Arc<RelaySession> {
        self.relay.clone()
    }

    pub fn watcher(&self, scan_interval_secs: u64) -> Watcher {
        Watcher::new(
            self.printers.clone(),
            self.files.clone(),
            self.settings.clone(),
            scan_interval_secs,
        )
    }
}

/// Printer as the dashboard sees it; the token never leaves the backend.
#[derive(Debug, Serialize)]
struct PrinterView {
    id: i32,
    name: String,
    ip_address: String,
    connected: bool,
    last_seen: Option<i64>,
    has_token: bool,
}

impl From<Printer> for PrinterView {
    fn from(p: Printer) -> Self {
        Self {
            has_token: p.token().is_some(),
            connected: p.is_connected(),
            id: p.id,
            name: p.name,
            ip_address: p.ip_address,
            last_seen: p.last_seen,
        }
    }
}

/// File listing entry; content is only returned by the single-file endpoint.
#[derive(Debug, Serialize)]
struct FileSummary {
    id: i32,
    printer_id: i32,
    filename: String,
    display_name: Option<String>,
    source: String,
    uploaded_at: i64,
    has_content: bool,
}

impl From<UploadedFile> for FileSummary {
    fn from(f: UploadedFile) -> Self {
        Self {
            has_content: f.content.is_some(),
            id: f.id,
            printer_id: f.printer_id,
            filename: f.filename,
            display_name: f.display_name,
            source: f.source,
            uploaded_at: f.uploaded_at,
        }
    }
}

/// Run a repository call on the blocking pool.
async fn blocking<F, R>(f: F) -> actix_web::Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    web::block(f)
        .await
        .map_err(|e| {
            error!("blocking task error: {e:?}");
            error::ErrorInternalServerError("db error")
        })?
        .map_err(|e| {
            error!("db error: {e}");
            error::ErrorInternalServerError("db error")
        })
}

fn printer_error(e: PrinterError) -> actix_web::Error {
    match e {
        PrinterError::Timeout(_) => error::ErrorGatewayTimeout(e.to_string()),
        PrinterError::NoToken => error::ErrorConflict(e.to_string()),
        PrinterError::Unreachable { .. } | PrinterError::Status { .. } | PrinterError::Decode(_) => {
            error::ErrorBadGateway(e.to_string())
        }
    }
}

async fn load_printer(data: &AppState, id: i32) -> actix_web::Result<Printer> {
    let repo = data.printers.clone();
    blocking(move || repo.get_printer(id))
        .await?
        .ok_or_else(|| error::ErrorNotFound("printer not found"))
}

fn require_token(printer: &Printer) -> actix_web::Result<String> {
    printer
        .token()
        .map(str::to_string)
        .ok_or_else(|| printer_error(PrinterError::NoToken))
}

fn non_empty(value: &str, what: &str) -> actix_web::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(error::ErrorBadRequest(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Deserialize)]
struct PrinterBody {
    name: String,
    ip_address: String,
}

#[get("/api/printers")]
async fn list_printers(data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let repo = data.printers.clone();
    let rows = blocking(move || repo.list_printers()).await?;
    let views: Vec<PrinterView> = rows.into_iter().map(PrinterView::from).collect();
    Ok(HttpResponse::Ok().json(views))
}

#[post("/api/printers")]
async fn create_printer(
    body: web::Json<PrinterBody>,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let name = non_empty(&body.name, "name")?;
    let ip = non_empty(&body.ip_address, "ip_address")?;
    let repo = data.printers.clone();
    let printer = blocking(move || repo.insert_printer(&name, &ip)).await?;
    info!("added printer {} ({}) at {}", printer.id, printer.name, printer.ip_address);
    Ok(HttpResponse::Created().json(PrinterView::from(printer)))
}

#[get("/api/printers/{id}")]
async fn get_printer(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(PrinterView::from(printer)))
}

#[put("/api/printers/{id}")]
async fn update_printer(
    path: web::Path<i32>,
    body: web::Json<PrinterBody>,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    let name = non_empty(&body.name, "name")?;
    let ip = non_empty(&body.ip_address, "ip_address")?;
    let repo = data.printers.clone();
    let printer = blocking(move || repo.update_printer(id, &name, &ip))
        .await?
        .ok_or_else(|| error::ErrorNotFound("printer not found"))?;
    Ok(HttpResponse::Ok().json(PrinterView::from(printer)))
}

#[delete("/api/printers/{id}")]
async fn delete_printer(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    let repo = data.printers.clone();
    let affected = blocking(move || repo.delete_printer(id)).await?;
    if affected == 0 {
        return Ok(HttpResponse::NotFound().finish());
    }
    info!("deleted printer {id}");
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/printers/{id}/connect")]
async fn connect_printer(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    let token = data
        .client
        .connect(&printer.ip_address, printer.token())
        .await
        .map_err(printer_error)?;
    let repo = data.printers.clone();
    let id = printer.id;
    let updated = blocking(move || {
        repo.update_token(id, &token)?;
        repo.mark_seen(id, now_epoch())?;
        repo.get_printer(id)
    })
    .await?
    .ok_or_else(|| error::ErrorNotFound("printer not found"))?;
    info!("connected to printer {} at {}", id, updated.ip_address);
    Ok(HttpResponse::Ok().json(PrinterView::from(updated)))
}

#[post("/api/printers/{id}/disconnect")]
async fn disconnect_printer(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    if let Some(token) = printer.token() {
        if let Err(e) = data.client.disconnect(&printer.ip_address, token).await {
            warn!("disconnect from printer {} failed: {e}", printer.id);
        }
    }
    let repo = data.printers.clone();
    let id = printer.id;
    blocking(move || repo.mark_disconnected(id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/api/printers/{id}/status")]
async fn printer_status(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    let token = require_token(&printer)?;
    let repo = data.printers.clone();
    let id = printer.id;
    match data.client.status(&printer.ip_address, &token).await {
        Ok(status) => {
            blocking(move || repo.mark_seen(id, now_epoch())).await?;
            Ok(HttpResponse::Ok().json(json!({ "connected": true, "status": status })))
        }
        Err(e) => {
            blocking(move || repo.mark_disconnected(id)).await?;
            Err(printer_error(e))
        }
    }
}

#[derive(Debug, Deserialize)]
struct JogBody {
    axis: Axis,
    distance: f64,
    feed_rate: Option<u32>,
}

#[post("/api/printers/{id}/jog")]
async fn jog_printer(
    path: web::Path<i32>,
    body: web::Json<JogBody>,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    if !body.distance.is_finite() || body.distance == 0.0 {
        return Err(error::ErrorBadRequest("distance must be a non-zero number"));
    }
    let printer = load_printer(&data, path.into_inner()).await?;
    let token = require_token(&printer)?;
    let feed = body.feed_rate.unwrap_or(DEFAULT_FEED_RATE);
    let resp = data
        .client
        .jog(&printer.ip_address, &token, body.axis, body.distance, feed)
        .await
        .map_err(printer_error)?;
    Ok(HttpResponse::Ok().json(resp))
}

#[derive(Debug, Default, Deserialize)]
struct HomeBody {
    #[serde(default)]
    axes: Vec<Axis>,
}

#[post("/api/printers/{id}/home")]
async fn home_printer(
    path: web::Path<i32>,
    body: Option<web::Json<HomeBody>>,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    let token = require_token(&printer)?;
    let axes = body.map(|b| b.into_inner().axes).unwrap_or_default();
    let resp = data
        .client
        .home(&printer.ip_address, &token, &axes)
        .await
        .map_err(printer_error)?;
    Ok(HttpResponse::Ok().json(resp))
}

#[derive(Debug, Deserialize)]
struct ExecuteBody {
    code: String,
}

#[post("/api/printers/{id}/execute")]
async fn execute_code(
    path: web::Path<i32>,
    body: web::Json<ExecuteBody>,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let code = non_empty(&body.code, "code")?;
    let printer = load_printer(&data, path.into_inner()).await?;
    let token = require_token(&printer)?;
    let resp = data
        .client
        .execute_code(&printer.ip_address, &token, &code)
        .await
        .map_err(printer_error)?;
    Ok(HttpResponse::Ok().json(resp))
}

async fn load_file_with_content(data: &AppState, file_id: i32) -> actix_web::Result<(UploadedFile, String)> {
    let repo = data.files.clone();
    let file = blocking(move || repo.get_file(file_id))
        .await?
        .ok_or_else(|| error::ErrorNotFound("file not found"))?;
    let content = file
        .content
        .clone()
        .ok_or_else(|| error::ErrorConflict("file has no stored content"))?;
    Ok((file, content))
}

#[post("/api/printers/{id}/print/{file_id}")]
async fn print_file(path: web::Path<(i32, i32)>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let (id, file_id) = path.into_inner();
    let printer = load_printer(&data, id).await?;
    let token = require_token(&printer)?;
    let (file, content) = load_file_with_content(&data, file_id).await?;
    let resp = data
        .client
        .print_file(&printer.ip_address, &token, &file.filename, content.into_bytes())
        .await
        .map_err(printer_error)?;
    info!("started {} on printer {}", file.filename, printer.id);
    Ok(HttpResponse::Ok().json(resp))
}

#[post("/api/printers/{id}/{action:pause|resume|stop}")]
async fn job_control(path: web::Path<(i32, String)>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let (id, action) = path.into_inner();
    let printer = load_printer(&data, id).await?;
    let token = require_token(&printer)?;
    let ip = printer.ip_address.as_str();
    let resp = match action.as_str() {
        "pause" => data.client.pause(ip, &token).await,
        "resume" => data.client.resume(ip, &token).await,
        _ => data.client.stop(ip, &token).await,
    }
    .map_err(printer_error)?;
    info!("{action} sent to printer {id}");
    Ok(HttpResponse::Ok().json(resp))
}

#[post("/api/files/{id}/send")]
async fn send_file(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let (file, content) = load_file_with_content(&data, path.into_inner()).await?;
    let printer = load_printer(&data, file.printer_id).await?;
    let token = require_token(&printer)?;
    let resp = data
        .client
        .upload(&printer.ip_address, &token, &file.filename, content.into_bytes())
        .await
        .map_err(printer_error)?;
    Ok(HttpResponse::Ok().json(resp))
}

/// Multipart upload: the `file` part plus any plain text fields.
struct UploadForm {
    filename: String,
    content: Vec<u8>,
    fields: HashMap<String, String>,
}

async fn read_upload_form(mut payload: Multipart) -> actix_web::Result<UploadForm> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut fields = HashMap::new();
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| error::ErrorBadRequest(e.to_string()))?;
        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or_default().to_string();
        let filename = disposition.get_filename().map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| error::ErrorBadRequest(e.to_string()))?;
            bytes.extend_from_slice(&chunk);
        }
        match filename {
            Some(f) if name == "file" => file = Some((f, bytes)),
            _ => {
                fields.insert(name, String::from_utf8_lossy(&bytes).to_string());
            }
        }
    }
    let Some((filename, content)) = file else {
        error!("upload called but no file part found in the request");
        return Err(error::ErrorBadRequest("no file part"));
    };
    let filename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string();
    let filename = non_empty(&filename, "filename")?;
    Ok(UploadForm {
        filename,
        content,
        fields,
    })
}

async fn store_upload(
    data: &AppState,
    printer_id: i32,
    form: &UploadForm,
    source: FileSource,
) -> actix_web::Result<UploadedFile> {
    let repo = data.files.clone();
    let filename = form.filename.clone();
    let display_name = form
        .fields
        .get("display_name")
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    let content = String::from_utf8_lossy(&form.content).to_string();
    let stored = blocking(move || {
        repo.insert_file(&FileUpload {
            printer_id,
            filename: &filename,
            display_name: display_name.as_deref(),
            content: Some(&*content),
            source,
            uploaded_at: now_epoch(),
        })
    })
    .await?;
    info!(
        "stored {} ({} bytes, {}) for printer {}",
        stored.filename,
        form.content.len(),
        stored.source,
        printer_id
    );
    Ok(stored)
}

#[get("/api/printers/{id}/files")]
async fn list_files(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    let repo = data.files.clone();
    let rows = blocking(move || repo.list_for_printer(printer.id)).await?;
    let summaries: Vec<FileSummary> = rows.into_iter().map(FileSummary::from).collect();
    Ok(HttpResponse::Ok().json(summaries))
}

#[post("/api/printers/{id}/files")]
async fn upload_file(
    path: web::Path<i32>,
    payload: Multipart,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    let form = read_upload_form(payload).await?;
    let source = match form.fields.get("source").map(|s| s.trim()) {
        None | Some("") => FileSource::Manual,
        Some(tag) => match tag.parse::<FileSource>() {
            Ok(s @ (FileSource::Manual | FileSource::DragDrop | FileSource::Luban)) => s,
            _ => return Err(error::ErrorBadRequest(format!("unsupported source: {tag}"))),
        },
    };
    let stored = store_upload(&data, printer.id, &form, source).await?;
    Ok(HttpResponse::Created().json(FileSummary::from(stored)))
}

#[get("/api/files/{id}")]
async fn get_file(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    let repo = data.files.clone();
    let file = blocking(move || repo.get_file(id))
        .await?
        .ok_or_else(|| error::ErrorNotFound("file not found"))?;
    Ok(HttpResponse::Ok().json(file))
}

#[delete("/api/files/{id}")]
async fn delete_file(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    let repo = data.files.clone();
    let affected = blocking(move || repo.delete_file(id)).await?;
    if affected == 0 {
        return Ok(HttpResponse::NotFound().finish());
    }
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize, Serialize)]
struct PreferencesBody {
    modules: Vec<String>,
}

#[get("/api/printers/{id}/preferences")]
async fn get_preferences(path: web::Path<i32>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    let repo = data.preferences.clone();
    let modules = blocking(move || repo.get_modules(printer.id)).await?;
    Ok(HttpResponse::Ok().json(PreferencesBody { modules }))
}

#[put("/api/printers/{id}/preferences")]
async fn put_preferences(
    path: web::Path<i32>,
    body: web::Json<PreferencesBody>,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let printer = load_printer(&data, path.into_inner()).await?;
    let mut modules = Vec::with_capacity(body.modules.len());
    for m in &body.modules {
        let m = non_empty(m, "module id")?;
        if !modules.contains(&m) {
            modules.push(m);
        }
    }
    let repo = data.preferences.clone();
    let saved = modules.clone();
    blocking(move || repo.set_modules(printer.id, &saved)).await?;
    Ok(HttpResponse::Ok().json(PreferencesBody { modules }))
}

#[derive(Debug, Deserialize)]
struct SettingBody {
    value: String,
}

#[get("/api/settings")]
async fn list_settings(data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let repo = data.settings.clone();
    let rows = blocking(move || repo.list()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[get("/api/settings/{key}")]
async fn get_setting(path: web::Path<String>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let key = path.into_inner();
    let repo = data.settings.clone();
    let lookup = key.clone();
    let value = blocking(move || repo.get(&lookup))
        .await?
        .ok_or_else(|| error::ErrorNotFound("setting not found"))?;
    Ok(HttpResponse::Ok().json(json!({ "key": key, "value": value })))
}

#[put("/api/settings/{key}")]
async fn put_setting(
    path: web::Path<String>,
    body: web::Json<SettingBody>,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let key = path.into_inner();
    let value = body.into_inner().value;
    let repo = data.settings.clone();
    let (k, v) = (key.clone(), value.clone());
    blocking(move || repo.set(&k, &v)).await?;
    Ok(HttpResponse::Ok().json(json!({ "key": key, "value": value })))
}

#[delete("/api/settings/{key}")]
async fn delete_setting(path: web::Path<String>, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let key = path.into_inner();
    let repo = data.settings.clone();
    let affected = blocking(move || repo.delete(&key)).await?;
    if affected == 0 {
        return Ok(HttpResponse::NotFound().finish());
    }
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
struct RelayStartBody {
    target_ip: String,
}

#[get("/api/relay")]
async fn relay_status(data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    Ok(HttpResponse::Ok().json(data.relay.status().await))
}

#[post("/api/relay/start")]
async fn relay_start(
    body: web::Json<RelayStartBody>,
    data: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let target = non_empty(&body.target_ip, "target_ip")?;
    data.relay.start(&target).await.map_err(|e| {
        error!("relay start failed: {e:#}");
        error::ErrorInternalServerError(format!("{e:#}"))
    })?;
    let repo = data.settings.clone();
    blocking(move || repo.set(RELAY_TARGET_IP, &target)).await?;
    Ok(HttpResponse::Ok().json(data.relay.status().await))
}

#[post("/api/relay/stop")]
async fn relay_stop(data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    data.relay.stop().await;
    let repo = data.settings.clone();
    blocking(move || repo.delete(RELAY_TARGET_IP)).await?;
    Ok(HttpResponse::Ok().json(data.relay.status().await))
}

/// Enough of OctoPrint's version endpoint for slicers to accept us as a host.
#[get("/api/version")]
async fn octoprint_version() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "api": "0.1",
        "server": "1.9.0",
        "text": "OctoPrint 1.9.0 (printer-relay)",
    }))
}

fn form_flag(form: &UploadForm, key: &str) -> bool {
    form.fields
        .get(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// OctoPrint-compatible upload used by slicers' "send to printer".
#[post("/api/files/local")]
async fn octoprint_upload(payload: Multipart, data: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let form = read_upload_form(payload).await?;
    let printers = data.printers.clone();
    let settings = data.settings.clone();
    let printer = blocking(move || -> Result<Option<Printer>> {
        let configured = settings
            .get(SLICER_PRINTER_ID)?
            .and_then(|v| v.trim().parse::<i32>().ok());
        if let Some(id) = configured {
            if let Some(p) = printers.get_printer(id)? {
                return Ok(Some(p));
            }
        }
        printers.first_printer()
    })
    .await?
    .ok_or_else(|| error::ErrorConflict("no printer configured"))?;

    let stored = store_upload(&data, printer.id, &form, FileSource::Slicer).await?;
    let print = form_flag(&form, "print");
    if print {
        let token = require_token(&printer)?;
        data.client
            .print_file(&printer.ip_address, &token, &stored.filename, form.content.clone())
            .await
            .map_err(printer_error)?;
        info!("slicer upload {} started on printer {}", stored.filename, printer.id);
    }
    let body: Value = json!({
        "done": true,
        "files": { "local": { "name": stored.filename, "origin": "local" } },
        "effectivePrint": print,
    });
    Ok(HttpResponse::Created().json(body))
}

/// Register every API route. Shared by [`run`] and the integration tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_printers)
        .service(create_printer)
        .service(get_printer)
        .service(update_printer)
        .service(delete_printer)
        .service(connect_printer)
        .service(disconnect_printer)
        .service(printer_status)
        .service(jog_printer)
        .service(home_printer)
        .service(execute_code)
        .service(print_file)
        .service(list_files)
        .service(upload_file)
        .service(get_preferences)
        .service(put_preferences)
        .service(job_control)
        .service(octoprint_version)
        .service(octoprint_upload)
        .service(send_file)
        .service(get_file)
        .service(delete_file)
        .service(list_settings)
        .service(get_setting)
        .service(put_setting)
        .service(delete_setting)
        .service(relay_status)
        .service(relay_start)
        .service(relay_stop);
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub client: ClientConfig,
    pub relay: RelayConfig,
    pub watch_interval_secs: u64,
    /// Pre-built dashboard served at `/` when set.
    pub static_dir: Option<PathBuf>,
}

pub async fn run(config: ServerConfig, pool: Pool) -> Result<()> {
    let state = AppState::new(pool, config.client.clone(), config.relay.clone())?;

    let settings = state.settings.clone();
    match web::block(move || settings.get(RELAY_TARGET_IP)).await? {
        Ok(Some(target)) => {
            if let Err(e) = state.relay.start(&target).await {
                error!("relay for {target} not started: {e:#}");
            }
        }
        Ok(None) => info!("no relay target configured, relay disabled"),
        Err(e) => error!("reading relay target failed: {e}"),
    }

    Arc::new(state.watcher(config.watch_interval_secs)).start_scheduler();

    let relay = state.relay();
    let static_dir = config.static_dir.clone();
    let bind_addr = config.addr.clone();
    info!("Starting api-server at http://{}", &bind_addr);
    HttpServer::new(move || {
        let app = App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure);
        match &static_dir {
            Some(dir) => app.service(Files::new("/", dir).index_file("index.html")),
            None => app,
        }
    })
    .bind(&bind_addr)?
    .run()
    .await?;
    relay.stop().await;
    Ok(())
}
