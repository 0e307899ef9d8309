use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use actix_web::{App, HttpRequest, HttpServer, dev::ServerHandle, http::header, web};
use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::capture::{self, CapturedFile};
use super::forward;
use crate::entity::uploaded_file::FileSource;
use crate::now_epoch;
use crate::repo::file_repo::{FileRepo, FileUpload};
use crate::repo::printer_repo::PrinterRepo;

pub const DEFAULT_RELAY_PORT: u16 = 8080;

const BIND_RETRIES: u32 = 20;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub listen_ip: IpAddr,
    /// Port the slicer believes is the printer's.
    pub listen_port: u16,
    /// Port of the real printer's API.
    pub upstream_port: u16,
    /// Upper bound for one forwarded exchange.
    pub timeout: Duration,
    /// Attach captured files to any printer when none has the target's address.
    pub fallback_to_any_printer: bool,
    pub max_body_bytes: usize,
    pub workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DEFAULT_RELAY_PORT,
            upstream_port: DEFAULT_RELAY_PORT,
            timeout: Duration::from_secs(300),
            fallback_to_any_printer: true,
            max_body_bytes: 512 * 1024 * 1024,
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub state: RelayState,
    pub target: Option<String>,
    pub listen_addr: Option<String>,
    pub token_captured: bool,
}

/// State visible to every relay worker.
pub(crate) struct RelayShared {
    target: RwLock<Option<String>>,
    last_token: RwLock<Option<String>>,
    printers: Arc<dyn PrinterRepo>,
    files: Arc<dyn FileRepo>,
    http: reqwest::Client,
    config: RelayConfig,
}

fn mask(token: &str) -> String {
    let shown: String = token.chars().take(4).collect();
    format!("{shown}…({} chars)", token.chars().count())
}

impl RelayShared {
    pub(crate) async fn target(&self) -> Option<String> {
        self.target.read().await.clone()
    }

    pub(crate) fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Records `token` as the last one seen. False when it was already the last one.
    async fn remember_token(&self, token: &str) -> bool {
        let mut last = self.last_token.write().await;
        if last.as_deref() == Some(token) {
            return false;
        }
        *last = Some(token.to_string());
        true
    }

    /// Capture side effects for one request. Persistence runs detached so the
    /// forward never waits on the database.
    pub(crate) async fn inspect(&self, req: &HttpRequest, body: &web::Bytes, target: &str) {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let captured = capture::inspect(
            req.method().as_str(),
            req.path(),
            req.query_string(),
            content_type,
            body,
        )
        .await;

        if let Some(token) = captured.token {
            if self.remember_token(&token).await {
                info!("captured token {} for {} via {}", mask(&token), target, req.path());
                self.persist_token(target.to_string(), token);
            }
        }

        if let Some(file) = captured.upload {
            info!(
                "captured upload {} ({} bytes) for {}",
                file.filename,
                file.content.len(),
                target
            );
            self.persist_file(target.to_string(), file);
        }
    }

    fn persist_token(&self, target: String, token: String) {
        let printers = self.printers.clone();
        actix_web::rt::spawn(async move {
            let ip = target.clone();
            match web::block(move || printers.set_token_for_ip(&ip, &token)).await {
                Ok(Ok(0)) => warn!("no printer record at {target}, captured token kept in memory only"),
                Ok(Ok(n)) => info!("stored captured token on {n} printer record(s) at {target}"),
                Ok(Err(e)) => error!("storing captured token for {target} failed: {e}"),
                Err(e) => error!("storing captured token for {target} failed: {e:?}"),
            }
        });
    }

    fn persist_file(&self, target: String, file: CapturedFile) {
        let printers = self.printers.clone();
        let files = self.files.clone();
        let fallback = self.config.fallback_to_any_printer;
        actix_web::rt::spawn(async move {
            let filename = file.filename.clone();
            let res = web::block(move || -> Result<Option<(i32, bool)>> {
                let printer = match printers.find_by_ip(&target)? {
                    Some(p) => Some(p),
                    None if fallback => {
                        let any = printers.first_printer()?;
                        if let Some(p) = &any {
                            warn!(
                                "no printer record at {target}, attaching captured file to printer {} ({})",
                                p.id, p.ip_address
                            );
                        }
                        any
                    }
                    None => None,
                };
                let Some(printer) = printer else {
                    return Ok(None);
                };
                let content = String::from_utf8_lossy(&file.content);
                let inserted = files.insert_if_absent(&FileUpload {
                    printer_id: printer.id,
                    filename: &file.filename,
                    display_name: None,
                    content: Some(&*content),
                    source: FileSource::RelayCaptured,
                    uploaded_at: now_epoch(),
                })?;
                Ok(Some((printer.id, inserted.is_some())))
            })
            .await;
            match res {
                Ok(Ok(Some((printer_id, true)))) => info!("stored captured file {filename} for printer {printer_id}"),
                Ok(Ok(Some((printer_id, false)))) => {
                    info!("captured file {filename} already stored for printer {printer_id}")
                }
                Ok(Ok(None)) => warn!("no printer record to attach captured file {filename}"),
                Ok(Err(e)) => error!("storing captured file {filename} failed: {e}"),
                Err(e) => error!("storing captured file {filename} failed: {e:?}"),
            }
        });
    }
}

struct RunningRelay {
    handle: ServerHandle,
    join: JoinHandle<std::io::Result<()>>,
    local_addr: SocketAddr,
}

/// One relay: a listener forwarding to a single target, with explicit start/stop.
pub struct RelaySession {
    shared: Arc<RelayShared>,
    state: RwLock<RelayState>,
    running: Mutex<Option<RunningRelay>>,
}

impl RelaySession {
    pub fn new(config: RelayConfig, printers: Arc<dyn PrinterRepo>, files: Arc<dyn FileRepo>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build relay HTTP client")?;
        Ok(Self {
            shared: Arc::new(RelayShared {
                target: RwLock::new(None),
                last_token: RwLock::new(None),
                printers,
                files,
                http,
                config,
            }),
            state: RwLock::new(RelayState::Stopped),
            running: Mutex::new(None),
        })
    }

    /// Bind the listener and forward to `target`. A running listener is torn down
    /// first. On bind failure the session is left stopped.
    pub async fn start(&self, target: &str) -> Result<SocketAddr> {
        let target = target.trim();
        if target.is_empty() {
            return Err(anyhow!("relay target must not be empty"));
        }
        let mut running = self.running.lock().await;
        let restarted = match running.take() {
            Some(old) => {
                self.shutdown(old).await;
                true
            }
            None => false,
        };
        *self.state.write().await = RelayState::Starting;
        *self.shared.target.write().await = Some(target.to_string());

        let config = self.shared.config.clone();
        // the previous accept loop may still hold the port for a moment
        let mut attempts = if restarted { BIND_RETRIES } else { 1 };
        let bound = loop {
            let shared = web::Data::from(self.shared.clone());
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(shared.clone())
                    .default_service(web::to(forward::relay_request))
            })
            .workers(config.workers.max(1))
            .disable_signals()
            .shutdown_timeout(1)
            .bind((config.listen_ip, config.listen_port));
            match server {
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempts > 1 => {
                    attempts -= 1;
                    actix_web::rt::time::sleep(BIND_RETRY_DELAY).await;
                }
                other => break other,
            }
        };

        let server = match bound {
            Ok(server) => server,
            Err(e) => {
                *self.shared.target.write().await = None;
                *self.state.write().await = RelayState::Stopped;
                error!("relay bind {}:{} failed: {e}", config.listen_ip, config.listen_port);
                return Err(anyhow!(e).context(format!(
                    "failed to bind relay on {}:{}",
                    config.listen_ip, config.listen_port
                )));
            }
        };
        let local_addr = server
            .addrs()
            .first()
            .copied()
            .unwrap_or_else(|| SocketAddr::new(config.listen_ip, config.listen_port));
        let server = server.run();
        let handle = server.handle();
        let join = actix_web::rt::spawn(server);
        *running = Some(RunningRelay {
            handle,
            join,
            local_addr,
        });
        *self.state.write().await = RelayState::Running;
        info!("relay listening on {local_addr}, forwarding to {target}:{}", config.upstream_port);
        Ok(local_addr)
    }

    /// Stop the listener. Returns false when nothing was running.
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        match running.take() {
            Some(old) => {
                self.shutdown(old).await;
                true
            }
            None => false,
        }
    }

    async fn shutdown(&self, old: RunningRelay) {
        *self.shared.target.write().await = None;
        old.handle.stop(false).await;
        match old.join.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("relay on {} exited with error: {e}", old.local_addr),
            Err(e) => error!("relay task on {} failed: {e}", old.local_addr),
        }
        *self.state.write().await = RelayState::Stopped;
        info!("relay on {} stopped", old.local_addr);
    }

    pub async fn state(&self) -> RelayState {
        *self.state.read().await
    }

    pub async fn target(&self) -> Option<String> {
        self.shared.target().await
    }

    pub async fn last_token(&self) -> Option<String> {
        self.shared.last_token.read().await.clone()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn status(&self) -> RelayStatus {
        RelayStatus {
            state: self.state().await,
            target: self.target().await,
            listen_addr: self.local_addr().await.map(|a| a.to_string()),
            token_captured: self.shared.last_token.read().await.is_some(),
        }
    }
}
