#![allow(dead_code)]

use std::{
    net::TcpListener,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, dev::ServerHandle, web};
use anyhow::Result;
use printer_relay::{
    db::{Pool, establish_pool},
    entity::printer::Printer,
    repo::printer_repo::PrinterRepo,
};

pub fn test_pool() -> (tempfile::TempDir, Pool) {
    printer_relay::logging::init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = establish_pool(&dir.path().join("test.db")).expect("pool");
    (dir, pool)
}

/// A port nothing is listening on (at the time of the call).
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

/// What the fake printer saw.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub type Log = Arc<Mutex<Vec<Recorded>>>;

pub struct FakePrinter {
    pub port: u16,
    pub log: Log,
    handle: ServerHandle,
}

impl FakePrinter {
    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub async fn stop(&self) {
        self.handle.stop(false).await;
    }
}

async fn fake_handler(
    req: HttpRequest,
    body: web::Bytes,
    log: web::Data<Log>,
    tag: web::Data<String>,
) -> HttpResponse {
    log.lock().unwrap().push(Recorded {
        method: req.method().to_string(),
        path_and_query: req
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default(),
        headers: req
            .headers()
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body: body.to_vec(),
    });
    match req.path() {
        "/slow" => {
            actix_web::rt::time::sleep(Duration::from_secs(3)).await;
            HttpResponse::Ok().body("late")
        }
        "/api/v1/connect" => HttpResponse::Ok().json(serde_json::json!({ "token": "issued-token" })),
        "/api/v1/status" => HttpResponse::Ok().json(serde_json::json!({ "status": "IDLE", "x": 0.0 })),
        "/binary" => HttpResponse::Created()
            .insert_header(("X-Printer", tag.as_str()))
            .insert_header(("Set-Cookie", "session=abc; Path=/"))
            .content_type("application/octet-stream")
            .body(vec![0u8, 1, 2, 255, b'\r', b'\n', 7]),
        _ => HttpResponse::Ok()
            .insert_header(("X-Printer", tag.as_str()))
            .body(tag.as_bytes().to_vec()),
    }
}

/// Loopback stand-in for the printer API. Every non-special path answers with `tag`.
pub async fn spawn_fake_printer(tag: &str) -> Result<FakePrinter> {
    spawn_fake_printer_at(tag, "127.0.0.1", 0).await
}

pub async fn spawn_fake_printer_at(tag: &str, ip: &str, port: u16) -> Result<FakePrinter> {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let data_log = web::Data::new(log.clone());
    let data_tag = web::Data::new(tag.to_string());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data_log.clone())
            .app_data(data_tag.clone())
            .app_data(web::PayloadConfig::new(16 * 1024 * 1024))
            .default_service(web::to(fake_handler))
    })
    .workers(1)
    .disable_signals()
    .bind((ip, port))?;
    let port = server.addrs()[0].port();
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);
    Ok(FakePrinter { port, log, handle })
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_for<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        actix_web::rt::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// Multipart body with a fixed boundary. `filename` marks file parts.
pub fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "----relay-test-boundary";
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// Printer repository wrapper counting token writes.
pub struct CountingPrinters {
    pub inner: Arc<dyn PrinterRepo>,
    pub token_writes: AtomicUsize,
}

impl CountingPrinters {
    pub fn new(inner: Arc<dyn PrinterRepo>) -> Self {
        Self {
            inner,
            token_writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.token_writes.load(Ordering::SeqCst)
    }
}

impl PrinterRepo for CountingPrinters {
    fn list_printers(&self) -> Result<Vec<Printer>> {
        self.inner.list_printers()
    }

    fn get_printer(&self, id: i32) -> Result<Option<Printer>> {
        self.inner.get_printer(id)
    }

    fn find_by_ip(&self, ip: &str) -> Result<Option<Printer>> {
        self.inner.find_by_ip(ip)
    }

    fn first_printer(&self) -> Result<Option<Printer>> {
        self.inner.first_printer()
    }

    fn insert_printer(&self, name: &str, ip_address: &str) -> Result<Printer> {
        self.inner.insert_printer(name, ip_address)
    }

    fn update_printer(&self, id: i32, name: &str, ip_address: &str) -> Result<Option<Printer>> {
        self.inner.update_printer(id, name, ip_address)
    }

    fn delete_printer(&self, id: i32) -> Result<usize> {
        self.inner.delete_printer(id)
    }

    fn update_token(&self, id: i32, token: &str) -> Result<usize> {
        self.token_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_token(id, token)
    }

    fn set_token_for_ip(&self, ip: &str, token: &str) -> Result<usize> {
        self.token_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_token_for_ip(ip, token)
    }

    fn mark_seen(&self, id: i32, ts: i64) -> Result<usize> {
        self.inner.mark_seen(id, ts)
    }

    fn mark_disconnected(&self, id: i32) -> Result<usize> {
        self.inner.mark_disconnected(id)
    }
}
