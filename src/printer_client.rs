use std::time::Duration;

use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_API_PORT: u16 = 8080;

#[derive(Debug, thiserror::Error)]
pub enum PrinterError {
    #[error("printer at {0} timed out")]
    Timeout(String),
    #[error("printer at {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },
    #[error("printer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("printer has no token, connect first")]
    NoToken,
    #[error("unexpected printer response: {0}")]
    Decode(String),
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Port of the printer's HTTP API.
    pub port: u16,
    /// Bound for every call except uploads.
    pub timeout: Duration,
    pub upload_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_PORT,
            timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[serde(alias = "X")]
    X,
    #[serde(alias = "Y")]
    Y,
    #[serde(alias = "Z")]
    Z,
}

impl Axis {
    fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

/// Relative move, then back to absolute positioning.
pub fn jog_gcode(axis: Axis, distance: f64, feed_rate: u32) -> String {
    format!("G91\nG0 {}{} F{}\nG90", axis.letter(), distance, feed_rate)
}

/// `G28` homes everything; listed axes restrict it.
pub fn home_gcode(axes: &[Axis]) -> String {
    let mut code = String::from("G28");
    for axis in axes {
        code.push(' ');
        code.push(axis.letter());
    }
    code
}

#[derive(Deserialize)]
struct ConnectResponse {
    token: Option<String>,
}

/// Thin client over the printer's vendor HTTP API. Cheap to clone.
#[derive(Clone, Debug)]
pub struct PrinterClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl PrinterClient {
    pub fn new(config: ClientConfig) -> Result<Self, PrinterError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("printer-relay/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PrinterError::Decode(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, ip: &str, path: &str) -> String {
        format!("http://{}:{}{}", ip, self.config.port, path)
    }

    async fn send(
        &self,
        ip: &str,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<Value, PrinterError> {
        let resp = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                warn!("printer {ip} timed out after {timeout:?}");
                PrinterError::Timeout(ip.to_string())
            } else {
                warn!("printer {ip} unreachable: {e}");
                PrinterError::Unreachable {
                    addr: ip.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                PrinterError::Timeout(ip.to_string())
            } else {
                PrinterError::Decode(e.to_string())
            }
        })?;
        if !status.is_success() {
            return Err(PrinterError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("printer {ip} -> {status}");
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    async fn post_form(&self, ip: &str, path: &str, form: &[(&str, &str)]) -> Result<Value, PrinterError> {
        let req = self.http.post(self.url(ip, path)).form(form);
        self.send(ip, req, self.config.timeout).await
    }

    async fn post_file(
        &self,
        ip: &str,
        path: &str,
        token: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<Value, PrinterError> {
        let form = Form::new()
            .text("token", token.to_string())
            .part("file", Part::bytes(content).file_name(filename.to_string()));
        let req = self.http.post(self.url(ip, path)).multipart(form);
        self.send(ip, req, self.config.upload_timeout).await
    }

    /// Request a session. Without a token the printer asks for on-screen approval and
    /// issues a new one; with a token it re-validates it.
    pub async fn connect(&self, ip: &str, token: Option<&str>) -> Result<String, PrinterError> {
        let form: Vec<(&str, &str)> = token.map(|t| vec![("token", t)]).unwrap_or_default();
        let value = self.post_form(ip, "/api/v1/connect", &form).await?;
        let issued = serde_json::from_value::<ConnectResponse>(value)
            .ok()
            .and_then(|r| r.token)
            .filter(|t| !t.is_empty());
        match (issued, token) {
            (Some(t), _) => Ok(t),
            (None, Some(t)) if !t.is_empty() => Ok(t.to_string()),
            _ => Err(PrinterError::Decode("connect response carried no token".into())),
        }
    }

    pub async fn disconnect(&self, ip: &str, token: &str) -> Result<(), PrinterError> {
        self.post_form(ip, "/api/v1/disconnect", &[("token", token)])
            .await
            .map(|_| ())
    }

    pub async fn status(&self, ip: &str, token: &str) -> Result<Value, PrinterError> {
        let req = self
            .http
            .get(self.url(ip, "/api/v1/status"))
            .query(&[("token", token)]);
        self.send(ip, req, self.config.timeout).await
    }

    pub async fn execute_code(&self, ip: &str, token: &str, code: &str) -> Result<Value, PrinterError> {
        self.post_form(ip, "/api/v1/execute_code", &[("token", token), ("code", code)])
            .await
    }

    pub async fn jog(
        &self,
        ip: &str,
        token: &str,
        axis: Axis,
        distance: f64,
        feed_rate: u32,
    ) -> Result<Value, PrinterError> {
        self.execute_code(ip, token, &jog_gcode(axis, distance, feed_rate))
            .await
    }

    pub async fn home(&self, ip: &str, token: &str, axes: &[Axis]) -> Result<Value, PrinterError> {
        self.execute_code(ip, token, &home_gcode(axes)).await
    }

    /// Store a file on the printer without printing it.
    pub async fn upload(
        &self,
        ip: &str,
        token: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<Value, PrinterError> {
        self.post_file(ip, "/api/v1/upload", token, filename, content)
            .await
    }

    /// Send a file as the next job and start it.
    pub async fn print_file(
        &self,
        ip: &str,
        token: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<Value, PrinterError> {
        self.post_file(ip, "/api/v1/prepare_print", token, filename, content)
            .await?;
        self.post_form(ip, "/api/v1/start_print", &[("token", token)])
            .await
    }

    pub async fn pause(&self, ip: &str, token: &str) -> Result<Value, PrinterError> {
        self.post_form(ip, "/api/v1/pause_print", &[("token", token)])
            .await
    }

    pub async fn resume(&self, ip: &str, token: &str) -> Result<Value, PrinterError> {
        self.post_form(ip, "/api/v1/resume_print", &[("token", token)])
            .await
    }

    pub async fn stop(&self, ip: &str, token: &str) -> Result<Value, PrinterError> {
        self.post_form(ip, "/api/v1/stop_print", &[("token", token)])
            .await
    }
}
