//! Passive inspection of buffered relay requests.
//!
//! Nothing here fails: a body that cannot be understood simply yields no capture,
//! and the request is forwarded either way.

use actix_multipart::Multipart;
use actix_web::{
    error::PayloadError,
    http::header::{self, HeaderMap, HeaderValue},
    web,
};
use futures_util::{StreamExt, stream};
use log::debug;

pub const TOKEN_FIELD: &str = "token";
pub const FILE_FIELD: &str = "file";
pub const CONNECT_PATH: &str = "/api/v1/connect";
/// Paths the vendor slicer posts G-code to.
pub const UPLOAD_PATHS: &[&str] = &["/api/v1/upload", "/api/v1/prepare_print"];

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM: &str = "multipart/form-data";

fn is_media_type(content_type: &str, expected: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mt| mt.trim().eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// One field of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// Fields of a buffered `multipart/form-data` body. Reading stops at the first
/// malformed part; fields read before it are kept. A missing boundary yields none.
pub async fn read_form(content_type: &str, body: web::Bytes) -> Vec<FormField> {
    let mut fields = Vec::new();
    if !is_media_type(content_type, MULTIPART_FORM) {
        return fields;
    }
    let Ok(value) = HeaderValue::from_str(content_type) else {
        return fields;
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, value);

    let mut form = Multipart::new(&headers, stream::once(async move { Ok::<_, PayloadError>(body) }));
    while let Some(item) = form.next().await {
        let mut field = match item {
            Ok(field) => field,
            Err(e) => {
                debug!("multipart body not captured: {e}");
                break;
            }
        };
        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or_default().to_string();
        let filename = disposition.get_filename().map(str::to_string);
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            match chunk {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => {
                    debug!("multipart field {name} truncated: {e}");
                    return fields;
                }
            }
        }
        fields.push(FormField { name, filename, data });
    }
    fields
}

fn form_value(encoded: &str, key: &str) -> Option<String> {
    let pairs = web::Query::<Vec<(String, String)>>::from_query(encoded).ok()?;
    pairs
        .into_inner()
        .into_iter()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// What one request carried on its way through the relay.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Capture {
    pub token: Option<String>,
    pub upload: Option<CapturedFile>,
}

pub fn is_upload(method: &str, path: &str) -> bool {
    method.eq_ignore_ascii_case("POST") && UPLOAD_PATHS.contains(&path.trim_end_matches('/'))
}

/// Token from the query string first, then a urlencoded body, then a multipart
/// field. The first non-empty hit wins.
fn find_token(query: &str, content_type: Option<&str>, body: &[u8], form: &[FormField]) -> Option<String> {
    if let Some(token) = form_value(query, TOKEN_FIELD) {
        return Some(token);
    }
    if content_type.is_some_and(|ct| is_media_type(ct, FORM_URLENCODED)) {
        let encoded = std::str::from_utf8(body).ok()?;
        return form_value(encoded, TOKEN_FIELD);
    }
    form.iter()
        .find(|f| f.name == TOKEN_FIELD)
        .map(|f| String::from_utf8_lossy(&f.data).trim().to_string())
        .filter(|t| !t.is_empty())
}

/// The `file` field, with client-side directories dropped from its name.
fn find_upload(form: Vec<FormField>) -> Option<CapturedFile> {
    let field = form.into_iter().find(|f| f.name == FILE_FIELD)?;
    let filename = field.filename.filter(|f| !f.is_empty())?;
    let filename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(&filename)
        .to_string();
    if filename.is_empty() {
        return None;
    }
    Some(CapturedFile {
        filename,
        content: field.data,
    })
}

/// Token and uploaded file carried by a request. Upload capture is limited to
/// POSTs to one of [`UPLOAD_PATHS`].
pub async fn inspect(
    method: &str,
    path: &str,
    query: &str,
    content_type: Option<&str>,
    body: &web::Bytes,
) -> Capture {
    let form = match content_type {
        Some(ct) if is_media_type(ct, MULTIPART_FORM) => read_form(ct, body.clone()).await,
        _ => Vec::new(),
    };
    let token = find_token(query, content_type, body, &form);
    let upload = if is_upload(method, path) { find_upload(form) } else { None };
    Capture { token, upload }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=----LubanBoundary42";

    fn upload_body() -> web::Bytes {
        web::Bytes::from_static(
            concat!(
                "------LubanBoundary42\r\n",
                "Content-Disposition: form-data; name=\"token\"\r\n",
                "\r\n",
                "tok-123\r\n",
                "------LubanBoundary42\r\n",
                "Content-Disposition: form-data; name=\"file\"; filename=\"part.gcode\"\r\n",
                "Content-Type: application/octet-stream\r\n",
                "\r\n",
                "G28\r\nG1 X10 Y10\r\n",
                "------LubanBoundary42--\r\n",
            )
            .as_bytes(),
        )
    }

    #[actix_web::test]
    async fn form_fields_keep_inner_line_breaks() {
        let fields = read_form(CT, upload_body()).await;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "token");
        assert_eq!(fields[0].filename, None);
        assert_eq!(fields[0].data, b"tok-123");
        assert_eq!(fields[1].filename.as_deref(), Some("part.gcode"));
        assert_eq!(fields[1].data, b"G28\r\nG1 X10 Y10");
    }

    #[actix_web::test]
    async fn only_form_data_is_parsed() {
        assert!(read_form("text/plain; boundary=----LubanBoundary42", upload_body()).await.is_empty());
        assert!(read_form("multipart/form-data", upload_body()).await.is_empty());
    }

    #[actix_web::test]
    async fn token_sources_in_priority_order() {
        let body = upload_body();
        let from_query = inspect("GET", "/api/v1/status", "token=from-query", Some(CT), &body).await;
        assert_eq!(from_query.token.as_deref(), Some("from-query"));

        let from_form = inspect("POST", "/api/v1/connect", "", Some(CT), &body).await;
        assert_eq!(from_form.token.as_deref(), Some("tok-123"));

        let urlencoded = web::Bytes::from_static(b"code=G28&token=form%2Dtok");
        let from_body = inspect("POST", CONNECT_PATH, "x=1", Some(FORM_URLENCODED), &urlencoded).await;
        assert_eq!(from_body.token.as_deref(), Some("form-tok"));

        // empty query value falls through to the body
        let empty_query = inspect("POST", "/api/v1/connect", "token=", Some(CT), &body).await;
        assert_eq!(empty_query.token.as_deref(), Some("tok-123"));
        assert_eq!(inspect("POST", CONNECT_PATH, "", None, &body).await, Capture::default());
    }

    #[actix_web::test]
    async fn upload_only_on_post_to_upload_paths() {
        let body = upload_body();
        let file = inspect("POST", "/api/v1/upload", "", Some(CT), &body)
            .await
            .upload
            .expect("captured");
        assert_eq!(file.filename, "part.gcode");
        assert_eq!(file.content, b"G28\r\nG1 X10 Y10");
        assert!(inspect("POST", "/api/v1/prepare_print", "", Some(CT), &body).await.upload.is_some());
        assert!(inspect("GET", "/api/v1/upload", "", Some(CT), &body).await.upload.is_none());
        assert!(inspect("POST", "/api/v1/status", "", Some(CT), &body).await.upload.is_none());
    }

    #[actix_web::test]
    async fn missing_boundary_captures_nothing() {
        let captured = inspect("POST", "/api/v1/upload", "", Some("multipart/form-data"), &upload_body()).await;
        assert_eq!(captured, Capture::default());
    }

    #[actix_web::test]
    async fn truncated_body_is_tolerated() {
        let cut = web::Bytes::from_static(
            b"------LubanBoundary42\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.gcode\"\r\n",
        );
        assert!(read_form(CT, cut).await.is_empty());
        assert!(read_form(CT, web::Bytes::from_static(b"no delimiters here")).await.is_empty());
    }

    #[actix_web::test]
    async fn client_paths_are_reduced_to_file_name() {
        let body = String::from_utf8(upload_body().to_vec())
            .unwrap()
            .replace("filename=\"part.gcode\"", "filename=\"C:\\\\jobs\\\\part.gcode\"");
        let file = inspect("POST", "/api/v1/upload", "", Some(CT), &web::Bytes::from(body))
            .await
            .upload
            .expect("captured");
        assert_eq!(file.filename, "part.gcode");
    }
}
