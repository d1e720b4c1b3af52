use std::collections::BTreeMap;

use bytes::Bytes;
use futures_util::stream;
use serde_json::{Map, Value};
use url::Url;

/// A buffered inbound request, independent of the HTTP framework.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    /// Request target as received: origin-form (`/path?query`) or absolute.
    pub uri: String,
    /// Header names are lower-cased; repeated headers are joined with `, `.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        self.headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn from_parts(parts: &http::request::Parts, body: Bytes) -> Self {
        let mut request = Self::new(parts.method.as_str(), parts.uri.to_string()).body(body);
        for (name, value) in &parts.headers {
            // Non-visible-ASCII header values are not representable as rule input.
            if let Ok(value) = value.to_str() {
                request = request.header(name.as_str(), value);
            }
        }
        request
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Absolute URL of the request. Origin-form targets are resolved against
    /// the `host` header.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        match Url::parse(&self.uri) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let host = self.header_value("host").unwrap_or("localhost");
                Url::parse(&format!("http://{host}"))?.join(&self.uri)
            }
            Err(err) => Err(err),
        }
    }

    /// Path component, without query string.
    pub fn path(&self) -> &str {
        let target = match self.uri.split_once("://") {
            Some((_, rest)) if !self.uri.starts_with('/') => {
                rest.find('/').map_or("/", |i| &rest[i..])
            }
            _ => &self.uri,
        };
        target.split(['?', '#']).next().unwrap_or("/")
    }

    /// Path with dot segments resolved, as the server routes it. Independent
    /// of the `host` header; falls back to the raw path if it cannot be parsed.
    pub fn normalized_path(&self) -> String {
        Url::parse("http://localhost")
            .and_then(|base| base.join(self.path()))
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| self.path().to_string())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_value("content-type")
    }

    /// Declared `content-length`, falling back to the buffered body size.
    pub fn content_length(&self) -> Option<u64> {
        self.header_value("content-length")
            .and_then(|v| v.trim().parse().ok())
            .or_else(|| (!self.body.is_empty()).then_some(self.body.len() as u64))
    }

    /// Client address: first `x-forwarded-for` hop, then `x-real-ip`.
    pub fn client_ip(&self) -> String {
        self.header_value("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .or_else(|| {
                self.header_value("x-real-ip")
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
            })
            .unwrap_or("unknown")
            .to_string()
    }
}

/// What the rule layer knows about a response once the handler has run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutboundResponse {
    pub status: u16,
    pub duration_ms: f64,
    pub content_length: Option<u64>,
}

impl OutboundResponse {
    pub fn from_response<B>(response: &http::Response<B>, duration_ms: f64) -> Self {
        let content_length = response
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        Self {
            status: response.status().as_u16(),
            duration_ms,
            content_length,
        }
    }
}

// ---------------------------------------------------------------------------
// Body parsing
// ---------------------------------------------------------------------------

/// Parse a request body into rule data according to its content type.
///
/// JSON, url-encoded forms and multipart forms are understood. Anything else,
/// an empty body, or a body that fails to parse yields `None`.
pub async fn parse_body(content_type: Option<&str>, body: &Bytes) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    let content_type = content_type?;
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "application/json" => serde_json::from_slice(body).ok(),
        t if t.starts_with("application/") && t.ends_with("+json") => {
            serde_json::from_slice(body).ok()
        }
        "application/x-www-form-urlencoded" => Some(parse_form(body)),
        "multipart/form-data" => parse_multipart(content_type, body.clone()).await,
        _ => None,
    }
}

fn parse_form(body: &[u8]) -> Value {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        insert_field(&mut fields, key.into_owned(), Value::String(value.into_owned()));
    }
    Value::Object(fields)
}

/// Text parts become string fields. File parts are summarised as
/// `{ filename, content_type, size }`; their content is not kept.
async fn parse_multipart(content_type: &str, body: Bytes) -> Option<Value> {
    let boundary = multer::parse_boundary(content_type).ok()?;
    let chunks = stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(chunks, boundary);
    let mut fields = Map::new();

    while let Some(field) = multipart.next_field().await.ok()? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().map(|m| m.to_string());
                let size = field.bytes().await.ok()?.len();
                serde_json::json!({
                    "filename": filename,
                    "content_type": content_type,
                    "size": size,
                })
            }
            None => Value::String(field.text().await.ok()?),
        };
        insert_field(&mut fields, name, value);
    }

    Some(Value::Object(fields))
}

/// Repeated field names collect into an array.
fn insert_field(fields: &mut Map<String, Value>, key: String, value: Value) {
    match fields.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_and_url() {
        let req = InboundRequest::new("GET", "/api/feed?limit=20#top").header("Host", "playnite.app");
        assert_eq!(req.path(), "/api/feed");
        let url = req.url().unwrap();
        assert_eq!(url.as_str(), "http://playnite.app/api/feed?limit=20#top");

        let absolute = InboundRequest::new("GET", "https://cdn.playnite.app/static/a.png");
        assert_eq!(absolute.path(), "/static/a.png");
        assert_eq!(absolute.url().unwrap().host_str(), Some("cdn.playnite.app"));
    }

    #[test]
    fn normalized_path_resolves_dot_segments() {
        let req = InboundRequest::new("GET", "/_next/static/../../api/admin/users?x=1");
        assert_eq!(req.path(), "/_next/static/../../api/admin/users");
        assert_eq!(req.normalized_path(), "/api/admin/users");

        let encoded = InboundRequest::new("GET", "/static/%2e%2e/api/rules/reload")
            .header("host", "bad host:port");
        assert_eq!(encoded.normalized_path(), "/api/rules/reload");
    }

    #[test]
    fn client_ip_precedence() {
        let req = InboundRequest::new("GET", "/")
            .header("X-Forwarded-For", "203.0.113.9, 10.0.0.1")
            .header("X-Real-IP", "10.0.0.2");
        assert_eq!(req.client_ip(), "203.0.113.9");

        let req = InboundRequest::new("GET", "/").header("x-real-ip", "10.0.0.2");
        assert_eq!(req.client_ip(), "10.0.0.2");

        assert_eq!(InboundRequest::new("GET", "/").client_ip(), "unknown");
    }

    #[test]
    fn content_length_falls_back_to_body() {
        let req = InboundRequest::new("POST", "/").body("abc");
        assert_eq!(req.content_length(), Some(3));
        let req = InboundRequest::new("POST", "/").header("content-length", "99");
        assert_eq!(req.content_length(), Some(99));
        assert_eq!(InboundRequest::new("GET", "/").content_length(), None);
    }

    #[tokio::test]
    async fn json_bodies() {
        let body = Bytes::from_static(br#"{"title":"Hi","tags":["a"]}"#);
        assert_eq!(
            parse_body(Some("application/json; charset=utf-8"), &body).await,
            Some(json!({"title": "Hi", "tags": ["a"]}))
        );
        assert_eq!(
            parse_body(Some("application/json"), &Bytes::from_static(b"{not json")).await,
            None
        );
    }

    #[tokio::test]
    async fn form_bodies() {
        let body = Bytes::from_static(b"title=Hello+world&tag=a&tag=b");
        assert_eq!(
            parse_body(Some("application/x-www-form-urlencoded"), &body).await,
            Some(json!({"title": "Hello world", "tag": ["a", "b"]}))
        );
    }

    #[tokio::test]
    async fn multipart_bodies() {
        let body = Bytes::from_static(
            b"--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
Beach day\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"beach.jpg\"\r\n\
Content-Type: image/jpeg\r\n\
\r\n\
JPEGDATA\r\n\
--XyZ--\r\n",
        );
        let data = parse_body(Some("multipart/form-data; boundary=XyZ"), &body)
            .await
            .unwrap();
        assert_eq!(data["title"], "Beach day");
        assert_eq!(data["file"]["filename"], "beach.jpg");
        assert_eq!(data["file"]["content_type"], "image/jpeg");
        assert_eq!(data["file"]["size"], 8);
    }

    #[tokio::test]
    async fn unsupported_or_empty_bodies_yield_none() {
        let body = Bytes::from_static(b"plain text");
        assert_eq!(parse_body(Some("text/plain"), &body).await, None);
        assert_eq!(parse_body(None, &body).await, None);
        assert_eq!(parse_body(Some("application/json"), &Bytes::new()).await, None);
    }
}
