//! Request/response transport to the remote project store.
//!
//! The sync worker only sees the [`Transport`] trait. [`HttpTransport`] is
//! the production implementation over reqwest; tests plug in an in-memory
//! remote.

use crate::error::TransportError;
use crate::session::SessionContext;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Media type of the v1 API, used for both directions
pub const API_V1_MEDIA_TYPE: &str = "application/helio.fm.v1+json";

pub const DEVICE_ID_HEADER: &str = "device-id";

/// Remote resource paths
pub mod routes {
    pub fn project(project_id: &str) -> String {
        format!("/projects/{}", project_id)
    }

    pub fn project_revision(project_id: &str, revision_id: &str) -> String {
        format!("/projects/{}/revisions/{}", project_id, revision_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// What came back from the remote
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
    /// Error lines extracted from a failed response
    pub errors: Vec<String>,
}

impl Response {
    /// Response with errors extracted from the body when the status is a failure
    pub fn new(status: u16, body: Value) -> Self {
        let errors = if (200..400).contains(&status) {
            Vec::new()
        } else {
            parse_errors(&body)
        };
        Self { status, body, errors }
    }

    pub fn is_2xx(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is(&self, status: u16) -> bool {
        self.status == status
    }

    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }
}

/// Turn an error body into display lines: `status` and `message` are taken
/// as-is, every other property becomes `key: value`.
pub fn parse_errors(body: &Value) -> Vec<String> {
    let Value::Object(map) = body else {
        return Vec::new();
    };
    map.iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if key == "status" || key == "message" {
                text
            } else {
                format!("{}: {}", key, text)
            }
        })
        .collect()
}

/// A way to reach the remote. Non-2xx statuses are responses, not errors;
/// only a request that could not be completed at all is an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, TransportError>;
}

/// JSON-over-HTTP transport
pub struct HttpTransport {
    base_url: String,
    connect_attempts: u32,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(context: &SessionContext) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(API_V1_MEDIA_TYPE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(API_V1_MEDIA_TYPE));
        headers.insert(USER_AGENT, header_value(&SessionContext::user_agent())?);
        headers.insert(DEVICE_ID_HEADER, header_value(&context.device_id)?);
        if let Some(token) = &context.api_token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }

        // Every session runs on its own runtime, so connections are never kept idle
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(context.request_timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| TransportError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: context.base_url.clone(),
            connect_attempts: context.connect_attempts.max(1),
            http,
        })
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let builder = match method {
            Method::Get => self.http.get(url),
            Method::Put => self.http.put(url),
            Method::Delete => self.http.delete(url),
        };
        let builder = match body {
            Some(payload) => builder.body(payload.to_string()),
            None => builder,
        };
        builder.send().await
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::Connection(format!("Invalid header value {:?}: {}", value, e)))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            debug!(">> {} {} (attempt {})", method.as_str(), path, attempt);
            match self.send_once(method, &url, body.as_ref()).await {
                Ok(response) => break response,
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.connect_attempts => {
                    debug!("{} {} failed to connect: {}, retrying", method.as_str(), path, e);
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => {
                    return Err(TransportError::Connection(format!(
                        "{} {} failed: {}",
                        method.as_str(),
                        path,
                        e
                    )));
                }
            }
        };

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to read response body: {}", e)))?;
        debug!(
            "<< Received {} {}{}",
            status,
            text.chars().take(128).collect::<String>(),
            if text.chars().count() > 128 { ".." } else { "" }
        );

        if text.trim().is_empty() {
            return Ok(Response::new(status, Value::Null));
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(body) => Ok(Response::new(status, body)),
            Err(_) => Ok(Response {
                status,
                body: Value::Null,
                errors: vec!["network error".to_string()],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_lines_from_body() {
        let response = Response::new(
            422,
            json!({ "status": "Unprocessable", "message": "Bad payload", "title": "too long" }),
        );
        assert_eq!(
            response.errors,
            vec!["Unprocessable".to_string(), "Bad payload".to_string(), "title: too long".to_string()]
        );
        assert_eq!(response.first_error(), Some("Unprocessable"));
        assert!(!response.is_2xx());
    }

    #[test]
    fn test_success_has_no_errors() {
        let response = Response::new(200, json!({ "message": "ok" }));
        assert!(response.errors.is_empty());
        assert!(response.is_2xx());
        assert!(response.is(200));
    }

    #[test]
    fn test_routes() {
        assert_eq!(routes::project("p1"), "/projects/p1");
        assert_eq!(routes::project_revision("p1", "r2"), "/projects/p1/revisions/r2");
    }

    #[test]
    fn test_http_transport_builds_with_token() {
        let context = SessionContext {
            base_url: "http://localhost:1".to_string(),
            api_token: Some("secret".to_string()),
            device_id: "device".to_string(),
            connect_attempts: 2,
            request_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_millis(100),
        };
        assert!(HttpTransport::new(&context).is_ok());
    }

    #[tokio::test]
    async fn test_http_transport_connection_refused() {
        let context = SessionContext {
            base_url: "http://127.0.0.1:9".to_string(),
            api_token: None,
            device_id: "device".to_string(),
            connect_attempts: 2,
            request_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_millis(100),
        };
        let transport = HttpTransport::new(&context).unwrap();
        let result = transport.request(Method::Get, "/projects/x", None).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
