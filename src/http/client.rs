//! HttpClient - batch upload and settings fetch

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{AnalyticsError, Result};
use crate::types::Settings;

use super::transport::{HttpRequest, Method, Transport};

/// Hook that may rewrite every outgoing request
pub type RequestFactory = Arc<dyn Fn(HttpRequest) -> HttpRequest + Send + Sync>;

/// Result of one batch upload
#[derive(Debug)]
pub enum UploadOutcome {
    /// Accepted; the batch file can be deleted
    Success,
    /// Keep the file and try again on the next flush
    Retryable(AnalyticsError),
    /// Keep the file but do not expect a retry to help
    Fatal(AnalyticsError),
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success)
    }
}

/// Map a batch endpoint status code to an outcome
pub fn classify_upload_status(status: u16) -> UploadOutcome {
    match status {
        1..=299 => UploadOutcome::Success,
        300..=399 => UploadOutcome::Fatal(AnalyticsError::NetworkUnexpectedHttpCode(status)),
        429 => UploadOutcome::Retryable(AnalyticsError::NetworkServerLimited(status)),
        _ => UploadOutcome::Retryable(AnalyticsError::NetworkServerRejected(status)),
    }
}

/// `Basic base64("{write_key}:")`
pub fn authorization_header(write_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:", write_key)))
}

fn endpoint(host: &str, path: &str) -> String {
    format!("https://{}{}", host, path)
}

/// Talks to the batch endpoint and the settings CDN
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    write_key: String,
    cdn_host: String,
    request_factory: Option<RequestFactory>,
}

impl HttpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        write_key: impl Into<String>,
        cdn_host: impl Into<String>,
        request_factory: Option<RequestFactory>,
    ) -> Self {
        Self {
            transport,
            write_key: write_key.into(),
            cdn_host: cdn_host.into(),
            request_factory,
        }
    }

    pub fn user_agent() -> String {
        format!("journify-rust/{}", crate::VERSION)
    }

    fn configured_request(&self, method: Method, url: String, authenticated: bool) -> HttpRequest {
        let mut request = HttpRequest::new(method, url);
        request.set_header("Content-Type", "application/json; charset=utf-8");
        request.set_header("User-Agent", Self::user_agent());
        request.set_header("Accept-Encoding", "gzip");
        if authenticated {
            request.set_header("Authorization", authorization_header(&self.write_key));
        }

        match &self.request_factory {
            Some(factory) => factory(request),
            None => request,
        }
    }

    /// `POST https://{api_host}/batch` with the finalized file as body
    pub async fn upload_batch(&self, api_host: &str, batch: &Path) -> UploadOutcome {
        let body = match tokio::fs::read(batch).await {
            Ok(body) => body,
            Err(_) => {
                return UploadOutcome::Fatal(AnalyticsError::StorageUnableToOpen(batch.to_path_buf()))
            }
        };

        let mut request = self.configured_request(Method::POST, endpoint(api_host, "/batch"), true);
        request.body = Some(body);

        match self.transport.send(request).await {
            Ok(response) => classify_upload_status(response.status),
            Err(e) => {
                tracing::debug!(error = %e, batch = %batch.display(), "batch upload failed");
                UploadOutcome::Retryable(e)
            }
        }
    }

    /// `GET https://{cdn_host}/{write_key}.json`, normalized
    pub async fn settings_for(&self) -> Result<Settings> {
        let url = endpoint(&self.cdn_host, &format!("/{}.json", self.write_key));
        let request = self.configured_request(Method::GET, url, false);

        let response = self.transport.send(request).await?;
        if response.status > 300 {
            return Err(AnalyticsError::NetworkUnexpectedHttpCode(response.status));
        }
        if response.body.is_empty() {
            return Err(AnalyticsError::NetworkInvalidData);
        }

        Settings::from_remote(&response.body).map_err(AnalyticsError::JsonUnableToDeserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    struct Scripted {
        status: u16,
        body: Vec<u8>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(status: u16, body: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.to_vec(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().push(request);
            Ok(HttpResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Err(AnalyticsError::NetworkUnknown("connection refused".into()))
        }
    }

    fn write_batch(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("0-events.batch");
        std::fs::write(&path, "{\"batch\":[\n{}\n]}").unwrap();
        path
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_upload_status(200).is_success());
        assert!(classify_upload_status(100).is_success());
        assert!(matches!(
            classify_upload_status(302),
            UploadOutcome::Fatal(AnalyticsError::NetworkUnexpectedHttpCode(302))
        ));
        assert!(matches!(
            classify_upload_status(429),
            UploadOutcome::Retryable(AnalyticsError::NetworkServerLimited(429))
        ));
        assert!(matches!(
            classify_upload_status(400),
            UploadOutcome::Retryable(AnalyticsError::NetworkServerRejected(400))
        ));
        assert!(matches!(
            classify_upload_status(503),
            UploadOutcome::Retryable(AnalyticsError::NetworkServerRejected(503))
        ));
    }

    #[test]
    fn test_authorization_header() {
        // base64("test:")
        assert_eq!(authorization_header("test"), "Basic dGVzdDo=");
    }

    #[tokio::test]
    async fn test_upload_request_shape() {
        let dir = TempDir::new().unwrap();
        let batch = write_batch(&dir);
        let transport = Scripted::new(200, b"");
        let client = HttpClient::new(transport.clone(), "test", "cdn.example.io", None);

        assert!(client.upload_batch("api.example.io/v1", &batch).await.is_success());

        let seen = transport.seen.lock();
        let request = &seen[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "https://api.example.io/v1/batch");
        assert_eq!(request.header("authorization"), Some("Basic dGVzdDo="));
        assert_eq!(request.header("content-type"), Some("application/json; charset=utf-8"));
        assert_eq!(request.header("accept-encoding"), Some("gzip"));
        assert!(request.header("user-agent").unwrap().starts_with("journify-rust/"));
        assert_eq!(request.body.as_deref(), Some(&b"{\"batch\":[\n{}\n]}"[..]));
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable() {
        let dir = TempDir::new().unwrap();
        let batch = write_batch(&dir);
        let client = HttpClient::new(Arc::new(Offline), "test", "cdn", None);

        match client.upload_batch("api", &batch).await {
            UploadOutcome::Retryable(AnalyticsError::NetworkUnknown(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_factory_rewrites_requests() {
        let dir = TempDir::new().unwrap();
        let batch = write_batch(&dir);
        let transport = Scripted::new(200, b"");
        let factory: RequestFactory = Arc::new(|mut request: HttpRequest| {
            request.url = request.url.replace("api", "proxy");
            request.set_header("X-Proxy", "1");
            request
        });
        let client = HttpClient::new(transport.clone(), "test", "cdn", Some(factory));

        client.upload_batch("api.example.io", &batch).await;

        let seen = transport.seen.lock();
        assert_eq!(seen[0].url, "https://proxy.example.io/batch");
        assert_eq!(seen[0].header("x-proxy"), Some("1"));
    }

    #[tokio::test]
    async fn test_settings_fetch() {
        let body = br#"{"syncs":[{"destination_app":"collector","settings":[{"key":"apiHost","value":"h/v1"}]}]}"#;
        let transport = Scripted::new(200, body);
        let client = HttpClient::new(transport.clone(), "wk", "cdn.example.io/write_keys", None);

        let settings = client.settings_for().await.unwrap();
        assert_eq!(settings.integration_settings("collector").unwrap()["apiHost"], "h/v1");

        let seen = transport.seen.lock();
        assert_eq!(seen[0].method, Method::GET);
        assert_eq!(seen[0].url, "https://cdn.example.io/write_keys/wk.json");
        assert!(seen[0].header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_settings_errors() {
        let client = HttpClient::new(Scripted::new(404, b"nope"), "wk", "cdn", None);
        assert!(matches!(
            client.settings_for().await,
            Err(AnalyticsError::NetworkUnexpectedHttpCode(404))
        ));

        let client = HttpClient::new(Scripted::new(200, b"<html>"), "wk", "cdn", None);
        assert!(matches!(
            client.settings_for().await,
            Err(AnalyticsError::JsonUnableToDeserialize(_))
        ));

        let client = HttpClient::new(Scripted::new(200, b""), "wk", "cdn", None);
        assert!(matches!(client.settings_for().await, Err(AnalyticsError::NetworkInvalidData)));
    }
}
