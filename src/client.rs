//! HTTP client for the InfluxDB v2 API.
//!
//! This module provides the [`MetricStore`] seam used by the publisher and its
//! production implementation, [`InfluxClient`], which talks to `/health` and
//! `/api/v2/write`. InfluxDB 1.8+ serves the same endpoints, taking a
//! `database/retention-policy` bucket and a `username:password` token.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use crate::config::PublisherConfig;
use crate::line_protocol;
use crate::reading::DerivedMetricRecord;

/// Health status value reported by a healthy server.
pub const HEALTH_PASS: &str = "pass";

/// Response from the `/health` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    /// "pass" or "fail"
    pub status: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub version: Option<String>,
}

impl HealthStatus {
    pub fn is_pass(&self) -> bool {
        self.status == HEALTH_PASS
    }
}

/// Errors that can occur during HTTP client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server returned an error status code
    Status {
        code: StatusCode,
        message: String,
    },

    /// Failed to parse response body
    Parse(String),

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

impl ClientError {
    /// Check if another attempt could succeed.
    ///
    /// Retryable errors include:
    /// - Connection errors
    /// - Timeouts
    /// - Server errors (5xx)
    /// - Rate limiting (429)
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ClientError::Timeout => true,
            ClientError::Status { code, .. } => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
            // Non-retryable errors
            ClientError::Parse(_) => false,
            ClientError::Config(_) => false,
        }
    }
}

/// A time-series store the publisher can check and write to.
pub trait MetricStore: Send + Sync {
    /// Query server health.
    fn health(&self) -> impl Future<Output = Result<HealthStatus, ClientError>> + Send;

    /// Write one record. A single attempt; retries belong to the caller.
    fn write(&self, record: &DerivedMetricRecord) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// InfluxDB client.
///
/// The underlying reqwest client is reused across writes for connection
/// pooling.
pub struct InfluxClient {
    client: Client,
    health_url: Url,
    write_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl InfluxClient {
    /// Create a client from the publisher configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the server URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &PublisherConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let base = config.server_url.trim_end_matches('/');
        let health_url = Url::parse(&format!("{}/health", base))
            .map_err(|e| ClientError::Config(format!("invalid server URL '{}': {}", base, e)))?;
        let write_url = Url::parse_with_params(
            &format!("{}/api/v2/write", base),
            &[("org", ""), ("bucket", config.bucket.as_str()), ("precision", "ns")],
        )
        .map_err(|e| ClientError::Config(format!("invalid server URL '{}': {}", base, e)))?;

        Ok(Self {
            client,
            health_url,
            write_url,
            auth_token: config.auth_token(),
            timeout: config.timeout,
        })
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(AUTHORIZATION, format!("Token {}", token)),
            None => request,
        }
    }
}

impl MetricStore for InfluxClient {
    async fn health(&self) -> Result<HealthStatus, ClientError> {
        let response = self
            .authorize(self.client.get(self.health_url.clone()))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // An unhealthy server answers 503 with the same JSON document.
        match serde_json::from_str::<HealthStatus>(&body) {
            Ok(health) => Ok(health),
            Err(_) if !status.is_success() => Err(ClientError::Status {
                code: status,
                message: body,
            }),
            Err(e) => Err(ClientError::Parse(e.to_string())),
        }
    }

    async fn write(&self, record: &DerivedMetricRecord) -> Result<(), ClientError> {
        let body = line_protocol::encode(record);
        debug!(url = %self.write_url, line = %body, "Writing point");

        let response = self
            .authorize(self.client.post(self.write_url.clone()))
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(ClientError::Status {
                code: status,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{RecordTarget, Reading, ValidationRanges};
    use chrono::{TimeZone, Utc};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn publisher_config(server_url: &str) -> PublisherConfig {
        PublisherConfig {
            server_url: server_url.to_string(),
            username: String::new(),
            password: String::new(),
            bucket: "sensors/autogen".to_string(),
            timeout: Duration::from_secs(2),
            attempts: 3,
        }
    }

    fn test_record() -> DerivedMetricRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        DerivedMetricRecord::derive(
            &Reading::new(20.0, 50.0, at),
            &ValidationRanges::default(),
            &RecordTarget::new("temperature_humidity", "attic"),
        )
        .unwrap()
    }

    /// Serve one canned HTTP response per entry and report each raw request.
    async fn serve(responses: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let request = read_request(&mut socket).await;
                let _ = tx.send(request);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), rx)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::BAD_REQUEST,
            message: "unable to parse points".to_string(),
        };
        assert!(format!("{}", err).contains("400"));
        assert!(format!("{}", err).contains("unable to parse points"));
    }

    #[test]
    fn test_retryable_error_detection() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(!ClientError::Parse("invalid json".to_string()).is_retryable());
        assert!(ClientError::Status {
            code: StatusCode::SERVICE_UNAVAILABLE,
            message: "overloaded".to_string(),
        }
        .is_retryable());
        assert!(ClientError::Status {
            code: StatusCode::TOO_MANY_REQUESTS,
            message: "Rate limited".to_string(),
        }
        .is_retryable());
        assert!(!ClientError::Status {
            code: StatusCode::UNAUTHORIZED,
            message: "unauthorized".to_string(),
        }
        .is_retryable());
        assert!(!ClientError::Config("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_client_urls() {
        let client = InfluxClient::new(&publisher_config("http://influx.local:8086/")).unwrap();
        assert_eq!(client.health_url().as_str(), "http://influx.local:8086/health");
        assert_eq!(
            client.write_url().as_str(),
            "http://influx.local:8086/api/v2/write?org=&bucket=sensors%2Fautogen&precision=ns"
        );
        assert_eq!(client.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_server_url() {
        let result = InfluxClient::new(&publisher_config("http://exa mple.com"));
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_health_status_deserialization() {
        let json = r#"{"name":"influxdb","message":"ready for queries and writes","status":"pass","checks":[],"version":"1.8.10","commit":"x"}"#;
        let health: HealthStatus = serde_json::from_str(json).unwrap();
        assert!(health.is_pass());
        assert_eq!(health.version.as_deref(), Some("1.8.10"));
        assert_eq!(health.name.as_deref(), Some("influxdb"));

        let health: HealthStatus = serde_json::from_str(r#"{"status":"fail"}"#).unwrap();
        assert!(!health.is_pass());
        assert!(health.message.is_none());
    }

    #[tokio::test]
    async fn test_health_pass() {
        let (url, mut requests) = serve(vec![http_response(
            "200 OK",
            r#"{"name":"influxdb","message":"ready for queries and writes","status":"pass"}"#,
        )])
        .await;

        let client = InfluxClient::new(&publisher_config(&url)).unwrap();
        let health = client.health().await.expect("health should succeed");
        assert!(health.is_pass());

        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("GET /health "));
    }

    #[tokio::test]
    async fn test_health_fail_with_503() {
        let (url, _requests) = serve(vec![http_response(
            "503 Service Unavailable",
            r#"{"name":"influxdb","message":"not ready","status":"fail"}"#,
        )])
        .await;

        let client = InfluxClient::new(&publisher_config(&url)).unwrap();
        let health = client.health().await.expect("a fail document is still a response");
        assert!(!health.is_pass());
        assert_eq!(health.message.as_deref(), Some("not ready"));
    }

    #[tokio::test]
    async fn test_health_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = InfluxClient::new(&publisher_config(&format!("http://{}", addr))).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_write_sends_line_protocol() {
        let (url, mut requests) = serve(vec!["HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string()]).await;

        let mut config = publisher_config(&url);
        config.username = "writer".to_string();
        config.password = "secret".to_string();
        let client = InfluxClient::new(&config).unwrap();

        client.write(&test_record()).await.expect("write should succeed");

        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("POST /api/v2/write?org=&bucket=sensors%2Fautogen&precision=ns "));
        assert!(request.to_ascii_lowercase().contains("authorization: token writer:secret"));
        assert!(request.ends_with(
            "temperature_humidity,sensor_name=attic dew_point_f=50,humidity=50,temperature_c=20,temperature_f=68 1709294400000000000"
        ));
    }

    #[tokio::test]
    async fn test_write_error_status() {
        let (url, _requests) = serve(vec![http_response(
            "400 Bad Request",
            r#"{"code":"invalid","message":"partial write"}"#,
        )])
        .await;

        let client = InfluxClient::new(&publisher_config(&url)).unwrap();
        let err = client.write(&test_record()).await.unwrap_err();
        match err {
            ClientError::Status { code, message } => {
                assert_eq!(code, StatusCode::BAD_REQUEST);
                assert!(message.contains("partial write"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
