//! HTTP client for the attendance API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::traits::{CloudClient, CloudError};
use crate::config::CloudConfig;
use crate::queue::QueueRecord;

/// Posts queued records to `{base_url}/attendance`.
///
/// The natural dedupe key travels as `Idempotency-Key`, so a redelivered
/// record maps to the same remote row.
pub struct HttpCloudClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    read_timeout: Duration,
}

impl HttpCloudClient {
    pub fn new(config: &CloudConfig) -> Result<Self, CloudError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .map_err(|e| CloudError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/attendance", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            read_timeout: config.read_timeout(),
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> CloudError {
        if err.is_timeout() {
            CloudError::Timeout(self.read_timeout)
        } else {
            CloudError::Connect(err.to_string())
        }
    }
}

/// Server id from the response body: `id`, `record_id` or `data.id`,
/// as a string or a number.
fn cloud_record_id(body: &Value) -> Option<String> {
    let candidate = body
        .get("id")
        .or_else(|| body.get("record_id"))
        .or_else(|| body.get("data").and_then(|d| d.get("id")))?;
    match candidate {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn upload(&self, record: &QueueRecord) -> Result<String, CloudError> {
        let payload = record
            .payload_json()
            .map_err(|e| CloudError::InvalidResponse(format!("unreadable payload: {e}")))?;

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = record.dedupe_key() {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CloudError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CloudError::InvalidResponse(e.to_string()))?;
        let id = cloud_record_id(&body)
            .ok_or_else(|| CloudError::InvalidResponse("response carries no record id".to_string()))?;

        debug!(queue_id = record.id, cloud_id = %id, "Record uploaded");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{RecordState, RecordType};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn record() -> QueueRecord {
        QueueRecord {
            id: 3,
            record_type: RecordType::Attendance,
            payload: json!({
                "student_id": "S-1",
                "timestamp": "2026-10-16T07:20:00",
                "scan_type": "login",
                "status": "late",
                "dedupe_key": "S-1:2026-10-16T07:20:00:login",
            })
            .to_string(),
            priority: 0,
            retry_count: 0,
            created_at: 0,
            last_attempt: None,
            error_message: None,
            state: RecordState::Pending,
        }
    }

    /// Answers one request with `response` and hands back the request head.
    async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 4096];
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&seen).to_lowercase()
        });
        (base, handle)
    }

    fn client(base_url: String) -> HttpCloudClient {
        HttpCloudClient::new(&CloudConfig {
            base_url,
            api_key: Some("secret".into()),
            ..CloudConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_record_id_shapes() {
        assert_eq!(cloud_record_id(&json!({"id": "abc"})), Some("abc".into()));
        assert_eq!(cloud_record_id(&json!({"record_id": 42})), Some("42".into()));
        assert_eq!(cloud_record_id(&json!({"data": {"id": 7}})), Some("7".into()));
        assert_eq!(cloud_record_id(&json!({"id": ""})), None);
        assert_eq!(cloud_record_id(&json!({"ok": true})), None);
    }

    #[tokio::test]
    async fn test_upload_sends_idempotency_key_and_reads_id() {
        let body = r#"{"id":"cloud-9"}"#;
        let response = format!(
            "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let (base, server) = serve_once(response).await;

        let id = client(base).upload(&record()).await.unwrap();
        let request = server.await.unwrap();

        assert_eq!(id, "cloud-9");
        assert!(request.starts_with("post /attendance"));
        assert!(request.contains("idempotency-key: s-1:2026-10-16t07:20:00:login"));
        assert!(request.contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_http() {
        let (base, _server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy".to_string(),
        )
        .await;

        let err = client(base).upload(&record()).await.unwrap_err();
        assert_eq!(err, CloudError::Http { status: 503, message: "busy".into() });
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client(base).upload(&record()).await.unwrap_err();
        assert!(matches!(err, CloudError::Connect(_)));
    }
}
