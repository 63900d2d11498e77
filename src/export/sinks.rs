use crate::error::ExportError;
use crate::events::SecurityEvent;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for destinations that receive batches of security events
pub trait EventSink: Send + Sync {
    fn send<'a>(
        &'a self,
        batch: &'a [SecurityEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;
}

/// Sink that POSTs each batch as a JSON array
pub struct HttpSink {
    client: Client,
    endpoint: String,
}

impl HttpSink {
    /// Create a new HTTP sink
    ///
    /// # Arguments
    /// * `endpoint` - URL receiving the batches
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `ExportError::HttpError` if the HTTP client cannot be built.
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, ExportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EventSink for HttpSink {
    fn send<'a>(
        &'a self,
        batch: &'a [SecurityEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::to_vec(batch)?;
            let response = self
                .client
                .post(&self.endpoint)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ExportError::Rejected(status.as_u16()));
            }
            Ok(())
        })
    }
}

/// In-memory sink for tests
///
/// Records every batch it accepts and can be switched into a failing mode.
#[derive(Clone, Default)]
pub struct MockSink {
    batches: Arc<Mutex<Vec<Vec<SecurityEvent>>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockSink {
    /// Create a sink that accepts every batch
    pub fn success() -> Self {
        Self::default()
    }

    /// Create a sink that rejects every batch
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = failing;
    }

    /// Batches received so far
    pub fn batches(&self) -> Vec<Vec<SecurityEvent>> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Total events received so far
    pub fn event_count(&self) -> usize {
        self.batches().iter().map(Vec::len).sum()
    }
}

impl EventSink for MockSink {
    fn send<'a>(
        &'a self,
        batch: &'a [SecurityEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>> {
        Box::pin(async move {
            if *self.failing.lock().unwrap_or_else(|e| e.into_inner()) {
                return Err(ExportError::Unavailable("mock sink failure".to_string()));
            }
            self.batches
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(batch.to_vec());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details;
    use chrono::Utc;

    fn event(name: &str) -> SecurityEvent {
        SecurityEvent::new(name, details!(), Utc::now())
    }

    #[tokio::test]
    async fn test_mock_sink_records_batches() {
        let sink = MockSink::success();
        let batch = vec![event("login-failed"), event("suspicious-request")];

        sink.send(&batch).await.unwrap();
        sink.send(&batch[..1]).await.unwrap();

        assert_eq!(sink.batches().len(), 2);
        assert_eq!(sink.event_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_sink_failure() {
        let sink = MockSink::failing();
        let result = sink.send(&[event("login-failed")]).await;

        assert!(matches!(result, Err(ExportError::Unavailable(_))));
        assert_eq!(sink.event_count(), 0);

        sink.set_failing(false);
        assert!(sink.send(&[event("login-failed")]).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_sink_connection_refused() {
        // Port 9 on localhost has nothing listening in test environments
        let sink = HttpSink::new(
            "http://127.0.0.1:9/events".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();
        assert_eq!(sink.endpoint(), "http://127.0.0.1:9/events");

        let result = sink.send(&[event("login-failed")]).await;
        assert!(matches!(result, Err(ExportError::HttpError(_))));
    }

    #[tokio::test]
    async fn test_http_sink_posts_json_array() {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut buffer = [0u8; 1024];
            loop {
                let read = stream.read(&mut buffer).unwrap();
                received.extend_from_slice(&buffer[..read]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length {
                        stream
                            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                            .unwrap();
                        return text[end + 4..].to_string();
                    }
                }
                if read == 0 {
                    return String::new();
                }
            }
        });

        let sink = HttpSink::new(format!("http://{}/events", address), Duration::from_secs(5))
            .unwrap();
        sink.send(&[event("login-failed"), event("suspicious-request")])
            .await
            .unwrap();

        let body: Vec<SecurityEvent> = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(body.len(), 2);
        assert_eq!(body[0].event, "login-failed");
        assert_eq!(body[1].event, "suspicious-request");
    }
}
