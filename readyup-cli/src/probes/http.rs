use std::time::Duration;

use async_trait::async_trait;

use readyup_core::model::{HealthCheckSpec, Outcome, Reason};
use readyup_core::probe::Prober;

/// GET a URL and compare the status against the expected range
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Self {
        // Local services never sit behind the user's proxy
        let client = reqwest::Client::builder()
            .no_proxy()
            .user_agent(concat!("readyup/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { client }
    }

    async fn fetch_status(&self, url: &str, timeout: Duration) -> Result<u16, Outcome> {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(e) => Err(classify_reqwest(&e)),
        }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, spec: &HealthCheckSpec, timeout: Duration) -> Outcome {
        let HealthCheckSpec::Http {
            url,
            expected_status,
        } = spec
        else {
            return Outcome::unhealthy(Reason::Unknown, "http checker got a non-http spec");
        };

        match tokio::time::timeout(timeout, self.fetch_status(url, timeout)).await {
            Err(_) => Outcome::unhealthy(Reason::Timeout, format!("no response within {:?}", timeout)),
            Ok(Err(outcome)) => outcome,
            Ok(Ok(code)) if expected_status.contains(code) => Outcome::Healthy,
            Ok(Ok(code)) => Outcome::unhealthy(
                Reason::ProtocolError,
                format!("HTTP {} from {}, expected {}", code, url, expected_status),
            ),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn classify_reqwest(err: &reqwest::Error) -> Outcome {
    use std::error::Error as _;

    let detail = super::errors::short(err);
    if err.is_timeout() {
        return Outcome::unhealthy(Reason::Timeout, detail);
    }

    // The io::Error (or resolver error) sits a few layers down
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            let reason = super::errors::classify_io(io);
            if reason != Reason::Unknown {
                return Outcome::unhealthy(reason, detail);
            }
        }
        let text = inner.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return Outcome::unhealthy(Reason::DnsFailure, detail);
        }
        source = inner.source();
    }

    let reason = if err.is_connect() {
        Reason::ServiceDown
    } else if err.is_builder() || err.is_decode() || err.is_redirect() || err.is_body() {
        Reason::ProtocolError
    } else {
        Reason::Unknown
    };
    Outcome::unhealthy(reason, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use readyup_core::model::StatusRange;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response per connection
    async fn serve(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        port
    }

    fn spec(port: u16, range: StatusRange) -> HealthCheckSpec {
        HealthCheckSpec::Http {
            url: format!("http://127.0.0.1:{}/health", port),
            expected_status: range,
        }
    }

    #[tokio::test]
    async fn test_status_in_range_is_healthy() {
        let port = serve("HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n").await;
        let outcome = HttpProber::new()
            .probe(&spec(port, StatusRange::default()), Duration::from_secs(2))
            .await;
        assert_eq!(outcome, Outcome::Healthy);
    }

    #[tokio::test]
    async fn test_status_out_of_range_is_protocol_error() {
        let port = serve("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n").await;
        let outcome = HttpProber::new()
            .probe(&spec(port, StatusRange::default()), Duration::from_secs(2))
            .await;
        assert_eq!(outcome.reason(), Some(Reason::ProtocolError));

        let outcome = HttpProber::new()
            .probe(&spec(port, StatusRange::new(500, 503)), Duration::from_secs(2))
            .await;
        assert!(outcome.is_healthy());
    }

    #[tokio::test]
    async fn test_nothing_listening_is_service_down() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let outcome = HttpProber::new()
            .probe(&spec(port, StatusRange::default()), Duration::from_secs(2))
            .await;
        assert_eq!(outcome.reason(), Some(Reason::ServiceDown));
    }

    #[tokio::test]
    async fn test_https_with_nothing_listening_is_service_down() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let spec = HealthCheckSpec::Http {
            url: format!("https://127.0.0.1:{}/health", port),
            expected_status: StatusRange::default(),
        };
        let outcome = HttpProber::new().probe(&spec, Duration::from_secs(2)).await;
        assert_eq!(outcome.reason(), Some(Reason::ServiceDown));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        let outcome = HttpProber::new()
            .probe(&spec(port, StatusRange::default()), Duration::from_millis(200))
            .await;
        assert_eq!(outcome.reason(), Some(Reason::Timeout));
    }
}
