use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use readyup_core::model::{HealthCheckSpec, Outcome, Reason};
use readyup_core::probe::Prober;

use super::errors::{classify_io, short};

/// Resolve `host:port`, mapping resolver failures to `DnsFailure`
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, Outcome> {
    match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            if addrs.is_empty() {
                Err(Outcome::unhealthy(
                    Reason::DnsFailure,
                    format!("{} resolved to no addresses", host),
                ))
            } else {
                Ok(addrs)
            }
        }
        Err(e) => Err(Outcome::unhealthy(
            Reason::DnsFailure,
            format!("cannot resolve {}: {}", host, short(&e)),
        )),
    }
}

/// Connect to the first address that accepts
pub async fn connect(host: &str, port: u16) -> Result<TcpStream, Outcome> {
    let addrs = resolve(host, port).await?;
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::trace!(%addr, error = %e, "connect failed");
                last = Some(Outcome::unhealthy(
                    classify_io(&e),
                    format!("{}:{}: {}", host, port, short(&e)),
                ));
            }
        }
    }
    Err(last.unwrap_or_else(|| Outcome::unhealthy(Reason::Unknown, "no address to connect to")))
}

/// Healthy once something accepts a TCP connection
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, spec: &HealthCheckSpec, timeout: Duration) -> Outcome {
        let HealthCheckSpec::Tcp { host, port } = spec else {
            return Outcome::unhealthy(Reason::Unknown, "tcp checker got a non-tcp spec");
        };
        match tokio::time::timeout(timeout, connect(host, *port)).await {
            Ok(Ok(_)) => Outcome::Healthy,
            Ok(Err(outcome)) => outcome,
            Err(_) => Outcome::unhealthy(Reason::Timeout, format!("connect timed out after {:?}", timeout)),
        }
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
