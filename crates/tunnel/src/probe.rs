//! Local endpoint probes used by the supervisor before a restart.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::debug;

use crate::error::TunnelError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub trait PortProbe: Send + Sync + 'static {
    /// Whether `addr` can be bound right now.
    fn is_free(&self, addr: SocketAddr) -> impl Future<Output = bool> + Send;

    /// Whether something at `addr` already answers the health request.
    fn is_serving(&self, addr: SocketAddr) -> impl Future<Output = bool> + Send;
}

/// Bind test plus `GET <path>` expecting a 2xx.
#[derive(Debug, Clone)]
pub struct HttpPortProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpPortProbe {
    pub fn new(path: impl Into<String>) -> Result<Self, TunnelError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| TunnelError::Probe(e.to_string()))?;
        Ok(Self {
            client,
            path: path.into(),
        })
    }

    pub fn url(&self, addr: SocketAddr) -> String {
        format!("http://{addr}{}", self.path)
    }
}

impl PortProbe for HttpPortProbe {
    async fn is_free(&self, addr: SocketAddr) -> bool {
        match TcpListener::bind(addr).await {
            Ok(_listener) => true,
            Err(e) => {
                debug!(addr = %addr, error = %e, "local endpoint is busy");
                false
            }
        }
    }

    async fn is_serving(&self, addr: SocketAddr) -> bool {
        match self.client.get(self.url(addr)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn serve_once(listener: TcpListener, status_line: &'static str) {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            let _ = stream.write_all(response.as_bytes()).await;
        }
    }

    #[tokio::test]
    async fn bound_port_is_not_free() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = HttpPortProbe::new("/healthz").unwrap();

        assert!(!probe.is_free(addr).await);
        drop(listener);
        assert!(probe.is_free(addr).await);
    }

    #[tokio::test]
    async fn healthy_endpoint_is_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, "HTTP/1.1 200 OK"));

        let probe = HttpPortProbe::new("/healthz").unwrap();
        assert!(probe.is_serving(addr).await);
    }

    #[tokio::test]
    async fn error_status_is_not_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, "HTTP/1.1 503 Service Unavailable"));

        let probe = HttpPortProbe::new("/healthz").unwrap();
        assert!(!probe.is_serving(addr).await);
    }

    #[tokio::test]
    async fn closed_port_is_not_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpPortProbe::new("/healthz").unwrap();
        assert!(!probe.is_serving(addr).await);
        assert_eq!(probe.url(addr), format!("http://{addr}/healthz"));
    }
}
