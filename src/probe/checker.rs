// src/probe/checker.rs

//! Single-shot endpoint checks.
//!
//! The probe loop talks to a `ProbeChecker` instead of the network directly,
//! so tests can script check outcomes while production uses
//! [`NetworkChecker`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::errors::{KitError, Result};
use crate::probe::{PROBE_HOST, ProbeAction};

/// Transport-level failure of one check.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{url}: timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{url}: {message}")]
    Http { url: String, message: String },

    #[error("{url}: unexpected status {status}")]
    Status { url: String, status: u16 },
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = std::result::Result<(), ProbeError>> + Send + 'a>>;

/// Trait abstracting how one probe check is performed.
pub trait ProbeChecker: Send + Sync {
    /// Run one check against `action`, bounded by `timeout`.
    fn check<'a>(&'a self, action: &'a ProbeAction, timeout: Duration) -> ProbeFuture<'a>;
}

/// Real checker: TCP connect or HTTP GET against `localhost`.
#[derive(Debug, Clone)]
pub struct NetworkChecker {
    client: reqwest::Client,
}

impl NetworkChecker {
    pub fn new() -> Result<Self> {
        // 3xx counts as success, so redirects must not be followed.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| KitError::Other(anyhow::Error::new(e).context("building probe HTTP client")))?;
        Ok(Self { client })
    }

    async fn check_tcp(port: u16, limit: Duration) -> std::result::Result<(), ProbeError> {
        let url = format!("tcp://{PROBE_HOST}:{port}");
        match timeout(limit, TcpStream::connect((PROBE_HOST, port))).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(source)) => Err(ProbeError::Connect { url, source }),
            Err(_elapsed) => Err(ProbeError::Timeout { url, timeout: limit }),
        }
    }

    async fn check_http(&self, url: String, limit: Duration) -> std::result::Result<(), ProbeError> {
        let response = match self.client.get(&url).timeout(limit).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Err(ProbeError::Timeout { url, timeout: limit }),
            Err(e) => {
                return Err(ProbeError::Http {
                    url,
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(ProbeError::Status {
                url,
                status: status.as_u16(),
            })
        }
    }
}

impl ProbeChecker for NetworkChecker {
    fn check<'a>(&'a self, action: &'a ProbeAction, timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(async move {
            match action {
                ProbeAction::TcpSocket { port } => Self::check_tcp(*port, timeout).await,
                ProbeAction::HttpGet { .. } => self.check_http(action.url(), timeout).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn tcp_check_passes_against_open_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let checker = NetworkChecker::new().unwrap();

        let result = checker
            .check(&ProbeAction::TcpSocket { port }, Duration::from_secs(1))
            .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn tcp_check_fails_against_closed_port() {
        let port = free_port().await;
        let checker = NetworkChecker::new().unwrap();

        let result = checker
            .check(&ProbeAction::TcpSocket { port }, Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }

    /// Minimal one-shot HTTP server answering every request with `status`.
    async fn serve_status(status: &'static str) -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let body = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: 0\r\nlocation: /elsewhere\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(body.as_bytes()).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn http_check_accepts_2xx_and_3xx_only() {
        let checker = NetworkChecker::new().unwrap();
        let action = |port| ProbeAction::HttpGet {
            scheme: crate::types::HttpScheme::Http,
            port,
            path: "/healthz".to_string(),
        };

        let ok = serve_status("200 OK").await;
        assert!(checker.check(&action(ok), Duration::from_secs(2)).await.is_ok());

        let redirect = serve_status("302 Found").await;
        assert!(checker.check(&action(redirect), Duration::from_secs(2)).await.is_ok());

        let broken = serve_status("503 Service Unavailable").await;
        let err = checker
            .check(&action(broken), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Status { status: 503, .. }));
    }
}
