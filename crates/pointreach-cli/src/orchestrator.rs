//! HTTP client for the task orchestrator's status endpoint.
//!
//! `GET <base>/status` returns the status token as plain text. A refused
//! connection means no orchestrator is running; anything else that goes
//! wrong means it is running but unreachable.

use std::time::Duration;

use pointreach_kernel::OrchestratorStatus;
use pointreach_types::ReachError;

pub struct HttpOrchestrator {
    status_url: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpOrchestrator {
    /// An empty `base_url` disables the orchestrator.
    ///
    /// Must not be called from inside a Tokio runtime.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ReachError> {
        let base = base_url.trim().trim_end_matches('/');
        let status_url = (!base.is_empty()).then(|| format!("{base}/status"));
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReachError::Startup(format!("failed to build orchestrator client: {e}")))?;
        Ok(Self { status_url, client })
    }
}

impl OrchestratorStatus for HttpOrchestrator {
    fn status(&self) -> Result<Option<String>, ReachError> {
        let Some(url) = &self.status_url else {
            return Ok(None);
        };
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) if e.is_connect() => return Ok(None),
            Err(e) => return Err(ReachError::Channel(format!("orchestrator at {url}: {e}"))),
        };
        if !response.status().is_success() {
            return Err(ReachError::Channel(format!(
                "orchestrator returned HTTP {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .map_err(|e| ReachError::Channel(format!("orchestrator reply: {e}")))?;
        Ok(Some(body.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve exactly one canned HTTP response on a random port.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let reply = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    fn client(url: &str) -> HttpOrchestrator {
        HttpOrchestrator::new(url, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn empty_url_means_no_orchestrator() {
        assert_eq!(client("").status(), Ok(None));
    }

    #[test]
    fn refused_connection_means_no_orchestrator() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        assert_eq!(client(&format!("http://127.0.0.1:{port}")).status(), Ok(None));
    }

    #[test]
    fn status_token_is_trimmed() {
        let url = serve_once("200 OK", "idle\n");
        assert_eq!(client(&url).status(), Ok(Some("idle".to_string())));
    }

    #[test]
    fn http_error_is_unreachable() {
        let url = serve_once("503 Service Unavailable", "");
        assert!(matches!(client(&url).status(), Err(ReachError::Channel(_))));
    }
}
