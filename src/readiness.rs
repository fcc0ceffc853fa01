//! Backend readiness probing
//!
//! The window is only navigated to the backend once it answers HTTP. Probing
//! is a quick TCP connect followed by a real request, retried with
//! exponential backoff until a deadline.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tauri::Url;

use crate::error::{LauncherError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_millis(800),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyReport {
    pub attempts: u32,
    pub elapsed: Duration,
}

fn host_and_port(url: &str) -> Result<(String, u16)> {
    let invalid = || LauncherError::InvalidUrl(url.to_string());
    let parsed = Url::parse(url).map_err(|_| invalid())?;
    let host = parsed.host_str().ok_or_else(invalid)?;
    let port = parsed.port_or_known_default().ok_or_else(invalid)?;
    Ok((host.to_string(), port))
}

/// Quick TCP-level reachability check (used before HTTP is available).
fn is_tcp_reachable(addrs: &[SocketAddr], timeout: Duration) -> bool {
    addrs
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, timeout).is_ok())
}

/// Any HTTP response counts, including 4xx/5xx: the server is up.
fn is_http_serving(url: &str, timeout: Duration) -> bool {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout(timeout * 4)
        .redirects(0)
        .build();
    match agent.get(url).call() {
        Ok(_) => true,
        Err(ureq::Error::Status(_, _)) => true,
        Err(ureq::Error::Transport(_)) => false,
    }
}

/// A url that cannot be parsed is an error. A host that does not resolve
/// yet is only "not serving".
pub fn probe(url: &str, timeout: Duration) -> Result<bool> {
    let (host, port) = host_and_port(url)?;
    let addrs: Vec<SocketAddr> = match (host.as_str(), port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            log::debug!("Could not resolve {}: {}", host, e);
            return Ok(false);
        }
    };
    Ok(is_tcp_reachable(&addrs, timeout) && is_http_serving(url, timeout))
}

pub fn next_interval(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Block until `url` serves HTTP, the deadline passes, or `still_running`
/// reports that the backend process is gone.
pub fn wait_until_serving<F>(
    url: &str,
    policy: &ReadinessPolicy,
    still_running: F,
) -> Result<ReadyReport>
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempts = 0u32;

    loop {
        if !still_running() {
            return Err(LauncherError::BackendExited {
                url: url.to_string(),
            });
        }

        attempts += 1;
        if probe(url, policy.probe_timeout)? {
            let elapsed = start.elapsed();
            log::debug!("Backend serving at {}", url);
            return Ok(ReadyReport { attempts, elapsed });
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(LauncherError::BackendNotReady {
                url: url.to_string(),
                waited: elapsed,
            });
        }
        log::debug!(
            "Backend not serving yet (attempt {}), retrying in {:?}",
            attempts,
            interval
        );
        std::thread::sleep(interval.min(policy.timeout - elapsed));
        interval = next_interval(interval, policy.max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn quick_policy(timeout_ms: u64) -> ReadinessPolicy {
        ReadinessPolicy {
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(80),
            timeout: Duration::from_millis(timeout_ms),
            probe_timeout: Duration::from_millis(200),
        }
    }

    fn serve_once(listener: TcpListener, status_line: &'static str) {
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                if request.is_empty() {
                    // bare TCP probe
                    continue;
                }
                let response = format!(
                    "{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                let _ = stream.write_all(response.as_bytes());
                break;
            }
        });
    }

    fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let max = Duration::from_millis(300);
        let mut d = Duration::from_millis(50);
        let mut seen = Vec::new();
        for _ in 0..5 {
            d = next_interval(d, max);
            seen.push(d.as_millis());
        }
        assert_eq!(seen, vec![100, 200, 300, 300, 300]);
    }

    #[test]
    fn ready_when_server_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        serve_once(listener, "HTTP/1.1 200 OK");
        let report = wait_until_serving(&url, &quick_policy(5_000), || true).unwrap();
        assert!(report.attempts >= 1);
    }

    #[test]
    fn error_status_still_counts_as_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        serve_once(listener, "HTTP/1.1 500 Internal Server Error");
        assert!(wait_until_serving(&url, &quick_policy(5_000), || true).is_ok());
    }

    #[test]
    fn times_out_on_closed_port() {
        let url = closed_port_url();
        let err = wait_until_serving(&url, &quick_policy(250), || true).unwrap_err();
        match err {
            LauncherError::BackendNotReady { url: u, waited } => {
                assert_eq!(u, url);
                assert!(waited >= Duration::from_millis(250));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stops_when_backend_has_exited() {
        let url = closed_port_url();
        let err = wait_until_serving(&url, &quick_policy(10_000), || false).unwrap_err();
        assert!(matches!(err, LauncherError::BackendExited { .. }));
    }

    #[test]
    fn unresolvable_host_is_retried_until_the_deadline() {
        let url = "http://printdesk-backend.invalid:5000";
        assert!(!probe(url, Duration::from_millis(50)).unwrap());
        let err = wait_until_serving(url, &quick_policy(300), || true).unwrap_err();
        assert!(matches!(err, LauncherError::BackendNotReady { .. }));
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(matches!(
            probe("not a url", Duration::from_millis(10)),
            Err(LauncherError::InvalidUrl(_))
        ));
    }
}
