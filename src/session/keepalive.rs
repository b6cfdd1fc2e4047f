//! Periodic keep-alive pinger.
//!
//! While a session is confirmed, a plain HTTP GET hits
//! `https://<host>/keepalive?sid=<session>` on a fixed interval, carrying
//! the session cookies. Responses are logged only; they never affect
//! session state.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::credentials::SessionCredentials;

// ============================================================================
// Constants
// ============================================================================

/// Seconds between keep-alive requests.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// KeepAlive
// ============================================================================

/// Handle to the keep-alive task. Stopped on session abort; cookie state is
/// rebuilt from credentials on every successful open.
pub(crate) struct KeepAlive {
    task: JoinHandle<()>,
}

impl KeepAlive {
    /// Starts the periodic pinger for the given credentials.
    pub(crate) fn start(credentials: &SessionCredentials) -> Self {
        let request = format!(
            "https://{}/keepalive?sid={}",
            credentials.host(),
            credentials.session()
        );
        let cookies = Self::cookie_header(credentials);

        let task = tokio::spawn(async move {
            let client = reqwest::Client::new();
            let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
            // First tick fires immediately; the session just proved itself.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match client
                    .get(&request)
                    .header(reqwest::header::COOKIE, &cookies)
                    .send()
                    .await
                {
                    Ok(response) if !response.status().is_success() => {
                        debug!(status = %response.status(), "keep-alive request rejected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "keep-alive request failed");
                    }
                }
            }
        });

        Self { task }
    }

    /// Stops the pinger.
    pub(crate) fn stop(&self) {
        self.task.abort();
    }

    fn cookie_header(credentials: &SessionCredentials) -> String {
        match credentials.affinity() {
            Some(affinity) => {
                format!("um_session={}; WEBSRV={affinity}", credentials.correlation())
            }
            None => format!("um_session={}", credentials.correlation()),
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(affinity: Option<&str>) -> SessionCredentials {
        SessionCredentials::new(
            "u",
            "p",
            "s1",
            "m1",
            "h",
            "d",
            affinity.map(str::to_string),
        )
        .expect("valid credentials")
    }

    #[test]
    fn test_cookie_header_without_affinity() {
        assert_eq!(
            KeepAlive::cookie_header(&credentials(None)),
            "um_session=m1"
        );
    }

    #[test]
    fn test_cookie_header_with_affinity() {
        assert_eq!(
            KeepAlive::cookie_header(&credentials(Some("srv-3"))),
            "um_session=m1; WEBSRV=srv-3"
        );
    }
}
