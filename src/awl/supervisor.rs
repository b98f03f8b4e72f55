//! Reconnect supervisor
//!
//! Keeps one `AwlClient` continuously available for the lifetime of the
//! process. Failed establish attempts back off exponentially, with separate
//! retry windows for connection failures and authentication failures. Once a
//! session is up it is parked in the shared slot for request handlers; when
//! it later dies the supervisor tears it down and starts over after a short
//! pause. This is the only layer that retries — everything below fails fast.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::client::{AwlClient, ClientConfig};
use crate::types::{AwlError, Result, RetryKind};

/// Session slot shared between the supervisor and the request handlers.
///
/// `None` while disconnected; replaced wholesale on every reconnect.
pub type SharedClient = Arc<RwLock<Option<Arc<AwlClient>>>>;

/// Exponential backoff schedule with full jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            max_interval: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `tries` (1-based: first retry gets `base`)
    pub fn delay(&self, tries: u32) -> Duration {
        let exp = self.factor.powi(tries.saturating_sub(1).min(30) as i32);
        let raw = self.base.mul_f64(exp).min(self.max_interval);
        // Full jitter spreads reconnect storms after a vendor outage
        raw.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }
}

/// Supervisor policy
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Cumulative retry window for connection failures; `None` = unbounded
    pub connect_retry_window: Option<Duration>,
    /// Cumulative retry window for authentication failures; `None` = unbounded
    pub login_retry_window: Option<Duration>,
    /// Pause between a session ending and the next establish cycle
    pub restart_pause: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_retry_window: None,
            login_retry_window: None,
            restart_pause: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// What the observer learns about each retry
#[derive(Debug, Clone)]
pub struct RetryDetails {
    /// Time since the establish cycle started
    pub elapsed: Duration,
    /// Attempts so far, including the one that just failed
    pub tries: u32,
    /// Delay before the next attempt
    pub next_wait: Duration,
}

/// Hook for operator-facing reconnect notifications
pub trait SupervisorObserver: Send + Sync {
    /// A connect attempt failed and a retry is scheduled
    fn on_backoff(&self, details: &RetryDetails, err: &AwlError);
    /// A session came up after more than one attempt
    fn on_success(&self, details: &RetryDetails);
}

/// Default observer: stays quiet through brief blips, escalates once
/// disconnection outlasts the configured grace period.
pub struct LogObserver {
    pub warn_after: Duration,
}

impl SupervisorObserver for LogObserver {
    fn on_backoff(&self, details: &RetryDetails, err: &AwlError) {
        if details.elapsed > self.warn_after {
            error!(
                "cannot reconnect to AWL after {} tries over {:.1}s ({}); retrying in {:.1}s",
                details.tries,
                details.elapsed.as_secs_f64(),
                err,
                details.next_wait.as_secs_f64(),
            );
        } else {
            info!(
                "AWL connect attempt {} failed ({}); retrying in {:.1}s",
                details.tries,
                err,
                details.next_wait.as_secs_f64(),
            );
        }
    }

    fn on_success(&self, details: &RetryDetails) {
        warn!(
            "reconnected to AWL after {:.1}s ({} tries)",
            details.elapsed.as_secs_f64(),
            details.tries,
        );
    }
}

/// Control loop that owns session establishment and replacement
pub struct ReconnectSupervisor {
    username: String,
    password: String,
    client_config: ClientConfig,
    config: SupervisorConfig,
    slot: SharedClient,
    observer: Arc<dyn SupervisorObserver>,
}

impl ReconnectSupervisor {
    pub fn new(
        username: &str,
        password: &str,
        client_config: ClientConfig,
        config: SupervisorConfig,
        slot: SharedClient,
        observer: Arc<dyn SupervisorObserver>,
    ) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_config,
            config,
            slot,
            observer,
        }
    }

    /// Run the supervisor for the lifetime of the process.
    ///
    /// Returns only when a retry window is exhausted; with both windows
    /// unbounded it never returns.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> Result<()> {
        loop {
            let client = match self.establish().await {
                Ok(client) => client,
                Err(e) => {
                    error!("giving up on AWL session establishment: {e}");
                    return Err(e);
                }
            };
            *self.slot.write().await = Some(Arc::clone(&client));

            match client.wait_closed().await {
                Ok(()) => info!("AWL session closed"),
                Err(e) => warn!("AWL session ended: {e}"),
            }

            // Tear down before the slot refills so readers fail fast
            *self.slot.write().await = None;
            client.close().await;

            tokio::time::sleep(self.config.restart_pause).await;
            info!("reconnecting to AWL");
        }
    }

    /// One establish cycle: connect with exponential backoff until a session
    /// is up or the failing kind's retry window runs out.
    async fn establish(&self) -> Result<Arc<AwlClient>> {
        let started = Instant::now();
        let mut tries: u32 = 0;

        loop {
            tries += 1;
            match self.try_connect().await {
                Ok(client) => {
                    if tries > 1 {
                        self.observer.on_success(&RetryDetails {
                            elapsed: started.elapsed(),
                            tries,
                            next_wait: Duration::ZERO,
                        });
                    }
                    return Ok(client);
                }
                Err(e) => {
                    let window = match e.retry_kind() {
                        RetryKind::Connection => self.config.connect_retry_window,
                        RetryKind::Login => self.config.login_retry_window,
                    };
                    let elapsed = started.elapsed();
                    let next_wait = self.config.backoff.delay(tries);
                    if let Some(window) = window {
                        if elapsed + next_wait > window {
                            return Err(e);
                        }
                    }
                    self.observer.on_backoff(
                        &RetryDetails {
                            elapsed,
                            tries,
                            next_wait,
                        },
                        &e,
                    );
                    tokio::time::sleep(next_wait).await;
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<Arc<AwlClient>> {
        let client = Arc::new(AwlClient::new(
            &self.username,
            &self.password,
            self.client_config.clone(),
        )?);
        match client.connect().await {
            Ok(()) => Ok(client),
            Err(e) => {
                // Half-open sessions must not leak sockets or cookies
                client.close().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            factor: 2.0,
            max_interval: Duration::from_secs(30),
        };
        // Jitter keeps delays in [raw/2, raw]
        let d1 = policy.delay(1);
        assert!(d1 >= Duration::from_millis(500) && d1 <= Duration::from_secs(1));
        let d4 = policy.delay(4);
        assert!(d4 >= Duration::from_secs(4) && d4 <= Duration::from_secs(8));
        let d20 = policy.delay(20);
        assert!(d20 <= Duration::from_secs(30));
        assert!(d20 >= Duration::from_secs(15));
    }

    #[test]
    fn test_retry_kind_split() {
        assert_eq!(
            AwlError::Connection("refused".into()).retry_kind(),
            RetryKind::Connection
        );
        assert_eq!(
            AwlError::Login("bad password".into()).retry_kind(),
            RetryKind::Login
        );
        // Login-sequence failures draw from the login budget too
        assert_eq!(
            AwlError::TransactionTimeout.retry_kind(),
            RetryKind::Login
        );
    }
}
