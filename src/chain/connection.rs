//! Single long-lived streaming connection to a chain node
//!
//! Owns exactly one alloy WebSocket provider, reconnects with exponential
//! backoff, and runs a periodic health check to catch silent drops the
//! socket layer never surfaces as a close. Observers subscribe to a
//! broadcast channel of [`ConnectionEvent`]s; the connection itself buffers
//! nothing across drops, so the event listener re-attaches its watchers on
//! every `Connected`.

use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::PubSubFrontend;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::error::{ChainError, Result};
use super::state::{ConnectionStatus, ReconnectPolicy};
use crate::constants::connection as consts;

/// Provider type for the streaming node connection
pub type WsProvider = RootProvider<PubSubFrontend>;

/// Notifications emitted by the connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Error(String),
    /// The reconnect budget is exhausted; listening stops until a caller
    /// intervenes.
    GaveUp,
}

struct Inner {
    ws_url: Url,
    policy: ReconnectPolicy,
    health_check_interval: Duration,
    status: RwLock<ConnectionStatus>,
    provider: RwLock<Option<Arc<WsProvider>>>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    cancel: RwLock<CancellationToken>,
}

/// Maintains one active streaming connection to the configured node.
#[derive(Clone)]
pub struct ChainConnection {
    inner: Arc<Inner>,
}

impl ChainConnection {
    /// Creates a connection for a streaming-capable node URL.
    ///
    /// Rejects anything that is not `ws://` or `wss://` so the relay can
    /// never silently fall back to polling.
    pub fn new(ws_url: &str) -> Result<Self> {
        Self::with_policy(ws_url, ReconnectPolicy::default())
    }

    /// Creates a connection with a custom reconnect policy.
    pub fn with_policy(ws_url: &str, policy: ReconnectPolicy) -> Result<Self> {
        let url = Url::parse(ws_url).map_err(|e| ChainError::InvalidUrl {
            url: ws_url.to_string(),
            reason: e.to_string(),
        })?;

        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ChainError::StreamingRequired(ws_url.to_string()));
        }

        let (events_tx, _) = broadcast::channel(64);

        Ok(Self {
            inner: Arc::new(Inner {
                ws_url: url,
                policy,
                health_check_interval: Duration::from_secs(consts::HEALTH_CHECK_INTERVAL_SECS),
                status: RwLock::new(ConnectionStatus::Disconnected),
                provider: RwLock::new(None),
                events_tx,
                cancel: RwLock::new(CancellationToken::new()),
            }),
        })
    }

    /// Subscribes to connection lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Current provider, if connected.
    pub async fn provider(&self) -> Option<Arc<WsProvider>> {
        self.inner.provider.read().await.clone()
    }

    /// True only while a live provider is held.
    pub async fn is_connected(&self) -> bool {
        *self.inner.status.read().await == ConnectionStatus::Connected
            && self.inner.provider.read().await.is_some()
    }

    /// Current lifecycle status.
    pub async fn status(&self) -> ConnectionStatus {
        *self.inner.status.read().await
    }

    /// Opens the streaming socket. No-op when already connected or
    /// connecting. On failure the reconnect loop is scheduled before the
    /// error is returned, so callers see the failure but recovery is
    /// already underway.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut status = self.inner.status.write().await;
            match *status {
                ConnectionStatus::Connected | ConnectionStatus::Connecting => return Ok(()),
                ConnectionStatus::Disconnected => *status = ConnectionStatus::Connecting,
            }
        }

        // A previous disconnect() leaves a cancelled token behind.
        {
            let mut cancel = self.inner.cancel.write().await;
            if cancel.is_cancelled() {
                *cancel = CancellationToken::new();
            }
        }

        match Self::open_socket(&self.inner.ws_url).await {
            Ok(provider) => {
                self.install_provider(provider).await;
                self.spawn_supervisor();
                Ok(())
            }
            Err(e) => {
                *self.inner.status.write().await = ConnectionStatus::Disconnected;
                let _ = self
                    .inner
                    .events_tx
                    .send(ConnectionEvent::Error(e.to_string()));
                let this = self.clone();
                tokio::spawn(async move {
                    if this.reconnect_loop().await {
                        this.spawn_supervisor();
                    }
                });
                Err(e)
            }
        }
    }

    /// Stops reconnection, tears down the socket, and releases the
    /// health-check task. Safe to call while operations are in flight.
    pub async fn disconnect(&self) {
        self.inner.cancel.read().await.cancel();
        *self.inner.provider.write().await = None;
        *self.inner.status.write().await = ConnectionStatus::Disconnected;
        let _ = self.inner.events_tx.send(ConnectionEvent::Disconnected);
        info!("Disconnected from node at {}", self.inner.ws_url);
    }

    async fn open_socket(url: &Url) -> Result<WsProvider> {
        debug!("Opening streaming connection to {url}");
        let connect = ProviderBuilder::new().on_ws(WsConnect::new(url.as_str()));

        match timeout(Duration::from_secs(consts::CONNECT_TIMEOUT_SECS), connect).await {
            Ok(Ok(provider)) => Ok(provider),
            Ok(Err(e)) => Err(ChainError::ConnectFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ChainError::ConnectTimeout(url.to_string())),
        }
    }

    async fn install_provider(&self, provider: WsProvider) {
        *self.inner.provider.write().await = Some(Arc::new(provider));
        *self.inner.status.write().await = ConnectionStatus::Connected;
        let _ = self.inner.events_tx.send(ConnectionEvent::Connected);
        info!("Connected to node at {}", self.inner.ws_url);
    }

    fn spawn_supervisor(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            this.supervise().await;
        });
    }

    /// Health-check loop: every interval, probe the provider; a failed probe
    /// follows the same teardown-and-reconnect path as a socket close.
    async fn supervise(&self) {
        let cancel = self.inner.cancel.read().await.clone();

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.inner.health_check_interval) => {}
                () = cancel.cancelled() => return,
            }

            if self.probe().await {
                continue;
            }

            warn!("Health check failed for node at {}", self.inner.ws_url);
            *self.inner.provider.write().await = None;
            *self.inner.status.write().await = ConnectionStatus::Disconnected;
            let _ = self.inner.events_tx.send(ConnectionEvent::Disconnected);

            if !self.reconnect_loop().await {
                return;
            }
        }
    }

    async fn probe(&self) -> bool {
        let Some(provider) = self.provider().await else {
            return false;
        };

        matches!(
            timeout(
                Duration::from_secs(consts::CONNECT_TIMEOUT_SECS),
                provider.get_block_number(),
            )
            .await,
            Ok(Ok(_))
        )
    }

    /// Backoff-driven reconnect. Returns true once reconnected; false when
    /// cancelled or the attempt budget is exhausted.
    async fn reconnect_loop(&self) -> bool {
        let cancel = self.inner.cancel.read().await.clone();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if self.inner.policy.exhausted(attempt.saturating_sub(1)) {
                error!(
                    "Giving up on node at {} after {} reconnect attempts",
                    self.inner.ws_url,
                    attempt - 1
                );
                let _ = self.inner.events_tx.send(ConnectionEvent::GaveUp);
                return false;
            }

            let delay = self.inner.policy.delay_for(attempt);
            debug!(
                "Reconnect attempt {attempt} to {} in {}s",
                self.inner.ws_url,
                delay.as_secs()
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return false,
            }

            *self.inner.status.write().await = ConnectionStatus::Connecting;
            match Self::open_socket(&self.inner.ws_url).await {
                Ok(provider) => {
                    // Successful connect resets the attempt counter.
                    self.install_provider(provider).await;
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Reconnect attempt {attempt} to {} failed: {e}",
                        self.inner.ws_url
                    );
                    *self.inner.status.write().await = ConnectionStatus::Disconnected;
                    let _ = self
                        .inner
                        .events_tx
                        .send(ConnectionEvent::Error(e.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_http_urls() {
        let result = ChainConnection::new("https://eth.example.com");
        assert!(matches!(result, Err(ChainError::StreamingRequired(_))));
    }

    #[test]
    fn rejects_unparsable_urls() {
        let result = ChainConnection::new("not a url");
        assert!(matches!(result, Err(ChainError::InvalidUrl { .. })));
    }

    #[test]
    fn accepts_ws_and_wss_urls() {
        assert!(ChainConnection::new("ws://localhost:8546").is_ok());
        assert!(ChainConnection::new("wss://eth.example.com/ws").is_ok());
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        assert!(!connection.is_connected().await);
        assert_eq!(connection.status().await, ConnectionStatus::Disconnected);
        assert!(connection.provider().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_is_safe_without_a_connection() {
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let mut events = connection.subscribe();
        connection.disconnect().await;
        assert!(matches!(
            events.recv().await,
            Ok(ConnectionEvent::Disconnected)
        ));
        assert!(!connection.is_connected().await);
    }

    #[tokio::test]
    async fn failed_connect_reports_error_and_schedules_reconnect() {
        // Nothing listens on this port; connect must fail fast, emit an
        // error signal, and leave the connection disconnected.
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            max_attempts: 1,
        };
        let connection = ChainConnection::with_policy("ws://127.0.0.1:1", policy).unwrap();
        let mut events = connection.subscribe();

        let result = connection.connect().await;
        assert!(result.is_err());

        match events.recv().await {
            Ok(ConnectionEvent::Error(_)) => {}
            other => panic!("expected error event, got {other:?}"),
        }

        // With a one-attempt budget the reconnect task gives up quickly.
        let mut saw_give_up = false;
        for _ in 0..3 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Ok(ConnectionEvent::GaveUp)) => {
                    saw_give_up = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_give_up);
        assert!(!connection.is_connected().await);
    }
}
