use super::events::{EventBus, StreamUpdate, UpdateCategory};
use super::identity::StreamIdentity;
use super::registry::{ConnectionEntry, ConnectionRegistry};
use super::session::{ListenKeyApi, SessionKeyManager, UserDataRelay};
use super::supervisor::SocketSupervisor;
use crate::core::config::StreamConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::WsConnector;
use crate::core::types::KlineInterval;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Public streaming client: named market streams plus the user data stream.
///
/// Open calls validate the stream synchronously and then connect in a
/// background task; everything that happens after that is reported through
/// `subscribe`.
pub struct BinanceStreams<A: ListenKeyApi, C: WsConnector> {
    session: Arc<SessionKeyManager<A>>,
    supervisor: Arc<SocketSupervisor<A, C>>,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventBus>,
    config: StreamConfig,
}

impl<A: ListenKeyApi, C: WsConnector> BinanceStreams<A, C> {
    pub fn new(api: A, connector: C, config: StreamConfig) -> Result<Self, ExchangeError> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let events = Arc::new(EventBus::new());
        let session = Arc::new(SessionKeyManager::new(
            api,
            registry.clone(),
            events.clone(),
            &config,
        ));
        let supervisor = Arc::new(SocketSupervisor::new(
            session.clone(),
            registry.clone(),
            events.clone(),
            connector,
            config.base_url.clone(),
        ));
        let relay: Weak<dyn UserDataRelay> = Arc::downgrade(&supervisor) as Weak<dyn UserDataRelay>;
        session.bind_relay(relay);

        Ok(Self {
            session,
            supervisor,
            registry,
            events,
            config,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionKeyManager<A>> {
        &self.session
    }

    /// Receive every update emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamUpdate> {
        self.events.subscribe()
    }

    /// Current listen key, if a session is active
    pub fn listen_key(&self) -> Option<String> {
        self.session.current_key()
    }

    pub fn is_session_active(&self) -> bool {
        self.session.is_active()
    }

    /// Start the user data session without opening any socket
    pub async fn open_websockets(&self) -> bool {
        self.session.ensure_started().await
    }

    /// Close every socket and end the user data session
    pub async fn close_websockets(&self) {
        self.session.stop().await;
    }

    pub fn open_depth(&self, symbol: &str) -> Result<JoinHandle<()>, ExchangeError> {
        self.open(StreamIdentity::depth(symbol))
    }

    pub fn open_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
    ) -> Result<JoinHandle<()>, ExchangeError> {
        self.open(StreamIdentity::klines(symbol, interval))
    }

    pub fn open_trades(&self, symbol: &str) -> Result<JoinHandle<()>, ExchangeError> {
        self.open(StreamIdentity::agg_trades(symbol))
    }

    pub fn open_user_data(&self) -> Result<JoinHandle<()>, ExchangeError> {
        self.open(StreamIdentity::UserData)
    }

    /// Connect any stream identity in the background
    pub fn open(&self, identity: StreamIdentity) -> Result<JoinHandle<()>, ExchangeError> {
        identity.validate()?;
        let supervisor = self.supervisor.clone();
        Ok(tokio::spawn(async move { supervisor.connect(identity).await }))
    }

    pub fn close_depth(&self, symbol: &str) -> Result<bool, ExchangeError> {
        self.close(&StreamIdentity::depth(symbol))
    }

    pub fn close_klines(&self, symbol: &str, interval: KlineInterval) -> Result<bool, ExchangeError> {
        self.close(&StreamIdentity::klines(symbol, interval))
    }

    pub fn close_trades(&self, symbol: &str) -> Result<bool, ExchangeError> {
        self.close(&StreamIdentity::agg_trades(symbol))
    }

    pub fn close_user_data(&self) -> Result<bool, ExchangeError> {
        self.close(&StreamIdentity::UserData)
    }

    /// Request closing the stream's connection. `Ok(false)` when it is not open.
    pub fn close(&self, identity: &StreamIdentity) -> Result<bool, ExchangeError> {
        identity.validate()?;
        match self.supervisor.resolve(identity) {
            Ok(url) => Ok(self.close_socket(&url)),
            // User data without a key cannot be open
            Err(_) => {
                self.report_not_found(&identity.to_string());
                Ok(false)
            }
        }
    }

    /// Request closing the connection registered under `url`
    pub fn close_socket(&self, url: &str) -> bool {
        if self.registry.request_close(url) {
            debug!(url = %url, "Close requested");
            true
        } else {
            self.report_not_found(url);
            false
        }
    }

    pub fn list_active(&self) -> Vec<ConnectionEntry> {
        self.registry.list()
    }

    /// Request closing every connection; the session stays up
    pub fn close_all(&self) -> usize {
        self.registry.request_close_all()
    }

    /// Close every connection and end the session
    pub async fn shutdown(&self) {
        self.close_all();
        self.session.stop().await;
    }

    fn report_not_found(&self, target: &str) {
        self.events.emit(
            UpdateCategory::EndpointStatus,
            format!("No matching active connection exists. ({})", target),
        );
    }
}
