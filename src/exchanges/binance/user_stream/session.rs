use super::events::{describe_error, EventBus, UpdateCategory};
use super::identity::{endpoint_url, StreamIdentity};
use super::registry::ConnectionRegistry;
use super::timer::RepeatingTimer;
use crate::core::config::StreamConfig;
use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Listen key endpoints. Key-authenticated, never signed.
#[async_trait]
pub trait ListenKeyApi: Send + Sync + 'static {
    /// Open a user data stream and return its listen key
    async fn start_user_data_stream(&self) -> Result<String, ExchangeError>;

    /// Extend the validity of `listen_key`
    async fn keepalive_user_data_stream(&self, listen_key: &str) -> Result<(), ExchangeError>;

    /// Invalidate `listen_key` server-side
    async fn close_user_data_stream(&self, listen_key: &str) -> Result<(), ExchangeError>;
}

#[async_trait]
impl<T: ListenKeyApi + ?Sized> ListenKeyApi for Arc<T> {
    async fn start_user_data_stream(&self) -> Result<String, ExchangeError> {
        (**self).start_user_data_stream().await
    }

    async fn keepalive_user_data_stream(&self, listen_key: &str) -> Result<(), ExchangeError> {
        (**self).keepalive_user_data_stream(listen_key).await
    }

    async fn close_user_data_stream(&self, listen_key: &str) -> Result<(), ExchangeError> {
        (**self).close_user_data_stream(listen_key).await
    }
}

/// Reopens the user data socket after a key rotation
pub trait UserDataRelay: Send + Sync {
    /// Start connecting `url` in the background; must not wait for the
    /// connection and must not start a session of its own
    fn reopen_user_data(self: Arc<Self>, url: String);
}

/// Listen key currently held by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SessionState {
    token: Option<SessionToken>,
}

/// URLs whose open/close notification is swallowed once, during rotation
#[derive(Debug, Default)]
struct QuietUrls {
    opens: HashSet<String>,
    closes: HashSet<String>,
}

fn key_prefix(key: &str) -> &str {
    key.get(..8).unwrap_or(key)
}

/// Owns the listen key: opens it, keeps it alive, rotates it and closes it.
///
/// Token changes (start, rotation, stop) and keep-alive calls are serialised
/// on one async mutex, so keep-alive never runs against a key that is being
/// swapped and two opens never race each other.
pub struct SessionKeyManager<A: ListenKeyApi> {
    api: A,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventBus>,
    base_url: String,
    keep_alive_interval: Duration,
    reset_interval: Duration,
    state: tokio::sync::Mutex<SessionState>,
    // Lock-free read side of `state.token` for URL resolution
    current_key: RwLock<Option<String>>,
    keep_alive: RepeatingTimer,
    rotation: RepeatingTimer,
    relay: OnceLock<Weak<dyn UserDataRelay>>,
    quiet: Mutex<QuietUrls>,
}

impl<A: ListenKeyApi> SessionKeyManager<A> {
    pub fn new(
        api: A,
        registry: Arc<ConnectionRegistry>,
        events: Arc<EventBus>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            api,
            registry,
            events,
            base_url: config.base_url.clone(),
            keep_alive_interval: config.keep_alive_interval,
            reset_interval: config.reset_interval,
            state: tokio::sync::Mutex::new(SessionState::default()),
            current_key: RwLock::new(None),
            keep_alive: RepeatingTimer::new("keep_alive"),
            rotation: RepeatingTimer::new("rotation"),
            relay: OnceLock::new(),
            quiet: Mutex::new(QuietUrls::default()),
        }
    }

    /// Register who reopens the user data socket after rotation. First call wins.
    pub fn bind_relay(&self, relay: Weak<dyn UserDataRelay>) {
        if self.relay.set(relay).is_err() {
            warn!("User data relay already bound");
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn current_key(&self) -> Option<String> {
        self.current_key.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.current_key.read().is_some()
    }

    /// Full URL of the user data stream for the current key
    pub fn user_data_url(&self) -> Option<String> {
        self.current_key
            .read()
            .as_deref()
            .map(|key| endpoint_url(&self.base_url, key))
    }

    /// Current token with its creation time
    pub async fn token(&self) -> Option<SessionToken> {
        self.state.lock().await.token.clone()
    }

    pub fn keep_alive_armed(&self) -> bool {
        self.keep_alive.is_armed()
    }

    pub fn rotation_armed(&self) -> bool {
        self.rotation.is_armed()
    }

    /// Open a listen key unless one is held. Returns whether a key is held
    /// afterwards; failures are reported as events, never returned.
    #[instrument(skip(self))]
    pub async fn ensure_started(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().await;
        if state.token.is_some() {
            return true;
        }

        match self.api.start_user_data_stream().await {
            Ok(key) => {
                info!(listen_key = key_prefix(&key), "User data stream started");
                self.install(&mut state, key);
                self.arm_keep_alive();
                self.arm_rotation();
                self.events
                    .emit(UpdateCategory::ConnectionStatus, "User data stream STARTED.");
                true
            }
            Err(e) => {
                warn!("Failed to open listen key: {}", e);
                self.events
                    .emit(UpdateCategory::ConnectionStatusError, describe_error(&e));
                false
            }
        }
    }

    /// Refresh the current key once, outside the timer schedule
    pub async fn keep_alive(&self) -> bool {
        let mut state = self.state.lock().await;
        self.keep_alive_locked(&mut state).await
    }

    /// Replace the current key now. Returns whether a new key was obtained.
    pub async fn rotate(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().await;
        if state.token.is_none() {
            return false;
        }
        self.rotate_locked(&mut state).await
    }

    /// Close every connection, close the key and stop both timers
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    /// Server-side close of the current key only. Timers, registry and the
    /// held token are left alone.
    pub async fn close(&self) -> Result<(), ExchangeError> {
        let key = self.current_key().ok_or_else(|| {
            ExchangeError::InvalidParameters("no active listen key to close".to_string())
        })?;
        self.api.close_user_data_stream(&key).await
    }

    pub(crate) fn take_quiet_open(&self, url: &str) -> bool {
        self.quiet.lock().opens.remove(url)
    }

    pub(crate) fn take_quiet_close(&self, url: &str) -> bool {
        self.quiet.lock().closes.remove(url)
    }

    fn install(&self, state: &mut SessionState, key: String) {
        *self.current_key.write() = Some(key.clone());
        state.token = Some(SessionToken {
            key,
            created_at: Utc::now(),
        });
        self.events.set_session_active(true);
    }

    fn clear(&self, state: &mut SessionState) -> Option<SessionToken> {
        *self.current_key.write() = None;
        self.events.set_session_active(false);
        state.token.take()
    }

    fn arm_keep_alive(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        self.keep_alive.arm(self.keep_alive_interval, move |generation| {
            let manager = manager.clone();
            async move {
                match manager.upgrade() {
                    Some(manager) => manager.keep_alive_tick(generation).await,
                    None => false,
                }
            }
        });
    }

    fn arm_rotation(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        self.rotation.arm(self.reset_interval, move |generation| {
            let manager = manager.clone();
            async move {
                match manager.upgrade() {
                    Some(manager) => manager.rotation_tick(generation).await,
                    None => false,
                }
            }
        });
    }

    async fn keep_alive_tick(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        // Disarmed while we waited for the lock
        if !self.keep_alive.is_current(generation) {
            return false;
        }
        self.keep_alive_locked(&mut state).await
    }

    async fn rotation_tick(self: &Arc<Self>, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if !self.rotation.is_current(generation) || state.token.is_none() {
            return false;
        }
        self.rotate_locked(&mut state).await
    }

    /// Returns whether the session is still usable
    async fn keep_alive_locked(&self, state: &mut SessionState) -> bool {
        let Some(key) = state.token.as_ref().map(|t| t.key.clone()) else {
            return false;
        };

        match self.api.keepalive_user_data_stream(&key).await {
            Ok(()) => {
                debug!(listen_key = key_prefix(&key), "Listen key kept alive");
                self.events.emit(UpdateCategory::ConnectionStatus, "Keep alive.");
                true
            }
            Err(e) if e.is_exchange_rejection() => {
                warn!(listen_key = key_prefix(&key), "Keep-alive rejected: {}", e);
                self.events
                    .emit(UpdateCategory::ConnectionStatusError, describe_error(&e));
                self.stop_locked(state).await;
                false
            }
            Err(e) => {
                warn!(listen_key = key_prefix(&key), "Keep-alive failed: {}", e);
                self.events
                    .emit(UpdateCategory::ConnectionStatusError, describe_error(&e));
                true
            }
        }
    }

    /// Swap the listen key, migrating an open user data socket to the new one.
    /// The user data socket is reopened only if it was registered when the
    /// rotation began.
    async fn rotate_locked(self: &Arc<Self>, state: &mut SessionState) -> bool {
        debug!("Max session length reached, resetting listen key");
        self.keep_alive.disarm();

        // Only a socket we actually flagged is migrated
        let mut old_url = self.registry.find(&StreamIdentity::UserData);
        if let Some(url) = &old_url {
            self.quiet.lock().closes.insert(url.clone());
            if !self.registry.request_close(url) {
                self.quiet.lock().closes.remove(url);
                old_url = None;
            }
        }

        if let Some(old) = self.clear(state) {
            if let Err(e) = self.api.close_user_data_stream(&old.key).await {
                warn!(listen_key = key_prefix(&old.key), "Failed to close old listen key: {}", e);
                self.events
                    .emit(UpdateCategory::ConnectionStatusError, describe_error(&e));
            }
        }

        let key = match self.api.start_user_data_stream().await {
            Ok(key) => key,
            Err(e) => {
                warn!("Failed to open replacement listen key: {}", e);
                self.rotation.disarm();
                self.events
                    .emit(UpdateCategory::ConnectionStatusError, describe_error(&e));
                if let Some(url) = old_url {
                    self.report_lost_close(&url);
                }
                return false;
            }
        };

        info!(listen_key = key_prefix(&key), "Listen key rotated");
        self.install(state, key.clone());
        self.arm_keep_alive();

        if old_url.is_some() {
            self.reopen_user_data(&key);
        }

        self.events.emit(
            UpdateCategory::ConnectionStatus,
            format!("New listen key received. ({})", key),
        );
        true
    }

    fn reopen_user_data(&self, key: &str) {
        let url = endpoint_url(&self.base_url, key);
        match self.relay.get().and_then(Weak::upgrade) {
            Some(relay) => {
                self.quiet.lock().opens.insert(url.clone());
                relay.reopen_user_data(url);
            }
            None => warn!("No relay bound, user data stream not reopened"),
        }
    }

    /// The user data socket flagged by a failed rotation will not come back,
    /// so its close is reported after all. Whoever removes the quiet entry
    /// first decides: the receive loop reports it if it has not exited yet.
    fn report_lost_close(&self, url: &str) {
        if !self.take_quiet_close(url) {
            self.events.emit(
                UpdateCategory::EndpointStatus,
                format!("Websocket endpoint connection closed. ({})", url),
            );
        }
    }

    async fn stop_locked(&self, state: &mut SessionState) {
        // Clear the key before flagging, so a user data socket registering
        // concurrently either gets flagged or sees the key is gone
        let old = self.clear(state);
        let flagged = self.registry.request_close_all();
        debug!(connections = flagged, "Stopping user data stream");

        if let Some(old) = old {
            if let Err(e) = self.api.close_user_data_stream(&old.key).await {
                warn!(listen_key = key_prefix(&old.key), "Failed to close listen key: {}", e);
                self.events
                    .emit(UpdateCategory::ConnectionStatusError, describe_error(&e));
            }
        }
        self.keep_alive.disarm();
        self.rotation.disarm();

        self.events
            .emit(UpdateCategory::ConnectionStatus, "User data stream terminated.");
    }
}
