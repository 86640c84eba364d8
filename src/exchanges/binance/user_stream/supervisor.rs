use super::events::{EventBus, UpdateCategory};
use super::identity::{endpoint_url, StreamIdentity};
use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::session::{ListenKeyApi, SessionKeyManager, UserDataRelay};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{WsConnector, WsSession};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    CloseRequested,
    RemoteClose,
    Disconnected,
    Failed,
}

/// Drives one socket per call to `connect`, from handshake to teardown
pub struct SocketSupervisor<A: ListenKeyApi, C: WsConnector> {
    session: Arc<SessionKeyManager<A>>,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventBus>,
    connector: C,
    base_url: String,
}

impl<A: ListenKeyApi, C: WsConnector> SocketSupervisor<A, C> {
    pub fn new(
        session: Arc<SessionKeyManager<A>>,
        registry: Arc<ConnectionRegistry>,
        events: Arc<EventBus>,
        connector: C,
        base_url: String,
    ) -> Self {
        Self {
            session,
            registry,
            events,
            connector,
            base_url,
        }
    }

    /// Full endpoint URL; user data resolves against the key held right now
    pub fn resolve(&self, identity: &StreamIdentity) -> Result<String, ExchangeError> {
        let key = self.session.current_key();
        let path = identity.path(key.as_deref())?;
        Ok(endpoint_url(&self.base_url, &path))
    }

    /// Open, pump and tear down one stream. Every outcome is reported on the
    /// event bus; this only returns once the connection is gone.
    #[instrument(skip(self, identity), fields(stream = %identity))]
    pub async fn connect(&self, identity: StreamIdentity) {
        // The user data path only exists once a key is held
        if identity.is_user_data() && !self.session.ensure_started().await {
            return;
        }

        let url = match self.resolve(&identity) {
            Ok(url) => url,
            Err(e) => {
                self.events.emit(
                    UpdateCategory::EndpointStatusError,
                    format!("!ERROR! ({}) {}", identity, e),
                );
                return;
            }
        };
        let quiet_open = self.session.take_quiet_open(&url);

        if self.registry.contains(&url) {
            self.report_duplicate(&url);
            return;
        }

        if !identity.is_user_data() && !self.session.ensure_started().await {
            return;
        }

        self.serve(identity, url, quiet_open).await;
    }

    /// Reopen the user data stream on the key a rotation just installed.
    /// Never starts a session: if that key is no longer current the reopen
    /// is dropped.
    #[instrument(skip(self, url), fields(stream = "userData"))]
    pub async fn reconnect_user_data(&self, url: String) {
        let quiet_open = self.session.take_quiet_open(&url);
        if !self.is_current_user_data(&url) {
            debug!("Listen key replaced before reopen");
            return;
        }
        if self.registry.contains(&url) {
            self.report_duplicate(&url);
            return;
        }

        self.serve(StreamIdentity::UserData, url, quiet_open).await;
    }

    async fn serve(&self, identity: StreamIdentity, url: String, quiet_open: bool) {
        let user_data = identity.is_user_data();

        let mut socket = match self.connector.connect(&url).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Handshake failed: {}", e);
                self.events.emit(
                    UpdateCategory::EndpointStatusError,
                    format!("!ERROR! ({}) {}", url, e),
                );
                return;
            }
        };

        let Some(handle) = self.registry.try_register(&url, identity) else {
            // Lost the race against a concurrent connect to the same URL
            socket.abort();
            self.report_duplicate(&url);
            return;
        };

        // The session may have stopped or rotated during the handshake
        if user_data && !self.is_current_user_data(&url) {
            debug!("Listen key gone before registration completed");
            self.registry.release(&handle);
            socket.abort();
            return;
        }

        info!("Connection opened");
        if !quiet_open {
            self.events.emit(
                UpdateCategory::EndpointStatus,
                format!("Websocket endpoint connection opened. ({})", url),
            );
        }

        let exit = self.receive_loop(&handle, &mut socket).await;

        self.registry.release(&handle);
        drop(socket);
        info!(reason = ?exit, frames = handle.frames_received(), "Connection closed");

        if !self.session.take_quiet_close(&url) {
            self.events.emit(
                UpdateCategory::EndpointStatus,
                format!("Websocket endpoint connection closed. ({})", url),
            );
        }
    }

    fn is_current_user_data(&self, url: &str) -> bool {
        self.session.user_data_url().as_deref() == Some(url)
    }

    async fn receive_loop(&self, handle: &ConnectionHandle, socket: &mut C::Session) -> LoopExit {
        loop {
            let frame = tokio::select! {
                biased;
                () = handle.close_requested() => None,
                frame = socket.next_raw() => frame,
            };

            // Checked at every frame boundary; teardown is a hard abort
            if handle.is_close_requested() {
                socket.abort();
                return LoopExit::CloseRequested;
            }

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.events.emit(
                        UpdateCategory::EndpointStatusError,
                        format!("!ERROR! ({}) {}", handle.url(), e),
                    );
                    return LoopExit::Failed;
                }
                None => return LoopExit::Disconnected,
            };

            handle.record_frame();
            match message {
                Message::Close(frame) => {
                    debug!(url = %handle.url(), ?frame, "Remote close");
                    if let Err(e) = socket.close().await {
                        debug!(url = %handle.url(), "Close handshake failed: {}", e);
                    }
                    return LoopExit::RemoteClose;
                }
                Message::Text(text) => {
                    self.events.emit(UpdateCategory::EndpointDataReceived, text);
                }
                Message::Binary(bytes) => {
                    self.events.emit(
                        UpdateCategory::EndpointDataReceived,
                        String::from_utf8_lossy(&bytes).into_owned(),
                    );
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    fn report_duplicate(&self, url: &str) {
        debug!(url = %url, "Connection already exists");
        self.events.emit(
            UpdateCategory::EndpointStatus,
            format!("Could not open web socket. Connection already exists. ({})", url),
        );
    }
}

impl<A: ListenKeyApi, C: WsConnector> UserDataRelay for SocketSupervisor<A, C> {
    fn reopen_user_data(self: Arc<Self>, url: String) {
        tokio::spawn(async move {
            self.reconnect_user_data(url).await;
        });
    }
}
