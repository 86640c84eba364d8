use crate::core::errors::ExchangeError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

/// What a `StreamUpdate` is reporting on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateCategory {
    /// Listen key lifecycle (started, keep alive, rotated, terminated)
    ConnectionStatus,
    /// Listen key call failed
    ConnectionStatusError,
    /// A socket opened, closed or was refused
    EndpointStatus,
    /// A socket failed to open or broke while reading
    EndpointStatusError,
    /// Raw payload received on a socket
    EndpointDataReceived,
}

impl UpdateCategory {
    pub const fn is_error(self) -> bool {
        matches!(self, Self::ConnectionStatusError | Self::EndpointStatusError)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUpdate {
    pub message: String,
    /// Whether a listen key was held when the update was emitted
    pub session_active: bool,
    pub category: UpdateCategory,
}

impl fmt::Display for StreamUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.category, self.message)
    }
}

/// Fan-out of `StreamUpdate`s to every subscriber, in emission order.
///
/// Emission holds the subscriber lock so concurrent emitters are serialised
/// and every subscriber observes the same order. Dropped receivers are pruned
/// on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<StreamUpdate>>>,
    session_active: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn session_active(&self) -> bool {
        self.session_active.load(Ordering::SeqCst)
    }

    // Only the session manager flips this
    pub(crate) fn set_session_active(&self, active: bool) {
        self.session_active.store(active, Ordering::SeqCst);
    }

    pub fn emit(&self, category: UpdateCategory, message: impl Into<String>) {
        let update = StreamUpdate {
            message: message.into(),
            session_active: self.session_active(),
            category,
        };
        trace!(category = ?update.category, "{}", update.message);

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

/// Event text for a failed call: `!ERROR! <code> - <msg>` for exchange rejections
pub(crate) fn describe_error(err: &ExchangeError) -> String {
    match err {
        ExchangeError::ApiError { code, message } => format!("!ERROR! {} - {}", code, message),
        other => format!("!ERROR! {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_every_event_in_order() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(UpdateCategory::ConnectionStatus, "one");
        bus.emit(UpdateCategory::EndpointStatus, "two");

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.try_recv().unwrap().message, "one");
            assert_eq!(rx.try_recv().unwrap().message, "two");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(UpdateCategory::ConnectionStatus, "ping");
        assert_eq!(bus.subscriber_count(), 1);
        drop(kept);
    }

    #[test]
    fn test_session_flag_is_stamped_on_updates() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(UpdateCategory::ConnectionStatus, "before");
        bus.set_session_active(true);
        bus.emit(UpdateCategory::ConnectionStatus, "after");

        assert!(!rx.try_recv().unwrap().session_active);
        assert!(rx.try_recv().unwrap().session_active);
    }

    #[test]
    fn test_describe_error() {
        let rejected = ExchangeError::ApiError {
            code: -1125,
            message: "This listenKey does not exist.".to_string(),
        };
        assert_eq!(
            describe_error(&rejected),
            "!ERROR! -1125 - This listenKey does not exist."
        );
        assert!(describe_error(&ExchangeError::NetworkError("reset".to_string()))
            .starts_with("!ERROR! Network error"));
    }

    #[test]
    fn test_error_categories() {
        assert!(UpdateCategory::EndpointStatusError.is_error());
        assert!(UpdateCategory::ConnectionStatusError.is_error());
        assert!(!UpdateCategory::EndpointDataReceived.is_error());
    }
}
