//! Alert delivery.
//!
//! The gate emits an alert for every breaker trip and every rollback. Alerts
//! are always logged; an [`AlertSink`] additionally receives them, in the
//! order they were raised, after the gate has released its state lock.

use tracing::warn;

/// Alert type for rollbacks; breaker alerts use the breaker name.
pub const ROLLBACK_ALERT: &str = "rollback";

/// One alert raised during an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub alert_type: String,
    pub message: String,
}

impl Alert {
    pub fn new(alert_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.into(),
            message: message.into(),
        }
    }
}

/// Receiver for gate alerts. Called synchronously on the updating thread.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert_type: &str, message: &str);
}

impl<F> AlertSink for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn send(&self, alert_type: &str, message: &str) {
        self(alert_type, message)
    }
}

/// Log an alert and forward it to the sink, if any.
pub(crate) fn dispatch(sink: Option<&dyn AlertSink>, alerts: &[Alert]) {
    for alert in alerts {
        warn!(
            alert_type = %alert.alert_type,
            message = %alert.message,
            "Gate alert"
        );
        if let Some(sink) = sink {
            sink.send(&alert.alert_type, &alert.message);
        }
    }
}
