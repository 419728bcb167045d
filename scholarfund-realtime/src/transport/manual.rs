//! Transport driven by hand, for tests and scripted simulations.

use parking_lot::Mutex;

use super::{RealtimeTransport, StatusCallback, Subscription};
use crate::error::{RealtimeError, Result};
use crate::state::TransportStatus;

#[derive(Default)]
struct ManualState {
    next_id: u64,
    active: Vec<(Subscription, StatusCallback)>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    fail_subscribe: bool,
}

/// In-process transport whose statuses are fired with [`ManualTransport::emit`]
#[derive(Default)]
pub struct ManualTransport {
    state: Mutex<ManualState>,
}

impl ManualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `status` to every open subscription. Returns how many received it.
    pub fn emit(&self, status: TransportStatus) -> usize {
        // Callbacks run without the lock held; they may call back into the transport
        let callbacks: Vec<StatusCallback> = self
            .state
            .lock()
            .active
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        tracing::debug!("Manual transport emitting {} to {} subscription(s)", status, callbacks.len());
        for callback in &callbacks {
            callback(status);
        }
        callbacks.len()
    }

    /// Make the next subscribe calls fail (or succeed again)
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.state
            .lock()
            .active
            .iter()
            .any(|(subscription, _)| subscription.channel() == channel)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state.lock().unsubscribe_calls
    }
}

impl RealtimeTransport for ManualTransport {
    fn subscribe(&self, channel: &str, on_status: StatusCallback) -> Result<Subscription> {
        let mut state = self.state.lock();
        state.subscribe_calls += 1;

        if state.fail_subscribe {
            return Err(RealtimeError::Transport(format!(
                "subscribe to '{}' rejected",
                channel
            )));
        }

        state.next_id += 1;
        let subscription = Subscription::new(state.next_id, channel);
        state.active.push((subscription.clone(), on_status));
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: Subscription) {
        let mut state = self.state.lock();
        state.unsubscribe_calls += 1;
        state.active.retain(|(active, _)| *active != subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_emit_reaches_subscribers_until_unsubscribed() {
        let transport = ManualTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let subscription = transport
            .subscribe("status-monitor", Arc::new(move |status| sink.lock().push(status)))
            .unwrap();
        assert!(transport.is_subscribed("status-monitor"));

        assert_eq!(transport.emit(TransportStatus::Subscribed), 1);
        transport.unsubscribe(subscription);
        assert_eq!(transport.emit(TransportStatus::Closed), 0);

        assert_eq!(*seen.lock(), vec![TransportStatus::Subscribed]);
        assert_eq!(transport.subscribe_calls(), 1);
        assert_eq!(transport.unsubscribe_calls(), 1);
    }

    #[test]
    fn test_subscribe_failure() {
        let transport = ManualTransport::new();
        transport.set_fail_subscribe(true);

        let result = transport.subscribe("status-monitor", Arc::new(|_| {}));
        assert!(matches!(result, Err(RealtimeError::Transport(_))));
        assert_eq!(transport.active_subscriptions(), 0);
    }
}
