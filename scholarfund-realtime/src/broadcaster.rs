use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::{RealtimeError, Result};
use crate::policy::ReconnectPolicy;
use crate::registry::{ListenerGuard, ListenerId, ListenerRegistry, ReconnectListener};
use crate::state::{ConnectionState, StatusChange, TransportStatus};
use crate::transport::{RealtimeTransport, StatusCallback, Subscription};

/// Connection-status broadcaster for one realtime channel
pub struct RealtimeStatusBroadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    channel: String,
    policy: ReconnectPolicy,
    transport: Arc<dyn RealtimeTransport>,
    registry: Arc<ListenerRegistry>,
    machine: Mutex<Machine>,
    /// Held for the whole of status handling, listener round included
    notify_lock: ReentrantMutex<()>,
    status_tx: watch::Sender<StatusChange>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
}

struct Machine {
    state: ConnectionState,
    /// Bumped on every transition; pending retry markers compare against it
    epoch: u64,
    /// Error rounds since the last successful subscribe
    failed_rounds: u32,
    /// Subscription whose callbacks are honoured; None once stopped
    active: Option<Active>,
}

struct Active {
    generation: u64,
    runtime: Handle,
}

struct Session {
    generation: u64,
    subscription: Option<Subscription>,
}

impl RealtimeStatusBroadcaster {
    /// Create a broadcaster with the default reconnect policy
    pub fn new(channel: impl Into<String>, transport: Arc<dyn RealtimeTransport>) -> Self {
        Self::build(channel.into(), transport, ReconnectPolicy::default())
    }

    /// Create a broadcaster with an explicit reconnect policy
    pub fn with_policy(
        channel: impl Into<String>,
        transport: Arc<dyn RealtimeTransport>,
        policy: ReconnectPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self::build(channel.into(), transport, policy))
    }

    fn build(channel: String, transport: Arc<dyn RealtimeTransport>, policy: ReconnectPolicy) -> Self {
        let (status_tx, _) = watch::channel(StatusChange::initial());

        Self {
            inner: Arc::new(Inner {
                channel,
                policy,
                transport,
                registry: Arc::new(ListenerRegistry::new()),
                machine: Mutex::new(Machine {
                    state: ConnectionState::Connecting,
                    epoch: 0,
                    failed_rounds: 0,
                    active: None,
                }),
                notify_lock: ReentrantMutex::new(()),
                status_tx,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to the transport. Must be called from within a tokio runtime.
    pub async fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut session = self.inner.session.lock();
            if session.is_some() {
                return Err(RealtimeError::AlreadyRunning);
            }
            *session = Some(Session {
                generation,
                subscription: None,
            });
            self.inner.activate(generation, runtime);
        }

        let weak = Arc::downgrade(&self.inner);
        let on_status: StatusCallback = Arc::new(move |status| {
            if let Some(inner) = weak.upgrade() {
                Inner::handle_status(&inner, generation, status);
            }
        });

        match self.inner.transport.subscribe(&self.inner.channel, on_status) {
            Ok(subscription) => {
                let orphaned = {
                    let mut session = self.inner.session.lock();
                    match session.as_mut() {
                        Some(active) if active.generation == generation => {
                            active.subscription = Some(subscription);
                            None
                        }
                        _ => Some(subscription),
                    }
                };
                // stop() raced us; release what we just opened
                if let Some(subscription) = orphaned {
                    self.inner.deactivate(generation);
                    self.inner.transport.unsubscribe(subscription);
                    return Err(RealtimeError::NotStarted);
                }
            }
            Err(e) => {
                self.inner.session.lock().take();
                self.inner.deactivate(generation);
                tracing::error!("Failed to subscribe to realtime channel '{}': {}", self.inner.channel, e);
                return Err(e);
            }
        }

        tracing::info!("Realtime status broadcaster started on channel '{}'", self.inner.channel);
        Ok(())
    }

    /// Release the subscription and mark the connection closed.
    ///
    /// Once this returns no transport callback changes the state or runs a
    /// listener round, including one that was already in flight.
    pub async fn stop(&self) -> Result<()> {
        let session = self
            .inner
            .session
            .lock()
            .take()
            .ok_or(RealtimeError::NotStarted)?;

        {
            let mut machine = self.inner.machine.lock();
            machine.active = None;
            self.inner.transition_locked(&mut machine, ConnectionState::Closed);
        }

        if let Some(subscription) = session.subscription {
            self.inner.transport.unsubscribe(subscription);
        }

        // Wait out a round that passed the check before we deactivated
        drop(self.inner.notify_lock.lock());

        tracing::info!("Realtime status broadcaster stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Current connection state
    pub fn status(&self) -> ConnectionState {
        self.inner.machine.lock().state
    }

    /// Observe state changes without polling
    pub fn watch(&self) -> watch::Receiver<StatusChange> {
        self.inner.status_tx.subscribe()
    }

    /// Register a callback run on every transition into `Subscribed`
    pub fn add_reconnect_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.registry.add(Arc::new(listener))
    }

    /// Register an already shared callback. Registering the same one twice runs it twice.
    pub fn add_shared_reconnect_listener(&self, listener: ReconnectListener) -> ListenerId {
        self.inner.registry.add(listener)
    }

    /// Unregister a callback. Unknown ids are ignored.
    pub fn remove_reconnect_listener(&self, id: ListenerId) {
        self.inner.registry.remove(id);
    }

    /// Register a callback for as long as the returned guard lives
    pub fn listen<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.registry.listen(Arc::new(listener))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn channel_name(&self) -> &str {
        &self.inner.channel
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }
}

impl Inner {
    fn handle_status(self: &Arc<Self>, generation: u64, status: TransportStatus) {
        let _round = self.notify_lock.lock();

        // Check, transition and snapshot under one lock so stop() and new
        // registrations are ordered strictly before or after this status
        let (target, retry, listeners) = {
            let mut machine = self.machine.lock();
            let runtime = match machine.active.as_ref() {
                Some(active) if active.generation == generation => active.runtime.clone(),
                _ => {
                    tracing::debug!("Ignoring '{}' from a released subscription", status);
                    return;
                }
            };

            let target = status.target_state();
            self.transition_locked(&mut machine, target);

            let retry = match status {
                TransportStatus::Subscribed => {
                    machine.failed_rounds = 0;
                    None
                }
                TransportStatus::TimedOut | TransportStatus::ChannelError => {
                    let attempt = machine.failed_rounds;
                    machine.failed_rounds = machine.failed_rounds.saturating_add(1);
                    if self.policy.allows(attempt) {
                        Some((runtime, machine.epoch, self.policy.delay_for(attempt)))
                    } else {
                        tracing::warn!(
                            "Realtime channel '{}' failed {} times in a row; no longer marking it as reconnecting",
                            self.channel,
                            machine.failed_rounds
                        );
                        None
                    }
                }
                TransportStatus::Closed => None,
            };

            let listeners = (target == ConnectionState::Subscribed).then(|| self.registry.snapshot());
            (target, retry, listeners)
        };

        match status {
            TransportStatus::Subscribed => tracing::info!("Realtime channel '{}' subscribed", self.channel),
            TransportStatus::TimedOut => tracing::warn!("Realtime channel '{}' timed out", self.channel),
            TransportStatus::ChannelError => tracing::warn!("Realtime channel '{}' reported an error", self.channel),
            TransportStatus::Closed => tracing::info!("Realtime channel '{}' closed", self.channel),
        }

        if let Some((runtime, epoch, delay)) = retry {
            self.schedule_reconnecting(&runtime, epoch, delay);
        }

        if let Some(listeners) = listeners {
            let report = listeners.notify();
            tracing::info!(
                "Realtime {}, triggered {} reconnect listener(s) ({} failed)",
                target,
                report.invoked,
                report.failed
            );
        }
    }

    fn schedule_reconnecting(self: &Arc<Self>, runtime: &Handle, epoch: u64, delay: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.mark_reconnecting(epoch);
            }
        });
    }

    fn mark_reconnecting(&self, epoch: u64) {
        let mut machine = self.machine.lock();
        if machine.epoch != epoch || machine.state != ConnectionState::ChannelError {
            tracing::debug!("Dropping stale reconnect marker (epoch {} vs {})", epoch, machine.epoch);
            return;
        }

        self.transition_locked(&mut machine, ConnectionState::Reconnecting);
        tracing::info!("Realtime channel '{}' reconnecting", self.channel);
    }

    /// Honour callbacks from `generation` and start over from `Connecting`
    fn activate(&self, generation: u64, runtime: Handle) {
        let mut machine = self.machine.lock();
        machine.active = Some(Active { generation, runtime });
        machine.failed_rounds = 0;
        if machine.state != ConnectionState::Connecting {
            self.transition_locked(&mut machine, ConnectionState::Connecting);
        }
    }

    fn deactivate(&self, generation: u64) {
        let mut machine = self.machine.lock();
        if machine.active.as_ref().map(|a| a.generation) == Some(generation) {
            machine.active = None;
        }
    }

    // Publishing under the machine lock keeps watchers in transition order
    fn transition_locked(&self, machine: &mut Machine, target: ConnectionState) {
        let previous = machine.state;
        machine.state = target;
        machine.epoch += 1;
        self.status_tx.send_replace(StatusChange::transition(previous, target));
    }
}

impl Drop for RealtimeStatusBroadcaster {
    fn drop(&mut self) {
        self.inner.machine.lock().active = None;
        let session = self.inner.session.lock().take();
        if let Some(subscription) = session.and_then(|s| s.subscription) {
            self.inner.transport.unsubscribe(subscription);
        }
    }
}
