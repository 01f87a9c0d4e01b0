//! The authorization robot: auto-enrollment of newly connected devices.

use std::collections::VecDeque;
use std::sync::Arc;

use bolt_protocol::{Policy, Status};

use crate::device::Device;
use crate::error::Error;
use crate::events::{Listeners, Subscription};
use crate::manager::ManagerClient;

/// Decides whether a newly connected device should be auto-enrolled.
pub type DecisionHook = dyn Fn(&Device) -> bool + Send + Sync;

/// A device whose enrollment attempt failed.
pub struct EnrollFailure {
    pub device: Device,
    pub error: Error,
}

struct QueueState {
    queue: VecDeque<Device>,
    /// Guards against a second concurrent drain; cleared under the same
    /// lock as the emptiness check so a wakeup is never missed.
    draining: bool,
}

struct Inner {
    client: Arc<ManagerClient>,
    decide: Box<DecisionHook>,
    state: parking_lot::Mutex<QueueState>,
    enroll_failed: Listeners<EnrollFailure>,
}

/// Serializes one-at-a-time enrollment of newly connected devices.
///
/// For each device-added event the robot snapshots the device's status and
/// drops anything not currently `connected` (later status changes while
/// queued are not re-checked), drops everything while the manager's
/// authorization mode lacks the `enabled` token, asks the decision hook, and
/// queues approved devices. A single consumer drains the queue in FIFO
/// order, one enrollment call in flight at a time, yielding to the scheduler
/// between devices; a per-device failure is reported through
/// [`on_enroll_failed`](Self::on_enroll_failed) and never stops the drain.
///
/// [`close`](Self::close) stops future scheduling only: an enrollment call
/// already in flight still completes and may report its failure into an
/// empty listener list.
pub struct AuthRobot {
    inner: Arc<Inner>,
    subs: parking_lot::Mutex<Vec<Subscription>>,
}

impl AuthRobot {
    /// Attach a robot to `client`, consulting `decide` per device.
    pub fn new(
        client: Arc<ManagerClient>,
        decide: impl Fn(&Device) -> bool + Send + Sync + 'static,
    ) -> AuthRobot {
        let inner = Arc::new(Inner {
            client: Arc::clone(&client),
            decide: Box::new(decide),
            state: parking_lot::Mutex::new(QueueState {
                queue: VecDeque::new(),
                draining: false,
            }),
            enroll_failed: Listeners::new(),
        });

        let sub = client.on_device_added({
            let inner = Arc::clone(&inner);
            move |device| Inner::device_added(&inner, device.clone())
        });

        AuthRobot {
            inner,
            subs: parking_lot::Mutex::new(vec![sub]),
        }
    }

    /// Listen for failed enrollment attempts.
    pub fn on_enroll_failed(
        &self,
        listener: impl Fn(&EnrollFailure) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.enroll_failed.subscribe(listener)
    }

    /// Stop observing the client.
    ///
    /// Does not drain or cancel an in-flight enrollment.
    pub fn close(&self) {
        self.subs.lock().clear();
        self.inner.enroll_failed.clear();
        tracing::debug!("auth robot closed");
    }
}

impl Inner {
    fn device_added(self: &Arc<Self>, device: Device) {
        let uid = device.uid();

        // Status snapshot at event time; not re-validated while queued.
        let status = device.status();
        if status != Status::Connected {
            tracing::trace!(%uid, %status, "ignoring device that is not connected");
            return;
        }

        // While authorization is disabled service-side every enroll attempt
        // is known to fail, so none is issued.
        if !self.client.auth_mode().is_enabled() {
            tracing::debug!(%uid, "authorization disabled, ignoring device");
            return;
        }

        let enroll = (self.decide)(&device);
        tracing::debug!(%uid, enroll, "auto enrollment decision");
        if !enroll {
            return;
        }

        let start_drain = {
            let mut state = self.state.lock();
            state.queue.push_back(device);
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };

        if start_drain {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.drain().await });
        }
    }

    /// Single-consumer drain cycle: pop one device, issue one enrollment
    /// call, yield, repeat until the queue is empty.
    async fn drain(self: Arc<Self>) {
        loop {
            let device = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(device) => device,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            let uid = device.uid();
            match self.client.enroll_device(&uid, Policy::Default).await {
                Ok(enrolled) => {
                    tracing::debug!(%uid, status = %enrolled.status(), "device enrolled");
                }
                Err(error) => {
                    tracing::debug!(%uid, %error, "device enrollment failed");
                    self.enroll_failed.emit(&EnrollFailure { device, error });
                }
            }

            // Yield between devices so the event loop stays responsive.
            tokio::task::yield_now().await;
        }
    }
}

impl std::fmt::Debug for AuthRobot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AuthRobot")
            .field("queued", &state.queue.len())
            .field("draining", &state.draining)
            .finish()
    }
}
