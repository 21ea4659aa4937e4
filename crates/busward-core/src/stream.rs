// ── Event subscriptions ──
//
// A subscriber first sees the registry as it stands, then every live
// event. Slow subscribers skip what they missed rather than stall the
// broadcaster.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::model::{BusEvent, RegistrySnapshot};

/// Handle returned by [`Controller::subscribe`](crate::Controller::subscribe).
pub struct Subscription {
    initial: Option<Arc<BusEvent>>,
    receiver: broadcast::Receiver<Arc<BusEvent>>,
}

impl Subscription {
    pub(crate) fn new(
        current: Arc<RegistrySnapshot>,
        receiver: broadcast::Receiver<Arc<BusEvent>>,
    ) -> Self {
        Self {
            initial: Some(Arc::new(BusEvent::ConfigUpdate(current))),
            receiver,
        }
    }

    /// Next event, or `None` once the controller is gone.
    ///
    /// The first call yields the `config_update` captured at subscribe
    /// time.
    pub async fn recv(&mut self) -> Option<Arc<BusEvent>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
