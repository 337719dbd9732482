/// Expiry sweep for overdue signals, independent of the trading loop

use std::sync::Arc;
use std::time::Duration;

use lodestar_core::SignalId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::core::Clock;
use crate::error::EngineError;
use crate::store::SignalStore;
use crate::transport::{EngineEvent, EventBus};

#[derive(Clone)]
pub struct ExpirySweeper {
    signals: Arc<dyn SignalStore>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    call_timeout: Duration,
}

impl ExpirySweeper {
    pub fn new(
        signals: Arc<dyn SignalStore>,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        call_timeout: Duration,
    ) -> Self {
        Self { signals, clock, bus, call_timeout }
    }

    /// Expires every overdue ACTIVE signal once.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<Vec<SignalId>, EngineError> {
        let now = self.clock.now();
        let expired = timeout(self.call_timeout, self.signals.expire_due(now))
            .await
            .map_err(|_| EngineError::Timeout("signal expiry"))??;
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue signals");
            self.bus.publish(EngineEvent::SignalsExpired { ids: expired.clone(), at: now });
        }
        Ok(expired)
    }

    /// Runs the sweep every `every` until `shutdown` flips to true or its sender drops.
    pub fn spawn(self, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!(error = %e, "Expiry sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Expiry sweeper stopped");
        })
    }
}
