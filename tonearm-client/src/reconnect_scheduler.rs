use std::sync::Weak;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{trace, warn};

use crate::client::ClientShared;

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

// Sweeps every registered node on a fixed tick. Each node's own backoff gate
// decides whether a reconnect actually happens; healthy nodes no-op.
pub(crate) fn spawn(client: Weak<ClientShared>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(client) = client.upgrade() else {
                trace!("gateway client dropped, reconnect scheduler stopping");
                break;
            };
            for node in client.registered_nodes() {
                let session_id = client.resume_session_id(&node);
                if let Err(e) = node.connection().reconnect(session_id.as_deref()) {
                    warn!(node = %node.name(), error = %e, "unable to reconnect node");
                }
            }
        }
    })
}
