//! Periodic presence and session expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ClientRegistry;
use crate::router::EventRouter;

/// Run one pass: time out silent participants, then evict dead sessions.
pub fn sweep_once(router: &EventRouter, clients: &ClientRegistry) {
    let now = Utc::now();
    let flipped = router.sweep_presence(now, &mut |outbound| {
        clients.deliver(&outbound);
    });
    let evicted = router.sweep_sessions(now);
    if flipped > 0 || !evicted.is_empty() {
        tracing::info!(
            timed_out = flipped,
            evicted = evicted.len(),
            sessions = router.sessions().len(),
            "sweep finished"
        );
    }
}

/// Sweep every `interval` until cancelled.
///
/// The interval must not exceed the heartbeat timeout, so a timeout is never
/// noticed more than one interval late.
pub fn start_sweeper(
    router: Arc<EventRouter>,
    clients: Arc<ClientRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep_once(&router, &clients),
                () = cancel.cancelled() => {
                    tracing::debug!("sweeper stopped");
                    break;
                }
            }
        }
    })
}
