//! Background refresh loop.
//!
//! The loop is only a timer: each tick calls the same staleness check the
//! read path uses, so the two can never disagree about whether a refresh
//! is due. It holds a weak reference and exits when the session is gone,
//! when the stop signal fires, or after a fatal error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::Session;
use crate::remote::RemoteDataSource;

pub(crate) fn spawn<R: RemoteDataSource>(
    session: &Arc<Session<R>>,
    every: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(session);
    let scope = session.scope_key().to_string();

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(scope = %scope, interval_ms = every.as_millis() as u64, "Background refresh started");

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let Some(session) = weak.upgrade() else {
                        break;
                    };
                    if let Err(e) = session.refresh_if_stale().await {
                        tracing::error!(scope = %scope, error = %e, "Background refresh failed");
                        if e.is_fatal() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!(scope = %scope, "Background refresh stopped");
    })
}
