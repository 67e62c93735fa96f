// ── Event polling ──
//
// Two background loops per connection: the event poll loop, whose cadence
// adapts to execution activity, and the slow full-refresh loop. Both are
// cancelled as a unit when the connection is torn down -- "disabled" is
// the absence of these tasks, not a zero interval.

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::hub::Hub;

/// Poll cadence dictated by execution activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    /// Nothing in flight: slow default polling.
    Idle,
    /// At least one execution pending: poll fast so terminal events are
    /// observed promptly.
    Active,
}

fn make_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// The cadence execution activity currently dictates, if it differs from
/// the one in effect.
fn cadence_change(hub: &Hub, current: Cadence) -> Option<Cadence> {
    let desired = if hub.executions().has_pending() {
        Cadence::Active
    } else {
        Cadence::Idle
    };
    (desired != current).then_some(desired)
}

/// Build the interval for a cadence, consuming the immediate first tick
/// so the next fetch happens one full period from now.
async fn switch_interval(hub: &Hub, cadence: Cadence) -> Interval {
    let period = match cadence {
        Cadence::Idle => hub.config().event_poll_idle,
        Cadence::Active => hub.config().event_poll_active,
    };
    debug!(?cadence, ?period, "switching event poll cadence");
    let mut interval = make_interval(period);
    interval.tick().await;
    interval
}

/// The adaptive event poll loop.
///
/// Every tick first re-evaluates the cadence: a mismatch switches the
/// interval instead of fetching. Otherwise one fetch cycle runs, guarded
/// against overlap inside [`Hub::fetch_cycle`]. Execution activity also
/// nudges the evaluation between ticks, so the fast cadence engages as
/// soon as a batch is accepted rather than at the next idle tick.
pub(crate) async fn event_poll_task(hub: Hub, cancel: CancellationToken) {
    let mut cadence = Cadence::Idle;
    let mut interval = make_interval(hub.config().event_poll_idle);
    interval.tick().await;
    let mut activity = hub.executions().subscribe_activity();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = activity.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(next) = cadence_change(&hub, cadence) {
                    cadence = next;
                    interval = switch_interval(&hub, cadence).await;
                }
            }
            _ = interval.tick() => {
                if let Some(next) = cadence_change(&hub, cadence) {
                    cadence = next;
                    interval = switch_interval(&hub, cadence).await;
                    continue;
                }
                hub.fetch_cycle(&cancel).await;
            }
        }
    }
    debug!("event poll loop stopped");
}

/// The slow full-refresh loop.
///
/// Asks the gateway to republish all device states on a long interval;
/// completion is confirmed by an event on the poll loop, with a manual
/// reconciliation fallback inside [`Hub::run_scheduled_refresh`].
pub(crate) async fn refresh_task(hub: Hub, cancel: CancellationToken) {
    let mut interval = make_interval(hub.config().refresh_interval);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => hub.run_scheduled_refresh(&cancel).await,
        }
    }
    debug!("refresh loop stopped");
}
