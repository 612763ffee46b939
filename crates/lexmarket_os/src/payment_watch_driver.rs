#![forbid(unsafe_code)]

use std::time::Duration;

use lexmarket_engines::realtime::EventStream;
use lexmarket_kernel_contracts::payment::{PaymentWatchFailure, WatcherState};
use lexmarket_kernel_contracts::MonotonicTimeNs;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::payment_watch::{Navigator, PaymentWatcher};

/// Maps the tokio clock onto the watcher's monotonic timeline.
#[derive(Debug, Clone, Copy)]
pub struct WatchClock {
    origin: Instant,
}

impl WatchClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> MonotonicTimeNs {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        MonotonicTimeNs(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn instant_at(&self, t: MonotonicTimeNs) -> Instant {
        self.origin + Duration::from_nanos(t.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentWatchOutcome {
    Redirected {
        location: String,
    },
    Failed {
        failure: Option<PaymentWatchFailure>,
        recovery_target: Option<String>,
    },
    Unmounted,
}

/// Runs a mounted watcher until it redirects, fails, or the screen unmounts.
///
/// The unmount signal fires when the watched value becomes `true` or its
/// sender is dropped. The watcher is torn down before this returns.
pub async fn drive_payment_watch(
    watcher: &mut PaymentWatcher,
    clock: WatchClock,
    events: &mut EventStream,
    navigator: &mut dyn Navigator,
    mut unmount: watch::Receiver<bool>,
) -> PaymentWatchOutcome {
    let mut events_open = true;
    let outcome = loop {
        if !watcher.is_mounted() || *unmount.borrow() {
            break PaymentWatchOutcome::Unmounted;
        }
        match watcher.state() {
            WatcherState::Failed => {
                let view = watcher.view();
                break PaymentWatchOutcome::Failed {
                    failure: view.failure,
                    recovery_target: view.recovery_target,
                };
            }
            WatcherState::Success => {
                if let Some(location) = watcher.redirected_location() {
                    break PaymentWatchOutcome::Redirected {
                        location: location.to_string(),
                    };
                }
            }
            _ => {}
        }

        let deadline = watcher.next_deadline();
        let sleep_until = deadline.map(|t| clock.instant_at(t));
        tokio::select! {
            biased;
            changed = unmount.changed() => {
                if changed.is_err() {
                    break PaymentWatchOutcome::Unmounted;
                }
            }
            event = events.recv(), if events_open => match event {
                Some(event) => {
                    watcher.on_channel_event(clock.now(), &event);
                }
                None => {
                    debug!("real-time event stream closed");
                    events_open = false;
                }
            },
            _ = sleep_until_or_pending(sleep_until) => {
                watcher.on_timers(clock.now(), navigator);
            }
        }
    };
    watcher.teardown();
    outcome
}

async fn sleep_until_or_pending(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
