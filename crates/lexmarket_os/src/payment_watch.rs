#![forbid(unsafe_code)]

//! Payment-completion watcher behind the processing screen.
//!
//! The watcher is a plain state machine. Time only moves when the caller
//! passes `now`, and timers are deadlines checked in [`PaymentWatcher::on_timers`];
//! the async driver in `payment_watch_driver` feeds it from the real clock.
//!
//! Lifecycle per mount:
//! - `processing` with one subscription to `payment-<ref>` and a completion
//!   timeout armed;
//! - `success` once a valid `payment-completed` event arrives, followed by a
//!   single redirect to the case after the redirect delay;
//! - `failed` on a missing reference, missing real-time configuration, an
//!   unreachable real-time service, an incomplete payload, or the timeout.
//!
//! Terminal states never change again for the same mount, and nothing
//! observable happens after [`PaymentWatcher::teardown`].

use std::env;

use lexmarket_engines::realtime::{
    ChannelEvent, EventSink, RealtimeClient, RealtimeConfig, RealtimeConnector,
};
use lexmarket_kernel_contracts::case::CaseId;
use lexmarket_kernel_contracts::payment::{
    payment_channel_name, CompletionPayload, PaymentWatchFailure, TransactionRef, WatcherState,
    PAYMENT_COMPLETED_EVENT,
};
use lexmarket_kernel_contracts::route::{AppRoute, NavigationState};
use lexmarket_kernel_contracts::MonotonicTimeNs;
use tracing::{debug, info, warn};

pub const COMPLETION_TIMEOUT_MS_DEFAULT: u64 = 30_000;
pub const REDIRECT_DELAY_MS_DEFAULT: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentWatchConfig {
    pub completion_timeout_ms: u64,
    pub redirect_delay_ms: u64,
}

impl PaymentWatchConfig {
    pub fn mvp_v1() -> Self {
        Self {
            completion_timeout_ms: COMPLETION_TIMEOUT_MS_DEFAULT,
            redirect_delay_ms: REDIRECT_DELAY_MS_DEFAULT,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::mvp_v1();
        let bounded = |key: &str, min: u64, max: u64, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| (min..=max).contains(v))
                .unwrap_or(default)
        };
        Self {
            completion_timeout_ms: bounded(
                "LEXMARKET_PAYMENT_WATCH_TIMEOUT_MS",
                1_000,
                300_000,
                defaults.completion_timeout_ms,
            ),
            redirect_delay_ms: bounded(
                "LEXMARKET_PAYMENT_REDIRECT_DELAY_MS",
                0,
                30_000,
                defaults.redirect_delay_ms,
            ),
        }
    }
}

impl Default for PaymentWatchConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

/// What the processing screen reads from its location when it mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentWatchInput {
    pub route_case_id: CaseId,
    pub transaction_ref: Option<String>,
}

impl PaymentWatchInput {
    pub fn new(route_case_id: CaseId, transaction_ref: Option<&str>) -> Self {
        Self {
            route_case_id,
            transaction_ref: transaction_ref.map(str::to_string),
        }
    }

    /// `None` unless the location is the payment processing screen.
    pub fn from_navigation(nav: &NavigationState) -> Option<Self> {
        match &nav.route {
            AppRoute::ClientPaymentProcessing(case_id) => {
                Some(Self::new(case_id.clone(), nav.transaction_ref()))
            }
            _ => None,
        }
    }
}

pub trait Navigator {
    fn navigate(&mut self, location: &str);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordingNavigator {
    pub visits: Vec<String>,
}

impl RecordingNavigator {
    pub fn last(&self) -> Option<&str> {
        self.visits.last().map(String::as_str)
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&mut self, location: &str) {
        self.visits.push(location.to_string());
    }
}

/// Screen model for the three watcher states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentWatchView {
    pub state: WatcherState,
    pub headline: &'static str,
    pub body: String,
    pub footnote: Option<&'static str>,
    pub payment_status: Option<String>,
    pub failure: Option<PaymentWatchFailure>,
    /// Where the manual recovery action leads; only set in `failed`.
    pub recovery_target: Option<String>,
}

struct ActiveSubscription {
    client: Box<dyn RealtimeClient>,
    channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRedirect {
    at: MonotonicTimeNs,
    location: String,
}

pub struct PaymentWatcher {
    config: PaymentWatchConfig,
    mounted: bool,
    route_case_id: Option<CaseId>,
    state: WatcherState,
    failure: Option<PaymentWatchFailure>,
    payload: Option<CompletionPayload>,
    subscription: Option<ActiveSubscription>,
    timeout_at: Option<MonotonicTimeNs>,
    redirect: Option<PendingRedirect>,
    redirected_to: Option<String>,
}

impl PaymentWatcher {
    pub fn new(config: PaymentWatchConfig) -> Self {
        Self {
            config,
            mounted: false,
            route_case_id: None,
            state: WatcherState::Processing,
            failure: None,
            payload: None,
            subscription: None,
            timeout_at: None,
            redirect: None,
            redirected_to: None,
        }
    }

    pub fn config(&self) -> PaymentWatchConfig {
        self.config
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn failure(&self) -> Option<PaymentWatchFailure> {
        self.failure
    }

    pub fn payload(&self) -> Option<&CompletionPayload> {
        self.payload.as_ref()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn subscribed_channel(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.channel.as_str())
    }

    pub fn timeout_deadline(&self) -> Option<MonotonicTimeNs> {
        self.timeout_at
    }

    pub fn redirect_deadline(&self) -> Option<MonotonicTimeNs> {
        self.redirect.as_ref().map(|r| r.at)
    }

    /// Earliest armed timer, if any.
    pub fn next_deadline(&self) -> Option<MonotonicTimeNs> {
        match (self.timeout_at, self.redirect_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// True once the redirect to the case has been issued.
    pub fn has_redirected(&self) -> bool {
        self.redirected_to.is_some()
    }

    /// The location handed to the navigator, once the redirect has fired.
    pub fn redirected_location(&self) -> Option<&str> {
        self.redirected_to.as_deref()
    }

    /// Starts watching. A watcher that is already mounted is torn down first.
    pub fn mount(
        &mut self,
        input: PaymentWatchInput,
        realtime: Option<&RealtimeConfig>,
        connector: &dyn RealtimeConnector,
        sink: EventSink,
        now: MonotonicTimeNs,
    ) {
        if self.mounted {
            self.teardown();
        }
        self.mounted = true;
        self.route_case_id = Some(input.route_case_id);
        self.state = WatcherState::Processing;
        self.failure = None;
        self.payload = None;
        self.redirect = None;
        self.redirected_to = None;

        let transaction_ref = match input.transaction_ref.as_deref().map(TransactionRef::new) {
            Some(Ok(r)) => r,
            Some(Err(err)) => {
                warn!(error = %err, "payment link id is not usable");
                self.fail(PaymentWatchFailure::MissingTransactionRef);
                return;
            }
            None => {
                self.fail(PaymentWatchFailure::MissingTransactionRef);
                return;
            }
        };
        let Some(realtime) = realtime else {
            self.fail(PaymentWatchFailure::MissingRealtimeConfig);
            return;
        };

        let channel = payment_channel_name(&transaction_ref);
        let mut client = match connector.connect(realtime, sink) {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "real-time connect failed");
                self.fail(PaymentWatchFailure::RealtimeUnavailable);
                return;
            }
        };
        let wired = client
            .subscribe(&channel)
            .and_then(|()| client.bind(&channel, PAYMENT_COMPLETED_EVENT));
        if let Err(err) = wired {
            warn!(channel = %channel, error = %err, "payment channel subscription failed");
            client.disconnect();
            self.fail(PaymentWatchFailure::RealtimeUnavailable);
            return;
        }

        info!(channel = %channel, timeout_ms = self.config.completion_timeout_ms, "watching for payment completion");
        self.subscription = Some(ActiveSubscription { client, channel });
        self.timeout_at = Some(now.saturating_add_ms(self.config.completion_timeout_ms));
    }

    /// Same as [`PaymentWatcher::mount`]; spelled out for call sites where the
    /// location changed under a live screen.
    pub fn remount(
        &mut self,
        input: PaymentWatchInput,
        realtime: Option<&RealtimeConfig>,
        connector: &dyn RealtimeConnector,
        sink: EventSink,
        now: MonotonicTimeNs,
    ) {
        self.teardown();
        self.mount(input, realtime, connector, sink, now);
    }

    /// Applies one inbound event. Returns whether the state changed.
    pub fn on_channel_event(&mut self, now: MonotonicTimeNs, event: &ChannelEvent) -> bool {
        if !self.mounted || self.state != WatcherState::Processing {
            return false;
        }
        let matches_binding = self
            .subscription
            .as_ref()
            .is_some_and(|s| s.channel == event.channel)
            && event.event == PAYMENT_COMPLETED_EVENT;
        if !matches_binding {
            debug!(channel = %event.channel, event = %event.event, "ignoring unbound event");
            return false;
        }

        match CompletionPayload::from_json(&event.data) {
            Ok(payload) => {
                info!(
                    case_id = %payload.case_id,
                    payment_status = %payload.payment_status,
                    "payment completed"
                );
                self.state = WatcherState::Success;
                self.timeout_at = None;
                self.release_subscription();
                self.redirect = Some(PendingRedirect {
                    at: now.saturating_add_ms(self.config.redirect_delay_ms),
                    location: AppRoute::ClientCase(payload.case_id.clone()).path(),
                });
                self.payload = Some(payload);
            }
            Err(err) => {
                warn!(error = %err, "payment completion payload rejected");
                self.fail(PaymentWatchFailure::IncompletePayload);
            }
        }
        true
    }

    /// Fires every timer due at `now`.
    pub fn on_timers(&mut self, now: MonotonicTimeNs, navigator: &mut dyn Navigator) {
        if !self.mounted {
            return;
        }
        if self.timeout_at.is_some_and(|at| now >= at) {
            self.timeout_at = None;
            if self.state == WatcherState::Processing {
                warn!(elapsed_ms = self.config.completion_timeout_ms, "payment completion timed out");
                self.fail(PaymentWatchFailure::TimedOut);
            }
        }
        if self.redirect.as_ref().is_some_and(|r| now >= r.at) {
            if let Some(redirect) = self.redirect.take() {
                if self.redirected_to.is_none() {
                    info!(location = %redirect.location, "redirecting to case");
                    navigator.navigate(&redirect.location);
                    self.redirected_to = Some(redirect.location);
                }
            }
        }
    }

    /// Cancels both timers, releases the subscription and stops all further
    /// effects. Safe to call more than once.
    pub fn teardown(&mut self) {
        self.timeout_at = None;
        self.redirect = None;
        self.release_subscription();
        if self.mounted {
            debug!(state = self.state.as_str(), "payment watcher unmounted");
        }
        self.mounted = false;
    }

    /// The manual "go to case details" action. Only available in `failed`.
    pub fn recover(&mut self, navigator: &mut dyn Navigator) -> bool {
        if !self.mounted || self.state != WatcherState::Failed {
            return false;
        }
        let Some(case_id) = &self.route_case_id else {
            return false;
        };
        navigator.navigate(&AppRoute::ClientCase(case_id.clone()).path());
        true
    }

    pub fn view(&self) -> PaymentWatchView {
        let payment_status = self.payload.as_ref().map(|p| p.payment_status.clone());
        match self.state {
            WatcherState::Processing => PaymentWatchView {
                state: self.state,
                headline: "Processing Payment...",
                body: "Please wait while we confirm your payment. This usually takes just a few seconds."
                    .to_string(),
                footnote: None,
                payment_status,
                failure: None,
                recovery_target: None,
            },
            WatcherState::Success => PaymentWatchView {
                state: self.state,
                headline: "Payment Successful!",
                body: "Your payment has been processed successfully. The quote has been accepted and the case is now engaged."
                    .to_string(),
                footnote: Some("Redirecting to case details..."),
                payment_status,
                failure: None,
                recovery_target: None,
            },
            WatcherState::Failed => PaymentWatchView {
                state: self.state,
                headline: "Payment Processing Issue",
                body: self
                    .failure
                    .map(PaymentWatchFailure::user_message)
                    .unwrap_or("There was an issue processing your payment. Please check your case details or contact support.")
                    .to_string(),
                footnote: None,
                payment_status,
                failure: self.failure,
                recovery_target: self
                    .route_case_id
                    .as_ref()
                    .map(|id| AppRoute::ClientCase(id.clone()).path()),
            },
        }
    }

    fn fail(&mut self, failure: PaymentWatchFailure) {
        info!(
            failure = failure.as_str(),
            reason_code = %format!("0x{:08X}", failure.reason_code().0),
            "payment watch failed"
        );
        self.state = WatcherState::Failed;
        self.failure = Some(failure);
        self.timeout_at = None;
        self.release_subscription();
    }

    fn release_subscription(&mut self) {
        if let Some(mut sub) = self.subscription.take() {
            if let Err(err) = sub.client.unsubscribe(&sub.channel) {
                debug!(channel = %sub.channel, error = %err, "unsubscribe failed");
            }
            sub.client.disconnect();
        }
    }
}

impl Drop for PaymentWatcher {
    fn drop(&mut self) {
        self.teardown();
    }
}
