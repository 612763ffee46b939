#![forbid(unsafe_code)]

use lexmarket_engines::realtime::{event_queue, RealtimeConfig, RealtimeConnector};
use lexmarket_kernel_contracts::route::NavigationState;
use lexmarket_os::payment_watch::{
    PaymentWatchConfig, PaymentWatchInput, PaymentWatchView, PaymentWatcher, RecordingNavigator,
};
use lexmarket_os::payment_watch_driver::{drive_payment_watch, PaymentWatchOutcome, WatchClock};
use lexmarket_os::session::SessionContext;
use tokio::sync::watch;

use crate::session_cli::require_access;

/// The processing screen is client-only; refuse before anything connects.
pub fn guard_watch_payment(ctx: &SessionContext, location: &str) -> Result<(), String> {
    let nav = NavigationState::parse(location).map_err(|e| e.to_string())?;
    require_access(ctx, &nav.route).map(|_| ())
}

/// Runs the processing screen for `location` until it redirects, fails or
/// `unmount` fires. Returns the transcript the screen would have shown.
pub async fn execute_watch_payment(
    location: &str,
    realtime: Option<&RealtimeConfig>,
    connector: &dyn RealtimeConnector,
    config: PaymentWatchConfig,
    unmount: watch::Receiver<bool>,
) -> Result<String, String> {
    let nav = NavigationState::parse(location).map_err(|e| e.to_string())?;
    let input = PaymentWatchInput::from_navigation(&nav).ok_or_else(|| {
        format!(
            "not a payment processing location: {location} (expected /client/cases/<id>/payment/processing?payment_link_id=<id>)"
        )
    })?;

    let clock = WatchClock::start();
    let (sink, mut events) = event_queue();
    let mut watcher = PaymentWatcher::new(config);
    watcher.mount(input, realtime, connector, sink, clock.now());

    let mut lines = vec![render_view(&watcher.view())];
    let mut navigator = RecordingNavigator::default();
    let outcome = drive_payment_watch(&mut watcher, clock, &mut events, &mut navigator, unmount).await;

    match outcome {
        PaymentWatchOutcome::Redirected { location } => {
            lines.push(render_view(&watcher.view()));
            lines.push(format!("-> {location}"));
        }
        PaymentWatchOutcome::Failed { .. } => {
            let view = watcher.view();
            if lines.last() != Some(&render_view(&view)) {
                lines.push(render_view(&view));
            }
        }
        PaymentWatchOutcome::Unmounted => lines.push("(stopped)".to_string()),
    }
    Ok(lines.join("\n"))
}

pub fn render_view(view: &PaymentWatchView) -> String {
    let mut out = format!("[{}] {}\n{}", view.state.as_str(), view.headline, view.body);
    if let Some(status) = &view.payment_status {
        out.push_str(&format!("\nPayment Status: {status}"));
    }
    if let Some(footnote) = view.footnote {
        out.push_str(&format!("\n{footnote}"));
    }
    if let Some(target) = &view.recovery_target {
        out.push_str(&format!("\nGo to Case Details: {target}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmarket_engines::api_client::{ApiError, AuthApi};
    use lexmarket_engines::realtime_local::LocalRealtimeHub;
    use lexmarket_engines::token_store::MemoryTokenStore;
    use lexmarket_kernel_contracts::session::{
        AuthResponse, LoginInput, Role, SessionToken, SignupInput, UserId, UserProfile,
    };
    use serde_json::json;
    use std::time::Duration;

    const LOCATION: &str = "/client/cases/c3/payment/processing?payment_link_id=plink_3";

    #[tokio::test(start_paused = true)]
    async fn at_payment_cli_01_transcript_covers_processing_success_and_redirect() {
        let hub = LocalRealtimeHub::new();
        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            publisher.publish(
                "payment-plink_3",
                "payment-completed",
                json!({"case_id": "c3", "payment_status": "paid"}),
            );
        });
        let (_tx, rx) = watch::channel(false);
        let out = execute_watch_payment(
            LOCATION,
            Some(&RealtimeConfig::new("local", "local")),
            &hub,
            PaymentWatchConfig::mvp_v1(),
            rx,
        )
        .await
        .unwrap();
        assert!(out.starts_with("[processing] Processing Payment..."));
        assert!(out.contains("[success] Payment Successful!"));
        assert!(out.ends_with("-> /client/cases/c3"));
    }

    #[tokio::test(start_paused = true)]
    async fn at_payment_cli_02_missing_config_fails_immediately() {
        let hub = LocalRealtimeHub::new();
        let (_tx, rx) = watch::channel(false);
        let out = execute_watch_payment(LOCATION, None, &hub, PaymentWatchConfig::mvp_v1(), rx)
            .await
            .unwrap();
        assert!(out.starts_with("[failed] Payment Processing Issue"));
        assert!(out.contains("Go to Case Details: /client/cases/c3"));
        assert_eq!(out.matches("[failed]").count(), 1);
    }

    #[tokio::test]
    async fn at_payment_cli_03_rejects_other_locations() {
        let hub = LocalRealtimeHub::new();
        let (_tx, rx) = watch::channel(false);
        let err = execute_watch_payment("/client/cases/c3", None, &hub, PaymentWatchConfig::mvp_v1(), rx)
            .await
            .unwrap_err();
        assert!(err.starts_with("not a payment processing location"));
    }

    struct ProfileOnly(Role);

    impl AuthApi for ProfileOnly {
        fn login(&self, _input: &LoginInput) -> Result<AuthResponse, ApiError> {
            unreachable!("login is not used here")
        }

        fn signup(&self, _input: &SignupInput) -> Result<AuthResponse, ApiError> {
            unreachable!("signup is not used here")
        }

        fn get_profile(&self, _token: &SessionToken) -> Result<UserProfile, ApiError> {
            Ok(UserProfile {
                id: UserId::new("u_1").unwrap(),
                email: "pat@example.com".to_string(),
                name: None,
                role: self.0,
            })
        }
    }

    fn signed_in(role: Role) -> SessionContext {
        let store = MemoryTokenStore::with_token(SessionToken::new("tok").unwrap());
        let mut ctx = SessionContext::new(Box::new(store));
        ctx.init(&ProfileOnly(role));
        ctx
    }

    #[test]
    fn at_payment_cli_04_processing_screen_is_client_only() {
        assert!(guard_watch_payment(&signed_in(Role::Client), LOCATION).is_ok());
        assert_eq!(
            guard_watch_payment(&signed_in(Role::Lawyer), LOCATION).unwrap_err(),
            "this command needs a client account"
        );

        let mut anonymous = SessionContext::new(Box::new(MemoryTokenStore::new()));
        anonymous.init(&ProfileOnly(Role::Client));
        assert_eq!(
            guard_watch_payment(&anonymous, LOCATION).unwrap_err(),
            "not signed in; run `lexmarket login` first"
        );
    }
}
