#![forbid(unsafe_code)]

use std::time::Duration;

use lexmarket_engines::realtime::{event_queue, RealtimeConfig};
use lexmarket_engines::realtime_local::LocalRealtimeHub;
use lexmarket_kernel_contracts::payment::{PaymentWatchFailure, WatcherState};
use lexmarket_kernel_contracts::route::NavigationState;
use lexmarket_os::payment_watch::{
    PaymentWatchConfig, PaymentWatchInput, PaymentWatcher, RecordingNavigator,
};
use lexmarket_os::payment_watch_driver::{drive_payment_watch, PaymentWatchOutcome, WatchClock};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

const LOCATION: &str = "/client/cases/c_100/payment/processing?payment_link_id=plink_abc";

fn input(location: &str) -> PaymentWatchInput {
    PaymentWatchInput::from_navigation(&NavigationState::parse(location).unwrap()).unwrap()
}

fn realtime() -> RealtimeConfig {
    RealtimeConfig::new("local", "local")
}

#[tokio::test(start_paused = true)]
async fn at_payment_flow_01_hub_publish_drives_redirect() {
    let hub = LocalRealtimeHub::new();
    let clock = WatchClock::start();
    let (sink, mut events) = event_queue();
    let mut watcher = PaymentWatcher::new(PaymentWatchConfig::mvp_v1());
    watcher.mount(input(LOCATION), Some(&realtime()), &hub, sink, clock.now());
    assert_eq!(hub.subscriber_count("payment-plink_abc"), 1);

    let publisher = hub.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        publisher.publish("payment-plink_abc", "payment-updated", json!({"step": 1}));
        publisher.publish(
            "payment-plink_abc",
            "payment-completed",
            json!({"case_id": "c_100", "payment_status": "paid", "amount_total": 50000}),
        );
    });

    let (_unmount_tx, unmount_rx) = watch::channel(false);
    let mut nav = RecordingNavigator::default();
    let started = Instant::now();
    let out = drive_payment_watch(&mut watcher, clock, &mut events, &mut nav, unmount_rx).await;

    assert_eq!(
        out,
        PaymentWatchOutcome::Redirected {
            location: "/client/cases/c_100".to_string()
        }
    );
    assert_eq!(started.elapsed(), Duration::from_millis(3_500));
    assert_eq!(nav.visits, vec!["/client/cases/c_100".to_string()]);
    assert_eq!(watcher.state(), WatcherState::Success);
    assert_eq!(
        watcher.payload().and_then(|p| p.extra.get("amount_total").cloned()),
        Some(json!(50000))
    );
}

#[tokio::test(start_paused = true)]
async fn at_payment_flow_02_silence_times_out_and_releases_channel() {
    let hub = LocalRealtimeHub::new();
    let clock = WatchClock::start();
    let (sink, mut events) = event_queue();
    let mut watcher = PaymentWatcher::new(PaymentWatchConfig::mvp_v1());
    watcher.mount(input(LOCATION), Some(&realtime()), &hub, sink, clock.now());

    let (_unmount_tx, unmount_rx) = watch::channel(false);
    let mut nav = RecordingNavigator::default();
    let out = drive_payment_watch(&mut watcher, clock, &mut events, &mut nav, unmount_rx).await;

    assert_eq!(
        out,
        PaymentWatchOutcome::Failed {
            failure: Some(PaymentWatchFailure::TimedOut),
            recovery_target: Some("/client/cases/c_100".to_string()),
        }
    );
    assert!(nav.visits.is_empty());
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert_eq!(hub.subscriber_count("payment-plink_abc"), 0);
}

#[tokio::test(start_paused = true)]
async fn at_payment_flow_03_unmount_before_completion_ignores_late_event() {
    let hub = LocalRealtimeHub::new();
    let clock = WatchClock::start();
    let (sink, mut events) = event_queue();
    let mut watcher = PaymentWatcher::new(PaymentWatchConfig::mvp_v1());
    watcher.mount(input(LOCATION), Some(&realtime()), &hub, sink, clock.now());

    let (unmount_tx, unmount_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let _ = unmount_tx.send(true);
    });
    let mut nav = RecordingNavigator::default();
    let out = drive_payment_watch(&mut watcher, clock, &mut events, &mut nav, unmount_rx).await;
    assert_eq!(out, PaymentWatchOutcome::Unmounted);

    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        hub.publish(
            "payment-plink_abc",
            "payment-completed",
            json!({"case_id": "c_100", "payment_status": "paid"})
        ),
        0
    );
    assert_eq!(watcher.state(), WatcherState::Processing);
    assert!(nav.visits.is_empty());
}

#[tokio::test(start_paused = true)]
async fn at_payment_flow_04_missing_link_id_never_subscribes() {
    let hub = LocalRealtimeHub::new();
    let clock = WatchClock::start();
    let (sink, mut events) = event_queue();
    let mut watcher = PaymentWatcher::new(PaymentWatchConfig::mvp_v1());
    watcher.mount(
        input("/client/cases/c_100/payment/processing"),
        Some(&realtime()),
        &hub,
        sink,
        clock.now(),
    );
    let (_unmount_tx, unmount_rx) = watch::channel(false);
    let mut nav = RecordingNavigator::default();
    let out = drive_payment_watch(&mut watcher, clock, &mut events, &mut nav, unmount_rx).await;
    assert!(matches!(
        out,
        PaymentWatchOutcome::Failed {
            failure: Some(PaymentWatchFailure::MissingTransactionRef),
            ..
        }
    ));
    assert_eq!(hub.subscriber_count("payment-plink_abc"), 0);
}
