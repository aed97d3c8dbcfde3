//! Notification listener against a fake notification socket

mod common;

use common::*;
use mockito::Matcher;
use serde_json::json;
use sony_audio_control::{
    ChangeEvent, ChangeReceiver, ControlValue, Domain, EventSource, ReceiverConfig, SonyReceiver,
    SubscriptionStatus, VolumeState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

fn listener_config(rpc_port: u16, peer: &NotificationPeer) -> ReceiverConfig {
    let mut config = ReceiverConfig::new("127.0.0.1");
    config.port = rpc_port;
    config.notification_port = Some(peer.port);
    config.event_sources = vec![EventSource::Audio];
    config.request_timeout = 1_000;
    config.initial_backoff = 50;
    config.max_backoff = 200;
    config.polling_interval = 100;
    config
}

async fn wait_for_status(receiver: &SonyReceiver, wanted: SubscriptionStatus) {
    let mut rx = receiver
        .listener()
        .watch_status(EventSource::Audio)
        .expect("audio source configured");
    timeout(WAIT, rx.wait_for(|status| *status == wanted))
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {:?}", wanted))
        .expect("status sender alive");
}

async fn next_event<F>(rx: &mut ChangeReceiver, matches: F) -> ChangeEvent
where
    F: Fn(&ChangeEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("Timed out waiting for change event")
}

fn volume_notification(level: u32, mute: &str) -> serde_json::Value {
    json!([{ "output": "extOutput:zone?zone=1", "volume": level, "mute": mute }])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pushed_change_updates_state_and_notifies() {
    init_tracing();
    let peer = NotificationPeer::start(true).await;
    let mut receiver = SonyReceiver::new(listener_config(closed_port().await, &peer)).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    receiver.on_change(Domain::Volume, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut events = receiver.subscribe();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    peer.push_notification("notifyVolumeInformation", volume_notification(31, "off"));

    let event = next_event(&mut events, |e| e.domain == Domain::Volume).await;
    assert_eq!(
        event.value,
        ControlValue::Volume(VolumeState { level: 31, muted: false })
    );
    assert_eq!(receiver.volume().cached().level, 31);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Same value again is not a change
    peer.push_notification("notifyVolumeInformation", volume_notification(31, "off"));
    peer.push_notification(
        "notifySettingsUpdate",
        json!([{ "target": "soundField", "currentValue": "2chStereo" }]),
    );
    next_event(&mut events, |e| e.domain == Domain::SoundField).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_of_local_command_is_discarded() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/sony/audio")
        .match_body(Matcher::PartialJson(json!({ "method": "setAudioVolume" })))
        .with_status(200)
        .with_body(result_body(json!([])))
        .create_async()
        .await;

    let peer = NotificationPeer::start(true).await;
    let (_, rpc_port) = host_and_port(&server);
    let mut config = listener_config(rpc_port, &peer);
    config.debounce_window = 60_000;
    let mut receiver = SonyReceiver::new(config).unwrap();
    let mut events = receiver.subscribe();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    receiver.volume().set_state(30).await.unwrap();

    // The device ramps through intermediate levels
    peer.push_notification("notifyVolumeInformation", volume_notification(35, "off"));
    peer.push_notification(
        "notifySettingsUpdate",
        json!([{ "target": "soundField", "currentValue": "2chStereo" }]),
    );

    // Frames are handled in order, so a volume event would arrive first
    let event = next_event(&mut events, |_| true).await;
    assert_eq!(event.domain, Domain::SoundField);
    assert_eq!(receiver.volume().cached().level, 30);

    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_change_after_debounce_window_is_applied() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/sony/audio")
        .match_body(Matcher::PartialJson(json!({ "method": "setAudioVolume" })))
        .with_status(200)
        .with_body(result_body(json!([])))
        .create_async()
        .await;

    let peer = NotificationPeer::start(true).await;
    let (_, rpc_port) = host_and_port(&server);
    let mut config = listener_config(rpc_port, &peer);
    config.debounce_window = 200;
    let mut receiver = SonyReceiver::new(config).unwrap();
    let mut events = receiver.subscribe();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    receiver.volume().set_state(30).await.unwrap();
    sleep(Duration::from_millis(400)).await;

    peer.push_notification("notifyVolumeInformation", volume_notification(35, "off"));

    let event = next_event(&mut events, |e| e.domain == Domain::Volume).await;
    assert_eq!(
        event.value,
        ControlValue::Volume(VolumeState { level: 35, muted: false })
    );

    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frames_are_dropped() {
    init_tracing();
    let peer = NotificationPeer::start(true).await;
    let mut receiver = SonyReceiver::new(listener_config(closed_port().await, &peer)).unwrap();
    let mut events = receiver.subscribe();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    peer.push("not json{");
    peer.push(json!({ "params": [] }).to_string());
    peer.push_notification("notifyVolumeInformation", json!([{ "output": "" }]));
    peer.push_notification("notifyVolumeInformation", json!([{ "mute": "on" }]));

    let event = next_event(&mut events, |e| e.domain == Domain::Volume).await;
    assert_eq!(
        event.value,
        ControlValue::Volume(VolumeState { level: 0, muted: true })
    );
    assert_eq!(
        receiver.subscription_status(EventSource::Audio),
        Some(SubscriptionStatus::Live)
    );

    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lost_subscription_falls_back_to_polling() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    let volume_40 = server
        .mock("POST", "/sony/audio")
        .match_body(Matcher::PartialJson(json!({ "method": "getVolumeInformation" })))
        .with_status(200)
        .with_body(volume_body(40, "off"))
        .create_async()
        .await;
    server
        .mock("POST", "/sony/audio")
        .match_body(Matcher::PartialJson(json!({ "method": "getSoundSettings" })))
        .with_status(200)
        .with_body(sound_field_body("dolbySurround"))
        .create_async()
        .await;

    let peer = NotificationPeer::start(true).await;
    let (_, rpc_port) = host_and_port(&server);
    let mut config = listener_config(rpc_port, &peer);
    config.reconnect_attempts = 1;
    let mut receiver = SonyReceiver::new(config).unwrap();
    let mut events = receiver.subscribe();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    // Going live reads the current state once
    let event = next_event(&mut events, |e| e.domain == Domain::Volume).await;
    assert_eq!(
        event.value,
        ControlValue::Volume(VolumeState { level: 40, muted: false })
    );

    peer.close();
    wait_for_status(&receiver, SubscriptionStatus::Polling).await;

    volume_40.remove_async().await;
    server
        .mock("POST", "/sony/audio")
        .match_body(Matcher::PartialJson(json!({ "method": "getVolumeInformation" })))
        .with_status(200)
        .with_body(volume_body(55, "off"))
        .create_async()
        .await;

    let event = next_event(&mut events, |e| {
        matches!(e.value, ControlValue::Volume(VolumeState { level: 55, .. }))
    })
    .await;
    assert_eq!(event.domain, Domain::Volume);
    assert_eq!(receiver.snapshot().volume.level, 55);
    assert_eq!(receiver.snapshot().sound_field.as_deref(), Some("dolbySurround"));

    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsupported_push_polls_instead() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/sony/audio")
        .match_body(Matcher::PartialJson(json!({ "method": "getVolumeInformation" })))
        .with_status(200)
        .with_body(volume_body(12, "on"))
        .create_async()
        .await;

    let peer = NotificationPeer::start(false).await;
    let (_, rpc_port) = host_and_port(&server);
    let mut receiver = SonyReceiver::new(listener_config(rpc_port, &peer)).unwrap();
    let mut events = receiver.subscribe();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Polling).await;

    let event = next_event(&mut events, |e| e.domain == Domain::Volume).await;
    assert_eq!(
        event.value,
        ControlValue::Volume(VolumeState { level: 12, muted: true })
    );

    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_disconnects_every_source() {
    init_tracing();
    let peer = NotificationPeer::start(true).await;
    let mut receiver = SonyReceiver::new(listener_config(closed_port().await, &peer)).unwrap();
    assert_eq!(
        receiver.subscription_status(EventSource::Audio),
        Some(SubscriptionStatus::Disconnected)
    );
    assert_eq!(receiver.subscription_status(EventSource::System), None);

    receiver.start().await;
    assert!(receiver.listener().is_running());
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    receiver.stop().await;
    assert!(!receiver.listener().is_running());
    assert_eq!(
        receiver.subscription_status(EventSource::Audio),
        Some(SubscriptionStatus::Disconnected)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_query_inside_window_keeps_commanded_value() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/sony/audio")
        .match_body(Matcher::PartialJson(json!({ "method": "getVolumeInformation" })))
        .with_status(200)
        .with_body(volume_body(40, "off"))
        .create_async()
        .await;
    server
        .mock("POST", "/sony/audio")
        .match_body(Matcher::PartialJson(json!({ "method": "setAudioVolume" })))
        .with_status(200)
        .with_body(result_body(json!([])))
        .create_async()
        .await;

    let peer = NotificationPeer::start(true).await;
    let (_, rpc_port) = host_and_port(&server);
    let mut config = listener_config(rpc_port, &peer);
    config.debounce_window = 5_000;
    let mut receiver = SonyReceiver::new(config).unwrap();
    let mut events = receiver.subscribe();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;
    next_event(&mut events, |e| e.domain == Domain::Volume).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    receiver.on_change(Domain::Volume, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    receiver.volume().set_state(50).await.unwrap();

    // The device still reports the level from before the ramp
    let queried = receiver.volume().get_current_state().await;
    assert_eq!(queried.level, 50);

    peer.push_notification("notifyVolumeInformation", volume_notification(50, "off"));
    peer.push_notification(
        "notifySettingsUpdate",
        json!([{ "target": "soundField", "currentValue": "2chStereo" }]),
    );
    next_event(&mut events, |e| e.domain == Domain::SoundField).await;

    assert_eq!(receiver.volume().cached().level, 50);
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_polling_returns_to_live_when_push_comes_back() {
    init_tracing();
    let mut peer = NotificationPeer::start(true).await;
    let mut config = listener_config(closed_port().await, &peer);
    config.reconnect_attempts = 1;
    let mut receiver = SonyReceiver::new(config).unwrap();
    let mut events = receiver.subscribe();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    peer.close();
    wait_for_status(&receiver, SubscriptionStatus::Polling).await;

    peer.reopen().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    peer.push_notification("notifyVolumeInformation", volume_notification(22, "off"));
    let event = next_event(&mut events, |e| e.domain == Domain::Volume).await;
    assert_eq!(
        event.value,
        ControlValue::Volume(VolumeState { level: 22, muted: false })
    );

    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnect_backs_off_before_polling() {
    init_tracing();
    let peer = NotificationPeer::start(true).await;
    let mut config = listener_config(closed_port().await, &peer);
    config.reconnect_attempts = 3;
    config.initial_backoff = 200;
    config.max_backoff = 1_000;
    let mut receiver = SonyReceiver::new(config).unwrap();

    receiver.start().await;
    wait_for_status(&receiver, SubscriptionStatus::Live).await;

    peer.close();
    wait_for_status(&receiver, SubscriptionStatus::Disconnected).await;
    let dropped_at = Instant::now();

    // Two failed attempts wait 200 ms and 400 ms before the third gives up
    sleep(Duration::from_millis(150)).await;
    assert_eq!(
        receiver.subscription_status(EventSource::Audio),
        Some(SubscriptionStatus::Disconnected)
    );

    wait_for_status(&receiver, SubscriptionStatus::Polling).await;
    assert!(dropped_at.elapsed() >= Duration::from_millis(500));

    receiver.stop().await;
}
