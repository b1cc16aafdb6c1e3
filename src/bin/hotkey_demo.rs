//! Drives the core with a scripted keyboard and prints the resulting traffic.
//!
//! Run with `RUST_LOG=debug` to see the dispatch trace.

use overlay_events::config::CoreConfig;
use overlay_events::hotkey::{FakeKeyboard, RawKey};
use overlay_events::orchestrator::{Collaborators, RecordingIcon, SharedOverlayState, StubCapture};
use overlay_events::prelude::*;
use overlay_events::settings::InMemorySettings;
use overlay_events::telemetry;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WATCHED: &[&str] = &[
    names::APP_READY,
    names::HOTKEY_SCREENSHOT_CAPTURE,
    names::HOTKEY_OVERLAY_TOGGLE,
    names::HOTKEY_CONFIGURATION_RELOADED,
    names::SCREENSHOT_CAPTURED,
    names::UI_OVERLAY_SHOW,
    names::UI_OVERLAY_HIDE,
    names::UI_SETTINGS_SHOW,
    names::SETTINGS_CHANGED,
    names::APP_SHUTDOWN_STARTING,
    names::ERROR_OCCURRED,
];

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing("info,overlay_events=info");

    let overlay = SharedOverlayState::new();
    let collaborators = Collaborators::new()
        .screen_capture(Arc::new(StubCapture))
        .overlay(Arc::new(overlay.clone()))
        .icon(Arc::new(RecordingIcon::new()));

    let (keyboard, keys) = FakeKeyboard::new();
    let core = overlay_events::app::Core::builder(CoreConfig::default())
        .collaborators(collaborators)
        .start(Box::new(keyboard))
        .await?;
    let bus = core.bus().clone();

    // Keep the log subscriptions alive for the whole run
    let mut handles = Vec::new();
    for event_type in WATCHED {
        handles.push(bus.subscribe_fn(
            *event_type,
            |event: &EventEnvelope| {
                println!("📨 {} {}", event.event_type(), event.payload());
            },
            SubscribeOptions::new().priority(-10),
        )?);
    }

    println!("Pressing Ctrl+Shift+S...");
    keys.chord(&[RawKey::ctrl(), RawKey::shift(), RawKey::Char('s')]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("Pressing Ctrl+Shift+O twice...");
    keys.chord(&[RawKey::ctrl(), RawKey::shift(), RawKey::Char('o')]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    overlay.set_visible(true);
    keys.chord(&[RawKey::ctrl(), RawKey::shift(), RawKey::Char('o')]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("Rebinding the overlay toggle to Ctrl+Alt+O...");
    let settings = InMemorySettings::with_bus(bus.clone());
    settings.set("hotkeys.overlay_toggle", json!("ctrl+alt+o"))?;
    settings.set("ui.theme", json!("dark"))?;
    // Past the reload debounce window
    tokio::time::sleep(Duration::from_millis(500)).await;

    for registration in core.bridge().list_registered().await {
        println!("  {} = {}", registration.hotkey_id(), registration.combo());
    }

    println!("Quitting from the tray...");
    bus.emit(names::TRAY_QUIT_REQUESTED, json!({}))?;
    core.shutdown_requested().await;

    println!("{}", bus.metrics());
    drop(handles);
    core.shutdown().await?;
    Ok(())
}
