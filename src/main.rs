//! Application entry point - Twitch reactive avatar.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Create the Twitch event source and the platform event channel.
//! 5. Build the trigger registry and spawn the [`ReactorRunner`].
//! 6. Spawn the platform task (connect / disconnect on UI command).
//! 7. Start the [`SpeakingMonitor`] on its own sampling thread.
//! 8. Run [`eframe::run_native`] - blocks the main thread until the window
//!    is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use reactive_avatar::{
    app::OverlayApp,
    audio::{SpeakingCallback, SpeakingMonitor},
    config::AppConfig,
    platform::{run_platform, NormalizedPlatformEvent, PlatformCommand, TwitchEventSource},
    reactor::ReactorRunner,
    triggers::{default_catalog, TriggerRegistry},
};

use eframe::egui;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

fn build_registry(config: &AppConfig) -> TriggerRegistry {
    config.registry().unwrap_or_else(|e| {
        log::warn!("Invalid state catalog in config ({e:#}); using built-in states");
        TriggerRegistry::from_definitions(default_catalog())
            .expect("built-in catalog is valid")
    })
}

// ---------------------------------------------------------------------------
// Native options builder
// ---------------------------------------------------------------------------

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let (w, h) = config.ui.avatar_size;
    let panel = if config.ui.show_controls { 300.0 } else { 0.0 };

    let mut vp = egui::ViewportBuilder::default()
        .with_title("Reactive Avatar")
        .with_inner_size([w + panel, h])
        .with_min_inner_size([200.0, 200.0]);

    if config.ui.always_on_top {
        vp = vp.with_always_on_top();
    }

    if let Some((x, y)) = config.ui.window_position {
        vp = vp.with_position(egui::pos2(x, y));
    }

    eframe::NativeOptions {
        viewport: vp,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> eframe::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Reactive Avatar starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime (2 worker threads: network and reactor)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    // 4. Platform event source
    let (event_tx, event_rx) = mpsc::channel::<NormalizedPlatformEvent>(64);
    let source = TwitchEventSource::new(config.twitch.clone(), event_tx);
    let connection = source.status();

    // 5. Trigger registry + reaction machine
    let registry =
        build_registry(&config).with_subscription_control(Arc::new(source.subscription_handle()));
    let (runner, reactor) = ReactorRunner::new(registry);
    rt.spawn(runner.run(event_rx));

    // 6. Platform task
    let (platform_tx, platform_rx) = mpsc::channel::<PlatformCommand>(8);
    rt.spawn(run_platform(source, platform_rx));
    if config.twitch.auto_connect {
        let _ = platform_tx.try_send(PlatformCommand::Connect);
    }

    // 7. Microphone → speaking edges
    let monitor = if config.audio.enabled {
        let speaking = reactor.clone();
        let on_change: SpeakingCallback = Arc::new(move |is_speaking: bool| {
            if let Err(e) = speaking.blocking_set_speaking(is_speaking) {
                log::debug!("audio: speaking edge dropped: {e}");
            }
        });
        match SpeakingMonitor::start(config.audio.monitor_settings(), on_change) {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                log::warn!("Speaking detection unavailable: {e}");
                None
            }
        }
    } else {
        log::info!("Speaking detection disabled in config");
        None
    };

    // 8. Build the egui app and run it (blocks until the window is closed)
    let app = OverlayApp::new(
        reactor.clone(),
        connection,
        platform_tx,
        monitor,
        config.ui.clone(),
    );
    let options = native_options(&config);
    let rt_handle = rt.handle().clone();

    let result = eframe::run_native(
        "Reactive Avatar",
        options,
        Box::new(move |cc| {
            egui_extras::install_image_loaders(&cc.egui_ctx);

            let ctx = cc.egui_ctx.clone();
            let _guard = rt_handle.enter();
            reactor.on_pose_changed(move |_| ctx.request_repaint());

            Ok(Box::new(app))
        }),
    );

    rt.shutdown_timeout(Duration::from_secs(2));
    result
}
