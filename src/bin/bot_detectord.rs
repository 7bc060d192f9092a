//! bot_detectord - camera-tower bot detector daemon.
//!
//! Pulls frames from the configured source, hands each one to the ingestion
//! controller on its own worker thread and publishes one boolean per scored
//! frame (MQTT when a broker is configured, otherwise the log).

use anyhow::{anyhow, Context, Result};
use bot_detector::transport::{
    MqttEndpoint, MqttRuntime, MqttSettings, TlsMaterials, DEFAULT_RESULT_TOPIC,
    DEFAULT_SWITCH_TOPIC,
};
use bot_detector::{
    open_source, DetectionSink, DetectorConfig, FrameOutcome, IngestionController, LogSink,
    PipelineError, PipelineResult,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DAEMON_NAME: &str = "bot_detector";
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect robots in a fixed camera view")]
struct Args {
    /// Config file (TOML or JSON). Re-read periodically.
    #[arg(long, env = "BOT_DETECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: `stub://...` or a local image directory. Overrides the config.
    #[arg(long)]
    source: Option<String>,

    /// Replay a directory source forever.
    #[arg(long)]
    repeat: bool,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Frame delivery rate. Overrides the config.
    #[arg(long)]
    target_fps: Option<u32>,

    /// MQTT broker address. Without it, detections are only logged.
    #[arg(long, env = "MQTT_BROKER_ADDR")]
    mqtt_broker_addr: Option<String>,

    /// Allow non-loopback MQTT connections.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = DAEMON_NAME)]
    mqtt_client_id: String,

    /// Topic receiving "true"/"false" per scored frame.
    #[arg(long, env = "BOT_DETECTOR_RESULT_TOPIC", default_value = DEFAULT_RESULT_TOPIC)]
    result_topic: String,

    /// Topic carrying the enable/disable switch.
    #[arg(long, env = "BOT_DETECTOR_SWITCH_TOPIC", default_value = DEFAULT_SWITCH_TOPIC)]
    switch_topic: String,

    /// Do not subscribe to the switch topic.
    #[arg(long)]
    no_switch: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DetectorConfig::load_from(args.config.as_deref())?;
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if let Some(fps) = args.target_fps {
        if fps == 0 {
            return Err(anyhow!("--target-fps must be greater than zero"));
        }
        cfg.source.target_fps = fps;
    }

    let (switch_tx, switch_rx) = mpsc::channel();
    let mqtt = match &args.mqtt_broker_addr {
        Some(addr) => Some(connect_mqtt(&args, addr, switch_tx)?),
        None => None,
    };
    let sink: Box<dyn DetectionSink> = match &mqtt {
        Some(runtime) => Box::new(runtime.sink(&args.result_topic)),
        None => Box::new(LogSink),
    };

    let controller = Arc::new(IngestionController::new(
        cfg.pipeline_settings(),
        cfg.reload_settings(),
        sink,
    ));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("error setting Ctrl-C handler")?;
    }
    let reloader = spawn_reloader(
        Arc::clone(&controller),
        args.config.clone(),
        cfg.reload_interval,
        Arc::clone(&running),
    )?;

    let mut source = open_source(&cfg.source.url, cfg.width, cfg.height, args.repeat)?;
    log::info!(
        "{} running: {}x{}, bg_sample={}, rule={}, half_width={}, source={}",
        DAEMON_NAME,
        cfg.width,
        cfg.height,
        cfg.bg_sample,
        cfg.rule,
        cfg.effective_half_width(),
        cfg.source.url
    );

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(cfg.source.target_fps));
    let mut in_flight: Vec<JoinHandle<PipelineResult<FrameOutcome>>> = Vec::new();
    let mut last_health_log = Instant::now();
    let mut delivered = 0u64;
    let mut failure = None;

    while running.load(Ordering::SeqCst) {
        if args.max_frames.is_some_and(|max| delivered >= max) {
            break;
        }
        apply_switch_commands(&switch_rx, &controller);

        let started = Instant::now();
        let Some(packet) = source.next_packet()? else {
            log::info!("source exhausted");
            break;
        };
        delivered += 1;
        if let Some(handle) = controller.spawn_frame(packet)? {
            in_flight.push(handle);
        }

        if let Some(err) = reap_finished(&mut in_flight) {
            failure = Some(err);
            break;
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log::info!(
                "health: {} frames from {}",
                source.stats().frames_captured,
                source.stats().source
            );
            last_health_log = Instant::now();
        }

        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    running.store(false, Ordering::SeqCst);
    for handle in in_flight.drain(..) {
        if let Some(err) = join_pass(handle) {
            failure.get_or_insert(err);
        }
    }
    if reloader.join().is_err() {
        log::error!("config reload thread panicked");
    }
    log::info!("final: {}", controller.stats().snapshot());
    if let Some(runtime) = mqtt {
        runtime.disconnect()?;
    }

    match failure {
        Some(err) => Err(anyhow!(err)),
        None => Ok(()),
    }
}

fn connect_mqtt(args: &Args, addr: &str, switch_tx: mpsc::Sender<bool>) -> Result<MqttRuntime> {
    let endpoint = MqttEndpoint::parse(addr, args.mqtt_use_tls)?;
    endpoint.require_loopback(args.allow_remote_mqtt)?;
    let tls = TlsMaterials::load(
        args.mqtt_tls_ca_path.as_deref(),
        args.mqtt_tls_client_cert_path.as_deref(),
        args.mqtt_tls_client_key_path.as_deref(),
    )?;
    let settings = MqttSettings {
        endpoint,
        tls,
        client_id: args.mqtt_client_id.clone(),
        username: args.mqtt_username.clone(),
        password: args.mqtt_password.clone(),
        result_topic: args.result_topic.clone(),
        switch_topic: (!args.no_switch).then(|| args.switch_topic.clone()),
    };
    MqttRuntime::connect(&settings, Some(switch_tx))
}

fn apply_switch_commands(rx: &Receiver<bool>, controller: &IngestionController) {
    while let Ok(enabled) = rx.try_recv() {
        controller.set_active(enabled);
    }
}

/// Re-read the configuration every `interval` and apply what can change live.
fn spawn_reloader(
    controller: Arc<IngestionController>,
    path: Option<PathBuf>,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let tick = interval.min(Duration::from_millis(200));
    let handle = std::thread::Builder::new()
        .name("bot-detector-reload".to_string())
        .spawn(move || {
            let mut last = Instant::now();
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(tick);
                if last.elapsed() < interval {
                    continue;
                }
                last = Instant::now();
                match DetectorConfig::load_from(path.as_deref()) {
                    Ok(cfg) => controller.reload(&cfg.pipeline_settings(), cfg.reload_settings()),
                    Err(e) => log::warn!("config reload failed, keeping current settings: {}", e),
                }
            }
        })?;
    Ok(handle)
}

/// Join passes that have finished. Returns the first fatal error seen.
fn reap_finished(
    in_flight: &mut Vec<JoinHandle<PipelineResult<FrameOutcome>>>,
) -> Option<PipelineError> {
    let mut fatal = None;
    let mut pending = Vec::with_capacity(in_flight.len());
    for handle in in_flight.drain(..) {
        if handle.is_finished() {
            if let Some(err) = join_pass(handle) {
                fatal.get_or_insert(err);
            }
        } else {
            pending.push(handle);
        }
    }
    *in_flight = pending;
    fatal
}

fn join_pass(handle: JoinHandle<PipelineResult<FrameOutcome>>) -> Option<PipelineError> {
    match handle.join() {
        Ok(Err(err)) if err.is_fatal() || matches!(err, PipelineError::Halted(_)) => Some(err),
        Ok(_) => None,
        Err(_) => {
            log::error!("processing pass panicked");
            Some(PipelineError::LockPoisoned)
        }
    }
}
