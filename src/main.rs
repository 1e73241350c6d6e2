use std::{
    collections::BTreeSet,
    process,
    sync::{Arc, OnceLock},
    time::Duration,
};

use fluentbot::{
    config::Config,
    core::{
        identity::{FileProbe, PlatformIdentity},
        log_stream::LogHub,
        sources::{memory::DetachedMemory, os::ProcFs, SourceRegistry},
        RetryPolicy, ServiceParts, TelemetryService,
    },
    logger::LoggerManager,
    prefs::{FilePreferences, ServiceConfig},
    print_error,
    transport::FluentForwarder,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

fn log_sources_table(enabled: &[String], available: Vec<&'static str>) {
    let enabled_set: BTreeSet<&str> = enabled.iter().map(String::as_str).collect();
    let available_set: BTreeSet<&str> = available.into_iter().collect();

    // Union of both sets to show *everything* explicitly
    let all_names: BTreeSet<&str> = enabled_set.union(&available_set).copied().collect();

    let name_width = all_names
        .iter()
        .map(|s| s.len())
        .max()
        .unwrap_or(10)
        .max("Source".len());

    info!("{:<width$} | Status", "Source", width = name_width);
    info!("{}-+-{}", "-".repeat(name_width), "-".repeat(12));

    for name in all_names {
        let status = match (enabled_set.contains(name), available_set.contains(name)) {
            (true, true) => "ENABLED",
            // Selected in preferences but unknown to the registry
            (true, false) => "ENABLED (unknown)",
            (false, _) => "DISABLED",
        };

        info!("{:<width$} | {}", name, status, width = name_width);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let hub = LogHub::default();

    let mut logger_manager = LoggerManager::new(cfg.logger.clone())
        .unwrap_or_else(|e| {
            print_error!("Failed to setup Log Manager: {}", e);
            process::exit(1);
        })
        .with_capture(hub.capture_layer());
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting fluentbot version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.agent);

    let preferences = Arc::new(FilePreferences::new(&cfg.agent.preferences_path));
    info!("Preferences stored in {}", preferences.path().display());

    match ServiceConfig::load(preferences.as_ref(), &cfg.agent.preference_domain) {
        Ok(service_config) => log_sources_table(&service_config.sources, SourceRegistry::list()),
        Err(e) => warn!("Current preferences are invalid: {}", e),
    }

    let sink = FluentForwarder::spawn(&cfg.sink).unwrap_or_else(|e| {
        error!("Failed to create Fluentd forwarder: {}", e);
        process::exit(1);
    });

    let service = TelemetryService::new(ServiceParts {
        preferences,
        domain: cfg.agent.preference_domain.clone(),
        sink: Arc::new(sink),
        resolver: Arc::new(PlatformIdentity::new(FileProbe::from(&cfg.identity))),
        log_stream: Arc::new(hub),
        registry: SourceRegistry::new(ProcFs::new(&cfg.agent.proc_root), Arc::new(DetachedMemory)),
        retry: RetryPolicy::new(cfg.agent.retry_base_delay(), cfg.agent.retry_max_delay()),
    });

    info!("Starting telemetry service...");
    if let Err(e) = service.start().await {
        error!("Failed to start telemetry service: {}", e);
    }

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("Received SIGHUP, restarting with current preferences...");
                if let Err(e) = service.start().await {
                    error!("Failed to restart telemetry service: {}", e);
                }
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown...");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
                break;
            }
        }
    }

    service.stop();
    // Let the forwarder flush the final service event
    tokio::time::sleep(Duration::from_millis(300)).await;
    info!("Shutdown complete");
    Ok(())
}
