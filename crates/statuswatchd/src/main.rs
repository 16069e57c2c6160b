// statuswatchd
//
// Long-running daemon that polls Minecraft Java servers and reports status
// and player changes to the log. One gear per target; shutdown is graceful
// and bounded.
//
// Configuration is environment-driven:
//
// ```sh
// export STATUSWATCH_TARGETS="main=mc.example.net,backup=backup.example.net:25566"
// export STATUSWATCH_INTERVAL_SECS=60
// export STATUSWATCH_LOG_LEVEL=info
// statuswatchd
// ```

mod notify;
mod watcher;

use anyhow::Result;
use async_trait::async_trait;
use notify::LogNotifier;
use statuswatch_core::{AddressProvider, Notifier, PollConfig, Registry, TargetConfig, WatchConfig};
use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for the different termination scenarios
///
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum WatchExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<WatchExitCode> for ExitCode {
    fn from(code: WatchExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Parse the `name=address` target list. A bare address names itself.
fn parse_targets(raw: &str) -> Result<Vec<TargetConfig>> {
    let mut targets = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, address) = match entry.split_once('=') {
            Some((name, address)) => (name.trim(), address.trim()),
            None => (entry, entry),
        };
        if name.is_empty() || address.is_empty() {
            anyhow::bail!("malformed target entry {entry:?}, expected name=address");
        }
        targets.push(TargetConfig {
            name: name.to_string(),
            address: address.to_string(),
            enabled: true,
        });
    }
    Ok(targets)
}

/// Load configuration from environment variables
fn config_from_env() -> Result<WatchConfig> {
    let raw_targets = env::var("STATUSWATCH_TARGETS").map_err(|_| {
        anyhow::anyhow!(
            "STATUSWATCH_TARGETS is required. \
            Set it via: export STATUSWATCH_TARGETS=\"main=mc.example.net\""
        )
    })?;

    let defaults = PollConfig::default();
    let poll = PollConfig {
        interval_secs: env_or("STATUSWATCH_INTERVAL_SECS", defaults.interval_secs),
        wait_ticks: env_or("STATUSWATCH_WAIT_TICKS", defaults.wait_ticks),
        retries: env_or("STATUSWATCH_RETRIES", defaults.retries),
        timeout_secs: env_or("STATUSWATCH_TIMEOUT_SECS", defaults.timeout_secs),
        protocol_version: env_or("STATUSWATCH_PROTOCOL_VERSION", defaults.protocol_version),
        fail_threshold: env_or("STATUSWATCH_FAIL_THRESHOLD", defaults.fail_threshold),
    };

    Ok(WatchConfig {
        targets: parse_targets(&raw_targets)?,
        poll,
    })
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Address provider backed by the parsed configuration.
struct ConfigAddressProvider {
    addresses: HashMap<String, String>,
}

impl ConfigAddressProvider {
    fn new(targets: &[TargetConfig]) -> Self {
        Self {
            addresses: targets
                .iter()
                .map(|t| (t.name.clone(), t.address.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl AddressProvider for ConfigAddressProvider {
    async fn get_address(&self, target: &str) -> Option<String> {
        self.addresses.get(target).cloned()
    }
}

fn main() -> ExitCode {
    let config = match config_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return WatchExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {e}");
        return WatchExitCode::ConfigError.into();
    }

    let log_level = match env::var("STATUSWATCH_LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return WatchExitCode::ConfigError.into();
    }

    info!("Starting statuswatchd");
    info!("Configuration loaded: {} target(s)", config.targets.len());

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            return WatchExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {e}");
            WatchExitCode::RuntimeError
        } else {
            WatchExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon: one polling gear per enabled target, then wait for a
/// shutdown signal and close the registry.
async fn run_daemon(config: WatchConfig) -> Result<()> {
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let provider = ConfigAddressProvider::new(&config.targets);
    let mut registry = Registry::new();

    for target in config.targets.iter().filter(|t| t.enabled) {
        let Some(address) = provider.get_address(&target.name).await else {
            warn!(target = %target.name, "no address configured, skipping");
            continue;
        };
        match watcher::build_target_gear(
            &target.name,
            &address,
            &config.poll,
            Arc::clone(&notifier),
        )
        .await
        {
            Ok(gear) => registry.add_gear(Box::new(gear))?,
            Err(e) => {
                warn!(target = %target.name, error = %e, "skipping unresolvable target");
            }
        }
    }

    if registry.gear_count() == 0 {
        anyhow::bail!("no watchable targets after resolution");
    }

    info!("Watching {} target(s)", registry.gear_count());
    registry.mark_ready();

    let received = wait_for_shutdown().await?;
    info!("Received shutdown signal: {received}");
    registry.close().await?;
    info!("Shut down cleanly");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {e}"))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C. Fallback for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {e}"))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_list_parses_names_and_bare_addresses() {
        let targets =
            parse_targets("main=mc.example.net, backup=backup.example.net:25566 ,solo.example.net")
                .unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].name, "main");
        assert_eq!(targets[0].address, "mc.example.net");
        assert_eq!(targets[1].address, "backup.example.net:25566");
        assert_eq!(targets[2].name, "solo.example.net");
    }

    #[test]
    fn target_list_rejects_malformed_entries() {
        assert!(parse_targets("=mc.example.net").is_err());
        assert!(parse_targets("main=").is_err());
    }

    #[test]
    fn empty_target_list_is_empty_not_an_error() {
        // validation rejects it later with a clearer message
        assert!(parse_targets("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_serves_configured_addresses() {
        let targets = parse_targets("main=mc.example.net").unwrap();
        let provider = ConfigAddressProvider::new(&targets);
        assert_eq!(
            provider.get_address("main").await.as_deref(),
            Some("mc.example.net")
        );
        assert_eq!(provider.get_address("unknown").await, None);
    }
}
