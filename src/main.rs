use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use tracing_subscriber::EnvFilter;

use ui_explorer::adb::Adb;
use ui_explorer::config::{ExplorerConfig, Overrides};
use ui_explorer::controller::{install_signal_handlers, CancellationFlag, ExplorationController};
use ui_explorer::device::{AdbDeviceDriver, SocketBridge, TargetApp};
use ui_explorer::fuzz::FuzzToolSession;
use ui_explorer::metrics::MetricsHistory;
use ui_explorer::strategy::RandomPolicy;
use ui_explorer::subprocess::SubprocessManager;
use ui_explorer::transport::{Connector, TcpConnector};

#[derive(Parser)]
#[command(name = "ui-explorer")]
#[command(about = "Coverage-guided GUI exploration of an Android app", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Package name of the app under test
    #[arg(short, long)]
    package: Option<String>,

    /// adb serial of the target device
    #[arg(short, long)]
    device: Option<String>,

    /// Host port forwarded to the device bridge
    #[arg(long)]
    port: Option<u16>,

    /// Iteration budget (0 runs until another stop condition)
    #[arg(short = 'n', long)]
    iterations: Option<usize>,

    /// Wall-clock limit in seconds (0 disables)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Directory for fuzz tool logs, metric history and the final report
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// APK to reinstall when resetting by uninstall
    #[arg(long)]
    apk: Option<PathBuf>,

    /// adb invocation, including any leading flags
    #[arg(long)]
    adb: Option<String>,

    /// Seed for the random decision policy
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            package: self.package.clone(),
            device: self.device.clone(),
            port: self.port,
            iterations: self.iterations,
            timeout_secs: self.timeout,
            output_dir: self.output_dir.clone(),
            apk: self.apk.clone(),
            adb: self.adb.clone(),
            seed: self.seed,
        }
    }
}

fn verbosity_directives(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,tower=debug",
    }
}

/// `RUST_LOG` wins when set and parseable; otherwise the `-v` count decides.
fn log_filter(verbose: u8) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity_directives(verbose)))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("ui-explorer started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli).await {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ExplorerConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    config.apply_overrides(cli.overrides());
    config.validate().context("Invalid configuration")?;

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let adb = Adb::new(&config.device.adb, &config.device.device)?;
    let subprocess = SubprocessManager::production();
    let connector: Arc<dyn Connector> = Arc::new(TcpConnector);

    let bridge = SocketBridge::new(Arc::clone(&connector))
        .with_port_forwarding(adb.clone(), subprocess.runner());
    let driver = AdbDeviceDriver::new(
        adb.clone(),
        subprocess.clone(),
        TargetApp {
            package: config.target.package.clone(),
            apk: config.target.apk.clone(),
        },
    )
    .with_reset_method(config.device.reset_method)
    .with_storage_dir(config.device.storage_dir.clone());

    let seed = config.policy.seed.unwrap_or_else(rand::random);
    info!("Random policy seed: {}", seed);
    let policy = RandomPolicy::new(seed)
        .with_bursts(config.policy.burst_probability, config.policy.burst_ms);

    let history = MetricsHistory::new().with_output(config.history_path());
    let fuzz = FuzzToolSession::new(adb, subprocess.runner(), connector)
        .with_retry(config.fuzz.retry())
        .with_throttle_ms(config.fuzz.throttle_ms);

    let cancel = CancellationFlag::new();
    install_signal_handlers(&cancel).context("Failed to install signal handlers")?;

    let report_path = config.report_path();
    let mut controller = ExplorationController::new(
        config,
        Box::new(bridge),
        Box::new(driver),
        Box::new(policy),
        Box::new(history),
        fuzz,
    )
    .with_cancellation(cancel);

    let report = controller.run().await?;

    let json = serde_json::to_string_pretty(&report)?;
    tokio::fs::write(&report_path, &json)
        .await
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    println!("{json}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_directives_by_count() {
        assert_eq!(verbosity_directives(0), "info");
        assert_eq!(verbosity_directives(1), "debug");
        assert_eq!(verbosity_directives(2), "trace");
        assert_eq!(verbosity_directives(7), "trace,hyper=debug,tower=debug");
    }
}
