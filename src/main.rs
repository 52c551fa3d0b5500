//! CapForge - Entry Point
//!
//! Modes:
//! - Default: process one free-text request and print the Outcome
//! - --reset / -r: wipe synthesized capabilities and the catalog
//! - --status / -s: print aggregated system statistics

use std::sync::Arc;

use capforge::directory::Directory;
use capforge::{
    is_reset_phrase, CapabilityCatalog, Config, HttpDirectory, HttpSynthesisProvider, Orchestrator,
    StaticDirectory,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let reset_mode = args.iter().any(|a| a == "--reset" || a == "-r");
    let status_mode = args.iter().any(|a| a == "--status" || a == "-s");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("CapForge v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: capforge [OPTIONS] [REQUEST...]");
        println!();
        println!("Options:");
        println!("  --reset, -r   Remove every synthesized capability and clear the catalog");
        println!("  --status, -s  Print system statistics as JSON");
        println!("  --help, -h    Show this help");
        println!();
        println!("Examples:");
        println!("  capforge \"who am I?\"");
        println!("  capforge list users");
        println!("  capforge \"how many departments exist\"");
        println!();
        println!("Environment variables:");
        println!("  ANTHROPIC_API_KEY            Synthesis provider API key");
        println!("  CAPFORGE_SYNTH_MODEL         Provider model");
        println!("  CAPFORGE_SYNTH_URL           Provider endpoint URL");
        println!("  CAPFORGE_SYNTH_TIMEOUT_SECS  Provider timeout in seconds");
        println!("  CAPFORGE_DIRECTORY_URL       HTTP directory base URL");
        println!("  CAPFORGE_DIRECTORY_TOKEN     HTTP directory bearer token");
        println!("  CAPFORGE_DIRECTORY_SNAPSHOT  Path to a directory snapshot JSON file");
        println!("  CAPFORGE_CATALOG_PATH        Capability catalog location");
        return Ok(());
    }

    // Logging goes to stderr so stdout stays presentable
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::WARN);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env()?;

    let directory: Arc<dyn Directory> = if let Some(url) = &config.directory_url {
        info!("Using HTTP directory at {}", url);
        Arc::new(HttpDirectory::new(url, config.directory_token.as_deref()))
    } else if let Some(path) = &config.directory_snapshot {
        info!("Loading directory snapshot from {}", path.display());
        Arc::new(StaticDirectory::from_file(path)?)
    } else {
        info!("No directory configured, using the bundled sample");
        Arc::new(StaticDirectory::sample())
    };

    let provider = HttpSynthesisProvider::from_config(&config);
    if !provider.is_available() {
        warn!("ANTHROPIC_API_KEY not set; synthesis will rely on deterministic fallbacks");
    }

    let catalog = CapabilityCatalog::open(config.catalog_path.clone());
    let mut orchestrator = Orchestrator::new(
        directory,
        Arc::new(provider),
        catalog,
        config.synth_timeout,
    );

    if reset_mode {
        print_reset(&mut orchestrator);
        return Ok(());
    }

    if status_mode {
        println!("{}", serde_json::to_string_pretty(&orchestrator.stats())?);
        return Ok(());
    }

    // Everything that is not a flag is the request text
    let request = args[1..]
        .iter()
        .filter(|a| !a.starts_with('-'))
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    if request.trim().is_empty() {
        println!("CapForge v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Give me a request, for example:");
        println!("  capforge \"who am I?\"");
        println!("  capforge \"list users\"");
        println!("  capforge \"how many departments exist\"");
        println!();
        println!("See capforge --help for options.");
        return Ok(());
    }

    // Bare reset phrases bypass classification entirely
    if is_reset_phrase(&request) {
        print_reset(&mut orchestrator);
        return Ok(());
    }

    let outcome = orchestrator.process(&request).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}

fn print_reset(orchestrator: &mut Orchestrator) {
    let report = orchestrator.reset();
    println!("System reset: {}", report.summary());
    for name in &report.capabilities_removed {
        println!("  removed {}", name);
    }
}
