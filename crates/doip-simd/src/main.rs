//! doip-simd - DoIP ECU simulator daemon
//!
//! Usage:
//!   doip-simd --config sim.toml [--verbose] [--bind 0.0.0.0] [--log-format json]
//!
//! Every entity in the config file is validated before any socket is bound.
//! The simulator runs until Ctrl+C.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use doip_sim::{EntityOptions, NetworkManager, SimConfig, SimRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "doip-simd")]
#[command(author, version, about = "Simulated DoIP entities and ECUs")]
struct Args {
    /// Simulation config file (TOML)
    #[arg(short, long, env = "DOIP_SIM_CONFIG")]
    config: PathBuf,

    /// Bind every entity to this address instead of its configured one
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "doip_simd=debug,doip_sim=debug,sim_ecu=debug"
    } else {
        "doip_simd=info,doip_sim=info,sim_ecu=info"
    };
    let (text, json) = match args.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(text)
        .with(json)
        .init();

    tracing::info!("Starting doip-simd");
    tracing::info!("Loading config from: {}", args.config.display());

    let config = SimConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let mut entities = config.entity_configs()?;
    if let Some(address) = args.bind {
        for entity in &mut entities {
            entity.local_address = address;
        }
    }
    if entities.is_empty() {
        anyhow::bail!("{} defines no entities", args.config.display());
    }

    let registry = SimRegistry::from_configs(entities, &EntityOptions::default())?;
    let network = NetworkManager::new(registry);

    for (name, bound) in network.start_all().await? {
        tracing::info!(
            entity = %name,
            tcp = %bound.tcp,
            udp = %bound.udp,
            "Entity listening"
        );
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    network.stop_all().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_flag() {
        let args = Args::try_parse_from(["doip-simd", "--config", "sim.toml"]).unwrap();
        assert_eq!(args.log_format, LogFormat::Text);

        let args =
            Args::try_parse_from(["doip-simd", "-c", "sim.toml", "--log-format", "json"]).unwrap();
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(Args::try_parse_from(["doip-simd", "-c", "sim.toml", "--log-format", "xml"]).is_err());
    }
}
