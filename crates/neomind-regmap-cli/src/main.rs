//! Command-line interface for the NeoMind register mapping.
//!
//! Loads the attributes and unit id tables, seeds an in-memory property
//! store from a JSON state file and runs register requests against it.

mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use neomind_regmap::{MappingRequest, RegisterSchema, RegmapConfig, RequestPipeline};

use crate::state::StateFile;

/// NeoMind register mapping - translate register requests to device properties.
#[derive(Parser, Debug)]
#[command(name = "neomind-regmap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Directory holding attributes.csv and unitid2di.csv.
    #[arg(short, long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Attributes file (overrides the config directory and NEOMIND_REGMAP_ATTRIBUTES).
    #[arg(long, global = true)]
    attributes: Option<PathBuf>,

    /// Unit id mapping file (overrides the config directory and NEOMIND_REGMAP_UNIT_IDS).
    #[arg(long, global = true)]
    unit_ids: Option<PathBuf>,

    /// JSON file with the property values of each service.
    #[arg(short, long, global = true)]
    state: Option<PathBuf>,

    /// Readiness timeout in milliseconds, 0 waits forever
    /// (overrides NEOMIND_REGMAP_READY_TIMEOUT_MS).
    #[arg(long, global = true)]
    ready_timeout_ms: Option<u64>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print the register schema.
    Dump,
    /// Read registers.
    Read {
        /// First register address.
        #[arg(short, long)]
        address: i32,
        /// Unit id of the request.
        #[arg(short, long, default_value_t = 0)]
        unit_id: i32,
        /// Number of registers.
        #[arg(short, long, default_value_t = 1)]
        quantity: i32,
    },
    /// Write registers.
    Write {
        /// First register address.
        #[arg(short, long)]
        address: i32,
        /// Unit id of the request.
        #[arg(short, long, default_value_t = 0)]
        unit_id: i32,
        /// Register values, one per register.
        #[arg(required = true)]
        values: Vec<u16>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = build_config(&args);
    let (schema, unit_ids) = config.load().context("Failed to load register mapping")?;

    let request = match args.command {
        Command::Dump => {
            dump(&schema);
            return Ok(());
        }
        Command::Read {
            address,
            unit_id,
            quantity,
        } => MappingRequest::read(address, unit_id, quantity),
        Command::Write {
            address,
            unit_id,
            ref values,
        } => MappingRequest::write(address, unit_id, values),
    };

    let backend = match &args.state {
        Some(path) => StateFile::load(path)?.into_backend(),
        None => StateFile::default().into_backend(),
    };
    let pipeline = RequestPipeline::with_config(
        schema,
        unit_ids,
        Arc::new(backend),
        config.pipeline_config(),
    );

    let request = pipeline.execute(request).await;
    if let Some(e) = request.error() {
        anyhow::bail!("{}: {}", e.kind(), e);
    }
    for (i, word) in request.words().iter().enumerate() {
        println!("{:>5}  0x{:04X}  {}", request.address + i as i32, word, word);
    }
    Ok(())
}

fn dump(schema: &RegisterSchema) {
    for entry in schema.entries() {
        println!(
            "{:>5}  {:<4} {:<12} {:<10} {:<6} {:?} {}:{}",
            entry.address,
            entry.size,
            entry.data_kind.to_string(),
            format!("x{}", entry.scale_factor),
            format!("{:?}", entry.access),
            entry.bus_type,
            entry.device_type,
            entry.object_path
        );
    }
}

fn build_config(args: &Args) -> RegmapConfig {
    let mut config = RegmapConfig::from_env(&args.config_dir);
    if let Some(path) = &args.attributes {
        config = config.with_attributes(path);
    }
    if let Some(path) = &args.unit_ids {
        config = config.with_unit_ids(path);
    }
    if let Some(ms) = args.ready_timeout_ms {
        config = config.with_ready_timeout((ms > 0).then_some(Duration::from_millis(ms)));
    }
    config
}

fn init_logging(verbose: bool) {
    // JSON logging for production/container environments
    let json_logging = std::env::var("NEOMIND_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("neomind_regmap={}", default_level))
            .add_directive(tracing::Level::WARN.into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data")
    }

    #[test]
    fn test_parse_read_command() {
        let args = Args::try_parse_from([
            "neomind-regmap",
            "read",
            "--address",
            "259",
            "--quantity",
            "2",
            "--ready-timeout-ms",
            "0",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::Read {
                address: 259,
                unit_id: 0,
                quantity: 2
            }
        ));
        assert!(build_config(&args).ready_timeout.is_none());
    }

    #[test]
    fn test_write_requires_values() {
        assert!(Args::try_parse_from(["neomind-regmap", "write", "--address", "2700"]).is_err());
    }

    #[tokio::test]
    async fn test_sample_data_round_trip() {
        let config = RegmapConfig::in_dir(data_dir());
        let (schema, unit_ids) = config.load().unwrap();
        let backend = StateFile::load(&data_dir().join("state.json"))
            .unwrap()
            .into_backend();
        let pipeline = RequestPipeline::with_config(
            schema,
            unit_ids,
            Arc::new(backend),
            config.pipeline_config(),
        );

        let read = pipeline.execute(MappingRequest::read(259, 100, 1)).await;
        assert!(read.is_ok());
        assert_eq!(read.words(), vec![5234]);

        let serial = pipeline.execute(MappingRequest::read(304, 0, 4)).await;
        assert_eq!(serial.words(), vec![0x4851, 0x3230, 0x3431, 0x0000]);

        let write = pipeline.execute(MappingRequest::write(2700, 0, &[1500])).await;
        assert!(write.is_ok());
        let read = pipeline.execute(MappingRequest::read(2700, 0, 3)).await;
        assert_eq!(read.words(), vec![1500, 100, 1]);
    }
}
