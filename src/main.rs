//! `msgbus`: talk to a line-oriented instrument from the shell.
//!
//! # Usage
//!
//! ```bash
//! msgbus --tcp 192.168.1.20:4001 query "*IDN?"
//! msgbus --serial /dev/ttyUSB0 --baud 9600 --terminator '\r' query P --template '%f,%f,%f'
//! msgbus --config stage.toml query STAGE --until END
//! msgbus --config stage.toml set speed 50
//! msgbus --config stage.toml --json get position
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daq_msgbus::bus::{BusInstrument, MessageBus, ParseOptions, QueryOptions};
use daq_msgbus::config::{BusConfig, SerialSettings, TransportConfig};
use daq_msgbus::logging::{self, LoggingConfig, OutputFormat};
use daq_msgbus::property_table::{PropertyOwner, PropertyTable};
use daq_msgbus::value::Value;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "msgbus")]
#[command(about = "Query/response access to line-oriented lab instruments", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Connect over TCP (host:port), overriding the configured transport
    #[arg(long, global = true, conflicts_with = "serial")]
    tcp: Option<String>,

    /// Open a serial port, overriding the configured transport
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Baud rate for --serial
    #[arg(long, global = true, default_value_t = 9600)]
    baud: u32,

    /// Message terminator; `\r`, `\n` and `\t` escapes are understood
    #[arg(long, global = true)]
    terminator: Option<String>,

    /// Read timeout in milliseconds (0 waits forever)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a command and print the reply
    Query {
        command: String,

        /// Reply template, e.g. "%d,%f"
        #[arg(long)]
        template: Option<String>,

        /// Read until the configured termination line
        #[arg(long)]
        multiline: bool,

        /// Read until a line containing this marker
        #[arg(long)]
        until: Option<String>,
    },

    /// Send a command without reading a reply
    Write { command: String },

    /// Read a configured property
    Get {
        property: String,

        /// Channel for channel properties
        #[arg(long)]
        channel: Option<String>,
    },

    /// Write a configured property
    Set {
        property: String,
        value: String,

        /// Channel for channel properties
        #[arg(long)]
        channel: Option<String>,
    },

    /// List configured properties
    List,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let logging_config = LoggingConfig::from_bus_config(&config)?.with_format(cli.log_format);
    logging::init(logging_config)?;

    match &cli.command {
        Commands::Config => {
            let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{text}");
            Ok(())
        }
        Commands::List => list_properties(&cli, &config),
        Commands::Query {
            command,
            template,
            multiline,
            until,
        } => {
            let bus = connect(&config).await?;
            let options = match until {
                Some(marker) => QueryOptions::until(marker),
                None if *multiline => QueryOptions::multiline(),
                None => QueryOptions::default(),
            };
            match template {
                Some(template) => {
                    let parsed = bus
                        .parsed_query_with(
                            command,
                            template,
                            ParseOptions::default().with_query(options),
                        )
                        .await
                        .with_context(|| format!("Query '{command}' failed"))?;
                    emit(&cli, &parsed, || format!("{parsed:?}"))
                }
                None => {
                    let reply = bus
                        .query_with(command, options)
                        .await
                        .with_context(|| format!("Query '{command}' failed"))?;
                    emit(&cli, &reply, || reply.clone())
                }
            }
        }
        Commands::Write { command } => {
            let bus = connect(&config).await?;
            bus.write(command)
                .await
                .with_context(|| format!("Write '{command}' failed"))
        }
        Commands::Get { property, channel } => {
            let table = PropertyTable::from_specs(&config.properties)?;
            let owner = owner(Arc::new(connect(&config).await?), channel.as_deref());
            let value = table
                .get(property, &owner)
                .await
                .with_context(|| format!("Reading '{property}' failed"))?;
            emit(&cli, &value, || value.to_string())
        }
        Commands::Set {
            property,
            value,
            channel,
        } => {
            let table = PropertyTable::from_specs(&config.properties)?;
            let owner = owner(Arc::new(connect(&config).await?), channel.as_deref());
            table
                .set(property, &owner, parse_value(value))
                .await
                .with_context(|| format!("Writing '{property}' failed"))
        }
    }
}

fn load_config(cli: &Cli) -> Result<BusConfig> {
    let mut config = match &cli.config {
        Some(path) => BusConfig::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => BusConfig::from_toml_str("")?,
    };

    if let Some(address) = &cli.tcp {
        config.transport = Some(TransportConfig::Tcp {
            address: address.clone(),
        });
    }
    if let Some(port) = &cli.serial {
        config.transport = Some(TransportConfig::Serial(SerialSettings::new(
            port.clone(),
            cli.baud,
        )));
    }
    if let Some(terminator) = &cli.terminator {
        config.bus.termination_character = unescape(terminator);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.bus.timeout_ms = Some(timeout_ms);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn connect(config: &BusConfig) -> Result<MessageBus> {
    if config.transport.is_none() {
        bail!("No transport configured; pass --tcp, --serial or a [transport] section");
    }
    let bus = MessageBus::from_config(config)
        .await
        .context("Failed to open transport")?;
    tracing::info!(
        bus = bus.label(),
        timeout_ms = ?bus.timeout().map(|t| t.as_millis()),
        "Connected"
    );
    Ok(bus)
}

fn owner(bus: Arc<MessageBus>, channel: Option<&str>) -> PropertyOwner {
    let owner = PropertyOwner::new(bus);
    match channel {
        Some(channel) => owner.with_channel(parse_value(channel)),
        None => owner,
    }
}

fn list_properties(cli: &Cli, config: &BusConfig) -> Result<()> {
    let table = PropertyTable::from_specs(&config.properties)?;
    if cli.json {
        let specs: Vec<_> = table.names().into_iter().filter_map(|n| table.spec(n)).collect();
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }
    for name in table.names() {
        let Some(spec) = table.spec(name) else {
            continue;
        };
        let access = match (spec.get.is_some(), spec.set.is_some()) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "-",
        };
        let channel = if spec.channel { " [channel]" } else { "" };
        println!(
            "{name:<20} {access:<3} {:?}{channel}  {}",
            spec.scalar_type,
            spec.doc.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn emit<T: Serialize>(cli: &Cli, value: &T, plain: impl FnOnce() -> String) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", plain());
    }
    Ok(())
}

/// Integer, then float, then text.
fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::Text(raw.to_string())
    }
}

fn unescape(raw: &str) -> String {
    raw.replace("\\r", "\r")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}
