use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use serialcast_lib::config::{BridgeSettings, ConnectionRequest};
use serialcast_lib::serial::SerialInterface;
use serialcast_lib::App;

/// Read telemetry from serial devices and stream it to websocket consumers.
#[derive(Parser)]
#[command(name = "serialcast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, env = "SERIALCAST_SETTINGS")]
    settings: Option<PathBuf>,

    /// Connection request file (JSON); repeat for several devices
    #[arg(long = "request")]
    requests: Vec<PathBuf>,

    /// Serial port for a single inline connection ("AUTO" picks the first port)
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<String>,

    /// Key for bare numeric lines
    #[arg(long)]
    line_key: Option<String>,

    /// Disable the bare numeric line format
    #[arg(long)]
    no_line: bool,

    /// Enable delimited lines
    #[arg(long)]
    csv: bool,

    #[arg(long)]
    csv_delimiter: Option<String>,

    #[arg(long)]
    csv_key_index: Option<String>,

    #[arg(long)]
    csv_value_index: Option<String>,

    #[arg(long)]
    csv_time_index: Option<String>,

    /// Enable JSON object lines
    #[arg(long)]
    json: bool,

    #[arg(long)]
    json_key_field: Option<String>,

    #[arg(long)]
    json_value_field: Option<String>,

    #[arg(long)]
    json_time_field: Option<String>,

    /// Stream server address, overrides the settings file
    #[arg(long)]
    listen: Option<String>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn has_inline_request(&self) -> bool {
        self.port.is_some() || self.csv || self.json || self.line_key.is_some()
    }

    /// Inline flags go through the same lenient parsing as request files.
    fn inline_request(&self) -> anyhow::Result<ConnectionRequest> {
        let mut form = Map::new();
        let mut put = |name: &str, value: Option<Value>| {
            if let Some(value) = value {
                form.insert(name.to_string(), value);
            }
        };
        put("serial_port", self.port.clone().map(Value::from));
        put("baudrate", self.baud.clone().map(Value::from));
        put("line_enable", Some(json!(!self.no_line)));
        put("line_key", self.line_key.clone().map(Value::from));
        put("csv_enable", Some(json!(self.csv)));
        put("csv_delimiter", self.csv_delimiter.clone().map(Value::from));
        put("csv_key_index", self.csv_key_index.clone().map(Value::from));
        put("csv_value_index", self.csv_value_index.clone().map(Value::from));
        put("csv_time_index", self.csv_time_index.clone().map(Value::from));
        put("json_enable", Some(json!(self.json)));
        put("json_key_field", self.json_key_field.clone().map(Value::from));
        put("json_value_field", self.json_value_field.clone().map(Value::from));
        put("json_time_field", self.json_time_field.clone().map(Value::from));

        serde_json::from_value(Value::Object(form)).context("invalid inline connection flags")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    if cli.list_ports {
        for port in SerialInterface::discover_ports()? {
            println!(
                "{}\t{}\t{}",
                port.port_name,
                port.port_type,
                port.product.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    }

    let mut settings = match &cli.settings {
        Some(path) => BridgeSettings::load(path)?,
        None => BridgeSettings::default(),
    };
    if let Some(listen) = &cli.listen {
        settings.listen_addr = listen.clone();
    }

    let mut requests = Vec::new();
    for path in &cli.requests {
        requests.push(ConnectionRequest::load(path)?);
    }
    if cli.has_inline_request() || requests.is_empty() {
        requests.push(cli.inline_request()?);
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Shutting down");
                on_signal.cancel();
            }
            Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let app = App::new(settings);
    app.run(requests, shutdown).await
}
