use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use monitor_core::{logging, LinkConfig, UpdateRecord};
use monitor_link::{LinkClient, LinkError};
use serde::Serialize;
use tracing::{error, info, warn};

const NODE_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let config = LinkConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    logging::init_from(&config.logging);

    info!(
        uri = %config.endpoint.uri,
        secure = config.endpoint.secure,
        "monitor-node starting"
    );

    let mut client = LinkClient::from_config(&config).await?;
    info!(
        groups = client.groups().len(),
        units = client.groups().values().map(Vec::len).sum::<usize>(),
        "Session ready"
    );

    client
        .on_update(log_update)
        .on_connect(|| info!("Connected"))
        .on_disconnect(|reason| warn!(%reason, "Disconnected"));
    if args.iter().any(|arg| arg == "--prime") {
        client.prime_from_last();
    }

    let mut handle = client.serve();
    tokio::select! {
        result = handle.wait() => match result {
            Err(LinkError::Unauthorized) => {
                error!("Session is no longer authorized");
                bail!("session is no longer authorized");
            }
            other => other?,
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, stopping");
            handle.stop().await?;
        }
    }

    info!("monitor-node stopped");
    Ok(())
}

fn log_update(record: &UpdateRecord) {
    let time = DateTime::<Utc>::from_timestamp_millis(record.timestamp)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| record.timestamp.to_string());
    let bytes = match record.decode_value() {
        Ok(value) => value.map(|v| v.len()),
        Err(err) => {
            warn!(group = %record.group, unit = %record.unit, error = %err, "Undecodable value");
            None
        }
    };
    info!(
        group = %record.group,
        unit = %record.unit,
        index = record.index,
        kind = %record.kind,
        time = %time,
        bytes,
        "Update"
    );
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }

    bail!("missing required --config <path> argument")
}
