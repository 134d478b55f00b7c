/// Maintenance tool for the LMDB-backed persistent tier.
///
/// Usage: flowcache-admin <command> [args]
///
/// The store location and sizing come from the FLOWCACHE_* environment
/// variables. Logs go to stderr as JSON, filtered by RUST_LOG.

use flowcache_core::{codec, CacheConfig, CacheKey, CacheResult, FlowId};
use flowcache_storage::{sweep_once, LmdbPersistentTier, PersistentTier, SweepMetrics};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "\
Usage: flowcache-admin <command> [args]

Commands:
  stats                       Show store location and record count
  sweep                       Purge expired records now
  clear-flow <flow_id>        Delete every record of a flow
  clear-all                   Delete every record
  inspect <flow_id> <node_id> Print one record and its decoded value";

enum Command {
    Stats,
    Sweep,
    ClearFlow(FlowId),
    ClearAll,
    Inspect(CacheKey),
}

fn parse_command(args: &[String]) -> Option<Command> {
    match args {
        [cmd] if cmd == "stats" => Some(Command::Stats),
        [cmd] if cmd == "sweep" => Some(Command::Sweep),
        [cmd, flow] if cmd == "clear-flow" => Some(Command::ClearFlow(FlowId::new(flow.as_str()))),
        [cmd] if cmd == "clear-all" => Some(Command::ClearAll),
        [cmd, flow, node] if cmd == "inspect" => {
            Some(Command::Inspect(CacheKey::new(flow.as_str(), node.as_str())))
        }
        _ => None,
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowcache=info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .try_init();
}

async fn run(command: Command, config: &CacheConfig, tier: &LmdbPersistentTier) -> CacheResult<()> {
    match command {
        Command::Stats => {
            let records = tier.record_count().await?;
            let report = json!({
                "path": config.lmdb_path.display().to_string(),
                "mapSizeMb": config.lmdb_map_size_mb,
                "records": records,
                "persistentTtlSecs": config.persistent_ttl.as_secs(),
            });
            println!("{report:#}");
        }
        Command::Sweep => {
            let metrics = SweepMetrics::default();
            sweep_once(tier, config.store_timeout, &metrics).await;
            let snapshot = metrics.snapshot();
            println!(
                "{:#}",
                json!({ "recordsPurged": snapshot.records_purged, "errors": snapshot.errors })
            );
        }
        Command::ClearFlow(flow_id) => {
            let removed = tier.delete_by_flow(&flow_id).await?;
            tracing::info!(flow_id = %flow_id, removed, "cleared flow records");
            println!("{:#}", json!({ "flowId": flow_id, "removed": removed }));
        }
        Command::ClearAll => {
            let removed = tier.delete_all().await?;
            tracing::info!(removed, "cleared all records");
            println!("{:#}", json!({ "removed": removed }));
        }
        Command::Inspect(key) => match tier.get(&key).await? {
            Some(record) => {
                let value = codec::unpack(&record.payload)?;
                let report = json!({
                    "key": key.to_string(),
                    "ownHash": record.provenance.own_hash,
                    "upstreamHashes": record.provenance.upstream_hashes,
                    "sizeBytes": record.size_bytes,
                    "compressedBytes": record.payload.len(),
                    "writtenAt": record.written_at,
                    "expiresAt": record.expires_at,
                    "value": value,
                });
                println!("{report:#}");
            }
            None => println!("{key}: no live record"),
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_command(&args) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    init_logging();

    let config = CacheConfig::from_env();
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(2);
    }

    let tier = match LmdbPersistentTier::open(&config.lmdb_path, config.lmdb_map_size_mb) {
        Ok(tier) => tier,
        Err(e) => {
            eprintln!("Failed to open {}: {e}", config.lmdb_path.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = run(command, &config, &tier).await {
        eprintln!("Command failed: {e}");
        std::process::exit(1);
    }
}
