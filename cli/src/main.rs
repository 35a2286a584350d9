//! ChainMirror CLI.
//!
//! # Commands
//! ```text
//! chainmirror run          --config <mirror.json> [--db <cursors.db>] [--print-events]
//! chainmirror decode-log   --topics <...> --data <hex>
//! chainmirror decode-call  --calldata <hex>
//! chainmirror price        --start-price <wei> --end-price <wei> --start <unix> --end <unix> [--at <unix>]
//! chainmirror cursor       show|reset --db <cursors.db>      (feature: sqlite)
//! chainmirror info
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use chainmirror_core::dutch_price;
use chainmirror_evm::calldata::supported_signatures;
use chainmirror_evm::{decode, decode_exchange_call, EventSignature, RawLog};
use chainmirror_sync::StreamConfig;

mod cmd_run;
mod logging;

#[derive(Parser)]
#[command(
    name = "chainmirror",
    about = "Mirror NFT transfers and marketplace settlements from EVM chains",
    long_about = "
ChainMirror CLI: follow ERC-721 and ERC-1155 transfers, match marketplace
settlements to orders and keep ownership, order status and activity current.

ENVIRONMENT VARIABLES:
  CHAINMIRROR_RPC_<STREAM>   RPC URL for the stream with id <STREAM>
                             (upper case, non-alphanumerics replaced by '_')
  RUST_LOG                   Log filter, overrides the config's `log` section
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured stream until Ctrl-C
    Run {
        /// Mirror config file (JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// SQLite database for stream cursors (default: in memory)
        #[arg(long)]
        db: Option<String>,
        /// Print mirror events to stdout as JSON lines
        #[arg(long)]
        print_events: bool,
    },

    /// Decode a transfer log from raw topics + data
    #[command(name = "decode-log")]
    DecodeLog {
        /// topics[0] = event signature hash, topics[1..] = indexed params
        #[arg(long, num_args = 1..)]
        topics: Vec<String>,
        /// Non-indexed params (hex, 0x-prefixed)
        #[arg(long, default_value = "0x")]
        data: String,
        /// Emitting contract
        #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
        address: String,
    },

    /// Extract order signatures from exchange settlement calldata
    #[command(name = "decode-call")]
    DecodeCall {
        /// Raw calldata (0x-prefixed hex)
        #[arg(long)]
        calldata: String,
    },

    /// Dutch auction price at a point in time
    Price {
        #[arg(long)]
        start_price: u128,
        #[arg(long)]
        end_price: u128,
        /// Auction start, unix seconds
        #[arg(long)]
        start: i64,
        /// Auction end, unix seconds
        #[arg(long)]
        end: i64,
        /// Evaluation time, unix seconds (default: now)
        #[arg(long)]
        at: Option<i64>,
    },

    /// Inspect or reset stream cursors
    #[cfg(feature = "sqlite")]
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Show defaults and supported events and settlement functions
    Info,
}

#[cfg(feature = "sqlite")]
#[derive(Subcommand)]
enum CursorAction {
    /// List stored cursors
    Show {
        #[arg(long)]
        db: String,
    },
    /// Delete a stream's cursor so it restarts from its start block
    Reset {
        #[arg(long)]
        db: String,
        #[arg(long)]
        stream: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, db, print_events } => {
            cmd_run::run(&config, db.as_deref(), cli.verbose, print_events).await
        }

        Commands::DecodeLog { topics, data, address } => cmd_decode_log(topics, data, address),

        Commands::DecodeCall { calldata } => cmd_decode_call(&calldata),

        Commands::Price { start_price, end_price, start, end, at } => {
            cmd_price(start_price, end_price, start, end, at)
        }

        #[cfg(feature = "sqlite")]
        Commands::Cursor { action } => cmd_cursor(action).await,

        Commands::Info => cmd_info(),
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

fn cmd_decode_log(topics: Vec<String>, data: String, address: String) -> Result<()> {
    let log = RawLog {
        address,
        topics,
        data,
        block_number: Some("0x0".into()),
        tx_hash: None,
        log_index: Some("0x0".into()),
        removed: false,
    };
    let events = decode(&log).context("decode transfer log")?.into_events();
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

fn cmd_decode_call(calldata: &str) -> Result<()> {
    let bytes = hex::decode(calldata.strip_prefix("0x").unwrap_or(calldata))
        .context("invalid calldata hex")?;
    let call = decode_exchange_call(&bytes).context("decode settlement calldata")?;

    println!("Function:    {:?}", call.function);
    println!("Signatures:  {}", call.signatures.len());
    for signature in &call.signatures {
        println!("  0x{}", hex::encode(signature));
    }
    Ok(())
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0).with_context(|| format!("timestamp {secs} out of range"))
}

fn cmd_price(start_price: u128, end_price: u128, start: i64, end: i64, at: Option<i64>) -> Result<()> {
    let at = match at {
        Some(secs) => timestamp(secs)?,
        None => Utc::now(),
    };
    let price = dutch_price(start_price, end_price, timestamp(start)?, timestamp(end)?, at);
    println!("{price}");
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn cmd_cursor(action: CursorAction) -> Result<()> {
    use chainmirror_core::CursorStore;
    use chainmirror_storage::SqliteCursorStore;

    match action {
        CursorAction::Show { db } => {
            let store = SqliteCursorStore::open(&db).await?;
            let cursors = store.list().await?;
            if cursors.is_empty() {
                println!("no cursors in {db}");
            }
            for cursor in cursors {
                let updated = DateTime::<Utc>::from_timestamp(cursor.updated_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| cursor.updated_at.to_string());
                println!("{:<24} next block {:<12} updated {}", cursor.stream_id, cursor.next_block, updated);
            }
        }
        CursorAction::Reset { db, stream } => {
            let store = SqliteCursorStore::open(&db).await?;
            store.delete(&stream).await?;
            println!("cursor for {stream} reset");
        }
    }
    Ok(())
}

fn cmd_info() -> Result<()> {
    let defaults = StreamConfig::new("default", "ethereum", "");
    println!("ChainMirror v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default window size: {} blocks", defaults.window_size);
    println!("  Default poll interval: {} ms", defaults.poll_interval_ms);
    println!("  Default narrowing steps per shard: {}", defaults.max_narrowing_steps);
    println!("  Default attempts per event: {}", defaults.max_event_attempts);
    println!("  Storage backends: memory, SQLite cursors (feature: sqlite)");
    println!("\nTransfer events:");
    for signature in EventSignature::for_standard(None) {
        println!("  {signature:?}  {:#x}", signature.topic());
    }
    println!("\nSettlement functions:");
    for signature in supported_signatures() {
        println!("  {signature}");
    }
    Ok(())
}
