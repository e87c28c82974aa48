//! StrataKV CLI
//!
//! Opens an engine on a data directory, runs one command and closes it.

use std::process;

use clap::{Parser, Subcommand};
use stratakv::{Config, Engine, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// StrataKV CLI
#[derive(Parser, Debug)]
#[command(name = "stratakv-cli")]
#[command(about = "Command-line access to a StrataKV data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stratakv_data")]
    data_dir: String,

    /// Active memtable size in bytes that triggers a flush
    #[arg(short, long, default_value = "1048576")]
    flush_threshold: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Print live entries with keys in [from, to)
    Scan {
        /// Inclusive lower bound (open if omitted)
        #[arg(long)]
        from: Option<String>,

        /// Exclusive upper bound (open if omitted)
        #[arg(long)]
        to: Option<String>,
    },

    /// Persist the memtable as a new run
    Flush,

    /// Merge all runs into one
    Compact,

    /// Show engine statistics
    Stats,
}

fn main() {
    // Logs go to stderr so command output stays clean
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,stratakv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .flush_threshold(args.flush_threshold)
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            process::exit(1);
        }
    };

    let outcome = run(&engine, args.command);
    let closed = engine.close();

    if let Err(e) = outcome.and(closed) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(entry) => println!("{}", String::from_utf8_lossy(entry.value().unwrap_or_default())),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { from, to } => {
            let entries = engine.range(from.as_deref().map(str::as_bytes), to.as_deref().map(str::as_bytes))?;
            let mut count = 0usize;
            for entry in entries {
                let entry = entry?;
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(entry.key()),
                    String::from_utf8_lossy(entry.value().unwrap_or_default())
                );
                count += 1;
            }
            println!("({} entries)", count);
        }
        Commands::Flush => {
            engine.flush()?;
            println!("OK ({} runs)", engine.run_count());
        }
        Commands::Compact => {
            engine.compact()?.wait()?;
            println!("OK ({} runs)", engine.run_count());
        }
        Commands::Stats => {
            println!("StrataKV v{}", stratakv::VERSION);
            println!("data_dir:        {}", engine.data_dir().display());
            println!("flush_threshold: {}", engine.config().flush_threshold);
            println!("runs:            {}", engine.run_count());
            println!("memtable bytes:  {}", engine.memtable_size());
            println!("memtable items:  {}", engine.memtable_entry_count());
        }
    }
    Ok(())
}
