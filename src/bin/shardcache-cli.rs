//! SHARDCACHE CLI
//!
//! Seeds the facility catalog from CSV, then answers lookups interactively.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shardcache::catalog::{Facility, FacilityService};
use shardcache::{CacheConfig, ConcurrentTtlCleaner, MemoryStore, RemoteBackend, ShardedClient};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// SHARDCACHE CLI - Food Facility Lookup
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Cache configuration file (YAML or TOML); defaults apply when absent
    #[arg(short, long, default_value = "configs/cli.yaml")]
    config: PathBuf,

    /// Facility dataset
    #[arg(short, long, default_value = "configs/data.csv")]
    data: PathBuf,

    /// Use the in-process store instead of remote nodes
    #[arg(long, default_value_t = false)]
    memory: bool,

    /// Expiry sweep interval in seconds for the in-process store
    #[arg(long, default_value_t = 10)]
    ttl_interval: u64,
}

#[derive(Debug, PartialEq)]
enum Query {
    Item(String),
    Near { lat: f64, lon: f64, radius_km: f64 },
    Id(String),
    Help,
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("shardcache=info".parse()?))
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    let client = if args.memory {
        let store = MemoryStore::with_cpu_shards();
        ConcurrentTtlCleaner::spawn(store.clone(), Duration::from_secs(args.ttl_interval));
        info!("using in-process store");
        ShardedClient::new(&config, Arc::new(store))
    } else {
        let backend = RemoteBackend::new(config.addresses(), config.command_timeout())?;
        backend.ping().await?;
        info!(address = %config.address, "connected to cache nodes");
        ShardedClient::new(&config, Arc::new(backend))
    };

    let service = FacilityService::new(client.clone())?;
    let seeded = service.seed(&args.data).await?;
    println!("Loaded {} facilities. Type 'help' for available commands, 'quit' to exit.\n", seeded);

    loop {
        print!("shardcache> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let query = match parse_query(input) {
            Ok(query) => query,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };

        let result = match query {
            Query::Quit => {
                println!("Goodbye!");
                break;
            }
            Query::Help => {
                print_help();
                continue;
            }
            Query::Item(item) => service.get_by_item(&item).await,
            Query::Near { lat, lon, radius_km } => service.get_by_location(lat, lon, radius_km).await,
            Query::Id(id) => service.get_by_id(&id).await.map(|f| vec![f]),
        };

        match result {
            Ok(facilities) if facilities.is_empty() => println!("(no facilities)"),
            Ok(facilities) => facilities.iter().for_each(print_facility),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    info!("{}", client.metrics().summary());
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<CacheConfig> {
    if path.exists() {
        Ok(CacheConfig::load(path)?)
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        Ok(CacheConfig::default())
    }
}

fn parse_query(input: &str) -> anyhow::Result<Query> {
    let parts: Vec<&str> = input.split_whitespace().collect();

    match parts[0].to_lowercase().as_str() {
        "quit" | "exit" => Ok(Query::Quit),
        "help" => Ok(Query::Help),

        "near" => {
            if parts.len() < 3 {
                anyhow::bail!("near requires a position: near <lat> <lon> [km]");
            }
            let lat = parts[1].parse::<f64>()?;
            let lon = parts[2].parse::<f64>()?;
            let radius_km = match parts.get(3) {
                Some(km) => km.parse::<f64>()?,
                None => 1.0,
            };
            Ok(Query::Near { lat, lon, radius_km })
        }

        "id" => {
            if parts.len() < 2 {
                anyhow::bail!("id requires a location id: id <location id>");
            }
            Ok(Query::Id(parts[1].to_string()))
        }

        _ => Ok(Query::Item(input.to_string())),
    }
}

fn print_facility(facility: &Facility) {
    println!(
        "[{}] {} - {} ({:.5}, {:.5})",
        facility.location_id,
        facility.applicant,
        facility.location_description,
        facility.latitude,
        facility.longitude
    );
}

fn print_help() {
    println!(
        r#"
Available commands:

  <food item>               - Facilities serving the item
  near <lat> <lon> [km]     - Facilities within km (default 1) of a position
  id <location id>          - One facility by location id

  help                      - Show this help
  quit / exit               - Exit the CLI

Examples:
  Burritos
  near 37.7941 -122.3950 0.5
  id 1569152
"#
    );
}
