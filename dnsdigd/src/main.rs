// The dnsdig forwarder daemon.
//
// Binds a UDP socket, forwards queries to public resolvers over TLS, caches
// answers in the configured key-value store, and prints latency statistics
// once a minute.

use clap::Parser;
use dnsdig::analytics::{Analytics, MemorySampleStore};
use dnsdig::cache::{AnswerCache, KvStore, MemoryStore, RedisStore, DEFAULT_TTL_CEILING};
use dnsdig::clients::DotClient;
use dnsdig::forwarder::UdpForwarder;
use dnsdig::settings::{Environment, Settings};
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// How often the stats table is printed.
const STATS_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "dnsdigd", version, about = "Caching DNS-over-UDP forwarder")]
struct Cli {
    /// Host to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 5053)]
    port: u16,

    /// Refuse queries for domains on the imported ad blocklist
    #[arg(long)]
    use_adblocker: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Bad configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    println!("DNSDig Daemon - Serving at: {}:{}", args.host, args.port);

    // Under test the in-process store keeps runs hermetic; everywhere else
    // the cache is shared through Redis.
    let store: Arc<dyn KvStore> = if settings.env == Environment::Pytest {
        Arc::new(MemoryStore::default())
    } else {
        match RedisStore::new(&settings.redis_url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to connect to the cache store: {}", e);
                return ExitCode::from(2);
            }
        }
    };

    if args.use_adblocker {
        // The blocklist importer runs out-of-process; without an imported
        // list there is nothing to enforce yet.
        warn!("Ad blocking requested; enforcement requires an imported blocklist");
    }

    let cache = AnswerCache::new(store, DEFAULT_TTL_CEILING);
    let analytics = Arc::new(Analytics::new(Arc::new(MemorySampleStore::default())));
    let upstream = Arc::new(DotClient::default());

    tokio::spawn(Arc::clone(&analytics).report_loop(STATS_PERIOD));

    let forwarder = UdpForwarder::new(&args.host, args.port, cache, upstream, analytics);

    match forwarder.serve().await {
        Ok(()) => {
            info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Forwarder failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
