use std::{fs, net::IpAddr, path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use log::info;
use printer_relay::{
    db::establish_pool,
    logging::init_logging,
    printer_client::{ClientConfig, DEFAULT_API_PORT},
    relay::{RelayConfig, session::DEFAULT_RELAY_PORT},
    server::{self, ServerConfig},
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Printer dashboard backend and transparent slicer relay", long_about = None)]
struct Args {
    /// SQLite db file path
    #[arg(long, default_value = "/var/lib/printer-relay/printer-relay.db")]
    db_path: PathBuf,
    /// Bind address of the dashboard API
    #[arg(long, default_value = "0.0.0.0:5000")]
    addr: String,
    /// Address the relay listens on
    #[arg(long, default_value = "0.0.0.0")]
    relay_ip: IpAddr,
    /// Port the relay listens on; the slicer expects the printer's own port
    #[arg(long, default_value_t = DEFAULT_RELAY_PORT)]
    relay_port: u16,
    /// Port of the printer's HTTP API
    #[arg(long, default_value_t = DEFAULT_API_PORT)]
    printer_port: u16,
    /// Upper bound for one relayed exchange, in seconds
    #[arg(long, default_value_t = 300)]
    relay_timeout_secs: u64,
    /// Never attach captured files to a printer whose address differs from the relay target
    #[arg(long, default_value_t = false)]
    relay_no_fallback: bool,
    /// Watch folder scan interval in seconds
    #[arg(long, default_value_t = 5)]
    watch_interval_secs: u64,
    /// Pre-built dashboard to serve at /
    #[arg(long)]
    static_dir: Option<PathBuf>,
    /// Run migrations and exit (for testing/deployment)
    #[arg(long, default_value_t = false)]
    migrate_only: bool,
}

#[actix_web::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    if let Some(parent) = args.db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let pool = establish_pool(&args.db_path)?;

    if args.migrate_only {
        info!("migrations applied, exiting due to --migrate-only flag");
        return Ok(());
    }

    let cfg = ServerConfig {
        addr: args.addr.clone(),
        client: ClientConfig {
            port: args.printer_port,
            ..ClientConfig::default()
        },
        relay: RelayConfig {
            listen_ip: args.relay_ip,
            listen_port: args.relay_port,
            upstream_port: args.printer_port,
            timeout: Duration::from_secs(args.relay_timeout_secs.max(1)),
            fallback_to_any_printer: !args.relay_no_fallback,
            ..RelayConfig::default()
        },
        watch_interval_secs: args.watch_interval_secs,
        static_dir: args.static_dir.clone(),
    };
    server::run(cfg, pool).await
}
