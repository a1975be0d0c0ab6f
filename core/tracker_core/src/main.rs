mod api;
mod blob;
mod day;
mod event;
mod settings;
mod status;
mod store;

use clap::Parser;
use std::{
    collections::BTreeSet,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};
use tracing::info;

use crate::{
    api::AppState,
    blob::SqliteBlobStore,
    event::Category,
    settings::{load_or_init_settings, Settings},
    store::{EventLog, DEFAULT_MAX_HISTORY},
};

const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug)]
#[command(name = "tracker_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    /// - localhost or localhost:port
    #[arg(long, default_value = "127.0.0.1:17700")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/tracker-core.db")]
    db: PathBuf,

    /// Maximum number of records kept in history; the oldest are dropped first.
    ///
    /// Only used on first start; afterwards the stored settings apply.
    #[arg(long, default_value_t = DEFAULT_MAX_HISTORY)]
    max_history: usize,

    /// Categories tracked as start/stop activities (repeatable).
    ///
    /// Only used on first start; afterwards the stored settings apply.
    #[arg(long = "toggleable", default_value = "sleep", value_parser = parse_category)]
    toggleable: Vec<Category>,
}

fn parse_category(s: &str) -> Result<Category, String> {
    s.parse()
        .map_err(|_| format!("unknown category '{s}' (expected feed, pee, poop or sleep)"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let defaults = Settings {
        max_history: args.max_history,
        toggleable: args.toggleable.iter().copied().collect::<BTreeSet<_>>(),
    };

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut blobs = SqliteBlobStore::open(&args.db)?;
    let settings = load_or_init_settings(&mut blobs, defaults)?;
    let log = EventLog::load(blobs, settings.max_history);

    let app = api::router(AppState::new(log, settings));

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    if let Some(("localhost", port_str)) = input.rsplit_once(':') {
        let port: u16 = port_str.parse().map_err(|_| {
            anyhow::anyhow!(
                "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                input,
                DEFAULT_PORT
            )
        })?;
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_accepts_common_forms() {
        assert_eq!(
            parse_listen("0.0.0.0:9000").unwrap(),
            "0.0.0.0:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_listen("127.0.0.1").unwrap().port(), DEFAULT_PORT);
        assert_eq!(parse_listen("localhost").unwrap().port(), DEFAULT_PORT);
        assert_eq!(parse_listen("localhost:8080").unwrap().port(), 8080);
        assert!(parse_listen("localhost:http").is_err());
        assert!(parse_listen("example.com:80").is_err());
    }

    #[test]
    fn args_parse_toggleable_categories() {
        let args = Args::try_parse_from([
            "tracker_core",
            "--toggleable",
            "sleep",
            "--toggleable",
            "feed",
        ])
        .unwrap();
        assert_eq!(args.toggleable, vec![Category::Sleep, Category::Feed]);

        let args = Args::try_parse_from(["tracker_core"]).unwrap();
        assert_eq!(args.toggleable, vec![Category::Sleep]);
        assert_eq!(args.max_history, 400);

        assert!(Args::try_parse_from(["tracker_core", "--toggleable", "nap"]).is_err());
    }
}
