mod format;
mod render;

use anyhow::{anyhow, bail, Context};
use chrono::{Local, Offset};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::{format::absolute_time, render::StatusSnapshot};

#[derive(Parser, Debug)]
#[command(name = "tracker_cli", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17700
    #[arg(long, default_value = "http://127.0.0.1:17700")]
    core_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one occurrence now.
    Track {
        category: String,
        /// Record an explicit start/stop phase instead of a plain event.
        #[arg(long, value_enum)]
        phase: Option<PhaseArg>,
    },
    /// Start the activity if it is idle, stop it if it is running.
    Toggle { category: String },
    /// Take back the most recent record.
    Undo,
    /// Put back the most recently undone record.
    Redo,
    /// Delete all tracked data. Cannot be undone.
    Reset {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Print the status for today, or for an earlier day.
    Status {
        /// 0 for today, -1 for yesterday, ...
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        day_offset: i64,
    },
    /// Keep the status on screen, redrawing on every tick.
    Watch {
        /// Redraw interval (milliseconds).
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum PhaseArg {
    Start,
    Stop,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordedEvent {
    #[serde(rename = "type")]
    kind: String,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct MutationResult {
    changed: bool,
    #[serde(default)]
    event: Option<RecordedEvent>,
}

struct Core {
    client: Client,
    base: String,
}

impl Core {
    fn new(core_url: &str) -> Self {
        Self {
            client: Client::new(),
            base: core_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> anyhow::Result<T> {
        let url = format!("{}{path}", self.base);
        debug!("POST {url}");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("core unreachable at {}", self.base))?;
        unwrap_envelope(resp.json().await?)
    }

    async fn status(&self, day_offset: i64) -> anyhow::Result<StatusSnapshot> {
        let url = format!("{}/status", self.base);
        let tz_offset_minutes = Local::now().offset().fix().local_minus_utc() / 60;
        debug!("GET {url}");
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("day_offset", day_offset.to_string()),
                ("tz_offset_minutes", tz_offset_minutes.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("core unreachable at {}", self.base))?;
        unwrap_envelope(resp.json().await?)
    }
}

fn unwrap_envelope<T>(env: Envelope<T>) -> anyhow::Result<T> {
    if !env.ok {
        bail!(
            "core rejected the request: {}",
            env.error.as_deref().unwrap_or("unknown_error")
        );
    }
    env.data.ok_or_else(|| anyhow!("core response had no data"))
}

fn describe_mutation(r: &MutationResult, done: &str, noop: &str) -> String {
    match (&r.event, r.changed) {
        (Some(e), true) => {
            let now = chrono::Utc::now().timestamp_millis();
            format!("{done} {} at {}", e.kind, absolute_time(e.time, now, &Local))
        }
        _ => noop.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_cli=warn".into()),
        )
        .init();

    let args = Args::parse();
    let core = Core::new(&args.core_url);

    match args.command {
        Command::Track { category, phase } => {
            let r: MutationResult = core
                .post("/track", serde_json::json!({ "category": category, "phase": phase }))
                .await?;
            println!("{}", describe_mutation(&r, "Tracked", "Nothing tracked"));
        }
        Command::Toggle { category } => {
            let r: MutationResult = core
                .post("/toggle", serde_json::json!({ "category": category }))
                .await?;
            println!("{}", describe_mutation(&r, "Tracked", "Nothing tracked"));
        }
        Command::Undo => {
            let r: MutationResult = core.post("/undo", Value::Null).await?;
            println!("{}", describe_mutation(&r, "Undid", "Nothing to undo"));
        }
        Command::Redo => {
            let r: MutationResult = core.post("/redo", Value::Null).await?;
            println!("{}", describe_mutation(&r, "Redid", "Nothing to redo"));
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("reset deletes all tracked data permanently; re-run with --yes to confirm");
            }
            let _: MutationResult = core.post("/reset", Value::Null).await?;
            println!("All tracked data deleted.");
        }
        Command::Status { day_offset } => {
            let s = core.status(day_offset).await?;
            print!("{}", render::render_status(&s, &Local));
        }
        Command::Watch { interval_ms } => watch(&core, interval_ms).await?,
    }
    Ok(())
}

async fn watch(core: &Core, interval_ms: u64) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
    let mut last_epoch: Option<u64> = None;
    info!("watching {} every {interval_ms}ms", core.base);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        let s = match core.status(0).await {
            Ok(s) => s,
            Err(err) => {
                eprintln!("{err:#}");
                continue;
            }
        };
        // Clear screen, cursor home.
        print!("\x1b[2J\x1b[H");
        if last_epoch.is_some_and(|e| e != s.epoch) {
            println!("(data was reset)");
        }
        last_epoch = Some(s.epoch);
        debug!(revision = s.revision, "redraw");
        print!("{}", render::render_status(&s, &Local));
    }
}
