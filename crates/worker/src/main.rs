use clap::{Parser, Subcommand};
use sigboard_core::api::http::HttpRecommendationApi;
use sigboard_core::domain::Signal;
use sigboard_core::orchestrator::{Orchestrator, OrchestratorError};
use sigboard_core::view::ViewMode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod display;

#[derive(Debug, Parser)]
#[command(name = "sigboard_worker")]
struct Args {
    /// Track the whole market instead of the watchlist.
    #[arg(long)]
    all: bool,

    /// Only show one signal category (buy, sell, hold).
    #[arg(long)]
    filter: Option<Signal>,

    /// Only show symbols containing this text.
    #[arg(long)]
    search: Option<String>,

    /// Poll interval in seconds. Defaults to SIGBOARD_POLL_INTERVAL_SECS.
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Fetch and print once, then exit without auto-predicting.
    #[arg(long)]
    once: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recompute every symbol in scope. The whole market needs --yes.
    RefreshAll {
        #[arg(long)]
        yes: bool,
    },
    /// Recompute one symbol.
    Predict { symbol: String },
    /// Add a symbol to the watchlist and request its first prediction.
    Add { symbol: String },
    /// Remove a symbol from the watchlist.
    Remove { symbol: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = sigboard_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let api = Arc::new(HttpRecommendationApi::from_settings(&settings)?);
    let mode = if args.all {
        ViewMode::AllMarket
    } else {
        ViewMode::WatchlistOnly
    };
    let orch = Arc::new(
        Orchestrator::new(api, settings.predict_delay)
            .with_view_mode(mode)
            .with_filter(args.filter),
    );
    if let Some(q) = args.search.as_deref() {
        orch.set_search(q).await;
    }

    if let Some(command) = args.command {
        return run_command(&orch, command).await;
    }

    if args.once {
        if let Err(err) = orch.refresh().await {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "recommendation fetch failed");
        }
        display::print_view(&orch.view().await);
        return Ok(());
    }

    let interval = args
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or(settings.poll_interval);
    anyhow::ensure!(!interval.is_zero(), "poll interval must be at least 1 second");

    let mut revisions = orch.subscribe();
    let mut poller = tokio::spawn(Arc::clone(&orch).run_polling(interval, shutdown_signal()));

    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                display::print_view(&orch.view().await);
            }
            res = &mut poller => {
                if let Err(err) = res {
                    tracing::error!(error = %err, "poller task failed");
                }
                break;
            }
        }
    }

    Ok(())
}

async fn run_command(
    orch: &Orchestrator<HttpRecommendationApi>,
    command: Command,
) -> anyhow::Result<()> {
    let res = match command {
        Command::RefreshAll { yes } => orch.refresh_all(yes).await.map(|outcome| {
            tracing::info!(?outcome, "refresh-all finished");
        }),
        Command::Predict { symbol } => orch.predict_symbol(&symbol).await.map(|_| {
            tracing::info!(%symbol, "prediction refreshed");
        }),
        Command::Add { symbol } => orch.add_symbol(&symbol).await.map(|outcome| {
            if let Some(msg) = outcome.prediction_error {
                tracing::warn!(%symbol, "added to watchlist, but recommendation failed: {msg}");
            } else {
                tracing::info!(%symbol, action = ?outcome.action, "watchlist updated");
            }
        }),
        Command::Remove { symbol } => orch.remove_symbol(&symbol).await.map(|action| {
            tracing::info!(%symbol, ?action, "watchlist updated");
        }),
    };

    match res {
        Ok(()) => {
            display::print_view(&orch.view().await);
            Ok(())
        }
        Err(OrchestratorError::ConfirmationRequired) => {
            anyhow::bail!("{}. Re-run with --yes.", OrchestratorError::ConfirmationRequired)
        }
        Err(err) => {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            Err(err)
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &sigboard_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
