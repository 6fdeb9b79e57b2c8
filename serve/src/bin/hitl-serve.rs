//! `hitl-serve`: run the approval gate over HTTP.
//!
//! Config is read from the environment after applying `.env` and
//! `~/.config/hitl/config.toml` (see the `config` crate).

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hitl-serve")]
#[command(about = "HITL approval gate HTTP server")]
struct Args {
    /// Listen address (default: HITL_SERVE_ADDR or 127.0.0.1:8080)
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[tokio::main]
async fn main() {
    let config_result = config::load_and_apply("hitl", None::<&std::path::Path>);
    init_logging();
    if let Err(e) = config_result {
        tracing::warn!(error = %e, "config files not applied");
    }

    let args = Args::parse();
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutting down");
                on_signal.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "no ctrl-c handler; stop the process to exit"),
        }
    });

    if let Err(e) = serve::run_serve(args.addr.as_deref(), shutdown).await {
        eprintln!("hitl-serve: {}", e);
        std::process::exit(1);
    }
}
