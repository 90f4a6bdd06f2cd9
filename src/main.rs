//! kiln CLI entrypoint

use clap::Parser;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kiln::cli::Cli;
use kiln::core::CancelToken;

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout is reserved for results
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling build");
            on_interrupt.cancel();
        }
    });

    if let Err(e) = cli.execute(cancel).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
