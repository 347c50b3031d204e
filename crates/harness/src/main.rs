mod cli;
mod orchestrator;
mod sessions;

use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::parse_args()?;
    let run = args.run;

    if let Err(issues) = run.validate() {
        let mut fatal = false;
        for issue in &issues {
            if issue.starts_with("ERROR") {
                fatal = true;
                error!("{issue}");
            } else {
                warn!("{issue}");
            }
        }
        if fatal {
            std::process::exit(255);
        }
    }

    info!(
        sfu = ?run.sfu,
        streams = run.concurrency.streams,
        clients_per_stream = run.concurrency.clients_per_stream,
        "starting streambench run"
    );

    let http = reqwest::Client::builder()
        .build()
        .expect("failed to build HTTP client");

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let signal_task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, canceling in-flight sessions"),
            _ = sigterm.recv() => info!("received SIGTERM, canceling in-flight sessions"),
        }
        let _ = cancel_tx.send(true);
    });

    let vnet_registry = if run.vnet {
        Some(streambench_vnet::new_registry())
    } else {
        None
    };

    let outcome = orchestrator::run_all(&run, &http, cancel_rx, vnet_registry, None).await;
    signal_task.abort();

    info!(
        total = outcome.total,
        canceled = outcome.canceled,
        failed = outcome.failed,
        "run complete"
    );

    if outcome.all_ok() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
