use clap::Parser;
use inkbird2mqtt::app::{self, Options, RunError};
use inkbird2mqtt::output::mqtt::MqttPublisher;
use inkbird2mqtt::scanner::bluer::BluezAdapter;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Log to stderr at `level`; `RUST_LOG` directives refine it per module.
fn init_logging(level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `cancel` on the first interrupt signal.
fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("exiting on signal SIGINT"),
            Err(err) => tracing::error!(%err, "could not listen for signals, exiting"),
        }
        cancel.cancel();
    });
}

/// Open the adapter, connect to the broker and run the pipeline until interrupted.
async fn run(options: Options) -> Result<(), RunError> {
    tracing::info!("starting!");
    let cancel = CancellationToken::new();

    let adapter = BluezAdapter::open(options.adapter.as_deref()).await?;
    tracing::debug!(adapter = adapter.name(), "using adapter");

    // Kept apart from `cancel` so the connection outlives the pipeline long
    // enough to disconnect.
    let connection_cancel = CancellationToken::new();
    let (publisher, connection) =
        MqttPublisher::connect(&options.mqtt_config(), connection_cancel.clone()).await?;

    cancel_on_signal(cancel.clone());

    let result = app::run_pipeline(
        &options,
        Arc::new(adapter),
        Arc::new(publisher.clone()),
        cancel.clone(),
    )
    .await;

    publisher.disconnect(connection, &connection_cancel).await;

    result
}

#[tokio::main]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.log_level);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            tracing::error!(%why, "fatal error");
            std::process::exit(EXIT_ERROR);
        }
    }
}
