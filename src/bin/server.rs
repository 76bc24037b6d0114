use std::{
    error::Error,
    fs::OpenOptions,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware,
};
use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use budgeteur_categorize::{
    AppState, CategorizationConfig, JobQueue, SQLiteCategorizationStore, build_router,
    graceful_shutdown, logging_middleware, spawn_categorization_worker,
};

/// The number of background categorization jobs that may wait at once.
const JOB_QUEUE_CAPACITY: usize = 32;

/// The REST API server for budgeteur_categorize.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// File path to a JSON file with the categorization config.
    ///
    /// The defaults are used for any setting the file leaves out, or for all
    /// of them if no file is given.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_logging()?;

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CategorizationConfig::load_from_file(path)?,
        None => CategorizationConfig::default(),
    };
    tracing::debug!("Using categorization config {config:?}");

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    let conn = Connection::open(&args.db_path)?;
    let (job_queue, job_receiver) = JobQueue::new(JOB_QUEUE_CAPACITY);
    let app_state = AppState::new(conn, config, job_queue)?;

    let shutdown = CancellationToken::new();
    let worker = spawn_categorization_worker(
        job_receiver,
        app_state.categorizer.clone(),
        Arc::new(SQLiteCategorizationStore::new(
            app_state.db_connection.clone(),
        )),
        shutdown.clone(),
    );

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = build_router(app_state).layer(middleware::from_fn(logging_middleware));
    let router = add_tracing_layer(router);

    tracing::info!("HTTP server listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    shutdown.cancel();
    if let Err(error) = worker.await {
        tracing::error!("The categorization worker panicked: {error}");
    }

    Ok(())
}

fn setup_logging() -> Result<(), Box<dyn Error>> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")?;

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_ansi(false)
        .with_writer(Arc::new(log_file))
        .with_filter(filter::LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(debug_log)
        .init();

    Ok(())
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // Errors are logged where they are handled.
        .on_failure(());

    router.layer(tracing_layer)
}
