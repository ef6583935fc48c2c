use clap::Parser;
use hayloft::api::{StoreRequest, StoreResponse};
use hayloft::send_frame;
use hayloft::{StoreConfig, StoreEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tracing::{debug, error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "The hayloft store server", long_about = None)]
struct App {
    #[clap(long, default_value = "127.0.0.1:1730")]
    addr: SocketAddr,

    /// Directory holding the vdata volumes.
    #[clap(long)]
    data_dir: PathBuf,

    /// Directory holding the vindex sidecars.
    #[clap(long)]
    index_dir: PathBuf,

    /// Required free space in the data directory, MiB.
    #[clap(long, default_value = "100")]
    data_free_mb: u64,

    /// Required free space in the index directory, MiB.
    #[clap(long, default_value = "30")]
    index_free_mb: u64,

    /// Stats refresh interval, seconds.
    #[clap(long, default_value = "10")]
    stats_refresh: u64,

    #[clap(long, default_value = "info", env = "HAYLOFT_LOG")]
    log_level: tracing_subscriber::filter::LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::parse();
    tracing_subscriber::fmt()
        .with_max_level(app.log_level)
        .init();

    let mut config = StoreConfig::new(&app.data_dir, &app.index_dir);
    config.data_free_mb = app.data_free_mb;
    config.index_free_mb = app.index_free_mb;
    config.stats_refresh = Duration::from_secs(app.stats_refresh);
    let engine = StoreEngine::open(config)?;

    info!(
        "hayloft-stored version: {}, data dir: {}",
        env!("CARGO_PKG_VERSION"),
        app.data_dir.display()
    );

    let listener = TcpListener::bind(app.addr).await?;
    info!("store server on {}", app.addr);

    let accept_engine = engine.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            debug!("connection established: {stream:?}");
            let engine = accept_engine.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, engine).await {
                    error!("connection failed: {e}");
                }
            });
        }
    });

    match ctrl_c().await {
        Ok(_) => info!("received shutdown signal"),
        Err(e) => error!("error receiving ctrl-c: {e}"),
    };
    engine.close();
    Ok(())
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    engine: StoreEngine,
) -> anyhow::Result<()> {
    // The client provides a size hint for how much data is incoming
    // first, so the request can be read exactly.
    let size = stream.read_u64().await? as usize;
    let mut buf = vec![0; size];
    stream.read_exact(&mut buf).await?;
    let request: StoreRequest = bincode::deserialize(&buf)?;

    let response = match request {
        StoreRequest::Write { key, meta, data } => match engine.write(key, &meta, &data) {
            Ok(()) => StoreResponse::Written,
            Err(e) => StoreResponse::Error(e.to_string()),
        },
        StoreRequest::Read { key } => match engine.read(key) {
            Ok(object) => StoreResponse::Object {
                meta: object.meta,
                data: object.data,
                size: object.size,
            },
            Err(e) => StoreResponse::Error(e.to_string()),
        },
        StoreRequest::Delete { key } => match engine.delete(key) {
            Ok(()) => StoreResponse::Deleted,
            Err(e) => StoreResponse::Error(e.to_string()),
        },
        StoreRequest::Stats => StoreResponse::Stats(engine.stats()),
    };

    send_frame!(stream, response);
    Ok(())
}
