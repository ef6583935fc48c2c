use clap::Parser;
use hayloft::api::{NameRequest, NameResponse};
use hayloft::send_frame;
use hayloft::{NameConfig, NameEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tracing::{debug, error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "The hayloft name server", long_about = None)]
struct App {
    #[clap(long, default_value = "127.0.0.1:1720")]
    addr: SocketAddr,

    /// Directory holding the ndata volumes.
    #[clap(long)]
    data_dir: PathBuf,

    /// Required free space in the data directory, MiB.
    #[clap(long, default_value = "100")]
    data_free_mb: u64,

    /// Stats refresh interval, seconds.
    #[clap(long, default_value = "10")]
    stats_refresh: u64,

    /// Machine id feeding the volume-id generator, 0 ~ 1023.
    #[clap(long, default_value = "0")]
    machine_id: u64,

    #[clap(long, default_value = "info", env = "HAYLOFT_LOG")]
    log_level: tracing_subscriber::filter::LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::parse();
    tracing_subscriber::fmt()
        .with_max_level(app.log_level)
        .init();

    let mut config = NameConfig::new(&app.data_dir, app.machine_id);
    config.data_free_mb = app.data_free_mb;
    config.stats_refresh = Duration::from_secs(app.stats_refresh);
    let engine = NameEngine::open(config)?;

    info!(
        "hayloft-named version: {}, data dir: {}",
        env!("CARGO_PKG_VERSION"),
        app.data_dir.display()
    );

    let listener = TcpListener::bind(app.addr).await?;
    info!("name server on {}", app.addr);

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
    engine: NameEngine,
) -> anyhow::Result<()> {
    let size = stream.read_u64().await? as usize;
    let mut buf = vec![0; size];
    stream.read_exact(&mut buf).await?;
    let request: NameRequest = bincode::deserialize(&buf)?;

    let response = match request {
        NameRequest::Write {
            name,
            store_id,
            store_key,
        } => match engine.write(&name, store_id, store_key) {
            Ok(()) => NameResponse::Written,
            Err(e) => NameResponse::Error(e.to_string()),
        },
        NameRequest::Read { name } => match engine.read(&name) {
            Ok((store_id, store_key)) => NameResponse::Location {
                store_id,
                store_key,
            },
            Err(e) => NameResponse::Error(e.to_string()),
        },
        NameRequest::Delete { name } => match engine.delete(&name) {
            Ok(()) => NameResponse::Deleted,
            Err(e) => NameResponse::Error(e.to_string()),
        },
        NameRequest::Stats => NameResponse::Stats(engine.stats()),
    };

    send_frame!(stream, response);
    Ok(())
}
