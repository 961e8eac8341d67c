//! Tidewatch Daemon - RESP server with a caching watch proxy

mod handler;
mod resp;

use anyhow::Result;
use bytes::BytesMut;
use clap::Parser;
use std::sync::Arc;
use tidecache::{KvCache, ProxyConfig, WatchProxy, DEFAULT_CAPACITY, DEFAULT_STREAM_BUFFER};
use tidestore::MemoryBackend;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::handler::{unwatch_frame, watch_frame, Action, CommandHandler};
use crate::resp::RespValue;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1:6380")]
    bind: String,

    /// Watch cache capacity (number of keys)
    #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,

    /// Batches buffered per forwarded watch before a slow client is detached
    #[arg(long, default_value_t = DEFAULT_STREAM_BUFFER)]
    stream_buffer: usize,

    /// Health check mode (for Docker)
    #[arg(long)]
    health: bool,
}

/// Shared server state
struct Server {
    backend: Arc<MemoryBackend>,
    values: Arc<KvCache>,
    proxy: Arc<WatchProxy>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    // Health check
    if args.health {
        match TcpStream::connect(&args.bind).await {
            Ok(_) => {
                println!("OK");
                std::process::exit(0);
            }
            Err(_) => {
                eprintln!("FAILED");
                std::process::exit(1);
            }
        }
    }

    let config = ProxyConfig {
        capacity: args.capacity,
        stream_buffer: args.stream_buffer,
    };

    info!("Starting Tidewatch Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Binding to {}", args.bind);
    info!("Watch cache capacity: {}", config.capacity);

    let backend = Arc::new(MemoryBackend::new());
    let proxy = Arc::new(WatchProxy::new(backend.clone(), &config)?);
    let server = Arc::new(Server {
        backend: backend.clone(),
        values: Arc::new(KvCache::new()),
        proxy: proxy.clone(),
    });

    let listener = TcpListener::bind(&args.bind).await?;
    info!("Server listening on {}", args.bind);

    println!("\nTidewatch ready on redis://{}", args.bind);
    println!("   Try: redis-cli -p {} WATCH mykey", port(&args.bind));
    println!("   Then: redis-cli -p {} SET mykey hello", port(&args.bind));
    println!("\nPress Ctrl+C to stop\n");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let server = Arc::clone(&server);

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, server).await {
                            error!("Error handling client {}: {}", addr, e);
                        }
                        info!("Connection closed: {}", addr);
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Ending backend streams first lets drain tasks finish on their own
    backend.shutdown();
    proxy.shutdown().await;
    info!("Tidewatch stopped");
    Ok(())
}

fn port(bind: &str) -> &str {
    bind.rsplit(':').next().unwrap_or("6380")
}

async fn handle_client(mut stream: TcpStream, server: Arc<Server>) -> Result<()> {
    let handler = CommandHandler::new(
        server.backend.clone(),
        server.values.clone(),
        server.proxy.clone(),
    );
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        // Parse and handle buffered commands
        loop {
            match RespValue::parse(&mut buffer) {
                Ok(Some(cmd)) => match handler.handle(cmd) {
                    Action::Reply(response) => stream.write_all(&response.serialize()).await?,
                    Action::Watch(key) => {
                        if !watch_mode(&mut stream, &mut buffer, &server.proxy, key).await? {
                            return Ok(());
                        }
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Parse error: {}", e);
                    let error_resp = RespValue::error(format!("ERR {}", e));
                    stream.write_all(&error_resp.serialize()).await?;
                    buffer.clear();
                    break;
                }
            }
        }

        if stream.read_buf(&mut buffer).await? == 0 {
            // Connection closed
            return Ok(());
        }
    }
}

/// Relay a watch to the client until it ends or the client sends UNWATCH.
///
/// Returns `false` when the client disconnected.
async fn watch_mode(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    proxy: &WatchProxy,
    key: String,
) -> Result<bool> {
    let mut watch = match proxy.watch(key.as_str()).await {
        Ok(watch) => watch,
        Err(e) => {
            stream
                .write_all(&RespValue::error(format!("ERR {}", e)).serialize())
                .await?;
            return Ok(true);
        }
    };
    debug!(key = %key, "Client entered watch mode");

    loop {
        // Commands already buffered are checked before waiting again
        loop {
            let cmd = match RespValue::parse(buffer) {
                Ok(Some(cmd)) => cmd,
                Ok(None) => break,
                Err(e) => {
                    warn!("Parse error in watch mode: {}", e);
                    buffer.clear();
                    break;
                }
            };
            if is_unwatch(&cmd) {
                stream.write_all(&unwatch_frame(&key).serialize()).await?;
                return Ok(true);
            }
            let reply = RespValue::error("ERR only UNWATCH is allowed while watching");
            stream.write_all(&reply.serialize()).await?;
        }

        tokio::select! {
            item = watch.receive() => match item {
                Some(Ok(batch)) => {
                    stream.write_all(&watch_frame(&key, &batch).serialize()).await?;
                }
                Some(Err(e)) => {
                    stream
                        .write_all(&RespValue::error(format!("ERR {}", e)).serialize())
                        .await?;
                }
                None => {
                    stream.write_all(&unwatch_frame(&key).serialize()).await?;
                    return Ok(true);
                }
            },
            read = stream.read_buf(buffer) => {
                if read? == 0 {
                    return Ok(false);
                }
            }
        }
    }
}

fn is_unwatch(cmd: &RespValue) -> bool {
    match cmd {
        RespValue::Array(Some(parts)) => parts
            .first()
            .and_then(RespValue::as_str)
            .is_some_and(|name| name.eq_ignore_ascii_case("UNWATCH")),
        _ => false,
    }
}
