//! Command-line entry point for the wallet daemon.
//!
//! Wires the out-of-scope transports thinly: a line-delimited JSON-RPC TCP
//! listener for ordinary frontends, another for channel frontends (which
//! also receive notifications), and a reconnecting session to btcd.

use std::process;
use std::sync::Arc;

use clap::{Arg, ArgAction, Command};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use btcwalletd::node::NodeLink;
use btcwalletd::rpc::FrontendChannel;
use btcwalletd::storage::DiskStorage;
use btcwalletd::{Config, Network, WalletDaemon};

type Daemon = WalletDaemon<DiskStorage>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("btcwalletd")
        .version(btcwalletd::VERSION)
        .about("Bitcoin wallet daemon fronting a btcd full node")
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .help("Network to run on")
                .value_parser(["mainnet", "testnet", "regtest"])
                .default_value("testnet"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory for account storage")
                .default_value("./btcwalletd-data"),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDRESS")
                .help("Listen address for ordinary frontends")
                .default_value("127.0.0.1:18332"),
        )
        .arg(
            Arg::new("channel-listen")
                .long("channel-listen")
                .value_name("ADDRESS")
                .help("Listen address for channel frontends (receive notifications)")
                .default_value("127.0.0.1:18333"),
        )
        .arg(
            Arg::new("node")
                .long("node")
                .value_name("ADDRESS")
                .help("Address of the btcd node to defer requests to"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info"),
        )
        .arg(
            Arg::new("fail-on-persist-error")
                .long("fail-on-persist-error")
                .help("Fail operations whose state cannot be written to disk")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = matches.get_one::<String>("log-level").unwrap();
    if let Err(e) = btcwalletd::logging::init_console_logging(log_level) {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    let network = match matches.get_one::<String>("network").unwrap().as_str() {
        "mainnet" => Network::Bitcoin,
        "testnet" => Network::Testnet,
        "regtest" => Network::Regtest,
        _ => unreachable!(),
    };

    let data_dir = matches.get_one::<String>("data-dir").unwrap();
    let config = Config::new(network)
        .with_data_dir(data_dir)
        .with_fail_on_persist_error(matches.get_flag("fail-on-persist-error"));
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {e}");
        process::exit(1);
    }

    tracing::info!("Starting btcwalletd");
    tracing::info!("Network: {network:?}");
    tracing::info!("Data directory: {data_dir}");

    let storage = match DiskStorage::new(data_dir).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot open data directory: {e}");
            process::exit(1);
        }
    };

    let (node, node_outbound) = NodeLink::new();
    let node = Arc::new(node);
    let daemon = match WalletDaemon::new(config, Arc::clone(&node), storage).await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to create wallet daemon: {e}");
            process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    let listen = matches.get_one::<String>("listen").unwrap();
    let channel_listen = matches.get_one::<String>("channel-listen").unwrap();
    let ordinary = TcpListener::bind(listen).await?;
    let channel = TcpListener::bind(channel_listen).await?;
    tracing::info!("Frontend listeners on {listen} (ordinary) and {channel_listen} (channel)");

    tokio::spawn(serve_frontends(ordinary, daemon.clone(), false, shutdown.clone()));
    tokio::spawn(serve_frontends(channel, daemon.clone(), true, shutdown.clone()));

    if let Some(node_addr) = matches.get_one::<String>("node") {
        tokio::spawn(node_session(
            daemon.clone(),
            Arc::clone(&node),
            node_outbound,
            node_addr.clone(),
            shutdown.clone(),
        ));
    } else {
        tracing::warn!("No --node given; deferred requests will be dropped");
    }

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");
    shutdown.cancel();
    Ok(())
}

/// Accept frontend connections and serve each until it disconnects.
async fn serve_frontends(
    listener: TcpListener,
    daemon: Daemon,
    is_channel: bool,
    shutdown: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, is_channel, "frontend connected");
                    stream
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
            _ = shutdown.cancelled() => return,
        };
        tokio::spawn(serve_frontend(stream, daemon.clone(), is_channel, shutdown.clone()));
    }
}

async fn serve_frontend(
    stream: TcpStream,
    daemon: Daemon,
    is_channel: bool,
    shutdown: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (frontend, mut replies) = FrontendChannel::new();

    // Channel frontends additionally receive the broadcast notifications.
    if is_channel {
        let frontend = frontend.clone();
        let mut notifications = daemon.notifier().subscribe();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(msg) => {
                        if !frontend.send(msg) {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "frontend lagged behind notifications");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    let writer = tokio::spawn(async move {
        while let Some(msg) = replies.recv().await {
            if write_half.write_all(&msg).await.is_err()
                || write_half.write_all(b"\n").await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => daemon.process_request(&frontend, line.as_bytes(), is_channel).await,
                _ => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }

    drop(frontend);
    writer.abort();
}

/// Maintain the session with btcd, reconnecting with a fixed backoff.
async fn node_session(
    daemon: Daemon,
    node: Arc<NodeLink>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    addr: String,
    shutdown: CancellationToken,
) {
    const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

    loop {
        if shutdown.is_cancelled() {
            return;
        }
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "cannot connect to btcd; retrying");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    _ = shutdown.cancelled() => return,
                }
            }
        };
        tracing::info!(%addr, "connected to btcd");
        node.set_connected(true);
        daemon.request_best_block().await;
        daemon.rebroadcast_unmined().await;

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => daemon.handle_node_message(line.as_bytes()).await,
                    _ => break,
                },
                msg = outbound.recv() => match msg {
                    Some(msg) => {
                        if write_half.write_all(&msg).await.is_err()
                            || write_half.write_all(b"\n").await.is_err()
                        {
                            break;
                        }
                    }
                    None => return,
                },
                _ = shutdown.cancelled() => return,
            }
        }

        node.set_connected(false);
        tracing::warn!("btcd connection lost; reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}
