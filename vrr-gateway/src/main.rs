//! Gateway binary: installs the OpenFlow pipeline on an OVS bridge,
//! reconciles it against observed kernel routing state, and serves the
//! local HTTP admin API until a termination signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use vrr_core::config;
use vrr_http::{admin, auth, HttpServer};
use vrr_net::{Gateway, OvsDriver};

#[derive(Parser, Debug)]
#[command(name = "vrr-gateway")]
#[command(about = "Kernel-state-driven OpenFlow gateway with a local HTTP admin API")]
struct Args {
    /// OVS bridge the pipeline is installed on
    #[arg(long, default_value = "vrr")]
    bridge: String,

    /// Network namespace the vlan ports and kernel watchers live in.
    /// Pass "none" to watch the host namespace directly. Matches the
    /// bridge name by default, the same convention the gateway's
    /// namespace lookup follows.
    #[arg(long, default_value = "vrr")]
    netns: String,

    /// Admin HTTP listen address
    #[arg(long, default_value = "127.0.0.1:10001")]
    listen: SocketAddr,

    /// Path to the admin basic-auth token file
    #[arg(long, default_value = "/etc/openvrr/token")]
    token_file: PathBuf,

    /// Run ovs-vsctl/ovs-ofctl through sudo
    #[arg(long)]
    sudo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_environment();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vrr_gateway=info".parse()?)
                .add_directive("vrr_net=info".parse()?)
                .add_directive("vrr_http=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let netns = (args.netns != "none").then_some(args.netns.clone());

    let driver = OvsDriver::new().with_sudo(args.sudo);
    let gateway = Arc::new(Gateway::new(args.bridge.clone(), driver, netns));

    if let Err(e) = gateway.init().await {
        error!("gateway init failed: {}", e);
        std::process::exit(1);
    }
    info!("bridge '{}' ready", args.bridge);

    // Blocks until the watcher has subscribed and persisted NAT rules are
    // restored, per §4.5's "watcher, then composer, then HTTP" ordering;
    // aborts the process itself if the watcher fails to start (§4.6).
    gateway.start().await;

    let token = match auth::load_or_generate_token(&args.token_file) {
        Ok(token) => Arc::new(token),
        Err(e) => {
            error!("loading admin token from {:?}: {}", args.token_file, e);
            std::process::exit(1);
        }
    };

    let router = admin::build_router(gateway.clone(), token);
    let server = HttpServer::builder().bind(args.listen).router(router).build()?;

    let http_handle = tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            error!("admin HTTP server exited: {}", e);
        }
    });

    wait_for_shutdown().await;
    info!("shutting down");
    gateway.stop();
    http_handle.abort();

    Ok(())
}

async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut quit = signal(SignalKind::quit()).expect("install SIGQUIT handler");
    let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = quit.recv() => info!("received SIGQUIT"),
        _ = int.recv() => info!("received SIGINT"),
    }
}
