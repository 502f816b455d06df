//! Maze Rush Server
//!
//! Wires the crypto primitives, secure datagram transport, session registry
//! and matchmaker together and serves until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use maze_rush::{
    BincodeCodec, ChaChaPolySymmetric, HmacSha256, InMemorySortedQueue, MatchmakingConfig,
    Matchmaker, Maze, RsaAsymmetric, SecureDatagramServer, SessionConfig, SessionRegistry,
    TransportConfig, VERSION,
};

/// Abandoned matchmaking buckets expire after this long.
const QUEUE_TTL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Maze Rush Server v{}", VERSION);

    // Fatal startup failures: key generation and the UDP bind.
    let asym = match RsaAsymmetric::generate() {
        Ok(asym) => Arc::new(asym),
        Err(e) => {
            error!(error = %e, "failed to generate server keypair");
            std::process::exit(1);
        }
    };

    let codec = Arc::new(BincodeCodec);
    let transport_config = TransportConfig::default();
    let server = match SecureDatagramServer::bind(
        transport_config,
        asym,
        Arc::new(ChaChaPolySymmetric),
        Arc::new(HmacSha256),
        codec.clone(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to bind udp socket");
            std::process::exit(1);
        }
    };
    info!(addr = %server.local_addr(), "transport ready");

    let registry = SessionRegistry::new(
        server.clone(),
        codec,
        Arc::new(|width, height| Maze::generate(width, height)),
        SessionConfig::default(),
    );
    server.set_authenticator(registry.clone());
    {
        let registry = registry.clone();
        server.set_request_handler(Arc::new(move |player, record_kind, body| {
            registry.on_client_request(player, record_kind, &body);
        }));
    }

    let queue = Arc::new(InMemorySortedQueue::with_ttl(QUEUE_TTL));
    let matchmaker = Matchmaker::new(queue, MatchmakingConfig::default());
    {
        let registry = registry.clone();
        matchmaker.set_match_handler(Arc::new(move |players| {
            if let Err(e) = registry.new_session(players) {
                error!(error = %e, "failed to start session for match");
            }
        }));
    }
    info!("matchmaking ready");

    let serve_task = tokio::spawn(server.clone().serve());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");

    registry.stop_all();
    // Give engines a moment to flush their final snapshots.
    tokio::time::sleep(Duration::from_secs(2)).await;
    server.stop().await;
    let _ = serve_task.await;
}
