//! Scripted end-to-end demo: boots the full stack on loopback, matches two
//! players, handshakes as one of them and plays a move.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use maze_rush::codec::{
    record_type, Action, BincodeCodec, GameCodec, GameState, Handshake, WireCodec,
};
use maze_rush::crypto::{asym::encrypt_for, ChaChaPolySymmetric, HmacSha256, RsaAsymmetric, Symmetric};
use maze_rush::game::Direction;
use maze_rush::{
    InMemorySortedQueue, MatchmakingConfig, Matchmaker, Maze, SecureDatagramServer, SessionConfig,
    SessionRegistry, TransportConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Server side: transport + registry + matchmaker, all on loopback.
    let codec = Arc::new(BincodeCodec);
    let server = SecureDatagramServer::bind(
        TransportConfig {
            bind_addr: "127.0.0.1:0".parse()?,
            ..Default::default()
        },
        Arc::new(RsaAsymmetric::generate()?),
        Arc::new(ChaChaPolySymmetric),
        Arc::new(HmacSha256),
        codec.clone(),
    )
    .await?;

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

    let matchmaker = Matchmaker::new(
        Arc::new(InMemorySortedQueue::new()),
        MatchmakingConfig::default(),
    );
    {
        let registry = registry.clone();
        matchmaker.set_match_handler(Arc::new(move |players| {
            let _ = registry.new_session(players);
        }));
    }

    tokio::spawn(server.clone().serve());

    // Two players of equal rank and latency form a match.
    let me = Uuid::new_v4();
    let rival = Uuid::new_v4();
    matchmaker.enqueue(me, 10, 20).await?;
    matchmaker.enqueue(rival, 10, 20).await?;

    while registry.session_of(&me).is_none() {
        sleep(Duration::from_millis(10)).await;
    }
    println!("Matched into session {:?}", registry.session_of(&me).unwrap());

    let (public_key, server_addr) = registry.session_info(&me)?;
    println!("Handshaking with {}", server_addr);

    // Client side: cookie handshake.
    let sym = ChaChaPolySymmetric;
    let codec = BincodeCodec;
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let key: Vec<u8> = (0u8..32).collect();
    let random: Vec<u8> = (100u8..116).collect();
    let mut buf = [0u8; 4096];

    let first = Handshake {
        random: random.clone(),
        key: key.clone(),
        ..Default::default()
    };
    send_hello(&socket, &codec, &public_key, server_addr, &first).await?;

    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    assert_eq!(buf[0], record_type::HELLO_VERIFY);
    let verify = codec.unmarshal_handshake(&sym.decrypt(&buf[1..len], &key)?)?;
    println!("Got cookie ({} bytes)", verify.cookie.len());

    let second = Handshake {
        random,
        key: key.clone(),
        cookie: verify.cookie,
        token: sym.encrypt(me.as_bytes(), &key)?,
        ..Default::default()
    };
    send_hello(&socket, &codec, &public_key, server_addr, &second).await?;

    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    assert_eq!(buf[0], record_type::SERVER_HELLO);
    let hello = codec.unmarshal_handshake(&sym.decrypt(&buf[1..len], &key)?)?;
    let session_id = hello.session_id;
    println!("Registered, session id is {} bytes", session_id.len());

    // Ask for the opening state.
    send_record(&socket, &sym, &key, &session_id, server_addr, record_type::STATE_REQUEST, &[])
        .await?;
    let state = recv_state(&socket, &sym, &codec, &key, &mut buf).await?;
    println!("State v{} with {} players:", state.version, state.players.len());
    print!("{}", state.maze);

    // Play the first legal move out of our corner.
    let my_pos = state
        .players
        .iter()
        .find(|p| p.id == me)
        .map(|p| p.pos)
        .expect("we are in the match");
    let direction = Direction::ALL
        .into_iter()
        .find(|&d| state.maze.valid_move(my_pos, d).is_ok())
        .expect("spanning maze always has an exit");
    println!("Moving {:?} from {:?}", direction, my_pos);

    let action = Action {
        player_id: me,
        from: my_pos,
        direction,
    };
    let body = codec.marshal_action(&action)?;
    send_record(&socket, &sym, &key, &session_id, server_addr, record_type::MOVE, &body).await?;

    let state = recv_state(&socket, &sym, &codec, &key, &mut buf).await?;
    let my_reward = state.players.iter().find(|p| p.id == me).unwrap().reward;
    println!("State v{}, my reward is now {}", state.version, my_reward);

    registry.stop_all();
    sleep(Duration::from_millis(200)).await;
    server.stop().await;
    Ok(())
}

async fn send_hello(
    socket: &UdpSocket,
    codec: &BincodeCodec,
    public_key: &[u8],
    server_addr: std::net::SocketAddr,
    hello: &Handshake,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = codec.marshal_handshake(hello)?;
    let sealed = encrypt_for(public_key, &payload)?;
    let mut message = vec![record_type::CLIENT_HELLO];
    message.extend_from_slice(&sealed);
    socket.send_to(&message, server_addr).await?;
    Ok(())
}

async fn send_record(
    socket: &UdpSocket,
    sym: &ChaChaPolySymmetric,
    key: &[u8],
    session_id: &[u8],
    server_addr: std::net::SocketAddr,
    record_kind: u8,
    body: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut plain = session_id.to_vec();
    plain.extend_from_slice(body);
    let sealed = sym.encrypt(&plain, key)?;
    let mut message = vec![record_kind];
    message.extend_from_slice(&sealed);
    socket.send_to(&message, server_addr).await?;
    Ok(())
}

async fn recv_state(
    socket: &UdpSocket,
    sym: &ChaChaPolySymmetric,
    codec: &BincodeCodec,
    key: &[u8],
    buf: &mut [u8],
) -> Result<GameState, Box<dyn std::error::Error>> {
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(buf)).await??;
    assert_eq!(buf[0], record_type::GAME_STATE);
    let payload = sym.decrypt(&buf[1..len], key)?;
    Ok(codec.unmarshal_game_state(&payload)?)
}
