//! Live-socket test: a scripted client performs the auth exchange and
//! the realm handoff against real listeners on loopback.

use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use codec::{
    crypto::{Srp6Client, Srp6Server, StreamCipher},
    frame::{Frame, FrameDecoder, encode_frame},
    opcode::Opcode,
    packet::{
        self,
        auth::{ClientHelloAuth, ServerAuthAccepted, ServerHello},
        realm::{ClientHelloRealmTicket, ServerRealmInfo},
    },
};

use service::{AccountStore, RealmInfo, Service, ServiceOptions};

use wildstar_server::{config::Config, observer::Observer, router::Router, server};

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "hunter2";

async fn read_frame(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> Frame {
    loop {
        if let Some(frame) = decoder.decode().expect("well-formed server frame") {
            return frame;
        }

        let mut buf = [0u8; 4096];
        let size = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("server reply within budget")
            .expect("readable socket");
        assert_ne!(size, 0, "server closed early");
        decoder.extend(&buf[..size]);
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.listen = "127.0.0.1:0".parse().unwrap();
    config.realm.listen = "127.0.0.1:0".parse().unwrap();
    config.world.listen = "127.0.0.1:0".parse().unwrap();
    config
        .auth
        .static_credentials
        .insert(EMAIL.to_string(), PASSWORD.to_string());
    config
}

#[tokio::test]
async fn auth_and_realm_handoff_over_tcp() {
    let mut config = test_config();
    config.realm.messages = vec!["welcome to the test realm".to_string()];
    let config = Arc::new(config);

    let observer = Observer::new(&config);
    let service = Service::new(ServiceOptions {
        expected_build: config.limits.expected_build,
        realm: RealmInfo {
            id: config.realm.id,
            name: config.realm.name.clone(),
            realm_type: config.realm.realm_type.as_realm_type(),
            flags: config.realm.flags,
            note_text_id: config.realm.note_text_id,
            public_address: config.realm.public_address,
            public_port: config.realm.public_port,
            messages: config.realm.messages.clone(),
        },
        auth_limit: config.auth.rate_limit.as_limit(),
        max_speed: config.world.max_speed,
        max_character_level: config.world.max_character_level,
        stores: observer,
    });

    let router = Arc::new(Router::default());
    let bound = server::start(config.clone(), service.clone(), router)
        .await
        .expect("listeners bind on loopback");

    // --- auth service ---
    let mut stream = TcpStream::connect(bound.auth).await.unwrap();
    let mut decoder = FrameDecoder::default();

    let hello = read_frame(&mut stream, &mut decoder).await;
    assert_eq!(hello.opcode, u16::from(Opcode::ServerHello));
    let greeting = packet::decode::<ServerHello>(&hello.payload).unwrap();
    assert_eq!(greeting.expected_build, 16042);

    // Recreate the server's B from the account record and the process
    // seed, then present honest evidence.
    let account = service.stores().get_by_email(EMAIL).await.unwrap().unwrap();
    let srp = Srp6Server::new(EMAIL, &account.salt, &account.verifier, service.srp_seed());
    let client = Srp6Client::new(b"live-probe");
    let (public_key, client_proof, session_key) =
        client.evidence(EMAIL, PASSWORD, &account.salt, &srp.public_key());

    let mut wire = bytes::BytesMut::new();
    encode_frame(
        Opcode::ClientHelloAuth.into(),
        &packet::encode(&ClientHelloAuth {
            build: 16042,
            email: EMAIL.into(),
            public_key,
            client_proof,
        }),
        &mut wire,
    )
    .unwrap();
    stream.write_all(&wire).await.unwrap();

    let accepted = read_frame(&mut stream, &mut decoder).await;
    assert_eq!(accepted.opcode, u16::from(Opcode::ServerAuthAccepted));
    let accepted = packet::decode::<ServerAuthAccepted>(&accepted.payload).unwrap();

    assert!(Srp6Client::verify_server_proof(
        &public_key,
        &client_proof,
        &session_key,
        &accepted.server_proof
    ));

    // --- realm service ---
    let mut stream = TcpStream::connect(bound.realm).await.unwrap();
    let mut decoder = FrameDecoder::default();

    let hello = read_frame(&mut stream, &mut decoder).await;
    assert_eq!(hello.opcode, u16::from(Opcode::ServerHello));

    let mut wire = bytes::BytesMut::new();
    encode_frame(
        Opcode::ClientHelloAuth.into(),
        &packet::encode(&ClientHelloRealmTicket {
            build: 16042,
            email: EMAIL.into(),
            ticket: accepted.ticket,
        }),
        &mut wire,
    )
    .unwrap();
    stream.write_all(&wire).await.unwrap();

    // Three messages in one envelope, encrypted with the cipher both
    // sides derive from the presented ticket.
    let mut opener = StreamCipher::new(&accepted.ticket);

    let first = read_frame(&mut stream, &mut decoder).await;
    assert_eq!(first.opcode, u16::from(Opcode::ServerAuthAccepted));
    let mut body = first.payload.to_vec();
    opener.apply(&mut body);
    let realm_accept = packet::decode::<ServerAuthAccepted>(&body).unwrap();

    let second = read_frame(&mut stream, &mut decoder).await;
    assert_eq!(second.opcode, u16::from(Opcode::ServerRealmMessages));
    let mut body = second.payload.to_vec();
    opener.apply(&mut body);

    let third = read_frame(&mut stream, &mut decoder).await;
    assert_eq!(third.opcode, u16::from(Opcode::ServerRealmInfo));
    let mut body = third.payload.to_vec();
    opener.apply(&mut body);
    let info = packet::decode::<ServerRealmInfo>(&body).unwrap();

    assert_eq!(info.account_id, account.id);
    assert_eq!(info.session_key, realm_accept.ticket);
    assert_eq!(info.port, config.realm.public_port);

    // The realm closes after the handoff.
    let mut probe = [0u8; 1];
    let closed = timeout(Duration::from_secs(5), stream.read(&mut probe)).await;
    assert_eq!(closed.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn undersized_frame_drops_the_connection() {
    let config = Arc::new(test_config());
    let observer = Observer::new(&config);
    let service = Service::new(ServiceOptions {
        expected_build: config.limits.expected_build,
        realm: RealmInfo {
            id: 1,
            name: "Nexus".into(),
            realm_type: config.realm.realm_type.as_realm_type(),
            flags: 0,
            note_text_id: 0,
            public_address: config.realm.public_address,
            public_port: config.realm.public_port,
            messages: Vec::new(),
        },
        auth_limit: config.auth.rate_limit.as_limit(),
        max_speed: config.world.max_speed,
        max_character_level: config.world.max_character_level,
        stores: observer,
    });

    let router = Arc::new(Router::default());
    let bound = server::start(config, service, router).await.unwrap();

    let mut stream = TcpStream::connect(bound.auth).await.unwrap();
    let mut decoder = FrameDecoder::default();
    read_frame(&mut stream, &mut decoder).await;

    // size < 6 is transport-fatal; no reply, just a close.
    stream.write_all(&5u32.to_le_bytes()).await.unwrap();

    let mut probe = [0u8; 16];
    let closed = timeout(Duration::from_secs(5), stream.read(&mut probe)).await;
    assert_eq!(closed.unwrap().unwrap(), 0);
}
