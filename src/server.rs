//! The three TCP front doors and the per-connection task.
//!
//! One task per connection runs reads, dispatch and writes serially;
//! cross-connection traffic arrives through the router and is sealed
//! here with this connection's own cipher.

use std::{net::SocketAddr, sync::Arc, sync::atomic::Ordering, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};

use codec::{frame::FrameDecoder, opcode::ServiceKind};
use service::{
    Service, Stores,
    routing::{CloseReason, Output},
};

use crate::{
    config::Config,
    router::{Outbound, Router},
};

/// Where the three listeners actually bound; integration tests bind
/// port zero and read the result from here.
#[derive(Debug, Clone, Copy)]
pub struct Bound {
    pub auth: SocketAddr,
    pub realm: SocketAddr,
    pub world: SocketAddr,
}

pub async fn start<T: Stores>(
    config: Arc<Config>,
    service: Service<T>,
    router: Arc<Router>,
) -> Result<Bound> {
    let auth = TcpListener::bind(config.auth.listen).await?;
    let realm = TcpListener::bind(config.realm.listen).await?;
    let world = TcpListener::bind(config.world.listen).await?;

    let bound = Bound {
        auth: auth.local_addr()?,
        realm: realm.local_addr()?,
        world: world.local_addr()?,
    };

    for (kind, listener) in [
        (ServiceKind::Auth, auth),
        (ServiceKind::Realm, realm),
        (ServiceKind::World, world),
    ] {
        log::info!(
            "service listening: kind={:?}, addr={}",
            kind,
            listener.local_addr()?
        );

        tokio::spawn(listen(
            kind,
            listener,
            config.clone(),
            service.clone(),
            router.clone(),
        ));
    }

    Ok(bound)
}

async fn listen<T: Stores>(
    kind: ServiceKind,
    listener: TcpListener,
    config: Arc<Config>,
    service: Service<T>,
    router: Arc<Router>,
) {
    while let Ok((socket, addr)) = listener.accept().await {
        log::info!("socket accept: kind={kind:?}, addr={addr}");

        tokio::spawn(connection(
            kind,
            socket,
            addr,
            config.clone(),
            service.clone(),
            router.clone(),
        ));
    }

    log::error!("listener closed: kind={kind:?}");
}

/// Running totals logged at disconnect.
#[derive(Default)]
struct Counters {
    frames_in: u64,
    frames_out: u64,
    bytes_in: u64,
    bytes_out: u64,
}

async fn connection<T: Stores>(
    kind: ServiceKind,
    socket: TcpStream,
    addr: SocketAddr,
    config: Arc<Config>,
    service: Service<T>,
    router: Arc<Router>,
) {
    // Handshake messages are small and latency-sensitive.
    if let Err(err) = socket.set_nodelay(true) {
        log::error!("set nodelay failed: addr={addr}, err={err}");
    }

    let (connection_id, mut outbound, pending) = router.register().await;
    let mut dispatcher = service.get_dispatcher(kind, addr.ip(), connection_id);
    let mut decoder = FrameDecoder::new(config.limits.max_frame_bytes);
    let mut counters = Counters::default();
    let mut close_reason: Option<CloseReason> = None;

    let (mut reader, mut writer) = socket.into_split();

    if let Some(greeting) = dispatcher.greeting() {
        counters.frames_out += 1;
        counters.bytes_out += greeting.len() as u64;
        if writer.write_all(&greeting).await.is_err() {
            router.remove(connection_id).await;
            return;
        }
    }

    let pre_auth = Duration::from_secs(config.limits.idle_timeout_pre_auth_secs);
    let post_auth = Duration::from_secs(config.limits.idle_timeout_post_auth_secs);
    let frame_budget = Duration::from_secs(config.limits.frame_timeout_secs);

    'conn: loop {
        // A buffered partial frame gets the short budget; otherwise the
        // stage-appropriate idle budget applies.
        let read_budget = if decoder.buffered() > 0 {
            frame_budget
        } else if dispatcher.authenticated() {
            post_auth
        } else {
            pre_auth
        };

        tokio::select! {
            read = timeout(read_budget, reader.read_buf(decoder.writer())) => {
                let size = match read {
                    Err(_) => {
                        close_reason = Some(CloseReason::Idle);
                        break 'conn;
                    }
                    Ok(Err(_)) | Ok(Ok(0)) => break 'conn,
                    Ok(Ok(size)) => size,
                };
                counters.bytes_in += size as u64;

                loop {
                    let frame = match decoder.decode() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(err) => {
                            close_reason = Some(match err {
                                codec::Error::FrameTooLarge(_) => CloseReason::OversizedFrame,
                                _ => CloseReason::PacketTooShort,
                            });
                            break 'conn;
                        }
                    };

                    counters.frames_in += 1;
                    let output = dispatcher.dispatch(&frame).await;
                    if flush(&mut writer, &output, &mut counters).await.is_err() {
                        break 'conn;
                    }

                    for (target, reply) in output.pushes {
                        router
                            .send(target, reply, config.limits.max_write_queue_bytes)
                            .await;
                    }
                    for stale in output.evict {
                        router.shutdown(stale, CloseReason::InvalidSession).await;
                    }

                    if output.close.is_some() {
                        close_reason = output.close;
                        break 'conn;
                    }
                }
            }

            pushed = outbound.recv() => {
                match pushed {
                    None => break 'conn,
                    Some(Outbound::Shutdown(reason)) => {
                        close_reason = Some(reason);
                        break 'conn;
                    }
                    Some(Outbound::Message(reply)) => {
                        let cost = reply.payload.len() + codec::frame::HEADER_SIZE * 2;
                        let sealed = dispatcher.seal_push(&reply);
                        pending.fetch_sub(cost, Ordering::Relaxed);

                        if let Some(bytes) = sealed {
                            counters.frames_out += 1;
                            counters.bytes_out += bytes.len() as u64;
                            if writer.write_all(&bytes).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                }
            }
        }
    }

    // Cooperative teardown: registry first, then the zone hears about
    // it, then the channel goes away.
    let output = dispatcher.teardown().await;
    for (target, reply) in output.pushes {
        router
            .send(target, reply, config.limits.max_write_queue_bytes)
            .await;
    }
    router.remove(connection_id).await;

    log::info!(
        "socket disconnect: kind={:?}, addr={}, reason={}, frames_in={}, frames_out={}, bytes_in={}, bytes_out={}",
        kind,
        addr,
        close_reason.map(|r| r.as_str()).unwrap_or("peer_closed"),
        counters.frames_in,
        counters.frames_out,
        counters.bytes_in,
        counters.bytes_out,
    );
}

async fn flush(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    output: &Output,
    counters: &mut Counters,
) -> std::io::Result<()> {
    if output.bytes.is_empty() {
        return Ok(());
    }

    counters.frames_out += 1;
    counters.bytes_out += output.bytes.len() as u64;
    writer.write_all(&output.bytes).await
}
