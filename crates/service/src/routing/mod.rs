//! Opcode dispatch and the reply fabric.
//!
//! One [`Dispatcher`] per connection. It owns the connection's session
//! and cipher pair, unwraps the three client envelopes, routes inner
//! messages to the handler for `(service, opcode)`, and serializes the
//! returned directive under the envelope the handler chose.
//!
//! Handlers run against a proposed clone of the session; the clone is
//! adopted only when the handler succeeds, so a failing handler never
//! leaves half-applied session state behind.

mod auth;
mod realm;
mod world;

pub mod response;

pub use response::{CloseReason, Directive, Envelope, Outcome, Reply};

use bytes::BytesMut;

use codec::{
    crypto::{CipherPair, SESSION_KEY_SIZE},
    frame::{self, Frame},
    opcode::{Opcode, ServiceKind},
    packet::{auth::ServerHello, entity::ServerEntityDestroy},
};

use crate::{
    RealmInfo, Service, StoreError, Stores,
    limiter::RateLimiter,
    session::{
        AuthStage, RealmStage, Session, Stage, StageError, entity::HandleAllocator,
        registry::SessionRegistry,
    },
};

/// Everything a handler may touch, borrowed for one invocation.
pub(crate) struct Context<'a, T> {
    pub stores: &'a T,
    pub realm: &'a RealmInfo,
    pub expected_build: u32,
    pub max_speed: f32,
    pub max_character_level: u32,
    pub registry: &'a SessionRegistry,
    pub limiter: &'a RateLimiter,
    pub handles: &'a HandleAllocator,
    pub srp_seed: &'a [u8; SESSION_KEY_SIZE],
    pub session: &'a mut Session,
}

/// Why a handler did not produce an outcome. Everything except `Fatal`
/// drops the frame and keeps the connection.
#[derive(Debug)]
pub enum HandlerError {
    Decode(codec::Error),
    Store(StoreError),
    Stage(StageError),
    MissingState(&'static str),
    Fatal(CloseReason),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(err) => write!(f, "decode: {err}"),
            Self::Store(err) => write!(f, "store: {err}"),
            Self::Stage(err) => write!(f, "{err}"),
            Self::MissingState(what) => write!(f, "missing state: {what}"),
            Self::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

impl From<codec::Error> for HandlerError {
    fn from(err: codec::Error) -> Self {
        Self::Decode(err)
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<StageError> for HandlerError {
    fn from(err: StageError) -> Self {
        Self::Stage(err)
    }
}

/// What one inbound frame (or teardown) produced: wire bytes for this
/// connection, messages for other connections, stale connections to
/// close, and possibly a close for this one.
#[derive(Default)]
pub struct Output {
    pub bytes: BytesMut,
    /// `(connection id, message)`; sealed by the recipient's own task.
    pub pushes: Vec<(u64, Reply)>,
    pub evict: Vec<u64>,
    pub close: Option<CloseReason>,
}

enum Unwrapped {
    Message(Opcode, Vec<u8>),
    Drop,
    Fatal(CloseReason),
}

pub struct Dispatcher<T> {
    service: Service<T>,
    session: Session,
    cipher: Option<CipherPair>,
}

impl<T: Stores> Dispatcher<T> {
    pub(crate) fn new(service: Service<T>, session: Session) -> Self {
        Self {
            service,
            session,
            cipher: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether the post-auth idle budget applies yet.
    pub fn authenticated(&self) -> bool {
        self.session.account_id().is_some()
    }

    /// The unencrypted greeting pushed on accept. The world service
    /// stays quiet; its client speaks first.
    pub fn greeting(&mut self) -> Option<BytesMut> {
        let (next, connection_type) = match self.session.service {
            ServiceKind::Auth => (Stage::Auth(AuthStage::Greeted), 0),
            ServiceKind::Realm => (Stage::Realm(RealmStage::Greeted), 1),
            ServiceKind::World => return None,
        };

        let hello = ServerHello {
            expected_build: self.service.inner.expected_build,
            connection_type,
        };

        let mut dst = BytesMut::new();
        let reply = Reply::packet(&hello);
        if !self.seal(&reply, Envelope::Plain, &mut dst) {
            return None;
        }

        if let Err(err) = self.session.stage.advance_to(next) {
            log::error!("greeting stage fault: {err}");
        }
        Some(dst)
    }

    /// Process one inbound frame in arrival order.
    pub async fn dispatch(&mut self, frame: &Frame) -> Output {
        let mut output = Output::default();

        let (opcode, payload) = match self.unwrap(frame) {
            Unwrapped::Message(opcode, payload) => (opcode, payload),
            Unwrapped::Drop => return output,
            Unwrapped::Fatal(reason) => {
                output.close = Some(reason);
                return output;
            }
        };

        let mut proposed = self.session.clone();
        let result = {
            let inner = &self.service.inner;
            let mut ctx = Context {
                stores: &inner.stores,
                realm: &inner.realm,
                expected_build: inner.expected_build,
                max_speed: inner.max_speed,
                max_character_level: inner.max_character_level,
                registry: &inner.registry,
                limiter: &inner.limiter,
                handles: &inner.handles,
                srp_seed: &inner.srp_seed,
                session: &mut proposed,
            };
            invoke(&mut ctx, opcode, &payload).await
        };

        match result {
            Ok(outcome) => {
                self.session = proposed;
                self.apply(outcome, &mut output);
            }
            Err(HandlerError::Fatal(reason)) => {
                log::warn!(
                    "connection fault: peer={}, opcode={:?}, reason={}",
                    self.session.peer_ip,
                    opcode,
                    reason
                );
                output.close = Some(reason);
            }
            Err(err) => {
                log::debug!(
                    "frame dropped: peer={}, opcode={:?}, err={}",
                    self.session.peer_ip,
                    opcode,
                    err
                );
            }
        }

        output
    }

    /// Seal a message pushed from another connection; world traffic, so
    /// always the encrypted envelope. Dropped silently before the
    /// session cipher exists.
    pub fn seal_push(&mut self, reply: &Reply) -> Option<BytesMut> {
        self.cipher.as_ref()?;

        let mut dst = BytesMut::new();
        self.seal(reply, Envelope::WorldEncrypted, &mut dst)
            .then_some(dst)
    }

    /// Cooperative close: drop the registry entry (and its views), tell
    /// the zone, persist the last position.
    pub async fn teardown(&mut self) -> Output {
        let mut output = Output::default();

        if self.session.service != ServiceKind::World {
            return output;
        }
        let Some(account_id) = self.session.account_id() else {
            return output;
        };

        let inner = &self.service.inner;
        let owns_entry = inner
            .registry
            .lookup_by_account(account_id)
            .is_some_and(|entry| entry.connection_id == self.session.connection_id);

        if owns_entry {
            if let Some(entry) = inner.registry.unregister(account_id) {
                if let (Some(zone), Some(handle)) = (entry.zone, entry.entity) {
                    let destroy = Reply::packet(&ServerEntityDestroy {
                        guid: handle.guid(),
                        reason: 0,
                    });
                    for other in inner.registry.list_in_zone(zone) {
                        output.pushes.push((other.connection_id, destroy.clone()));
                    }
                }
            }
        }

        if let (Some(character), Some(position)) = (&self.session.character, self.session.position)
        {
            if let Err(err) = inner
                .stores
                .update_position(character.id, position, self.session.yaw)
                .await
            {
                log::warn!(
                    "last position not persisted: character={}, err={}",
                    character.id,
                    err
                );
            }
        }

        self.session.clear_world_state();
        output
    }

    fn apply(&mut self, outcome: Outcome, output: &mut Output) {
        if let Some(material) = outcome.install_cipher {
            // The cipher is installed at most once per service.
            debug_assert!(self.cipher.is_none(), "session cipher replaced");
            self.cipher = Some(CipherPair::new(&material));
        }

        let sealed = match outcome.directive {
            Directive::Ignore => true,
            Directive::Reply(reply, envelope) => self.seal(&reply, envelope, &mut output.bytes),
            Directive::ReplyMany(replies, envelope) => replies
                .iter()
                .all(|reply| self.seal(reply, envelope, &mut output.bytes)),
        };
        if !sealed {
            output.close = Some(CloseReason::CryptoFault);
            return;
        }

        for (account_id, reply) in outcome.broadcasts {
            if let Some(entry) = self.service.inner.registry.lookup_by_account(account_id) {
                output.pushes.push((entry.connection_id, reply));
            }
        }

        if let Some(connection_id) = outcome.evict_connection {
            output.evict.push(connection_id);
        }

        if output.close.is_none() {
            output.close = outcome.hangup;
        }
    }

    fn seal(&mut self, reply: &Reply, envelope: Envelope, dst: &mut BytesMut) -> bool {
        match envelope {
            Envelope::Plain => {
                frame::encode_frame(reply.opcode.into(), &reply.payload, dst).is_ok()
            }
            Envelope::AuthEncrypted => {
                let Some(cipher) = self.cipher.as_mut() else {
                    log::error!("auth envelope without a session cipher");
                    return false;
                };

                let mut body = reply.payload.clone();
                cipher.send.apply(&mut body);
                frame::encode_frame(reply.opcode.into(), &body, dst).is_ok()
            }
            Envelope::WorldEncrypted => {
                let Some(cipher) = self.cipher.as_mut() else {
                    log::error!("world envelope without a session cipher");
                    return false;
                };

                let mut inner = frame::encode_inner(reply.opcode.into(), &reply.payload);
                cipher.send.apply(&mut inner);
                frame::encode_frame(Opcode::ServerEncrypted.into(), &inner, dst).is_ok()
            }
        }
    }

    /// Resolve the three client envelopes down to one inner message.
    /// Recursion is bounded: an encrypted body may carry one packed
    /// layer, nothing may carry another encrypted layer.
    fn unwrap(&mut self, frame: &Frame) -> Unwrapped {
        let opcode = match Opcode::lookup(frame.opcode) {
            Ok(opcode) => opcode,
            Err(_) => {
                log::warn!(
                    "unknown opcode: peer={}, raw={:#06x}",
                    self.session.peer_ip,
                    frame.opcode
                );
                return Unwrapped::Drop;
            }
        };

        match opcode {
            Opcode::ClientEncrypted => {
                let Some(cipher) = self.cipher.as_mut() else {
                    return Unwrapped::Fatal(CloseReason::CryptoFault);
                };

                let mut body = frame.payload.to_vec();
                cipher.recv.apply(&mut body);

                let (raw, payload) = match frame::decode_inner(&body) {
                    Ok(inner) => inner,
                    Err(_) => return Unwrapped::Fatal(CloseReason::CryptoFault),
                };

                Self::finish_inner(raw, payload, true)
            }
            Opcode::ClientPacked => match frame::decode_packed(&frame.payload) {
                Ok((raw, payload)) => Self::finish_inner(raw, payload, false),
                Err(_) => Unwrapped::Fatal(CloseReason::PacketTooShort),
            },
            Opcode::ClientPackedWorld => match frame::decode_packed_world(&frame.payload) {
                Ok((_tag, raw, payload)) => Self::finish_inner(raw, payload, false),
                Err(_) => Unwrapped::Fatal(CloseReason::PacketTooShort),
            },
            other => Unwrapped::Message(other, frame.payload.to_vec()),
        }
    }

    fn finish_inner(raw: u16, payload: &[u8], decrypted: bool) -> Unwrapped {
        let opcode = match Opcode::lookup(raw) {
            Ok(opcode) => opcode,
            // A decrypt that surfaces an unknown opcode means the
            // stream state is garbage.
            Err(_) if decrypted => return Unwrapped::Fatal(CloseReason::CryptoFault),
            Err(_) => {
                log::warn!("unknown packed opcode: raw={raw:#06x}");
                return Unwrapped::Drop;
            }
        };

        match opcode {
            Opcode::ClientEncrypted => Unwrapped::Fatal(CloseReason::CryptoFault),
            Opcode::ClientPacked if decrypted => match frame::decode_packed(payload) {
                Ok((inner_raw, inner_payload)) => Self::finish_packed(inner_raw, inner_payload),
                Err(_) => Unwrapped::Fatal(CloseReason::CryptoFault),
            },
            Opcode::ClientPackedWorld if decrypted => match frame::decode_packed_world(payload) {
                Ok((_tag, inner_raw, inner_payload)) => {
                    Self::finish_packed(inner_raw, inner_payload)
                }
                Err(_) => Unwrapped::Fatal(CloseReason::CryptoFault),
            },
            Opcode::ClientPacked | Opcode::ClientPackedWorld => {
                Unwrapped::Fatal(CloseReason::PacketTooShort)
            }
            other => Unwrapped::Message(other, payload.to_vec()),
        }
    }

    fn finish_packed(raw: u16, payload: &[u8]) -> Unwrapped {
        match Opcode::lookup(raw) {
            Ok(Opcode::ClientEncrypted | Opcode::ClientPacked | Opcode::ClientPackedWorld) => {
                Unwrapped::Fatal(CloseReason::CryptoFault)
            }
            Ok(opcode) => Unwrapped::Message(opcode, payload.to_vec()),
            Err(_) => Unwrapped::Fatal(CloseReason::CryptoFault),
        }
    }
}

async fn invoke<T: Stores>(
    ctx: &mut Context<'_, T>,
    opcode: Opcode,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    match (ctx.session.service, opcode) {
        (ServiceKind::Auth, Opcode::ClientHelloAuth) => auth::hello(ctx, payload).await,
        (ServiceKind::Realm, Opcode::ClientHelloAuth) => realm::hello(ctx, payload).await,
        (ServiceKind::World, Opcode::ClientHelloRealm) => world::hello(ctx, payload).await,
        (ServiceKind::World, Opcode::ClientCharacterList) => {
            world::character_list(ctx, payload).await
        }
        (ServiceKind::World, Opcode::ClientCharacterCreate) => {
            world::character_create(ctx, payload).await
        }
        (ServiceKind::World, Opcode::ClientCharacterDelete) => {
            world::character_delete(ctx, payload).await
        }
        (ServiceKind::World, Opcode::ClientCharacterSelect) => {
            world::character_select(ctx, payload).await
        }
        (ServiceKind::World, Opcode::ClientEnteredWorld) => {
            world::entered_world(ctx, payload).await
        }
        (ServiceKind::World, Opcode::ClientRealmSelect) => world::realm_select(ctx, payload).await,
        (ServiceKind::World, Opcode::ClientLogoutRequest) => {
            world::logout_request(ctx, payload).await
        }
        (ServiceKind::World, Opcode::ClientPregameKeepAlive) => world::keepalive(ctx, payload),
        (ServiceKind::World, Opcode::ClientEntityCommand) => {
            world::entity_command(ctx, payload).await
        }
        (ServiceKind::World, Opcode::ClientChat) => world::chat(ctx, payload).await,
        (ServiceKind::World, Opcode::ClientEmote) => world::emote(ctx, payload).await,
        (ServiceKind::World, Opcode::ClientPing) => world::ping(ctx, payload),
        (service, opcode) => {
            log::debug!("no handler: service={service:?}, opcode={opcode:?}");
            Ok(Outcome::ignore())
        }
    }
}
