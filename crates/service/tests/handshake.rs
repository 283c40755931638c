//! End-to-end handshake scenarios driven through the dispatcher with
//! in-memory stores: auth, realm handoff, world install, character
//! flow, and the envelope edge cases.

use std::{collections::HashMap, net::IpAddr, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use pollster::FutureExt;

use codec::{
    crypto::{self, Srp6Client, Srp6Server, StreamCipher, TICKET_SIZE},
    frame::{self, Frame, FrameDecoder},
    opcode::{Opcode, ServiceKind},
    packet::{
        self, Position,
        auth::{AuthResult, ClientHelloAuth, ServerAuthAccepted, ServerAuthDenied},
        character::{
            CharacterCreateResult, ClientCharacterCreate, ClientCharacterList,
            ClientCharacterSelect, ServerCharacterCreate,
        },
        realm::{ClientHelloRealmTicket, ClientRealmSelect, ServerRealmInfo},
        social::{ClientChat, ClientPing, ServerChat, ServerPing},
        world::{ClientEnteredWorld, ClientHelloRealm, ClientPregameKeepAlive},
    },
};

use wildstar_server_service::{
    Account, AccountStore, Character, CharacterAttrs, CharacterCreateError, CharacterStore,
    CreationTemplate, Item, RealmInfo, Service, ServiceOptions, SessionValidity, StaticData,
    StoreError, Suspension, WorldLocation,
    limiter::RateLimit,
    routing::{CloseReason, Dispatcher, Output},
};

use codec::packet::{character::GearVisual, realm::RealmType};

const BUILD: u32 = 16042;
const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "hunter2";

#[derive(Default)]
struct MemState {
    accounts: Vec<Account>,
    suspensions: HashMap<u64, Suspension>,
    characters: Vec<Character>,
    next_character_id: u64,
}

struct MemStores {
    state: Mutex<MemState>,
}

impl MemStores {
    fn with_account(email: &str, password: &str) -> Self {
        let salt = [7u8; crypto::SALT_SIZE];
        let verifier = crypto::compute_verifier(email, password, &salt);

        Self {
            state: Mutex::new(MemState {
                accounts: vec![Account {
                    id: 1,
                    email: email.to_string(),
                    salt: salt.to_vec(),
                    verifier: verifier.to_vec(),
                    ticket: None,
                    signature: false,
                }],
                next_character_id: 100,
                ..MemState::default()
            }),
        }
    }

    fn add_account(&self, id: u64, email: &str, password: &str) {
        let salt = [7u8; crypto::SALT_SIZE];
        let verifier = crypto::compute_verifier(email, password, &salt);
        self.state.lock().accounts.push(Account {
            id,
            email: email.to_string(),
            salt: salt.to_vec(),
            verifier: verifier.to_vec(),
            ticket: None,
            signature: false,
        });
    }

    fn suspend(&self, account_id: u64, suspension: Suspension) {
        self.state.lock().suspensions.insert(account_id, suspension);
    }

    fn stored_ticket(&self, account_id: u64) -> Option<[u8; TICKET_SIZE]> {
        let state = self.state.lock();
        let hex = state
            .accounts
            .iter()
            .find(|a| a.id == account_id)?
            .ticket
            .clone()?;
        let raw = hex::decode(hex).ok()?;
        raw.try_into().ok()
    }
}

#[async_trait]
impl AccountStore for MemStores {
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .state
            .lock()
            .accounts
            .iter()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn validate_session(
        &self,
        email: &str,
        ticket: &[u8; TICKET_SIZE],
        account_id: u64,
    ) -> Result<SessionValidity, StoreError> {
        let state = self.state.lock();
        let Some(account) = state.accounts.iter().find(|a| a.email == email) else {
            return Ok(SessionValidity::NotFound);
        };
        if account.id != account_id {
            return Ok(SessionValidity::AccountMismatch);
        }
        match &account.ticket {
            Some(stored) if *stored == hex::encode(ticket) => Ok(SessionValidity::Valid),
            Some(_) => Ok(SessionValidity::Expired),
            None => Ok(SessionValidity::NotFound),
        }
    }

    async fn update_ticket(
        &self,
        account_id: u64,
        ticket: &[u8; TICKET_SIZE],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or(StoreError::Unavailable)?;
        account.ticket = Some(hex::encode(ticket));
        Ok(())
    }

    async fn check_suspension(&self, account_id: u64) -> Result<Suspension, StoreError> {
        Ok(self
            .state
            .lock()
            .suspensions
            .get(&account_id)
            .copied()
            .unwrap_or(Suspension::Clear))
    }
}

#[async_trait]
impl CharacterStore for MemStores {
    async fn list_for(&self, account_id: u64, realm_id: u32) -> Result<Vec<Character>, StoreError> {
        Ok(self
            .state
            .lock()
            .characters
            .iter()
            .filter(|c| c.account_id == account_id && c.realm_id == realm_id)
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        account_id: u64,
        attrs: CharacterAttrs,
    ) -> Result<Character, CharacterCreateError> {
        let mut state = self.state.lock();

        let lowered = attrs.name.to_lowercase();
        if state.characters.iter().any(|c| c.name.to_lowercase() == lowered) {
            return Err(CharacterCreateError::NameTaken);
        }

        state.next_character_id += 1;
        let character = Character {
            id: state.next_character_id,
            account_id,
            realm_id: 1,
            name: attrs.name,
            sex: attrs.sex,
            race: attrs.race,
            class: attrs.class,
            faction: attrs.faction,
            path: attrs.path,
            level: 1,
            world_id: attrs.world_id,
            position: attrs.position,
            yaw: attrs.yaw,
            gear: attrs.gear,
            bones: attrs.bones,
            days_since_last_online: 0.0,
        };
        state.characters.push(character.clone());
        Ok(character)
    }

    async fn get_owned(
        &self,
        account_id: u64,
        character_id: u64,
    ) -> Result<Option<Character>, StoreError> {
        Ok(self
            .state
            .lock()
            .characters
            .iter()
            .find(|c| c.id == character_id && c.account_id == account_id)
            .cloned())
    }

    async fn update_last_online(&self, _character_id: u64) -> Result<(), StoreError> {
        Ok(())
    }

    async fn update_position(
        &self,
        character_id: u64,
        position: Position,
        yaw: f32,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(character) = state.characters.iter_mut().find(|c| c.id == character_id) {
            character.position = position;
            character.yaw = yaw;
        }
        Ok(())
    }

    async fn delete(&self, account_id: u64, character_id: u64) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let before = state.characters.len();
        state
            .characters
            .retain(|c| !(c.id == character_id && c.account_id == account_id));
        Ok(state.characters.len() < before)
    }
}

impl StaticData for MemStores {
    fn character_creation_template(&self, id: u32) -> Option<CreationTemplate> {
        (id == 5).then(|| CreationTemplate {
            id: 5,
            race: 1,
            class: 2,
            sex: 0,
            faction: 166,
            path: 0,
            world_id: 870,
            position: Position {
                x: 4074.0,
                y: -797.0,
                z: -2399.0,
            },
            yaw: 0.0,
            starting_items: vec![9001],
        })
    }

    fn item(&self, id: u32) -> Option<Item> {
        (id == 9001).then_some(Item {
            id: 9001,
            slot: 2,
            display_id: 7777,
        })
    }

    fn world_location(&self, _id: u32) -> Option<WorldLocation> {
        None
    }

    fn compute_visuals(
        &self,
        _race: u32,
        _sex: u8,
        labels: &[u32],
        _values: &[u32],
    ) -> Vec<GearVisual> {
        labels
            .iter()
            .map(|label| GearVisual {
                slot: *label,
                display_id: 100 + label,
            })
            .collect()
    }
}

fn service_with(stores: MemStores) -> Service<MemStores> {
    Service::new(ServiceOptions {
        expected_build: BUILD,
        realm: RealmInfo {
            id: 1,
            name: "Nexus".into(),
            realm_type: RealmType::Pve,
            flags: 0,
            note_text_id: 0,
            public_address: "127.0.0.1".parse().unwrap(),
            public_port: 24000,
            messages: vec!["welcome".into()],
        },
        auth_limit: RateLimit {
            window: Duration::from_secs(60),
            count: 5,
        },
        max_speed: 30.0,
        max_character_level: 50,
        stores,
    })
}

fn peer(last: u8) -> IpAddr {
    IpAddr::from([203, 0, 113, last])
}

fn plain_frame<P: packet::Packet>(p: &P) -> Frame {
    Frame {
        opcode: P::OPCODE.into(),
        payload: packet::encode(p).into(),
    }
}

/// Wrap a packet the way the client does post-install: inner frame,
/// encrypted, inside `ClientEncrypted`.
fn encrypted_frame<P: packet::Packet>(p: &P, cipher: &mut StreamCipher) -> Frame {
    let mut inner = frame::encode_inner(P::OPCODE.into(), &packet::encode(p));
    cipher.apply(&mut inner);
    Frame {
        opcode: Opcode::ClientEncrypted.into(),
        payload: inner.into(),
    }
}

/// Split an output byte run back into frames.
fn frames_of(output: &Output) -> Vec<Frame> {
    let mut decoder = FrameDecoder::default();
    decoder.extend(&output.bytes);
    std::iter::from_fn(|| decoder.decode().expect("well-formed output")).collect()
}

fn auth_hello_for(service: &Service<MemStores>, email: &str, password: &str) -> ClientHelloAuth {
    let salt = [7u8; crypto::SALT_SIZE];
    let verifier = crypto::compute_verifier(email, password, &salt);
    let server = Srp6Server::new(email, &salt, &verifier, service.srp_seed());

    let client = Srp6Client::new(b"test-client");
    let (public_key, client_proof, _key) =
        client.evidence(email, password, &salt, &server.public_key());

    ClientHelloAuth {
        build: BUILD,
        email: email.into(),
        public_key,
        client_proof,
    }
}

fn auth_hello(service: &Service<MemStores>) -> ClientHelloAuth {
    auth_hello_for(service, EMAIL, PASSWORD)
}

/// Run the full auth exchange, returning the issued ticket.
fn authenticate_as(
    service: &Service<MemStores>,
    connection_id: u64,
    email: &str,
    password: &str,
) -> [u8; TICKET_SIZE] {
    let mut dispatcher = service.get_dispatcher(ServiceKind::Auth, peer(1), connection_id);

    let greeting = dispatcher.greeting().expect("auth greets on accept");
    let mut decoder = FrameDecoder::default();
    decoder.extend(&greeting);
    let hello = decoder.decode().unwrap().unwrap();
    assert_eq!(hello.opcode, u16::from(Opcode::ServerHello));

    let output = dispatcher
        .dispatch(&plain_frame(&auth_hello_for(service, email, password)))
        .block_on();
    assert_eq!(output.close, None);

    let frames = frames_of(&output);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, u16::from(Opcode::ServerAuthAccepted));

    let accepted = packet::decode::<ServerAuthAccepted>(&frames[0].payload).unwrap();
    assert_ne!(accepted.ticket, [0u8; TICKET_SIZE]);
    accepted.ticket
}

fn authenticate(service: &Service<MemStores>, connection_id: u64) -> [u8; TICKET_SIZE] {
    authenticate_as(service, connection_id, EMAIL, PASSWORD)
}

#[test]
fn s1_successful_auth() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let mut dispatcher = service.get_dispatcher(ServiceKind::Auth, peer(1), 1);
    dispatcher.greeting().unwrap();

    let salt = [7u8; crypto::SALT_SIZE];
    let verifier = crypto::compute_verifier(EMAIL, PASSWORD, &salt);
    let server = Srp6Server::new(EMAIL, &salt, &verifier, service.srp_seed());
    let client = Srp6Client::new(b"test-client");
    let (public_key, client_proof, session_key) =
        client.evidence(EMAIL, PASSWORD, &salt, &server.public_key());

    let output = dispatcher
        .dispatch(&plain_frame(&ClientHelloAuth {
            build: BUILD,
            email: EMAIL.into(),
            public_key,
            client_proof,
        }))
        .block_on();

    let frames = frames_of(&output);
    let accepted = packet::decode::<ServerAuthAccepted>(&frames[0].payload).unwrap();

    // The server proof verifies against the client transcript, and the
    // ticket is fresh CSPRNG output.
    assert!(Srp6Client::verify_server_proof(
        &public_key,
        &client_proof,
        &session_key,
        &accepted.server_proof
    ));
    assert_ne!(accepted.ticket, [0u8; TICKET_SIZE]);

    // The same ticket got persisted, hex-encoded.
    assert_eq!(service.stores().stored_ticket(1), Some(accepted.ticket));
}

fn expect_denied(output: &Output, result: AuthResult) {
    let frames = frames_of(output);
    assert_eq!(frames.len(), 1);
    let denied = packet::decode::<ServerAuthDenied>(&frames[0].payload).unwrap();
    assert_eq!(denied.result, result);
}

#[test]
fn s2_wrong_build_is_version_mismatch() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let mut dispatcher = service.get_dispatcher(ServiceKind::Auth, peer(1), 1);
    dispatcher.greeting().unwrap();

    let mut hello = auth_hello(&service);
    hello.build = 99_999;

    let output = dispatcher.dispatch(&plain_frame(&hello)).block_on();
    expect_denied(&output, AuthResult::VersionMismatch);
    assert_eq!(output.close, Some(CloseReason::Denied));
}

#[test]
fn s3_unknown_account_is_invalid_token() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let mut dispatcher = service.get_dispatcher(ServiceKind::Auth, peer(1), 1);
    dispatcher.greeting().unwrap();

    let mut hello = auth_hello(&service);
    hello.email = "nobody@example.com".into();

    let output = dispatcher.dispatch(&plain_frame(&hello)).block_on();
    expect_denied(&output, AuthResult::InvalidToken);
}

#[test]
fn s4_banned_account() {
    let stores = MemStores::with_account(EMAIL, PASSWORD);
    stores.suspend(1, Suspension::Banned);
    let service = service_with(stores);

    let mut dispatcher = service.get_dispatcher(ServiceKind::Auth, peer(1), 1);
    dispatcher.greeting().unwrap();

    let output = dispatcher.dispatch(&plain_frame(&auth_hello(&service))).block_on();
    expect_denied(&output, AuthResult::AccountBanned);
}

#[test]
fn suspended_account_reports_days() {
    let stores = MemStores::with_account(EMAIL, PASSWORD);
    stores.suspend(1, Suspension::Suspended { days: 2.5 });
    let service = service_with(stores);

    let mut dispatcher = service.get_dispatcher(ServiceKind::Auth, peer(1), 1);
    dispatcher.greeting().unwrap();

    let output = dispatcher.dispatch(&plain_frame(&auth_hello(&service))).block_on();
    let frames = frames_of(&output);
    let denied = packet::decode::<ServerAuthDenied>(&frames[0].payload).unwrap();
    assert_eq!(denied.result, AuthResult::AccountSuspended);
    assert_eq!(denied.suspended_days, 2.5);
}

#[test]
fn s5_sixth_attempt_is_rate_limited() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let hello = auth_hello(&service);

    for attempt in 0..6u64 {
        let mut dispatcher = service.get_dispatcher(ServiceKind::Auth, peer(1), attempt);
        dispatcher.greeting().unwrap();
        let output = dispatcher.dispatch(&plain_frame(&hello)).block_on();

        let frames = frames_of(&output);
        if attempt < 5 {
            assert_eq!(frames[0].opcode, u16::from(Opcode::ServerAuthAccepted));
        } else {
            let denied = packet::decode::<ServerAuthDenied>(&frames[0].payload).unwrap();
            assert_eq!(denied.result, AuthResult::Unknown);
            assert_eq!(output.close, Some(CloseReason::RateLimited));
        }
    }
}

#[test]
fn s6_realm_handoff() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let auth_ticket = authenticate(&service, 1);

    let mut dispatcher = service.get_dispatcher(ServiceKind::Realm, peer(1), 2);
    let greeting = dispatcher.greeting().expect("realm greets on accept");
    assert!(!greeting.is_empty());

    let output = dispatcher
        .dispatch(&plain_frame(&ClientHelloRealmTicket {
            build: BUILD,
            email: EMAIL.into(),
            ticket: auth_ticket,
        }))
        .block_on();

    assert_eq!(output.close, Some(CloseReason::Handoff));

    // Three frames, payloads encrypted with the presented-ticket cipher.
    let frames = frames_of(&output);
    let opcodes: Vec<u16> = frames.iter().map(|f| f.opcode).collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::ServerAuthAccepted.into(),
            Opcode::ServerRealmMessages.into(),
            Opcode::ServerRealmInfo.into(),
        ]
    );

    let mut opener = StreamCipher::new(&auth_ticket);
    let mut bodies = Vec::new();
    for frame in &frames {
        let mut body = frame.payload.to_vec();
        opener.apply(&mut body);
        bodies.push(body);
    }

    let accepted = packet::decode::<ServerAuthAccepted>(&bodies[0]).unwrap();
    let info = packet::decode::<ServerRealmInfo>(&bodies[2]).unwrap();

    assert_eq!(info.account_id, 1);
    assert_eq!(info.port, 24000);
    assert_eq!(info.session_key, accepted.ticket);
    // The realm overwrote the auth ticket with the session ticket.
    assert_eq!(service.stores().stored_ticket(1), Some(info.session_key));
    assert_ne!(info.session_key, auth_ticket);
}

/// Full handoff: returns a world dispatcher with its session installed,
/// plus the client-side cipher states.
fn into_world_as(
    service: &Service<MemStores>,
    connection_id: u64,
    email: &str,
    password: &str,
    account_id: u64,
) -> (Dispatcher<MemStores>, StreamCipher, StreamCipher) {
    authenticate_as(service, connection_id * 100, email, password);
    let ticket = service.stores().stored_ticket(account_id).unwrap();
    // The realm would remint here; drive the world hello directly off
    // the stored ticket.
    let mut dispatcher = service.get_dispatcher(ServiceKind::World, peer(1), connection_id);
    assert!(dispatcher.greeting().is_none(), "world client speaks first");

    let output = dispatcher
        .dispatch(&plain_frame(&ClientHelloRealm {
            email: email.into(),
            account_id,
            session_key: ticket,
        }))
        .block_on();

    // S7 first half: session install replies nothing.
    assert_eq!(output.close, None);
    assert!(output.bytes.is_empty());

    (dispatcher, StreamCipher::new(&ticket), StreamCipher::new(&ticket))
}

fn into_world(
    service: &Service<MemStores>,
    connection_id: u64,
) -> (Dispatcher<MemStores>, StreamCipher, StreamCipher) {
    into_world_as(service, connection_id, EMAIL, PASSWORD, 1)
}

/// Character-screen shortcut: list, create, select, entered-world.
/// Returns the character id and the entered-world output (which holds
/// any spawn broadcasts).
fn enter_world_with_character(
    dispatcher: &mut Dispatcher<MemStores>,
    send: &mut StreamCipher,
    recv: &mut StreamCipher,
    name: &str,
) -> (u64, Output) {
    let output = dispatcher
        .dispatch(&encrypted_frame(&ClientCharacterList, send))
        .block_on();
    open_world_frames(&output, recv);

    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientCharacterCreate {
                name: name.into(),
                sex: 0,
                race: 1,
                class: 2,
                path: 0,
                creation_id: 5,
                labels: vec![],
                values: vec![],
                bones: vec![],
            },
            send,
        ))
        .block_on();
    let inner = open_world_frames(&output, recv);
    let created = packet::decode::<ServerCharacterCreate>(&inner[0].1).unwrap();
    assert_eq!(created.result, CharacterCreateResult::Success);

    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientCharacterSelect {
                character_id: created.character_id,
            },
            send,
        ))
        .block_on();
    open_world_frames(&output, recv);

    let entered = dispatcher
        .dispatch(&encrypted_frame(&ClientEnteredWorld, send))
        .block_on();
    let inner = open_world_frames(&entered, recv);
    assert_eq!(inner[0].0, u16::from(Opcode::ServerPlayerEnteredWorld));

    (created.character_id, entered)
}

fn open_world_frames(
    output: &Output,
    recv: &mut StreamCipher,
) -> Vec<(u16, Vec<u8>)> {
    frames_of(output)
        .into_iter()
        .map(|f| {
            assert_eq!(f.opcode, u16::from(Opcode::ServerEncrypted));
            let mut body = f.payload.to_vec();
            recv.apply(&mut body);
            let (opcode, payload) = frame::decode_inner(&body).unwrap();
            (opcode, payload.to_vec())
        })
        .collect()
}

#[test]
fn s7_world_install_and_character_list() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let (mut dispatcher, mut send, mut recv) = into_world(&service, 1);

    let output = dispatcher
        .dispatch(&encrypted_frame(&ClientCharacterList, &mut send))
        .block_on();
    assert_eq!(output.close, None);

    let inner = open_world_frames(&output, &mut recv);
    let opcodes: Vec<u16> = inner.iter().map(|(op, _)| *op).collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::ServerAccountCurrencies.into(),
            Opcode::ServerAccountUnlocks.into(),
            Opcode::ServerAccountEntitlements.into(),
            Opcode::ServerAccountTier.into(),
            Opcode::ServerRewardProperties.into(),
            Opcode::ServerMaxCharacterLevel.into(),
            Opcode::ServerCharacterList.into(),
        ]
    );
}

#[test]
fn character_create_select_enter() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let (mut dispatcher, mut send, mut recv) = into_world(&service, 1);

    // List first; the screen always does.
    let output = dispatcher
        .dispatch(&encrypted_frame(&ClientCharacterList, &mut send))
        .block_on();
    open_world_frames(&output, &mut recv);

    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientCharacterCreate {
                name: "Vara Nightsong".into(),
                sex: 0,
                race: 1,
                class: 2,
                path: 0,
                creation_id: 5,
                labels: vec![1, 2],
                values: vec![3, 4],
                bones: vec![0.5],
            },
            &mut send,
        ))
        .block_on();

    let inner = open_world_frames(&output, &mut recv);
    let created = packet::decode::<ServerCharacterCreate>(&inner[0].1).unwrap();
    assert_eq!(created.result, CharacterCreateResult::Success);
    assert_eq!(created.world_id, 870);

    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientCharacterSelect {
                character_id: created.character_id,
            },
            &mut send,
        ))
        .block_on();

    let inner = open_world_frames(&output, &mut recv);
    let opcodes: Vec<u16> = inner.iter().map(|(op, _)| *op).collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::ServerWorldEnter.into(),
            Opcode::ServerCharacterFlagsUpdated.into(),
            Opcode::ServerEntityCreate.into(),
            Opcode::ServerSetUnitPathType.into(),
            Opcode::ServerPlayerChanged.into(),
            Opcode::ServerPathInitialise.into(),
            Opcode::ServerTimeOfDay.into(),
            Opcode::ServerHousingNeighbors.into(),
            Opcode::ServerInstanceSettings.into(),
            Opcode::ServerMovementControl.into(),
            Opcode::ServerPlayerCreate.into(),
        ]
    );

    // The registry now holds the player.
    let entry = service.registry().lookup_by_account(1).unwrap();
    assert_eq!(entry.character_id, Some(created.character_id));

    let output = dispatcher
        .dispatch(&encrypted_frame(&ClientEnteredWorld, &mut send))
        .block_on();
    let inner = open_world_frames(&output, &mut recv);
    assert_eq!(inner[0].0, u16::from(Opcode::ServerPlayerEnteredWorld));
}

#[test]
fn invalid_create_name_is_rejected_without_close() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let (mut dispatcher, mut send, mut recv) = into_world(&service, 1);

    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientCharacterCreate {
                // Two spaces: the canonical bad name.
                name: "  ".into(),
                sex: 0,
                race: 1,
                class: 2,
                path: 0,
                creation_id: 5,
                labels: vec![],
                values: vec![],
                bones: vec![],
            },
            &mut send,
        ))
        .block_on();

    assert_eq!(output.close, None);
    let inner = open_world_frames(&output, &mut recv);
    let created = packet::decode::<ServerCharacterCreate>(&inner[0].1).unwrap();
    assert_eq!(created.result, CharacterCreateResult::InvalidName);
}

#[test]
fn s8_realm_select_back_button_is_silent() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let (mut dispatcher, mut send, _recv) = into_world(&service, 1);

    let before = service.stores().stored_ticket(1);
    let output = dispatcher
        .dispatch(&encrypted_frame(&ClientRealmSelect { realm_id: 1 }, &mut send))
        .block_on();

    // No bytes, no close, no state change.
    assert!(output.bytes.is_empty());
    assert_eq!(output.close, None);
    assert_eq!(service.stores().stored_ticket(1), before);
}

#[test]
fn nested_encryption_is_a_crypto_fault() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let (mut dispatcher, mut send, _recv) = into_world(&service, 1);

    // ClientEncrypted wrapping an inner ClientEncrypted.
    let mut inner = frame::encode_inner(Opcode::ClientEncrypted.into(), &[0, 0, 0, 0]);
    send.apply(&mut inner);
    let output = dispatcher
        .dispatch(&Frame {
            opcode: Opcode::ClientEncrypted.into(),
            payload: inner.into(),
        })
        .block_on();

    assert_eq!(output.close, Some(CloseReason::CryptoFault));
}

#[test]
fn encrypted_before_install_is_a_crypto_fault() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let mut dispatcher = service.get_dispatcher(ServiceKind::World, peer(1), 1);

    let output = dispatcher
        .dispatch(&Frame {
            opcode: Opcode::ClientEncrypted.into(),
            payload: vec![1, 2, 3, 4, 5, 6].into(),
        })
        .block_on();

    assert_eq!(output.close, Some(CloseReason::CryptoFault));
}

/// Plain and encrypted envelopes must reach the same handler with the
/// same payload.
#[test]
fn envelope_idempotence() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));

    let (mut dispatcher, mut send, _recv) = into_world(&service, 1);
    let encrypted = dispatcher
        .dispatch(&encrypted_frame(&ClientPregameKeepAlive, &mut send))
        .block_on();

    let (mut dispatcher, _send, _recv) = into_world(&service, 2);
    let plain = dispatcher
        .dispatch(&plain_frame(&ClientPregameKeepAlive))
        .block_on();

    assert!(encrypted.bytes.is_empty() && plain.bytes.is_empty());
    assert_eq!(encrypted.close, None);
    assert_eq!(plain.close, None);
}

#[test]
fn chat_reaches_nearby_players_only() {
    let stores = MemStores::with_account(EMAIL, PASSWORD);
    stores.add_account(2, "bob@example.com", "swordfish");
    let service = service_with(stores);

    let (mut alice, mut alice_send, mut alice_recv) = into_world(&service, 1);
    enter_world_with_character(&mut alice, &mut alice_send, &mut alice_recv, "Vara Nightsong");

    let (mut bob, mut bob_send, mut bob_recv) =
        into_world_as(&service, 2, "bob@example.com", "swordfish", 2);
    let (_, entered) =
        enter_world_with_character(&mut bob, &mut bob_send, &mut bob_recv, "Mondo Zax");

    // Bob's spawn was announced to Alice's connection.
    assert_eq!(entered.pushes.len(), 1);
    assert_eq!(entered.pushes[0].0, 1);
    assert_eq!(entered.pushes[0].1.opcode, Opcode::ServerEntityCreate);

    // A chat line fans out to Alice and only Alice, stamped with Bob's
    // guid and name.
    let output = bob
        .dispatch(&encrypted_frame(
            &ClientChat {
                channel: 1,
                text: "anyone seen the Caretaker?".into(),
            },
            &mut bob_send,
        ))
        .block_on();

    assert!(output.bytes.is_empty());
    assert_eq!(output.close, None);
    assert_eq!(output.pushes.len(), 1);
    assert_eq!(output.pushes[0].0, 1);

    let line = &output.pushes[0].1;
    assert_eq!(line.opcode, Opcode::ServerChat);
    let chat = packet::decode::<ServerChat>(&line.payload).unwrap();
    assert_eq!(chat.name, "Mondo Zax");
    assert_eq!(chat.text, "anyone seen the Caretaker?");

    // An empty line is dropped without fanning out.
    let output = bob
        .dispatch(&encrypted_frame(
            &ClientChat {
                channel: 1,
                text: String::new(),
            },
            &mut bob_send,
        ))
        .block_on();
    assert!(output.pushes.is_empty());
    assert_eq!(output.close, None);
}

#[test]
fn ping_is_answered() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let (mut dispatcher, mut send, mut recv) = into_world(&service, 1);

    let output = dispatcher
        .dispatch(&encrypted_frame(&ClientPing { client_time: 777 }, &mut send))
        .block_on();

    let inner = open_world_frames(&output, &mut recv);
    assert_eq!(inner[0].0, u16::from(Opcode::ServerPing));
    let pong = packet::decode::<ServerPing>(&inner[0].1).unwrap();
    assert_eq!(pong.client_time, 777);
}

#[test]
fn packed_world_envelope_reaches_the_handler() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let (mut dispatcher, _send, _recv) = into_world(&service, 1);

    let body = frame::encode_packed_world(
        11,
        Opcode::ClientPregameKeepAlive.into(),
        &packet::encode(&ClientPregameKeepAlive),
    );
    let output = dispatcher
        .dispatch(&Frame {
            opcode: Opcode::ClientPackedWorld.into(),
            payload: body.into(),
        })
        .block_on();

    // Keepalive through the packed envelope: consumed, no reply.
    assert!(output.bytes.is_empty());
    assert_eq!(output.close, None);
}

#[test]
fn movement_is_applied_then_speed_capped() {
    use codec::packet::entity::{ClientEntityCommand, EntityCommand};

    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));
    let (mut dispatcher, mut send, mut recv) = into_world(&service, 1);

    let output = dispatcher
        .dispatch(&encrypted_frame(&ClientCharacterList, &mut send))
        .block_on();
    open_world_frames(&output, &mut recv);

    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientCharacterCreate {
                name: "Vara Nightsong".into(),
                sex: 0,
                race: 1,
                class: 2,
                path: 0,
                creation_id: 5,
                labels: vec![],
                values: vec![],
                bones: vec![],
            },
            &mut send,
        ))
        .block_on();
    let inner = open_world_frames(&output, &mut recv);
    let created = packet::decode::<ServerCharacterCreate>(&inner[0].1).unwrap();

    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientCharacterSelect {
                character_id: created.character_id,
            },
            &mut send,
        ))
        .block_on();
    open_world_frames(&output, &mut recv);

    let output = dispatcher
        .dispatch(&encrypted_frame(&ClientEnteredWorld, &mut send))
        .block_on();
    open_world_frames(&output, &mut recv);

    let spawn = Position {
        x: 4074.0,
        y: -797.0,
        z: -2399.0,
    };

    // A sane step is applied to the registry view.
    let step = Position {
        x: spawn.x + 5.0,
        ..spawn
    };
    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientEntityCommand {
                time: 1_000,
                commands: vec![EntityCommand::SetPosition {
                    position: step,
                    blend: false,
                }],
            },
            &mut send,
        ))
        .block_on();
    assert_eq!(output.close, None);
    assert_eq!(
        service.registry().lookup_by_account(1).unwrap().position,
        Some(step)
    );

    // A teleport-sized jump in one second is dropped, not applied.
    let jump = Position {
        x: spawn.x + 10_000.0,
        ..spawn
    };
    let output = dispatcher
        .dispatch(&encrypted_frame(
            &ClientEntityCommand {
                time: 2_000,
                commands: vec![EntityCommand::SetPosition {
                    position: jump,
                    blend: false,
                }],
            },
            &mut send,
        ))
        .block_on();
    assert_eq!(output.close, None);
    assert_eq!(
        service.registry().lookup_by_account(1).unwrap().position,
        Some(step)
    );
}

#[test]
fn duplicate_world_login_evicts_the_older_connection() {
    let service = service_with(MemStores::with_account(EMAIL, PASSWORD));

    let (mut first, mut first_send, mut first_recv) = into_world(&service, 1);
    let output = first
        .dispatch(&encrypted_frame(&ClientCharacterList, &mut first_send))
        .block_on();
    open_world_frames(&output, &mut first_recv);

    let output = first
        .dispatch(&encrypted_frame(
            &ClientCharacterCreate {
                name: "Vara Nightsong".into(),
                sex: 0,
                race: 1,
                class: 2,
                path: 0,
                creation_id: 5,
                labels: vec![],
                values: vec![],
                bones: vec![],
            },
            &mut first_send,
        ))
        .block_on();
    let inner = open_world_frames(&output, &mut first_recv);
    let created = packet::decode::<ServerCharacterCreate>(&inner[0].1).unwrap();

    let select = ClientCharacterSelect {
        character_id: created.character_id,
    };
    let output = first
        .dispatch(&encrypted_frame(&select, &mut first_send))
        .block_on();
    assert!(output.evict.is_empty());

    // Same account arrives on a second connection and selects.
    let (mut second, mut second_send, _second_recv) = into_world(&service, 2);
    let output = second
        .dispatch(&encrypted_frame(&select, &mut second_send))
        .block_on();

    assert_eq!(output.evict, vec![1]);
    assert_eq!(
        service.registry().lookup_by_account(1).unwrap().connection_id,
        2
    );
}
