//! World-service handlers: session install, the character screen,
//! world entry, movement, logout.

use std::time::{SystemTime, UNIX_EPOCH};

use codec::packet::{
    self, Position,
    account::{
        ServerAccountCurrencies, ServerAccountEntitlements, ServerAccountTier,
        ServerAccountUnlocks, ServerMaxCharacterLevel, ServerRewardProperties,
    },
    character::{
        BONE_RANGE, CharacterCreateResult, CharacterSummary, ClientCharacterCreate,
        ClientCharacterDelete, ClientCharacterList, ClientCharacterSelect, MAX_BONES,
        MAX_CUSTOMIZATION_LABELS, ServerCharacterCreate, ServerCharacterDelete,
        ServerCharacterList,
    },
    entity::{
        ClientEntityCommand, EntityCommand, ServerEntityCommand, ServerEntityCreate,
        ServerPlayerCreate,
    },
    realm::{ClientRealmSelect, ServerNewRealm, pack_ipv4},
    social::{
        ClientChat, ClientEmote, ClientPing, MAX_CHAT_LEN, ServerChat, ServerEmote, ServerPing,
    },
    world::{
        ClientHelloRealm, ClientLogoutRequest, ClientPregameKeepAlive, ServerCharacterFlagsUpdated,
        ServerHousingNeighbors, ServerInstanceSettings, ServerMovementControl,
        ServerPathInitialise, ServerPlayerChanged, ServerPlayerEnteredWorld,
        ServerSetUnitPathType, ServerTimeOfDay, ServerWorldEnter,
    },
};

use codec::crypto;

use crate::{
    Character, CharacterAttrs, CharacterCreateError, SessionValidity, Stores,
    routing::{CloseReason, Context, Envelope, HandlerError, Outcome, Reply},
    session::{Stage, WorldStage, ZoneKey, entity::EntityType},
};

/// How far a movement or spawn broadcast reaches, in world units.
const BROADCAST_RANGE: f32 = 128.0;

const SECONDS_PER_DAY: u32 = 86_400;

/// `ClientHelloRealm`: validate the `(email, ticket, account)` triple
/// atomically, install the ticket-keyed cipher, reply nothing. Any
/// mismatch terminates; encryption is not up yet so there is nothing
/// useful to say to an invalid peer.
pub(crate) async fn hello<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let hello = packet::decode::<ClientHelloRealm>(payload)?;

    if ctx.session.stage != Stage::World(WorldStage::New) {
        return Err(HandlerError::MissingState("pre-session stage"));
    }

    let validity = ctx
        .stores
        .validate_session(&hello.email, &hello.session_key, hello.account_id)
        .await
        .map_err(|err| {
            log::error!("session validation failed: email={}, err={}", hello.email, err);
            HandlerError::Fatal(CloseReason::InvalidSession)
        })?;

    match validity {
        SessionValidity::Valid => {}
        SessionValidity::Expired => {
            log::warn!("session expired: email={}", hello.email);
            return Err(HandlerError::Fatal(CloseReason::SessionExpired));
        }
        SessionValidity::NotFound => {
            log::info!("session not found: email={}", hello.email);
            return Err(HandlerError::Fatal(CloseReason::InvalidSession));
        }
        SessionValidity::AccountMismatch => {
            log::warn!(
                "account mismatch: email={}, claimed={}",
                hello.email,
                hello.account_id
            );
            return Err(HandlerError::Fatal(CloseReason::AccountMismatch));
        }
    }

    ctx.session.bind_account(hello.account_id);
    ctx.session.email = Some(hello.email.clone());
    ctx.session.ticket = Some(hello.session_key);
    ctx.session.stage.advance_to(Stage::World(WorldStage::SessionKeyed))?;

    log::info!("world session keyed: email={}, account={}", hello.email, hello.account_id);

    Ok(Outcome::ignore().with_cipher(hello.session_key.to_vec()))
}

fn summary(character: &Character) -> CharacterSummary {
    CharacterSummary {
        character_id: character.id,
        name: character.name.clone(),
        sex: character.sex,
        race: character.race,
        class: character.class,
        faction: character.faction,
        path: character.path,
        level: character.level,
        world_id: character.world_id,
        position: character.position,
        days_since_last_online: character.days_since_last_online,
        gear: character.gear.clone(),
        bones: character.bones.clone(),
    }
}

/// The character list request is answered by a fixed seven-packet
/// sequence: currencies, unlocks, entitlements, tier, reward
/// properties, max level, then the list itself.
pub(crate) async fn character_list<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    packet::decode::<ClientCharacterList>(payload)?;

    let Some(account_id) = ctx.session.account_id() else {
        return Err(HandlerError::MissingState("world session"));
    };

    let account = ctx
        .stores
        .get_by_id(account_id)
        .await?
        .ok_or(HandlerError::MissingState("account record"))?;

    let characters = ctx.stores.list_for(account_id, ctx.realm.id).await?;

    // Re-requests after create or delete are normal; only the first one
    // moves the stage.
    if ctx.session.stage == Stage::World(WorldStage::SessionKeyed) {
        ctx.session
            .stage
            .advance_to(Stage::World(WorldStage::CharacterListed))?;
    }

    let replies = vec![
        Reply::packet(&ServerAccountCurrencies::default()),
        Reply::packet(&ServerAccountUnlocks::default()),
        Reply::packet(&ServerAccountEntitlements::character_slots(account.signature)),
        Reply::packet(&ServerAccountTier {
            signature: account.signature,
        }),
        Reply::packet(&ServerRewardProperties::default()),
        Reply::packet(&ServerMaxCharacterLevel {
            level: ctx.max_character_level,
        }),
        Reply::packet(&ServerCharacterList {
            realm_id: ctx.realm.id,
            characters: characters.iter().map(summary).collect(),
        }),
    ];

    Ok(Outcome::reply_many(replies, Envelope::WorldEncrypted))
}

/// Names: trimmed, 3..=24 chars, leading letter, letters, digits,
/// apostrophes and single spaces only.
fn valid_name(name: &str) -> bool {
    if name.trim() != name || name.contains("  ") {
        return false;
    }

    let length = name.chars().count();
    if !(3..=24).contains(&length) {
        return false;
    }

    let mut chars = name.chars();
    if !chars.next().is_some_and(|first| first.is_ascii_alphabetic()) {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '\'' || c == ' ')
}

fn valid_customization(create: &ClientCharacterCreate) -> bool {
    create.labels.len() <= MAX_CUSTOMIZATION_LABELS
        && create.labels.len() == create.values.len()
        && create.bones.len() <= MAX_BONES
        && create
            .bones
            .iter()
            .all(|bone| (-BONE_RANGE..=BONE_RANGE).contains(bone))
}

pub(crate) async fn character_create<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let create = packet::decode::<ClientCharacterCreate>(payload)?;

    let Some(account_id) = ctx.session.account_id() else {
        return Err(HandlerError::MissingState("world session"));
    };

    let fail = |result| {
        Ok(Outcome::reply(
            Reply::packet(&ServerCharacterCreate::failure(result)),
            Envelope::WorldEncrypted,
        ))
    };

    if !valid_name(&create.name) {
        return fail(CharacterCreateResult::InvalidName);
    }
    if !valid_customization(&create) {
        return fail(CharacterCreateResult::InvalidCustomization);
    }

    let Some(template) = ctx.stores.character_creation_template(create.creation_id) else {
        return fail(CharacterCreateResult::InvalidTemplate);
    };

    // The template is canonical; a client that disagrees with it is
    // confused or hostile.
    if template.race != create.race
        || template.class != create.class
        || template.sex != create.sex
    {
        return fail(CharacterCreateResult::InvalidTemplate);
    }

    let mut gear = ctx
        .stores
        .compute_visuals(template.race, template.sex, &create.labels, &create.values);
    for item_id in &template.starting_items {
        if let Some(item) = ctx.stores.item(*item_id) {
            gear.push(codec::packet::character::GearVisual {
                slot: item.slot,
                display_id: item.display_id,
            });
        }
    }

    let attrs = CharacterAttrs {
        name: create.name.clone(),
        sex: template.sex,
        race: template.race,
        class: template.class,
        faction: template.faction,
        path: create.path,
        world_id: template.world_id,
        position: template.position,
        yaw: template.yaw,
        gear,
        bones: create.bones.clone(),
        starting_items: template.starting_items.clone(),
    };

    let character = match ctx.stores.create(account_id, attrs).await {
        Ok(character) => character,
        Err(CharacterCreateError::NameTaken) => return fail(CharacterCreateResult::NameNotUnique),
        Err(CharacterCreateError::SlotsFull) => return fail(CharacterCreateResult::SlotsFull),
        Err(CharacterCreateError::Store(_)) => return fail(CharacterCreateResult::DatabaseError),
    };

    log::info!(
        "character created: account={}, character={}, name={}",
        account_id,
        character.id,
        character.name
    );

    Ok(Outcome::reply(
        Reply::packet(&ServerCharacterCreate {
            result: CharacterCreateResult::Success,
            character_id: character.id,
            world_id: character.world_id,
        }),
        Envelope::WorldEncrypted,
    ))
}

pub(crate) async fn character_delete<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let delete = packet::decode::<ClientCharacterDelete>(payload)?;

    let Some(account_id) = ctx.session.account_id() else {
        return Err(HandlerError::MissingState("world session"));
    };

    let success = ctx.stores.delete(account_id, delete.character_id).await?;

    Ok(Outcome::reply(
        Reply::packet(&ServerCharacterDelete {
            success,
            character_id: delete.character_id,
        }),
        Envelope::WorldEncrypted,
    ))
}

fn entity_create(character: &Character, guid: u32) -> ServerEntityCreate {
    ServerEntityCreate {
        guid,
        entity_type: EntityType::Player as u8,
        name: character.name.clone(),
        race: character.race,
        sex: character.sex,
        class: character.class,
        faction: character.faction,
        position: character.position,
        yaw: character.yaw,
        gear: character.gear.clone(),
        bones: character.bones.clone(),
    }
}

fn time_of_day() -> u32 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_secs() % u64::from(SECONDS_PER_DAY)) as u32
}

/// Character select: ownership, last-online, spawn resolution, zone
/// registration, then the entry sequence. The packet order is fixed;
/// the reference client crashes when it is reordered.
pub(crate) async fn character_select<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let select = packet::decode::<ClientCharacterSelect>(payload)?;

    let Some(account_id) = ctx.session.account_id() else {
        return Err(HandlerError::MissingState("world session"));
    };

    let Some(mut character) = ctx.stores.get_owned(account_id, select.character_id).await? else {
        log::info!(
            "select for unowned character: account={}, character={}",
            account_id,
            select.character_id
        );
        return Err(HandlerError::MissingState("owned character"));
    };

    if let Err(err) = ctx.stores.update_last_online(character.id).await {
        log::warn!("last online not updated: character={}, err={}", character.id, err);
    }

    // A character with no saved position (never finished its first
    // save) spawns at the world's canonical location instead.
    if character.position == Position::default() {
        if let Some(location) = ctx.stores.world_location(character.world_id) {
            character.position = location.position;
            character.yaw = location.yaw;
        }
    }

    let handle = ctx.handles.alloc(EntityType::Player);
    let guid = handle.guid();
    let zone = ZoneKey {
        world_id: character.world_id,
        instance_id: 0,
    };

    let evicted = ctx
        .registry
        .register(account_id, ctx.session.connection_id, Some(character.id), Some(handle));
    ctx.registry.update_zone(account_id, zone);
    ctx.registry.update_position(account_id, character.position);

    ctx.session.entity_handle = Some(handle);
    ctx.session.zone = Some(zone);
    ctx.session.position = Some(character.position);
    ctx.session.yaw = character.yaw;

    let replies = vec![
        Reply::packet(&ServerWorldEnter {
            world_id: character.world_id,
            position: character.position,
            yaw: character.yaw,
        }),
        Reply::packet(&ServerCharacterFlagsUpdated { flags: 0 }),
        Reply::packet(&entity_create(&character, guid)),
        Reply::packet(&ServerSetUnitPathType {
            guid,
            path: character.path,
        }),
        Reply::packet(&ServerPlayerChanged {
            guid,
            character_id: character.id,
        }),
        Reply::packet(&ServerPathInitialise {
            path: character.path,
            level: 1,
            xp: 0,
        }),
        Reply::packet(&ServerTimeOfDay {
            time_of_day: time_of_day(),
            length_of_day: SECONDS_PER_DAY,
        }),
        Reply::packet(&ServerHousingNeighbors::default()),
        Reply::packet(&ServerInstanceSettings {
            max_players: 100,
            difficulty: 0,
        }),
        Reply::packet(&ServerMovementControl {
            ticket: 1,
            immediate: true,
            unit_id: guid,
        }),
        Reply::packet(&ServerPlayerCreate {
            guid,
            character_id: character.id,
            level: character.level,
            health: 100,
            max_health: 100,
        }),
    ];

    log::info!(
        "character selected: account={}, character={}, world={}",
        account_id,
        character.id,
        character.world_id
    );

    ctx.session.character = Some(character);

    let mut outcome = Outcome::reply_many(replies, Envelope::WorldEncrypted);
    if let Some(stale) = evicted {
        outcome = outcome.with_eviction(stale);
    }
    Ok(outcome)
}

/// `ClientEnteredWorld`: the client finished loading. Broadcast the
/// spawn to everyone nearby and dismiss the loading screen.
pub(crate) async fn entered_world<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    packet::decode::<codec::packet::world::ClientEnteredWorld>(payload)?;

    let (Some(account_id), Some(zone), Some(handle), Some(position)) = (
        ctx.session.account_id(),
        ctx.session.zone,
        ctx.session.entity_handle,
        ctx.session.position,
    ) else {
        return Err(HandlerError::MissingState("selected character"));
    };

    let Some(character) = ctx.session.character.clone() else {
        return Err(HandlerError::MissingState("selected character"));
    };

    ctx.session.stage.advance_to(Stage::World(WorldStage::InWorld))?;

    // Quest and achievement state is owned by the simulation; the core
    // only notes that tracking begins here.
    log::info!(
        "entered world: account={}, character={}, zone={}/{}",
        account_id,
        character.id,
        zone.world_id,
        zone.instance_id
    );

    let spawn = Reply::packet(&entity_create(&character, handle.guid()));
    let mut outcome = Outcome::reply(
        Reply::packet(&ServerPlayerEnteredWorld),
        Envelope::WorldEncrypted,
    );

    for other in ctx.registry.nearby_in_zone(zone, position, BROADCAST_RANGE) {
        if other.account_id != account_id {
            outcome = outcome.with_broadcast(other.account_id, spawn.clone());
        }
    }

    Ok(outcome)
}

/// The realm list back button re-sends `ClientRealmSelect` for the
/// realm the client is already on; answering it crashes the client, so
/// the same-realm case must produce no bytes at all.
pub(crate) async fn realm_select<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let select = packet::decode::<ClientRealmSelect>(payload)?;

    if select.realm_id == ctx.realm.id {
        log::debug!("realm select for current realm: ignored");
        return Ok(Outcome::ignore());
    }

    let Some(account_id) = ctx.session.account_id() else {
        return Err(HandlerError::MissingState("world session"));
    };

    let session_ticket = crypto::random_ticket();
    ctx.stores.update_ticket(account_id, &session_ticket).await?;
    ctx.session.ticket = Some(session_ticket);

    log::info!("realm transfer: account={}, realm={}", account_id, select.realm_id);

    Ok(Outcome::reply(
        Reply::packet(&ServerNewRealm {
            address: pack_ipv4(ctx.realm.public_address),
            port: ctx.realm.public_port,
            session_key: session_ticket,
            realm_name: ctx.realm.name.clone(),
        }),
        Envelope::WorldEncrypted,
    ))
}

pub(crate) async fn logout_request<T: Stores>(
    _ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let request = packet::decode::<ClientLogoutRequest>(payload)?;

    if request.cancel {
        return Ok(Outcome::ignore());
    }
    if !request.initiated {
        return Ok(Outcome::ignore());
    }

    Ok(Outcome::reply(
        Reply::packet(&codec::packet::world::ServerLogout {
            requested: true,
            reason: 0,
        }),
        Envelope::WorldEncrypted,
    )
    .then_close(CloseReason::Logout))
}

/// No reply; the TCP round trip itself refreshes the idle timer.
pub(crate) fn keepalive<T: Stores>(
    _ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    packet::decode::<ClientPregameKeepAlive>(payload)?;
    Ok(Outcome::ignore())
}

/// Movement ingest: apply the command set to the session, police the
/// speed ceiling, then echo to everyone in range.
pub(crate) async fn entity_command<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let command = packet::decode::<ClientEntityCommand>(payload)?;

    if ctx.session.stage != Stage::World(WorldStage::InWorld) {
        return Err(HandlerError::MissingState("in-world session"));
    }
    let (Some(account_id), Some(zone), Some(handle)) = (
        ctx.session.account_id(),
        ctx.session.zone,
        ctx.session.entity_handle,
    ) else {
        return Err(HandlerError::MissingState("in-world session"));
    };

    let mut next_position = ctx.session.position;
    let mut next_yaw = ctx.session.yaw;
    for step in &command.commands {
        match step {
            EntityCommand::SetPosition { position, .. } => next_position = Some(*position),
            EntityCommand::SetRotation { yaw } => next_yaw = *yaw,
            _ => {}
        }
    }

    // Speed ceiling: distance over the client-reported interval.
    if let (Some(previous), Some(next)) = (ctx.session.position, next_position) {
        let elapsed_ms = command.time.wrapping_sub(ctx.session.movement_time);
        if ctx.session.movement_time != 0 && elapsed_ms > 0 {
            let speed = previous.distance(&next) / (elapsed_ms as f32 / 1000.0);
            if speed > ctx.max_speed {
                log::warn!(
                    "movement rejected: account={}, speed={:.1}, ceiling={:.1}",
                    account_id,
                    speed,
                    ctx.max_speed
                );
                return Ok(Outcome::ignore());
            }
        }
    }

    ctx.session.position = next_position;
    ctx.session.yaw = next_yaw;
    ctx.session.movement_time = command.time;
    if let Some(position) = next_position {
        ctx.registry.update_position(account_id, position);
    }

    let echo = Reply::packet(&ServerEntityCommand {
        guid: handle.guid(),
        time: command.time,
        time_reset: false,
        server_controlled: false,
        commands: command.commands.clone(),
    });

    let mut outcome = Outcome::ignore();
    if let Some(position) = next_position {
        for other in ctx.registry.nearby_in_zone(zone, position, BROADCAST_RANGE) {
            if other.account_id != account_id {
                outcome = outcome.with_broadcast(other.account_id, echo.clone());
            }
        }
    }

    Ok(outcome)
}

/// Zone chat: stamped with the speaker's guid and name, fanned out to
/// everyone in range. The speaker's own client renders the line
/// locally, so it gets no echo.
pub(crate) async fn chat<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let chat = packet::decode::<ClientChat>(payload)?;

    if ctx.session.stage != Stage::World(WorldStage::InWorld) {
        return Err(HandlerError::MissingState("in-world session"));
    }
    let (Some(account_id), Some(zone), Some(handle), Some(position), Some(character)) = (
        ctx.session.account_id(),
        ctx.session.zone,
        ctx.session.entity_handle,
        ctx.session.position,
        ctx.session.character.as_ref(),
    ) else {
        return Err(HandlerError::MissingState("in-world session"));
    };

    if chat.text.is_empty() || chat.text.chars().count() > MAX_CHAT_LEN {
        return Err(HandlerError::MissingState("chat text length"));
    }

    let line = Reply::packet(&ServerChat {
        guid: handle.guid(),
        name: character.name.clone(),
        channel: chat.channel,
        text: chat.text,
    });

    let mut outcome = Outcome::ignore();
    for other in ctx.registry.nearby_in_zone(zone, position, BROADCAST_RANGE) {
        if other.account_id != account_id {
            outcome = outcome.with_broadcast(other.account_id, line.clone());
        }
    }

    Ok(outcome)
}

pub(crate) async fn emote<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let emote = packet::decode::<ClientEmote>(payload)?;

    if ctx.session.stage != Stage::World(WorldStage::InWorld) {
        return Err(HandlerError::MissingState("in-world session"));
    }
    let (Some(account_id), Some(zone), Some(handle), Some(position)) = (
        ctx.session.account_id(),
        ctx.session.zone,
        ctx.session.entity_handle,
        ctx.session.position,
    ) else {
        return Err(HandlerError::MissingState("in-world session"));
    };

    let play = Reply::packet(&ServerEmote {
        guid: handle.guid(),
        emote_id: emote.emote_id,
    });

    let mut outcome = Outcome::ignore();
    for other in ctx.registry.nearby_in_zone(zone, position, BROADCAST_RANGE) {
        if other.account_id != account_id {
            outcome = outcome.with_broadcast(other.account_id, play.clone());
        }
    }

    Ok(outcome)
}

/// Latency probe: echo the client's stamp beside ours.
pub(crate) fn ping<T: Stores>(
    _ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let ping = packet::decode::<ClientPing>(payload)?;

    Ok(Outcome::reply(
        Reply::packet(&ServerPing {
            client_time: ping.client_time,
            server_time: time_of_day(),
        }),
        Envelope::WorldEncrypted,
    ))
}
