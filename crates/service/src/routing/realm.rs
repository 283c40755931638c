//! Realm-directory handlers: ticket validation and the world handoff.

use codec::{
    crypto::{self, SERVER_PROOF_SIZE},
    packet::{
        self,
        auth::{AuthResult, ServerAuthAccepted, ServerAuthDenied},
        realm::{ClientHelloRealmTicket, ServerRealmInfo, ServerRealmMessages, pack_ipv4},
    },
};

use crate::{
    Stores,
    routing::{CloseReason, Context, Envelope, HandlerError, Outcome, Reply},
    session::{RealmStage, Stage},
};

/// Both sides key the realm cipher from the ticket the client presents,
/// so even a denial can ride the encrypted envelope.
fn deny(presented: &[u8], result: AuthResult) -> Outcome {
    Outcome::reply(
        Reply::packet(&ServerAuthDenied::new(result)),
        Envelope::AuthEncrypted,
    )
    .with_cipher(presented.to_vec())
    .then_close(CloseReason::Denied)
}

/// `ClientHelloAuth`, realm variant: the presented ticket must equal
/// the stored one exactly. Success overwrites it with a fresh session
/// ticket and answers with the accept / messages / realm-info triple in
/// one envelope, then the realm closes the connection.
pub(crate) async fn hello<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let hello = packet::decode::<ClientHelloRealmTicket>(payload)?;

    if ctx.session.stage != Stage::Realm(RealmStage::Greeted) {
        return Err(HandlerError::MissingState("realm greeting"));
    }

    if hello.build != ctx.expected_build {
        return Ok(deny(&hello.ticket, AuthResult::VersionMismatch));
    }

    let account = match ctx.stores.get_by_email(&hello.email).await {
        Err(err) => {
            log::error!("account lookup failed: email={}, err={}", hello.email, err);
            return Ok(deny(&hello.ticket, AuthResult::DatabaseError));
        }
        Ok(None) => return Ok(deny(&hello.ticket, AuthResult::InvalidToken)),
        Ok(Some(account)) => account,
    };

    // Constant-time equality on the hex encodings, exactly as the
    // tickets are persisted.
    let presented = hex::encode(hello.ticket);
    let stored = account.ticket.as_deref().unwrap_or("");
    if !crypto::ct_eq(stored.as_bytes(), presented.as_bytes()) {
        log::info!("stale ticket: email={}", hello.email);
        return Ok(deny(&hello.ticket, AuthResult::InvalidToken));
    }

    ctx.session.stage.advance_to(Stage::Realm(RealmStage::Validated))?;

    let session_ticket = crypto::random_ticket();
    if let Err(err) = ctx.stores.update_ticket(account.id, &session_ticket).await {
        log::error!("ticket not persisted: account={}, err={}", account.id, err);
        return Ok(deny(&hello.ticket, AuthResult::DatabaseError));
    }

    ctx.session.bind_account(account.id);
    ctx.session.email = Some(account.email.clone());
    ctx.session.ticket = Some(session_ticket);
    ctx.session.stage.advance_to(Stage::Realm(RealmStage::RealmListed))?;

    let realm = ctx.realm;
    let replies = vec![
        Reply::packet(&ServerAuthAccepted {
            server_proof: [0; SERVER_PROOF_SIZE],
            ticket: session_ticket,
        }),
        Reply::packet(&ServerRealmMessages {
            messages: realm.messages.clone(),
        }),
        Reply::packet(&ServerRealmInfo {
            address: pack_ipv4(realm.public_address),
            port: realm.public_port,
            session_key: session_ticket,
            account_id: account.id,
            realm_name: realm.name.clone(),
            flags: realm.flags,
            realm_type: realm.realm_type,
            note_text_id: realm.note_text_id,
        }),
    ];

    ctx.session.stage.advance_to(Stage::Realm(RealmStage::Transferring))?;

    log::info!(
        "realm handoff: email={}, account={}, world={}:{}",
        account.email,
        account.id,
        realm.public_address,
        realm.public_port
    );

    Ok(Outcome::reply_many(replies, Envelope::AuthEncrypted)
        .with_cipher(hello.ticket.to_vec())
        .then_close(CloseReason::Handoff))
}
