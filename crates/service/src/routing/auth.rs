//! Auth-service handlers: SRP-6 credential verification and ticket
//! issuance.

use codec::{
    crypto::{self, Srp6Server},
    packet::{
        self,
        auth::{AuthResult, ClientHelloAuth, ServerAuthAccepted, ServerAuthDenied},
    },
};

use crate::{
    Stores, Suspension,
    limiter::AUTH_CLASS,
    routing::{CloseReason, Context, Envelope, HandlerError, Outcome, Reply},
    session::{AuthStage, Stage},
};

fn deny(denied: ServerAuthDenied, reason: CloseReason) -> Outcome {
    Outcome::reply(Reply::packet(&denied), Envelope::Plain).then_close(reason)
}

/// `ClientHelloAuth`, auth variant: check the build, the rate budget,
/// the account's standing, then the SRP-6 evidence. Success mints the
/// handoff ticket and installs the session-key cipher for anything the
/// client still says on this connection.
pub(crate) async fn hello<T: Stores>(
    ctx: &mut Context<'_, T>,
    payload: &[u8],
) -> Result<Outcome, HandlerError> {
    let hello = packet::decode::<ClientHelloAuth>(payload)?;

    if ctx.session.stage != Stage::Auth(AuthStage::Greeted) {
        return Err(HandlerError::MissingState("auth greeting"));
    }

    if hello.build != ctx.expected_build {
        log::info!(
            "build rejected: peer={}, build={}, expected={}",
            ctx.session.peer_ip,
            hello.build,
            ctx.expected_build
        );
        return Ok(deny(
            ServerAuthDenied::new(AuthResult::VersionMismatch),
            CloseReason::Denied,
        ));
    }

    if !ctx.limiter.admit(AUTH_CLASS, ctx.session.peer_ip) {
        log::warn!("auth rate limited: peer={}", ctx.session.peer_ip);
        return Ok(deny(
            ServerAuthDenied::new(AuthResult::Unknown),
            CloseReason::RateLimited,
        ));
    }

    let account = match ctx.stores.get_by_email(&hello.email).await {
        Err(err) => {
            log::error!("account lookup failed: email={}, err={}", hello.email, err);
            return Ok(deny(
                ServerAuthDenied::new(AuthResult::DatabaseError),
                CloseReason::Denied,
            ));
        }
        Ok(None) => {
            log::info!("unknown account: email={}", hello.email);
            return Ok(deny(
                ServerAuthDenied::new(AuthResult::InvalidToken),
                CloseReason::Denied,
            ));
        }
        Ok(Some(account)) => account,
    };

    match ctx.stores.check_suspension(account.id).await {
        Err(err) => {
            log::error!("suspension check failed: account={}, err={}", account.id, err);
            return Ok(deny(
                ServerAuthDenied::new(AuthResult::DatabaseError),
                CloseReason::Denied,
            ));
        }
        Ok(Suspension::Banned) => {
            return Ok(deny(
                ServerAuthDenied::new(AuthResult::AccountBanned),
                CloseReason::Denied,
            ));
        }
        Ok(Suspension::Suspended { days }) => {
            return Ok(deny(ServerAuthDenied::suspended(days), CloseReason::Denied));
        }
        Ok(Suspension::Clear) => {}
    }

    let srp = Srp6Server::new(&account.email, &account.salt, &account.verifier, ctx.srp_seed);
    let evidence = match srp.verify(&hello.public_key, &hello.client_proof) {
        Ok(evidence) => evidence,
        Err(err) => {
            log::info!("evidence rejected: email={}, err={}", account.email, err);
            return Ok(deny(
                ServerAuthDenied::new(AuthResult::InvalidToken),
                CloseReason::Denied,
            ));
        }
    };

    ctx.session.stage.advance_to(Stage::Auth(AuthStage::Credentialed))?;

    let ticket = crypto::random_ticket();
    if let Err(err) = ctx.stores.update_ticket(account.id, &ticket).await {
        log::error!("ticket not persisted: account={}, err={}", account.id, err);
        return Ok(deny(
            ServerAuthDenied::new(AuthResult::DatabaseError),
            CloseReason::Denied,
        ));
    }

    ctx.session.bind_account(account.id);
    ctx.session.email = Some(account.email.clone());
    ctx.session.session_key = Some(evidence.session_key);
    ctx.session.ticket = Some(ticket);
    ctx.session.stage.advance_to(Stage::Auth(AuthStage::Ticketed))?;

    log::info!("auth ok: email={}, account={}", account.email, account.id);

    // The accept itself goes out plain; everything after it rides the
    // session-key cipher. The client carries the ticket to the realm
    // service and closes this connection when it pleases.
    Ok(Outcome::reply(
        Reply::packet(&ServerAuthAccepted {
            server_proof: evidence.server_proof,
            ticket,
        }),
        Envelope::Plain,
    )
    .with_cipher(evidence.session_key.to_vec()))
}
