//! Reply directives: the one uniform type every handler returns.

use codec::{
    opcode::Opcode,
    packet::{self, Packet},
};

/// Which framing/encryption wrapper an outgoing message gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// Bare frame; pre-cipher traffic.
    Plain,
    /// Frame payload passed through the send cipher after the opcode.
    AuthEncrypted,
    /// Inner frame encrypted inside a `ServerEncrypted` wrapper.
    WorldEncrypted,
}

/// One serialized message body awaiting an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn packet<P: Packet>(packet: &P) -> Self {
        Self {
            opcode: P::OPCODE,
            payload: packet::encode(packet),
        }
    }
}

#[derive(Debug)]
pub enum Directive {
    Ignore,
    Reply(Reply, Envelope),
    ReplyMany(Vec<Reply>, Envelope),
}

/// Why a connection is being closed; these names are what operators see
/// in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    InvalidSession,
    SessionExpired,
    AccountMismatch,
    CryptoFault,
    UnknownOpcode,
    OversizedFrame,
    PacketTooShort,
    RateLimited,
    Denied,
    Logout,
    Handoff,
    WriteOverflow,
    Idle,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSession => "invalid_session",
            Self::SessionExpired => "session_expired",
            Self::AccountMismatch => "account_mismatch",
            Self::CryptoFault => "crypto_fault",
            Self::UnknownOpcode => "unknown_opcode",
            Self::OversizedFrame => "oversized_frame",
            Self::PacketTooShort => "packet_too_short",
            Self::RateLimited => "rate_limited",
            Self::Denied => "denied",
            Self::Logout => "logout",
            Self::Handoff => "handoff",
            Self::WriteOverflow => "write_overflow",
            Self::Idle => "idle",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a handler wants done. The connection task installs the
/// cipher first, then serializes the directive, then routes broadcasts
/// and evictions, then honors `hangup`.
pub struct Outcome {
    pub directive: Directive,
    /// Key material for the send/receive cipher pair; installed before
    /// the directive is serialized so a handler can pick an encrypted
    /// envelope for its own replies.
    pub install_cipher: Option<Vec<u8>>,
    /// `(account id, message)` pairs wrapped world-encrypted by each
    /// recipient's own connection.
    pub broadcasts: Vec<(u64, Reply)>,
    /// A stale connection to close (last-writer-wins registration).
    pub evict_connection: Option<u64>,
    pub hangup: Option<CloseReason>,
}

impl Outcome {
    pub fn ignore() -> Self {
        Self {
            directive: Directive::Ignore,
            install_cipher: None,
            broadcasts: Vec::new(),
            evict_connection: None,
            hangup: None,
        }
    }

    pub fn reply(reply: Reply, envelope: Envelope) -> Self {
        Self {
            directive: Directive::Reply(reply, envelope),
            ..Self::ignore()
        }
    }

    pub fn reply_many(replies: Vec<Reply>, envelope: Envelope) -> Self {
        Self {
            directive: Directive::ReplyMany(replies, envelope),
            ..Self::ignore()
        }
    }

    pub fn with_cipher(mut self, material: impl Into<Vec<u8>>) -> Self {
        self.install_cipher = Some(material.into());
        self
    }

    pub fn with_broadcast(mut self, account_id: u64, reply: Reply) -> Self {
        self.broadcasts.push((account_id, reply));
        self
    }

    pub fn with_eviction(mut self, connection_id: u64) -> Self {
        self.evict_connection = Some(connection_id);
        self
    }

    pub fn then_close(mut self, reason: CloseReason) -> Self {
        self.hangup = Some(reason);
        self
    }
}
