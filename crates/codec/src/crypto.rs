//! Handshake cryptography.
//!
//! The auth service verifies SRP-6 client proofs on the RFC 5054
//! 1024-bit group with SHA-256 as H. The realm and world services key a
//! byte-oriented stream cipher from the 16-byte session ticket. Tickets,
//! nonces and ephemerals come from the process CSPRNG.

use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::Error;

pub const TICKET_SIZE: usize = 16;
pub const SALT_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 128;
pub const CLIENT_PROOF_SIZE: usize = 32;
pub const SERVER_PROOF_SIZE: usize = 20;
pub const SESSION_KEY_SIZE: usize = 32;

/// RFC 5054, appendix A: the 1024-bit group prime. The client's `A` and
/// the server's `B` are both 128-byte values on this group.
#[rustfmt::skip]
static N_BYTES: [u8; PUBLIC_KEY_SIZE] = [
    0xee, 0xaf, 0x0a, 0xb9, 0xad, 0xb3, 0x8d, 0xd6,
    0x9c, 0x33, 0xf8, 0x0a, 0xfa, 0x8f, 0xc5, 0xe8,
    0x60, 0x72, 0x61, 0x87, 0x75, 0xff, 0x3c, 0x0b,
    0x9e, 0xa2, 0x31, 0x4c, 0x9c, 0x25, 0x65, 0x76,
    0xd6, 0x74, 0xdf, 0x74, 0x96, 0xea, 0x81, 0xd3,
    0x38, 0x3b, 0x48, 0x13, 0xd6, 0x92, 0xc6, 0xe0,
    0xe0, 0xd5, 0xd8, 0xe2, 0x50, 0xb9, 0x8b, 0xe4,
    0x8e, 0x49, 0x5c, 0x1d, 0x60, 0x89, 0xda, 0xd1,
    0x5d, 0xc7, 0xd7, 0xb4, 0x61, 0x54, 0xd6, 0xb6,
    0xce, 0x8e, 0xf4, 0xad, 0x69, 0xb1, 0x5d, 0x49,
    0x82, 0x55, 0x9b, 0x29, 0x7b, 0xcf, 0x18, 0x85,
    0xc5, 0x29, 0xf5, 0x66, 0x66, 0x0e, 0x57, 0xec,
    0x68, 0xed, 0xbc, 0x3c, 0x05, 0x72, 0x6c, 0xc0,
    0x2f, 0xd4, 0xcb, 0xf4, 0x97, 0x6e, 0xaa, 0x9a,
    0xfd, 0x51, 0x38, 0xfe, 0x83, 0x76, 0x43, 0x5b,
    0x9f, 0xc6, 0x1d, 0x2f, 0xc0, 0xeb, 0x06, 0xe3,
];

fn prime() -> BigUint {
    BigUint::from_bytes_be(&N_BYTES)
}

fn generator() -> BigUint {
    BigUint::from(2u32)
}

fn h(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Left-pad a group element to the 128-byte wire width.
fn pad(value: &BigUint) -> [u8; PUBLIC_KEY_SIZE] {
    let raw = value.to_bytes_be();
    let mut out = [0u8; PUBLIC_KEY_SIZE];
    out[PUBLIC_KEY_SIZE - raw.len()..].copy_from_slice(&raw);
    out
}

/// `k = H(N ‖ PAD(g))`, the SRP-6 multiplier.
fn multiplier() -> BigUint {
    BigUint::from_bytes_be(&h(&[&N_BYTES, &pad(&generator())]))
}

/// `x = H(s ‖ H(identity ":" password))`.
pub fn private_key(identity: &str, password: &str, salt: &[u8]) -> BigUint {
    let inner = h(&[identity.as_bytes(), b":", password.as_bytes()]);
    BigUint::from_bytes_be(&h(&[salt, &inner]))
}

/// `v = g^x mod N`, the value the account store persists.
pub fn compute_verifier(identity: &str, password: &str, salt: &[u8]) -> [u8; PUBLIC_KEY_SIZE] {
    let x = private_key(identity, password, salt);
    pad(&generator().modpow(&x, &prime()))
}

/// The outcome of a successful proof exchange.
pub struct Srp6Evidence {
    pub session_key: [u8; SESSION_KEY_SIZE],
    pub server_proof: [u8; SERVER_PROOF_SIZE],
}

/// Server side of the SRP-6 exchange for one account.
///
/// The ephemeral `b` is derived from a server-private seed so that `B`
/// is stable for an account within a process lifetime; the client hello
/// carries `A` and `M1` in a single round against that `B`. Proof
/// verification is constant time.
pub struct Srp6Server {
    identity_hash: [u8; 32],
    salt: Vec<u8>,
    verifier: BigUint,
    b: BigUint,
    b_pub: BigUint,
}

impl Srp6Server {
    pub fn new(identity: &str, salt: &[u8], verifier: &[u8], seed: &[u8]) -> Self {
        let n = prime();
        let verifier = BigUint::from_bytes_be(verifier);

        let b = BigUint::from_bytes_be(&h(&[seed, identity.as_bytes(), salt])) % &n;
        let b_pub = (multiplier() * &verifier + generator().modpow(&b, &n)) % &n;

        Self {
            identity_hash: h(&[identity.as_bytes()]),
            salt: salt.to_vec(),
            verifier,
            b,
            b_pub,
        }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        pad(&self.b_pub)
    }

    /// Verify the client's `(A, M1)` evidence.
    ///
    /// On success yields the shared session key `K = H(PAD(S))` and the
    /// 20-byte server proof the wire format carries. `A ≡ 0 (mod N)` is
    /// rejected before any exponentiation.
    pub fn verify(
        &self,
        a_pub: &[u8; PUBLIC_KEY_SIZE],
        client_proof: &[u8; CLIENT_PROOF_SIZE],
    ) -> Result<Srp6Evidence, Error> {
        let n = prime();
        let a = BigUint::from_bytes_be(a_pub);
        if (&a % &n).is_zero() {
            return Err(Error::DegenerateKey);
        }

        let u = BigUint::from_bytes_be(&h(&[&pad(&a), &pad(&self.b_pub)]));
        let s = (&a * self.verifier.modpow(&u, &n)).modpow(&self.b, &n);
        let session_key = h(&[&pad(&s)]);

        let n_hash = h(&[&N_BYTES]);
        let g_hash = h(&[&pad(&generator())]);
        let mut group_hash = [0u8; 32];
        for (out, (lhs, rhs)) in group_hash.iter_mut().zip(n_hash.iter().zip(g_hash.iter())) {
            *out = lhs ^ rhs;
        }

        let expected = h(&[
            &group_hash,
            &self.identity_hash,
            &self.salt,
            &pad(&a),
            &pad(&self.b_pub),
            &session_key,
        ]);

        if !ct_eq(&expected, client_proof) {
            return Err(Error::InvalidEvidence);
        }

        let full = h(&[&pad(&a), client_proof, &session_key]);
        let mut server_proof = [0u8; SERVER_PROOF_SIZE];
        server_proof.copy_from_slice(&full[..SERVER_PROOF_SIZE]);

        Ok(Srp6Evidence {
            session_key,
            server_proof,
        })
    }
}

/// Client side of the exchange, for interoperability tests and the
/// login probe tooling. Production connections never construct this;
/// the server only ever verifies.
pub struct Srp6Client {
    a: BigUint,
}

impl Srp6Client {
    /// `a_seed` fixes the client ephemeral so probes are reproducible.
    pub fn new(a_seed: &[u8]) -> Self {
        Self {
            a: BigUint::from_bytes_be(&h(&[b"client-ephemeral", a_seed])),
        }
    }

    /// Compute `(A, M1, K)` against the server's public `B`.
    pub fn evidence(
        &self,
        identity: &str,
        password: &str,
        salt: &[u8],
        server_public: &[u8; PUBLIC_KEY_SIZE],
    ) -> (
        [u8; PUBLIC_KEY_SIZE],
        [u8; CLIENT_PROOF_SIZE],
        [u8; SESSION_KEY_SIZE],
    ) {
        let n = prime();
        let g = generator();

        let a_pub = g.modpow(&self.a, &n);
        let x = private_key(identity, password, salt);
        let u = BigUint::from_bytes_be(&h(&[&pad(&a_pub), server_public]));

        // S = (B - k * g^x) ^ (a + u * x) mod N
        let kgx = (multiplier() * g.modpow(&x, &n)) % &n;
        let base = (BigUint::from_bytes_be(server_public) + &n - kgx) % &n;
        let secret = base.modpow(&(&self.a + u * x), &n);
        let session_key = h(&[&pad(&secret)]);

        let n_hash = h(&[&N_BYTES]);
        let g_hash = h(&[&pad(&g)]);
        let mut group_hash = [0u8; 32];
        for (out, (lhs, rhs)) in group_hash.iter_mut().zip(n_hash.iter().zip(g_hash.iter())) {
            *out = lhs ^ rhs;
        }

        let proof = h(&[
            &group_hash,
            &h(&[identity.as_bytes()]),
            salt,
            &pad(&a_pub),
            server_public,
            &session_key,
        ]);

        (pad(&a_pub), proof, session_key)
    }

    /// Check the server's truncated `M2` against our own transcript.
    pub fn verify_server_proof(
        a_pub: &[u8; PUBLIC_KEY_SIZE],
        client_proof: &[u8; CLIENT_PROOF_SIZE],
        session_key: &[u8; SESSION_KEY_SIZE],
        server_proof: &[u8; SERVER_PROOF_SIZE],
    ) -> bool {
        let full = h(&[a_pub, client_proof, session_key]);
        ct_eq(&full[..SERVER_PROOF_SIZE], server_proof)
    }
}

const CIPHER_TAG: &[u8] = b"wildstar-session";

/// `H(tag ‖ material)` — the cipher key for a ticket or session key.
pub fn derive_cipher_key(material: &[u8]) -> [u8; 32] {
    h(&[CIPHER_TAG, material])
}

/// ARC4-style byte stream cipher.
///
/// One pass, encryption and decryption are the same operation, and the
/// keystream advances one step per byte. State is never rewound; a
/// desynchronized stream is unrecoverable by design of the protocol, so
/// callers terminate the connection on any structural fault after a
/// decrypt.
///
/// # Test
///
/// ```
/// use wildstar_server_codec::crypto::StreamCipher;
///
/// let ticket = [7u8; 16];
/// let mut sealer = StreamCipher::new(&ticket);
/// let mut opener = StreamCipher::new(&ticket);
///
/// let mut data = *b"across the fray";
/// sealer.apply(&mut data);
/// assert_ne!(&data, b"across the fray");
///
/// opener.apply(&mut data);
/// assert_eq!(&data, b"across the fray");
/// ```
pub struct StreamCipher {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl StreamCipher {
    /// Key a cipher from raw material (a 16-byte ticket or a 32-byte
    /// session key) through [`derive_cipher_key`].
    pub fn new(material: &[u8]) -> Self {
        Self::from_key(&derive_cipher_key(material))
    }

    fn from_key(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (index, slot) in state.iter_mut().enumerate() {
            *slot = index as u8;
        }

        let mut j = 0u8;
        for i in 0..256 {
            j = j
                .wrapping_add(state[i])
                .wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }

        Self { state, i: 0, j: 0 }
    }

    /// Encrypt or decrypt `data` in place, advancing the keystream once
    /// per byte.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);

            let index = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
            *byte ^= self.state[index as usize];
        }
    }
}

/// The per-connection send/receive cipher states. Both directions key
/// from the same material but advance independently.
pub struct CipherPair {
    pub send: StreamCipher,
    pub recv: StreamCipher,
}

impl CipherPair {
    pub fn new(material: &[u8]) -> Self {
        Self {
            send: StreamCipher::new(material),
            recv: StreamCipher::new(material),
        }
    }
}

/// CSPRNG bytes; used for tickets, salts and seeds.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rng().fill(&mut out[..]);
    out
}

pub fn random_ticket() -> [u8; TICKET_SIZE] {
    random_bytes::<TICKET_SIZE>()
}

/// Constant-time equality for proofs and tickets.
pub fn ct_eq(lhs: &[u8], rhs: &[u8]) -> bool {
    if lhs.len() != rhs.len() {
        return false;
    }

    let mut diff = 0u8;
    for (a, b) in lhs.iter().zip(rhs.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honest_client_verifies_and_keys_agree() {
        let salt = [3u8; SALT_SIZE];
        let verifier = compute_verifier("alice@example.com", "hunter2", &salt);
        let server = Srp6Server::new("alice@example.com", &salt, &verifier, b"seed");

        let client = Srp6Client::new(b"probe");
        let (a_pub, m1, client_key) =
            client.evidence("alice@example.com", "hunter2", &salt, &server.public_key());

        let evidence = server.verify(&a_pub, &m1).expect("proof should verify");
        assert_eq!(evidence.session_key, client_key);

        // M2 is checkable by the client from its own A, M1 and K.
        assert!(Srp6Client::verify_server_proof(
            &a_pub,
            &m1,
            &client_key,
            &evidence.server_proof
        ));
    }

    #[test]
    fn wrong_password_is_invalid_evidence() {
        let salt = [3u8; SALT_SIZE];
        let verifier = compute_verifier("alice@example.com", "hunter2", &salt);
        let server = Srp6Server::new("alice@example.com", &salt, &verifier, b"seed");

        let client = Srp6Client::new(b"probe");
        let (a_pub, m1, _) =
            client.evidence("alice@example.com", "wrong", &salt, &server.public_key());

        assert!(matches!(server.verify(&a_pub, &m1), Err(Error::InvalidEvidence)));
    }

    #[test]
    fn zero_public_key_is_rejected() {
        let salt = [3u8; SALT_SIZE];
        let verifier = compute_verifier("alice@example.com", "hunter2", &salt);
        let server = Srp6Server::new("alice@example.com", &salt, &verifier, b"seed");

        let zero = [0u8; PUBLIC_KEY_SIZE];
        assert!(matches!(
            server.verify(&zero, &[0u8; CLIENT_PROOF_SIZE]),
            Err(Error::DegenerateKey)
        ));

        // A = N is congruent to zero as well.
        assert!(matches!(
            server.verify(&N_BYTES, &[0u8; CLIENT_PROOF_SIZE]),
            Err(Error::DegenerateKey)
        ));
    }

    #[test]
    fn cipher_is_deterministic_per_key() {
        let ticket = [0x42u8; TICKET_SIZE];
        let mut first = StreamCipher::new(&ticket);
        let mut second = StreamCipher::new(&ticket);

        let mut lhs = [0u8; 64];
        let mut rhs = [0u8; 64];
        first.apply(&mut lhs);
        second.apply(&mut rhs);

        assert_eq!(lhs, rhs);

        let mut other = StreamCipher::new(&[0x43u8; TICKET_SIZE]);
        let mut third = [0u8; 64];
        other.apply(&mut third);
        assert_ne!(lhs, third);
    }

    #[test]
    fn cipher_state_advances_per_byte() {
        let ticket = [9u8; TICKET_SIZE];
        let mut whole = StreamCipher::new(&ticket);
        let mut split = StreamCipher::new(&ticket);

        let mut all = [0u8; 32];
        whole.apply(&mut all);

        let mut head = [0u8; 10];
        let mut tail = [0u8; 22];
        split.apply(&mut head);
        split.apply(&mut tail);

        assert_eq!(&all[..10], &head);
        assert_eq!(&all[10..], &tail);
    }

    #[test]
    fn ct_eq_checks_length_and_content() {
        assert!(ct_eq(b"ticket", b"ticket"));
        assert!(!ct_eq(b"ticket", b"tickex"));
        assert!(!ct_eq(b"ticket", b"ticke"));
    }
}
