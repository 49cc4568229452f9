//! Long-term identity keypair.
//!
//! An Ed25519 keypair persisted to `identity.dat` as the raw concatenation
//! `pk || sk` (32 + 64 = 96 bytes), generated on first run and immutable
//! thereafter. The lowercase hex of `pk` is the node's canonical identity
//! string everywhere: friend entries, chat ids, vector-clock node ids, and
//! the handshake bytes on the wire.

use std::fs;
use std::path::Path;

use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::error::Error;

/// Raw public key length in bytes.
pub const PK_LEN: usize = 32;
/// Persisted secret-key length in bytes (Ed25519 keypair encoding).
pub const SK_LEN: usize = 64;
/// Length of the hex identity string.
pub const PK_HEX_LEN: usize = PK_LEN * 2;

/// The local node's long-term keypair.
#[derive(Clone, Debug)]
pub struct Identity {
    signing: SigningKey,
    pk_hex: String,
}

impl Identity {
    /// Load the identity from `path`, or generate and persist a fresh one
    /// if the file does not exist. Returns `true` when a new identity was
    /// created. An existing file that is not a valid 96-byte keypair is a
    /// fatal error, since regenerating would silently change the node's ID.
    pub fn load_or_generate(path: &Path) -> Result<(Self, bool), Error> {
        if path.exists() {
            let data = fs::read(path)?;
            let identity = Self::from_file_bytes(&data).ok_or(Error::CorruptIdentity {
                path: path.to_path_buf(),
            })?;
            return Ok((identity, false));
        }

        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        let identity = Self::from_signing(signing);

        // Write to a sibling temp file and rename, so a crash mid-write
        // cannot leave a truncated identity behind.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, identity.file_bytes())?;
        fs::rename(&tmp, path)?;
        Ok((identity, true))
    }

    fn from_signing(signing: SigningKey) -> Self {
        let pk_hex = hex::encode(signing.verifying_key().as_bytes());
        Self { signing, pk_hex }
    }

    fn from_file_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != PK_LEN + SK_LEN {
            return None;
        }
        let keypair: [u8; SK_LEN] = data[PK_LEN..].try_into().ok()?;
        let signing = SigningKey::from_keypair_bytes(&keypair).ok()?;
        // The leading pk must match the keypair's own public half.
        if signing.verifying_key().as_bytes() != &data[..PK_LEN] {
            return None;
        }
        Some(Self::from_signing(signing))
    }

    fn file_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PK_LEN + SK_LEN);
        out.extend_from_slice(self.signing.verifying_key().as_bytes());
        out.extend_from_slice(&self.signing.to_keypair_bytes());
        out
    }

    /// The canonical identity string: lowercase hex of the public key.
    pub fn pk_hex(&self) -> &str {
        &self.pk_hex
    }

    /// Raw public key bytes, as sent in the P2P handshake.
    pub fn public_key_bytes(&self) -> [u8; PK_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

/// Parse a remote public key from its raw handshake bytes.
pub(crate) fn verifying_key_from_bytes(bytes: &[u8; PK_LEN]) -> Option<VerifyingKey> {
    VerifyingKey::from_bytes(bytes).ok()
}

/// Parse a remote public key from its hex identity string.
pub(crate) fn verifying_key_from_hex(pk_hex: &str) -> Option<VerifyingKey> {
    if !is_valid_pk_hex(pk_hex) {
        return None;
    }
    let bytes: [u8; PK_LEN] = hex::decode(pk_hex).ok()?.try_into().ok()?;
    verifying_key_from_bytes(&bytes)
}

/// A well-formed identity string: exactly 64 lowercase hex characters.
pub(crate) fn is_valid_pk_hex(pk_hex: &str) -> bool {
    pk_hex.len() == PK_HEX_LEN
        && pk_hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
