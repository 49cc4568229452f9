//! Session-key derivation and frame encryption.
//!
//! Both sides of a session derive the same 32-byte symmetric key from their
//! long-term Ed25519 keys: the private scalar and the peer's public key are
//! mapped to their X25519 forms, the Diffie-Hellman shared secret is run
//! through HKDF-SHA256, and the result keys an XChaCha20-Poly1305 cipher.
//! No per-session handshake round trip is needed: sending the raw public
//! key is enough for either side to compute the key locally.
//!
//! Sealed frame layout (before the transport length prefix):
//!
//! ```text
//! nonce(24) || mac(16) || ciphertext
//! ```
//!
//! Nonces are freshly random per seal.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha256;

pub(crate) const NONCE_LEN: usize = 24;
pub(crate) const TAG_LEN: usize = 16;

const KDF_INFO: &[u8] = b"zerolink-session-v1";

/// A derived symmetric session key.
#[derive(Clone)]
pub(crate) struct SharedKey([u8; 32]);

/// Compute the symmetric session key shared with `remote`.
///
/// The Ed25519 secret is reduced to its clamped X25519 scalar and the
/// remote verifying key mapped through the Edwards→Montgomery birational
/// map, so `derive(a, B) == derive(b, A)`.
pub(crate) fn derive_shared_key(own: &SigningKey, remote: &VerifyingKey) -> SharedKey {
    let secret = x25519_dalek::StaticSecret::from(own.to_scalar_bytes());
    let public = x25519_dalek::PublicKey::from(remote.to_montgomery().to_bytes());
    let dh = secret.diffie_hellman(&public);

    let hk = Hkdf::<Sha256>::new(None, dh.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(KDF_INFO, &mut key)
        .expect("32 bytes is a valid HKDF output length");
    SharedKey(key)
}

/// Authenticated-encrypt `plaintext` under `key` into a sealed frame body.
pub(crate) fn seal(key: &SharedKey, plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let sealed = cipher
        .encrypt((&nonce_bytes).into(), plaintext)
        .expect("XChaCha20-Poly1305 encryption is infallible for in-memory buffers");

    // The AEAD appends the tag; the wire wants it in front of the ciphertext.
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
    let mut frame = Vec::with_capacity(NONCE_LEN + sealed.len());
    frame.extend_from_slice(&nonce_bytes);
    frame.extend_from_slice(tag);
    frame.extend_from_slice(ciphertext);
    frame
}

/// Open a sealed frame body. Returns `None` for frames that are too short
/// or fail authentication; the caller drops them and keeps the session.
pub(crate) fn open(key: &SharedKey, frame: &[u8]) -> Option<Vec<u8>> {
    if frame.len() < NONCE_LEN + TAG_LEN {
        return None;
    }
    let (nonce, rest) = frame.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut sealed = Vec::with_capacity(rest.len());
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let nonce_arr: [u8; NONCE_LEN] = nonce.try_into().ok()?;
    cipher.decrypt((&nonce_arr).into(), sealed.as_slice()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> SigningKey {
        SigningKey::generate(&mut rand::rngs::OsRng)
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let alice = keypair();
        let bob = keypair();
        let k1 = derive_shared_key(&alice, &bob.verifying_key());
        let k2 = derive_shared_key(&bob, &alice.verifying_key());
        assert_eq!(k1.0, k2.0);
    }

    #[test]
    fn different_peers_derive_different_keys() {
        let alice = keypair();
        let bob = keypair();
        let carol = keypair();
        let ab = derive_shared_key(&alice, &bob.verifying_key());
        let ac = derive_shared_key(&alice, &carol.verifying_key());
        assert_ne!(ab.0, ac.0);
    }

    #[test]
    fn seal_open_round_trip() {
        let alice = keypair();
        let bob = keypair();
        let key = derive_shared_key(&alice, &bob.verifying_key());

        let plaintext = br#"{"type":"chat","uid":"u","content":"hi"}"#;
        let frame = seal(&key, plaintext);
        assert_eq!(frame.len(), NONCE_LEN + TAG_LEN + plaintext.len());
        assert_eq!(open(&key, &frame).unwrap(), plaintext);
    }

    #[test]
    fn opening_with_the_peer_key_works() {
        let alice = keypair();
        let bob = keypair();
        let frame = seal(&derive_shared_key(&alice, &bob.verifying_key()), b"hello");
        let opened = open(&derive_shared_key(&bob, &alice.verifying_key()), &frame);
        assert_eq!(opened.unwrap(), b"hello");
    }

    #[test]
    fn tampered_frames_rejected() {
        let alice = keypair();
        let bob = keypair();
        let key = derive_shared_key(&alice, &bob.verifying_key());

        let mut frame = seal(&key, b"payload");
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(open(&key, &frame).is_none());
    }

    #[test]
    fn short_frames_rejected() {
        let key = derive_shared_key(&keypair(), &keypair().verifying_key());
        assert!(open(&key, &[0u8; NONCE_LEN + TAG_LEN - 1]).is_none());
        assert!(open(&key, &[]).is_none());
    }

    #[test]
    fn nonces_are_fresh_per_seal() {
        let key = derive_shared_key(&keypair(), &keypair().verifying_key());
        let a = seal(&key, b"same");
        let b = seal(&key, b"same");
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }
}
