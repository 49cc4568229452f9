//! Message-uid generation.
//!
//! Format: `<sender_pk_hex>-<unix_seconds>-<16 random bytes as hex>`.
//! The uid is the primary key of the message store; inserts are idempotent
//! on it, so collisions would silently drop messages; 128 bits of
//! randomness keeps that out of reach.

/// Generate a new message uid for the given sender.
pub(crate) fn generate(sender_pk_hex: &str) -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let random: [u8; 16] = rand::random();
    format!("{sender_pk_hex}-{secs}-{}", hex::encode(random))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK: &str = "9f8e7d6c5b4a39281706f5e4d3c2b1a09f8e7d6c5b4a39281706f5e4d3c2b1a0";

    #[test]
    fn uid_structure() {
        let uid = generate(PK);
        let mut parts = uid.splitn(3, '-');
        assert_eq!(parts.next(), Some(PK));
        let secs: u64 = parts.next().unwrap().parse().unwrap();
        assert!(secs > 1_700_000_000);
        let rand_hex = parts.next().unwrap();
        assert_eq!(rand_hex.len(), 32);
        assert!(rand_hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn uids_are_unique() {
        let a = generate(PK);
        let b = generate(PK);
        assert_ne!(a, b);
    }
}
