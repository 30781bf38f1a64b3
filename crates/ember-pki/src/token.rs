//! Bootstrap token generation.

use rand::rngs::OsRng;
use rand::RngCore;

const VALID_BOOTSTRAP_TOKEN_CHARS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;

/// Generate a bootstrap token as an `(id, secret)` pair.
///
/// Draws 22 bytes from the OS random source and maps each byte into the
/// lowercase base36 alphabet, yielding a 6-character id and a 16-character
/// secret.
pub fn generate_bootstrap_token() -> (String, String) {
    let mut buf = [0u8; TOKEN_ID_LEN + TOKEN_SECRET_LEN];
    OsRng.fill_bytes(&mut buf);
    let token: String = buf
        .iter()
        .map(|b| VALID_BOOTSTRAP_TOKEN_CHARS[*b as usize % VALID_BOOTSTRAP_TOKEN_CHARS.len()] as char)
        .collect();
    (
        token[..TOKEN_ID_LEN].to_string(),
        token[TOKEN_ID_LEN..].to_string(),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn is_token_chars(s: &str) -> bool {
        s.bytes().all(|b| VALID_BOOTSTRAP_TOKEN_CHARS.contains(&b))
    }

    #[test]
    fn test_token_format() {
        let (id, secret) = generate_bootstrap_token();
        assert_eq!(id.len(), 6);
        assert_eq!(secret.len(), 16);
        assert!(is_token_chars(&id));
        assert!(is_token_chars(&secret));
    }

    #[test]
    fn test_no_duplicates_across_many_generations() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let (id, secret) = generate_bootstrap_token();
            assert!(seen.insert((id, secret)), "duplicate token generated");
        }
    }
}
