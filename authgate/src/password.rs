//! Password hashing and random password generation.

use rand::Rng;

/// Characters used for generated passwords and default keys. Ambiguous
/// glyphs (`0`, `O`, `1`, `l`, `I`) are excluded for legibility, since reset
/// passwords are read out of an email by a human.
const PASSWORD_CHARS: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Length of the replacement password mailed out by a password reset.
pub const RESET_PASSWORD_LEN: usize = 8;

pub fn hash_password(
    password: &str,
    cost: u32,
) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

/// Whether `password` matches `hash`. Any error (e.g. a malformed hash)
/// counts as a mismatch.
pub fn verify_password(hash: &str, password: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub fn generate_password(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| PASSWORD_CHARS[rng.gen_range(0..PASSWORD_CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    /// Cheap rounds; cost/security is not under test.
    const TEST_COST: u32 = 4;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("12345678", TEST_COST).unwrap();
        assert_ne!(hash, "12345678");
        assert!(verify_password(&hash, "12345678"));
        assert!(!verify_password(&hash, "12345679"));
        assert!(!verify_password("not-a-bcrypt-hash", "12345678"));
    }

    #[test]
    fn generated_passwords_avoid_ambiguous_glyphs() {
        let password = generate_password(512);
        assert_eq!(password.len(), 512);
        for c in password.chars() {
            assert!(!"0O1lI".contains(c), "ambiguous char {c:?}");
            assert!(c.is_ascii_alphanumeric());
        }
    }
}
