// Password hashing
//
// Stored format: `pbkdf2-sha256$<iterations>$<salt b64>$<hash b64>` (standard alphabet, no
// padding). Verification re-derives with the stored iteration count, so the default can be
// raised without invalidating existing hashes.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;
pub const DEFAULT_ITERATIONS: u32 = 210_000;

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;

    fn verify(&self, password: &str, encoded: &str) -> Result<bool>;
}

pub struct Pbkdf2PasswordHasher {
    iterations: NonZeroU32,
    rng: SystemRandom,
}

impl Default for Pbkdf2PasswordHasher {
    fn default() -> Self {
        Self::with_iterations(NonZeroU32::new(DEFAULT_ITERATIONS).unwrap_or(NonZeroU32::MIN))
    }
}

impl Pbkdf2PasswordHasher {
    pub fn with_iterations(iterations: NonZeroU32) -> Self {
        Self {
            iterations,
            rng: SystemRandom::new(),
        }
    }
}

impl PasswordHasher for Pbkdf2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_BYTES];
        self.rng
            .fill(&mut salt)
            .map_err(|_| anyhow::anyhow!("Failed to generate password salt"))?;

        let mut hash = [0u8; HASH_BYTES];
        pbkdf2::derive(ALGORITHM, self.iterations, &salt, password.as_bytes(), &mut hash);

        Ok(format!(
            "{}${}${}${}",
            SCHEME,
            self.iterations,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(hash)
        ))
    }

    fn verify(&self, password: &str, encoded: &str) -> Result<bool> {
        let parts: Vec<&str> = encoded.split('$').collect();
        let [scheme, iterations, salt, hash] = parts.as_slice() else {
            anyhow::bail!("Malformed password hash");
        };
        if *scheme != SCHEME {
            anyhow::bail!("Unsupported password hash scheme '{}'", scheme);
        }
        let iterations: NonZeroU32 = iterations
            .parse()
            .context("Invalid iteration count in password hash")?;
        let salt = STANDARD_NO_PAD
            .decode(salt)
            .context("Invalid salt encoding in password hash")?;
        let hash = STANDARD_NO_PAD
            .decode(hash)
            .context("Invalid hash encoding in password hash")?;

        // Constant-time comparison inside ring.
        Ok(pbkdf2::verify(ALGORITHM, iterations, &salt, password.as_bytes(), &hash).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Pbkdf2PasswordHasher {
        Pbkdf2PasswordHasher::with_iterations(NonZeroU32::new(1_000).unwrap())
    }

    #[test]
    fn hash_has_expected_shape() {
        let encoded = fast().hash("correct horse").unwrap();
        let parts: Vec<&str> = encoded.split('$').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "pbkdf2-sha256");
        assert_eq!(parts[1], "1000");
        assert!(!encoded.contains("correct horse"));
    }

    #[test]
    fn verify_accepts_right_and_rejects_wrong_password() {
        let hasher = fast();
        let encoded = hasher.hash("correct horse").unwrap();
        assert!(hasher.verify("correct horse", &encoded).unwrap());
        assert!(!hasher.verify("wrong horse", &encoded).unwrap());
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = fast();
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn verify_uses_stored_iteration_count() {
        let encoded = fast().hash("pw-123456").unwrap();
        assert!(Pbkdf2PasswordHasher::default()
            .verify("pw-123456", &encoded)
            .unwrap());
    }

    #[test]
    fn malformed_hashes_are_errors() {
        let hasher = fast();
        assert!(hasher.verify("x", "not-a-hash").is_err());
        assert!(hasher.verify("x", "bcrypt$1$a$b").is_err());
        assert!(hasher.verify("x", "pbkdf2-sha256$0$a$b").is_err());
    }
}
