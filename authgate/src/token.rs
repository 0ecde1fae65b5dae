//! Access-credential minting and verification, plus generation of the
//! opaque token values used for refresh tokens and pending actions.
//!
//! Access credentials are JWTs signed with HMAC-SHA512 using the
//! process-wide secret. Verification pins the algorithm: a token whose
//! header claims `none`, `HS256`, or any asymmetric algorithm is rejected
//! outright, closing the classic alg-confusion downgrade.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::models::User;

/// The only signature algorithm this process mints or accepts.
const ALG: Algorithm = Algorithm::HS512;

/// The claims carried by an access credential. In-flight only, never
/// persisted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AccessClaims {
    pub email: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid access credential: {0}")]
pub struct VerifyError(#[from] jsonwebtoken::errors::Error);

/// Mints and verifies access credentials with one symmetric key.
pub struct AccessTokenMint {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
    validation: Validation,
}

impl AccessTokenMint {
    pub fn new(signing_key: &str, lifetime: Duration) -> Self {
        let mut validation = Validation::new(ALG);
        // Expiry is strict; no clock-skew grace.
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
            lifetime,
            validation,
        }
    }

    /// Mint a fresh credential for `user`, expiring `lifetime` from now.
    pub fn mint(&self, user: &User) -> Result<String, VerifyError> {
        let claims = AccessClaims {
            email: user.email.clone(),
            user_id: user.id.to_string(),
            exp: unix_now().saturating_add(self.lifetime.as_secs()),
        };
        let token =
            jsonwebtoken::encode(&Header::new(ALG), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Verify signature, algorithm, and expiry; returns the claims.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, VerifyError> {
        let data = jsonwebtoken::decode::<AccessClaims>(
            token,
            &self.decoding_key,
            &self.validation,
        )?;
        Ok(data.claims)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A random opaque token: 32 lowercase hex chars, 128 bits of entropy.
/// Used for refresh tokens and pending-action confirmation tokens.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{:032x}", u128::from_be_bytes(bytes))
}
