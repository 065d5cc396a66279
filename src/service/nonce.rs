use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::common::errors::{CropError, CropResult};
use crate::models::dto::IssuedNonce;

const NONCE_PURPOSE: &str = "batch-cropper-mutation";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NonceClaims {
    purpose: String,
    jti: String,
    exp: i64,
}

/// Issues and checks the anti-forgery tokens every mutating call carries.
pub struct NonceKeeper {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl NonceKeeper {
    pub fn new(secret: &[u8], lifetime: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            lifetime,
        }
    }

    pub fn issue(&self) -> Result<IssuedNonce> {
        let expires_at = Utc::now()
            + TimeDelta::from_std(self.lifetime).context("nonce lifetime is out of range")?;
        let claims = NonceClaims {
            purpose: NONCE_PURPOSE.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to sign nonce")?;
        Ok(IssuedNonce { token, expires_at })
    }

    pub fn validate(&self, token: &str) -> CropResult<()> {
        if token.is_empty() {
            return Err(CropError::InvalidToken("missing".to_string()));
        }
        let data = decode::<NonceClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| CropError::InvalidToken(err.to_string()))?;
        if data.claims.purpose != NONCE_PURPOSE {
            return Err(CropError::InvalidToken(format!(
                "issued for `{}`",
                data.claims.purpose
            )));
        }
        Ok(())
    }
}
