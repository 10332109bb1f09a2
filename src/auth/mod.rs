//! Component G: the auth gate, plus the ambient JWT/password stack for the
//! merchant dashboard surface that spec §1 treats as an external
//! collaborator ("credential hashing and JWT issuance").
//!
//! Two independent schemes share this module because both gate the same
//! `Merchant` identity: `Authorization: Bearer <public_id>:<secret>` for
//! the machine-facing payment endpoints, and a short-lived JWT for the
//! dashboard. Neither leaks which half of a failed check was wrong.

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::core::{ApiCredential, Merchant};
use crate::errors::{GatewayError, GatewayResult};
use crate::store::StoreGateway;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// merchant id
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct AuthService {
    store: Arc<dyn StoreGateway>,
    secret_key: String,
    access_token_expire_minutes: i64,
}

impl AuthService {
    pub fn new(store: Arc<dyn StoreGateway>, secret_key: String, access_token_expire_minutes: i64) -> Self {
        Self {
            store,
            secret_key,
            access_token_expire_minutes,
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<String>,
        company_name: Option<String>,
    ) -> GatewayResult<Merchant> {
        if self.store.get_merchant_by_email(email).await?.is_some() {
            return Err(GatewayError::Conflict("email already registered".into()));
        }

        let hashed = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|_| GatewayError::Internal)?;

        self.store
            .create_merchant(email, &hashed, full_name, company_name)
            .await
    }

    /// Verifies email/password and issues a short-lived access token.
    /// Unknown email and wrong password both yield `Unauthenticated` -
    /// bcrypt's constant-time comparison already prevents timing leaks
    /// between a wrong-password and a genuinely-unknown-hash check, so a
    /// dummy hash is verified against on a miss to keep both paths the
    /// same shape.
    pub async fn login(&self, email: &str, password: &str) -> GatewayResult<String> {
        let merchant = self.store.get_merchant_by_email(email).await?;

        let (hashed_password, is_active) = match &merchant {
            Some(m) => (m.hashed_password.clone(), m.is_active),
            None => (DUMMY_HASH.to_string(), false),
        };

        let password_ok = bcrypt::verify(password, &hashed_password).unwrap_or(false);

        if merchant.is_none() || !password_ok || !is_active {
            return Err(GatewayError::Unauthenticated);
        }

        self.issue_token(merchant.unwrap().id)
    }

    pub fn issue_token(&self, merchant_id: i64) -> GatewayResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: merchant_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.access_token_expire_minutes)).timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret_key.as_bytes()),
        )
        .map_err(|_| GatewayError::Internal)
    }

    /// Verifies a dashboard JWT and returns the authenticated merchant.
    pub async fn verify_token(&self, token: &str) -> GatewayResult<Merchant> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret_key.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| GatewayError::Unauthenticated)?;

        let merchant_id: i64 = data
            .claims
            .sub
            .parse()
            .map_err(|_| GatewayError::Unauthenticated)?;

        let merchant = self
            .store
            .get_merchant(merchant_id)
            .await?
            .ok_or(GatewayError::Unauthenticated)?;

        if !merchant.is_active {
            return Err(GatewayError::Unauthenticated);
        }

        Ok(merchant)
    }

    /// Parses `Authorization: Bearer <public_id>:<secret>`, looks up the
    /// credential, and verifies it. Every failure mode - malformed header,
    /// unknown public id, inactive credential, bad secret - returns the
    /// same `Unauthenticated` with no distinguishing text (spec §4.G).
    pub async fn authenticate_api_key(&self, header_value: &str) -> GatewayResult<ApiCredential> {
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(GatewayError::Unauthenticated)?;

        let (public_id, secret) = token.split_once(':').ok_or(GatewayError::Unauthenticated)?;

        let credential = self
            .store
            .get_api_credential_by_public_id(public_id)
            .await?
            .ok_or(GatewayError::Unauthenticated)?;

        if !credential.active {
            return Err(GatewayError::Unauthenticated);
        }

        let verified = bcrypt::verify(secret, &credential.secret_hash).unwrap_or(false);
        if !verified {
            return Err(GatewayError::Unauthenticated);
        }

        self.store.touch_api_credential(credential.id).await?;

        Ok(credential)
    }

    /// Issues a new API credential pair for `merchant_id`. The plaintext
    /// secret is returned exactly once - only its bcrypt hash is stored.
    pub async fn create_api_credential(&self, merchant_id: i64) -> GatewayResult<(ApiCredential, String)> {
        let public_id = format!("pk_{}", random_token(16));
        let secret = random_token(32);
        let secret_hash = bcrypt::hash(&secret, bcrypt::DEFAULT_COST).map_err(|_| GatewayError::Internal)?;

        let credential = self
            .store
            .create_api_credential(merchant_id, &public_id, &secret_hash)
            .await?;

        Ok((credential, secret))
    }
}

/// A bcrypt hash of an unguessable, never-issued password. Used as the
/// comparison target on a login miss so a nonexistent account and a
/// wrong password take the same code path.
const DUMMY_HASH: &str = "$2b$12$CwTycUXWue0Thq9StjUM0uJ8l8bN8eVexGJ0l8U9f2g9QY9Kx6b3S";

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_token_has_expected_hex_length() {
        assert_eq!(random_token(16).len(), 32);
    }

    #[test]
    fn random_tokens_are_distinct() {
        assert_ne!(random_token(16), random_token(16));
    }
}
