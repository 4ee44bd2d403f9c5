use super::error::AuthError;
use super::store::{CredentialStore, TenantRecord};
use super::token::{now_unix, Claims, TokenSigner};
use crate::config::AuthConfig;
use serde::Serialize;
use std::sync::Arc;

/// Default token lifetime: one hour.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// A freshly minted token plus its expiry claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

/// Bridges credential verification to token issuance.
///
/// The store is injected at construction; there is no process-global
/// instance.
#[derive(Debug)]
pub struct AuthService {
    store: Arc<CredentialStore>,
    signer: TokenSigner,
    default_ttl_secs: i64,
}

impl AuthService {
    pub fn new(store: Arc<CredentialStore>, signer: TokenSigner, default_ttl_secs: i64) -> Self {
        Self {
            store,
            signer,
            default_ttl_secs,
        }
    }

    /// Open the configured store and build the signer. Any failure here is
    /// meant to abort startup.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let store = CredentialStore::open(&config.users_path, config.fixed_salt.expose())?;
        let signer = TokenSigner::new(config.secret_key.expose().as_bytes());
        Ok(Self::new(Arc::new(store), signer, config.token_ttl_secs))
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn default_ttl_secs(&self) -> i64 {
        self.default_ttl_secs
    }

    pub fn create_user(&self, tenant_id: &str, password: &str) -> Result<TenantRecord, AuthError> {
        self.store.create_user(tenant_id, password)
    }

    /// Verify credentials and mint a token with the default lifetime.
    pub fn authenticate(&self, tenant_id: &str, password: &str) -> Result<IssuedToken, AuthError> {
        if !self.store.verify_credentials(tenant_id, password) {
            tracing::warn!(tenant_id, "Authentication failed");
            return Err(AuthError::InvalidCredentials);
        }
        self.generate_token(tenant_id, self.default_ttl_secs)
    }

    /// Mint a token expiring `ttl_secs` from now. Non-positive values give a
    /// token that is already expired.
    pub fn generate_token(&self, tenant_id: &str, ttl_secs: i64) -> Result<IssuedToken, AuthError> {
        let claims = Claims {
            tenant_id: tenant_id.to_owned(),
            exp: now_unix().saturating_add(ttl_secs),
        };
        let token = self.signer.sign(&claims)?;
        tracing::debug!(tenant_id, exp = claims.exp, "Token issued");
        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.signer.verify(token)
    }
}
