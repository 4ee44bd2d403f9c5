//! Tenant authentication: credential storage and bearer tokens.
//!
//! Provides:
//! - Tenant registration with PBKDF2-HMAC-SHA256 (100k rounds) over a
//!   per-record salt combined with a process-wide fixed secret
//! - A JSON credential file rewritten atomically on every creation
//! - Stateless HS256 tokens carrying `tenant_id` and `exp`
//!
//! ## Design Decisions
//! - Tokens have no server-side record, so there is no revocation; expiry is
//!   the only way a token stops being valid.
//! - A corrupt credential file aborts startup instead of being replaced with
//!   an empty store.

pub mod error;
pub mod service;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use service::{AuthService, IssuedToken, DEFAULT_TOKEN_TTL_SECS};
pub use store::{CredentialStore, TenantRecord};
pub use token::{Claims, TokenSigner};
