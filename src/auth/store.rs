//! File-backed tenant credential store.
//!
//! Layout on disk (`users.json`): a JSON object keyed by the string-encoded
//! record id, each value holding `tenant_id`, `password` (hex PBKDF2 output)
//! and `salt` (hex). The whole document is rewritten through a temp file and
//! an atomic rename on every creation, so write cost grows linearly with the
//! number of tenants.

use super::error::AuthError;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Salt byte length before hex encoding.
const SALT_BYTES: usize = 16;

/// PBKDF2-HMAC-SHA256 output length.
const HASH_BYTES: usize = 32;

/// Number of PBKDF2 rounds for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// Longest accepted tenant identifier, in characters.
const MAX_TENANT_ID_LEN: usize = 128;

/// Public view of a credential record. Never carries salt or hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantRecord {
    pub id: u64,
    pub tenant_id: String,
}

#[derive(Clone)]
struct CredentialRecord {
    tenant_id: String,
    salt: [u8; SALT_BYTES],
    password_hash: [u8; HASH_BYTES],
}

/// On-disk shape of one record.
#[derive(Serialize, Deserialize)]
struct StoredCredential {
    tenant_id: String,
    password: String,
    salt: String,
}

/// The document as written, entries in file order. Repeated id keys are
/// kept so `load_state` can refuse them instead of letting the last one win.
struct StoreDocument(Vec<(u64, StoredCredential)>);

impl<'de> Deserialize<'de> for StoreDocument {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> serde::de::Visitor<'de> for EntriesVisitor {
            type Value = StoreDocument;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of record id to credential")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut map: A,
            ) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<u64, StoredCredential>()? {
                    entries.push(entry);
                }
                Ok(StoreDocument(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Default)]
struct StoreState {
    records: BTreeMap<u64, CredentialRecord>,
    by_tenant: HashMap<String, u64>,
    next_id: u64,
}

impl StoreState {
    fn lookup(&self, tenant_id: &str) -> Option<&CredentialRecord> {
        self.by_tenant
            .get(tenant_id)
            .and_then(|id| self.records.get(id))
    }

    fn insert(&mut self, id: u64, record: CredentialRecord) {
        self.by_tenant.insert(record.tenant_id.clone(), id);
        self.records.insert(id, record);
    }

    fn remove(&mut self, id: u64) {
        if let Some(record) = self.records.remove(&id) {
            self.by_tenant.remove(&record.tenant_id);
        }
    }

    fn to_document(&self) -> BTreeMap<u64, StoredCredential> {
        self.records
            .iter()
            .map(|(id, record)| {
                (
                    *id,
                    StoredCredential {
                        tenant_id: record.tenant_id.clone(),
                        password: hex::encode(record.password_hash),
                        salt: hex::encode(record.salt),
                    },
                )
            })
            .collect()
    }
}

/// Durable, uniqueness-enforcing credential storage.
///
/// Creation holds the write lock across the uniqueness check, id allocation,
/// insert and persist. Readers take the read lock only to copy one record.
pub struct CredentialStore {
    path: PathBuf,
    fixed_secret: Vec<u8>,
    state: RwLock<StoreState>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("records", &self.user_count())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Load the store at `path`.
    ///
    /// A missing or blank file yields an empty store. A file that exists but
    /// cannot be parsed fails with [`AuthError::CorruptStore`] instead of
    /// being silently discarded.
    pub fn open(path: impl Into<PathBuf>, fixed_secret: &str) -> Result<Self, AuthError> {
        let path = path.into();
        if fixed_secret.is_empty() {
            return Err(AuthError::InvalidInput(
                "fixed salt component must not be empty".into(),
            ));
        }

        let state = load_state(&path)?;
        tracing::info!(
            path = %path.display(),
            records = state.records.len(),
            next_id = state.next_id,
            "Credential store loaded"
        );

        Ok(Self {
            path,
            fixed_secret: fixed_secret.as_bytes().to_vec(),
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a tenant. Persists the full collection before returning.
    pub fn create_user(&self, tenant_id: &str, password: &str) -> Result<TenantRecord, AuthError> {
        validate_new_credential(tenant_id, password)?;

        // Skip the KDF for obvious duplicates; the authoritative check is below.
        if self.state.read().by_tenant.contains_key(tenant_id) {
            tracing::warn!(tenant_id, "Rejected duplicate tenant registration");
            return Err(AuthError::DuplicateCredential);
        }

        let salt = generate_salt();
        let password_hash = self.derive_hash(password, &salt);

        let mut state = self.state.write();
        if state.by_tenant.contains_key(tenant_id) {
            tracing::warn!(tenant_id, "Rejected duplicate tenant registration");
            return Err(AuthError::DuplicateCredential);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.insert(
            id,
            CredentialRecord {
                tenant_id: tenant_id.to_owned(),
                salt,
                password_hash,
            },
        );

        if let Err(e) = persist(&self.path, &state) {
            state.remove(id);
            tracing::error!(tenant_id, "Failed to persist credential store: {e}");
            return Err(e);
        }

        tracing::info!(id, tenant_id, "Tenant credential created");
        Ok(TenantRecord {
            id,
            tenant_id: tenant_id.to_owned(),
        })
    }

    /// Check a password. Unknown tenants and wrong passwords are
    /// indistinguishable, including in the time taken.
    pub fn verify_credentials(&self, tenant_id: &str, password: &str) -> bool {
        let stored = {
            let state = self.state.read();
            state
                .lookup(tenant_id)
                .map(|record| (record.salt, record.password_hash))
        };

        match stored {
            Some((salt, expected)) => {
                let attempt = self.derive_hash(password, &salt);
                constant_time_eq(&attempt, &expected)
            }
            None => {
                let _ = self.derive_hash(password, &[0u8; SALT_BYTES]);
                false
            }
        }
    }

    /// Look up a tenant by record id.
    pub fn get_user(&self, id: u64) -> Option<TenantRecord> {
        self.state.read().records.get(&id).map(|record| TenantRecord {
            id,
            tenant_id: record.tenant_id.clone(),
        })
    }

    pub fn find_by_tenant(&self, tenant_id: &str) -> Option<TenantRecord> {
        let state = self.state.read();
        state.by_tenant.get(tenant_id).map(|id| TenantRecord {
            id: *id,
            tenant_id: tenant_id.to_owned(),
        })
    }

    pub fn user_count(&self) -> usize {
        self.state.read().records.len()
    }

    /// PBKDF2-HMAC-SHA256 over `salt ++ fixed_secret`.
    fn derive_hash(&self, password: &str, salt: &[u8; SALT_BYTES]) -> [u8; HASH_BYTES] {
        let mut keyed_salt = Vec::with_capacity(SALT_BYTES + self.fixed_secret.len());
        keyed_salt.extend_from_slice(salt);
        keyed_salt.extend_from_slice(&self.fixed_secret);

        let mut out = [0u8; HASH_BYTES];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &keyed_salt, HASH_ITERATIONS, &mut out);
        out
    }
}

fn validate_new_credential(tenant_id: &str, password: &str) -> Result<(), AuthError> {
    if tenant_id.trim().is_empty() {
        return Err(AuthError::InvalidInput("tenant id cannot be empty".into()));
    }
    if tenant_id.chars().count() > MAX_TENANT_ID_LEN {
        return Err(AuthError::InvalidInput(format!(
            "tenant id too long (max {MAX_TENANT_ID_LEN} characters)"
        )));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("password cannot be empty".into()));
    }
    Ok(())
}

// ── Persistence ─────────────────────────────────────────────────────

fn load_state(path: &Path) -> Result<StoreState, AuthError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(StoreState {
                next_id: 1,
                ..StoreState::default()
            });
        }
        Err(e) => return Err(AuthError::Storage(e)),
    };

    let corrupt = |reason: String| AuthError::CorruptStore {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(StoreState {
            next_id: 1,
            ..StoreState::default()
        });
    }

    let StoreDocument(entries) =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

    let mut state = StoreState::default();
    for (id, stored) in entries {
        if id == 0 {
            return Err(corrupt("record id 0 is not allowed".into()));
        }
        if state.records.contains_key(&id) {
            return Err(corrupt(format!("record id {id} appears more than once")));
        }
        if state.by_tenant.contains_key(&stored.tenant_id) {
            return Err(corrupt(format!(
                "tenant '{}' appears more than once",
                stored.tenant_id
            )));
        }
        let salt = decode_fixed::<SALT_BYTES>(&stored.salt)
            .ok_or_else(|| corrupt(format!("record {id} has a malformed salt")))?;
        let password_hash = decode_fixed::<HASH_BYTES>(&stored.password)
            .ok_or_else(|| corrupt(format!("record {id} has a malformed password hash")))?;
        state.insert(
            id,
            CredentialRecord {
                tenant_id: stored.tenant_id,
                salt,
                password_hash,
            },
        );
    }
    state.next_id = state.records.keys().next_back().map_or(1, |max| max + 1);

    Ok(state)
}

fn persist(path: &Path, state: &StoreState) -> Result<(), AuthError> {
    let contents = serde_json::to_vec_pretty(&state.to_document())?;
    write_atomically(path, &contents)?;
    tracing::debug!(path = %path.display(), records = state.records.len(), "Credential store persisted");
    Ok(())
}

/// Write to a temp file in the target directory, fsync, rename over the
/// target, then fsync the directory so the rename itself is durable. The
/// temp file is removed on every early return.
fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

// ── Cryptographic Helpers ───────────────────────────────────────────

/// Generate a random salt from the OS CSPRNG.
fn generate_salt() -> [u8; SALT_BYTES] {
    let mut bytes = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn decode_fixed<const N: usize>(encoded: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(encoded).ok()?;
    bytes.try_into().ok()
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ── Tests ───────────────────────────────────────────────────────────
