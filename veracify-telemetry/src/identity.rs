//! Client and session identity
//!
//! The client id is a 16-byte random hex string persisted for the lifetime
//! of the installation; the session id is an 8-byte random hex string
//! regenerated every time the engine starts. Identity failures degrade
//! attribution but never block delivery: both ids fall back to fixed
//! sentinels when the store or the OS RNG is unavailable.

use std::sync::{Arc, OnceLock};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::store::{keys, Store};

/// Sentinel client id used when generation or persistence fails
pub const UNKNOWN_CLIENT: &str = "unknown-client";
/// Sentinel session id used when generation fails
pub const UNKNOWN_SESSION: &str = "unknown-session";

const CLIENT_ID_BYTES: usize = 16;
const SESSION_ID_BYTES: usize = 8;

/// Owns the pseudonymous client id and the process-lifetime session id
pub struct IdentityManager {
    store: Arc<dyn Store>,
    client_id: OnceLock<String>,
    session_id: String,
}

impl IdentityManager {
    /// Create a manager and generate a fresh session id
    pub fn new(store: Arc<dyn Store>) -> Self {
        let session_id = random_hex(SESSION_ID_BYTES).unwrap_or_else(|| {
            tracing::warn!("OS RNG unavailable, using sentinel session id");
            UNKNOWN_SESSION.to_string()
        });

        Self {
            store,
            client_id: OnceLock::new(),
            session_id,
        }
    }

    /// Return the persisted client id, creating it on first use.
    ///
    /// Idempotent within and across process lifetimes: repeated calls
    /// return the same value, and the value survives restarts via the
    /// store.
    pub fn client_id(&self) -> &str {
        self.client_id.get_or_init(|| self.load_or_create_client_id())
    }

    /// The session id generated for this engine instance
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn load_or_create_client_id(&self) -> String {
        match self.store.get(keys::CLIENT_ID) {
            Ok(Some(serde_json::Value::String(id))) if !id.is_empty() => return id,
            Ok(Some(other)) => {
                tracing::warn!(value = %other, "Unexpected client id value in store, regenerating");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Store unavailable, using sentinel client id");
                return UNKNOWN_CLIENT.to_string();
            }
        }

        let Some(id) = random_hex(CLIENT_ID_BYTES) else {
            tracing::warn!("OS RNG unavailable, using sentinel client id");
            return UNKNOWN_CLIENT.to_string();
        };

        if let Err(e) = self
            .store
            .set(keys::CLIENT_ID, &serde_json::Value::String(id.clone()))
        {
            tracing::warn!(error = %e, "Failed to persist client id, using sentinel");
            return UNKNOWN_CLIENT.to_string();
        }

        tracing::debug!("Generated new client id");
        id
    }
}

/// Generate `n` cryptographically random bytes as lowercase hex
fn random_hex(n: usize) -> Option<String> {
    let mut bytes = vec![0u8; n];
    OsRng.try_fill_bytes(&mut bytes).ok()?;
    Some(hex::encode(bytes))
}
