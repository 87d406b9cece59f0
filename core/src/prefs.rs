/// Local preferences — signed-in session and pinned chats, persisted in
/// a sled DB on the device. Pins are a user-local preference and never
/// leave the device.
use crate::error::{ChatError, Result};
use crate::identity::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

const SESSION_KEY: &str = "session";

/// The signed-in account, as resolved at login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub profile_id: String,
    pub account_id: String,
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PinsFileV1 {
    version: u8,
    keys: Vec<String>,
}

fn pins_key(viewer: &str) -> String {
    format!("pins/{}", viewer)
}

#[derive(Clone)]
pub struct PrefsStore {
    db: Arc<sled::Db>,
}

impl PrefsStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("prefs.db"))
            .map_err(|e| ChatError::Storage(format!("prefs DB: {}", e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let val = serde_json::to_vec(session)?;
        self.db
            .insert(SESSION_KEY.as_bytes(), val)
            .map_err(|e| ChatError::Storage(format!("save_session: {}", e)))?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Session>> {
        match self
            .db
            .get(SESSION_KEY.as_bytes())
            .map_err(|e| ChatError::Storage(format!("load_session: {}", e)))?
        {
            Some(val) => Ok(Some(serde_json::from_slice(&val)?)),
            None => Ok(None),
        }
    }

    pub fn clear_session(&self) -> Result<()> {
        self.db
            .remove(SESSION_KEY.as_bytes())
            .map_err(|e| ChatError::Storage(format!("clear_session: {}", e)))?;
        Ok(())
    }

    /// Pinned conversation keys for one viewer
    pub fn pinned(&self, viewer: &str) -> Result<HashSet<String>> {
        match self
            .db
            .get(pins_key(viewer).as_bytes())
            .map_err(|e| ChatError::Storage(format!("pinned: {}", e)))?
        {
            Some(val) => {
                let parsed: PinsFileV1 = serde_json::from_slice(&val)?;
                if parsed.version != 1 {
                    return Err(ChatError::Config(format!(
                        "Unsupported pins version: {}",
                        parsed.version
                    )));
                }
                Ok(parsed.keys.into_iter().collect())
            }
            None => Ok(HashSet::new()),
        }
    }

    pub fn pin(&self, viewer: &str, key: &str) -> Result<()> {
        let mut keys = self.pinned(viewer)?;
        keys.insert(key.to_string());
        self.write_pins(viewer, keys)
    }

    /// Returns whether the key was pinned
    pub fn unpin(&self, viewer: &str, key: &str) -> Result<bool> {
        let mut keys = self.pinned(viewer)?;
        let removed = keys.remove(key);
        self.write_pins(viewer, keys)?;
        Ok(removed)
    }

    fn write_pins(&self, viewer: &str, keys: HashSet<String>) -> Result<()> {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        let file = PinsFileV1 { version: 1, keys };
        let val = serde_json::to_vec(&file)?;
        self.db
            .insert(pins_key(viewer).as_bytes(), val)
            .map_err(|e| ChatError::Storage(format!("write_pins: {}", e)))?;
        Ok(())
    }
}
