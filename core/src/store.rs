/// Remote hierarchical document store client.
///
/// Documents are JSON values keyed by slash-separated paths
/// (e.g. `Conversations/{key}/messages/{id}`). `get` on a non-leaf path
/// assembles the subtree into a nested object. Writes are last-writer-wins
/// field merges; every write re-emits a full snapshot to overlapping
/// subscribers. One client is constructed at process start and shared by
/// reference, there is no ambient global handle.
use crate::error::{ChatError, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Server-assigned id for an appended document. The id is zero-padded so
/// lexicographic order equals chronological order, and `at` is the same
/// clock reading callers use as the document timestamp.
#[derive(Debug, Clone)]
pub struct PushId {
    pub id: String,
    pub at: i64,
}

/// Full recomputed snapshot of a watched path, emitted on every
/// overlapping write (and once on subscribe).
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub path: String,
    pub snapshot: Option<Value>,
}

struct Watcher {
    path: String,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Clone)]
pub struct StoreClient {
    db: Arc<sled::Db>,
    watchers: Arc<Mutex<HashMap<u64, Watcher>>>,
    next_watcher: Arc<AtomicU64>,
    // (last millis, sequence within that millisecond); never moves backwards
    push_clock: Arc<Mutex<(i64, u32)>>,
}

fn remote_err(context: &str, e: impl std::fmt::Display) -> ChatError {
    ChatError::RemoteUnavailable(format!("{}: {}", context, e))
}

/// True when `parent` equals `path` or is a segment-wise ancestor of it
fn covers(parent: &str, path: &str) -> bool {
    path == parent || (path.len() > parent.len() && path.starts_with(parent) && path.as_bytes()[parent.len()] == b'/')
}

fn paths_overlap(a: &str, b: &str) -> bool {
    covers(a, b) || covers(b, a)
}

fn insert_nested(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            map.insert((*leaf).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Some(child) = entry.as_object_mut() {
                insert_nested(child, rest, value);
            }
        }
    }
}

impl StoreClient {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("remote.db");
        debug!("Opening store client at {:?}", db_path);

        let db = sled::open(&db_path).map_err(|e| remote_err("open store", e))?;

        Ok(Self {
            db: Arc::new(db),
            watchers: Arc::new(Mutex::new(HashMap::new())),
            next_watcher: Arc::new(AtomicU64::new(0)),
            push_clock: Arc::new(Mutex::new((0, 0))),
        })
    }

    /// Read the document at `path`, or the subtree under it assembled into
    /// a nested object. `None` when neither exists.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        if let Some(raw) = self
            .db
            .get(path.as_bytes())
            .map_err(|e| remote_err("get", e))?
        {
            return Ok(Some(serde_json::from_slice(&raw)?));
        }

        let prefix = format!("{}/", path);
        let mut root = Map::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, raw) = entry.map_err(|e| remote_err("scan", e))?;
            let key = String::from_utf8_lossy(&key).to_string();
            let rel: Vec<&str> = key[prefix.len()..].split('/').collect();
            let value: Value = serde_json::from_slice(&raw)?;
            insert_nested(&mut root, &rel, value);
        }

        if root.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Object(root)))
        }
    }

    /// Write the document at `path`, replacing any previous value
    pub fn set(&self, path: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.db
            .insert(path.as_bytes(), raw)
            .map_err(|e| remote_err("set", e))?;
        self.db.flush().map_err(|e| remote_err("flush", e))?;

        self.notify(path);
        Ok(())
    }

    /// Merge `fields` into the document at `path` (top-level fields only,
    /// last-writer-wins). Creates the document if missing.
    pub fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let mut doc = match self.get_exact(path)? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (k, v) in fields {
            doc.insert(k, v);
        }

        let raw = serde_json::to_vec(&Value::Object(doc))?;
        self.db
            .insert(path.as_bytes(), raw)
            .map_err(|e| remote_err("update", e))?;
        self.db.flush().map_err(|e| remote_err("flush", e))?;

        self.notify(path);
        Ok(())
    }

    /// Allocate a chronologically monotonic child id under `path`.
    /// Does not write anything by itself.
    pub fn push(&self, path: &str) -> Result<PushId> {
        let mut clock = self
            .push_clock
            .lock()
            .map_err(|_| ChatError::RemoteUnavailable("push clock poisoned".to_string()))?;

        let now = Utc::now().timestamp_millis();
        if now > clock.0 {
            clock.0 = now;
            clock.1 = 0;
        } else {
            clock.1 += 1;
        }

        let id = format!("{:013}-{:04}", clock.0, clock.1);
        debug!("Allocated push id {} under {}", id, path);
        Ok(PushId { id, at: clock.0 })
    }

    /// Subscribe to live snapshots of `path`. The current snapshot is
    /// delivered immediately, then again after every overlapping write.
    pub fn subscribe(&self, path: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_watcher.fetch_add(1, Ordering::SeqCst) + 1;

        // Initial snapshot so consumers can render current state right away
        let snapshot = self.get(path).ok().flatten();
        let _ = tx.send(StoreEvent {
            path: path.to_string(),
            snapshot,
        });

        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.insert(
                id,
                Watcher {
                    path: path.to_string(),
                    tx,
                },
            );
        }

        debug!("Subscribed watcher {} to {}", id, path);
        Subscription {
            id,
            path: path.to_string(),
            rx,
            watchers: Arc::clone(&self.watchers),
        }
    }

    fn get_exact(&self, path: &str) -> Result<Option<Value>> {
        match self
            .db
            .get(path.as_bytes())
            .map_err(|e| remote_err("get", e))?
        {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn notify(&self, changed: &str) {
        let mut dead = Vec::new();
        {
            let watchers = match self.watchers.lock() {
                Ok(w) => w,
                Err(_) => return,
            };
            for (id, watcher) in watchers.iter() {
                if !paths_overlap(&watcher.path, changed) {
                    continue;
                }
                let snapshot = self.get(&watcher.path).ok().flatten();
                let event = StoreEvent {
                    path: watcher.path.clone(),
                    snapshot,
                };
                if watcher.tx.send(event).is_err() {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            if let Ok(mut watchers) = self.watchers.lock() {
                for id in dead {
                    watchers.remove(&id);
                }
            }
        }
    }
}

/// Live snapshot feed for one path. Dropping the subscription detaches it.
pub struct Subscription {
    id: u64,
    pub path: String,
    rx: mpsc::UnboundedReceiver<StoreEvent>,
    watchers: Arc<Mutex<HashMap<u64, Watcher>>>,
}

impl Subscription {
    /// Next snapshot, or `None` once unsubscribed and drained
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`next`](Self::next)
    pub fn try_next(&mut self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }

    /// Detach this watcher. Idempotent, safe to call multiple times.
    pub fn unsubscribe(&self) {
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
