/// Live subscription lifecycle per UI scope.
///
/// A scope is whatever is currently of interest to the viewer (an open chat
/// screen, the visible inbox under one filter). Attaching a scope always
/// detaches any previous registration of the same scope first, so stale
/// callbacks never race newly attached ones. Detaching is idempotent and a
/// handle superseded by a newer attach detaches nothing.
use crate::store::{StoreClient, StoreEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

struct ScopeSubs {
    handle: u64,
    tasks: Vec<JoinHandle<()>>,
}

impl ScopeSubs {
    fn abort(self) {
        // Aborting the forward task drops its Subscription, which detaches
        // the underlying store watcher
        for task in self.tasks {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<StoreClient>,
    scopes: Arc<Mutex<HashMap<String, ScopeSubs>>>,
    next_handle: Arc<AtomicU64>,
}

/// Opaque handle for one attached scope; yields the merged event stream
/// of all its watched paths
pub struct ScopeHandle {
    pub scope: String,
    id: u64,
    events: mpsc::UnboundedReceiver<StoreEvent>,
}

impl ScopeHandle {
    /// Next snapshot event from any of the scope's watched paths
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }

    pub fn try_next(&mut self) -> Option<StoreEvent> {
        self.events.try_recv().ok()
    }
}

impl SubscriptionManager {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self {
            store,
            scopes: Arc::new(Mutex::new(HashMap::new())),
            next_handle: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach listeners for `paths` under `scope`, detaching any previous
    /// listeners registered for the same scope first.
    pub fn attach(&self, scope: &str, paths: &[String]) -> ScopeHandle {
        self.detach_scope(scope);

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::with_capacity(paths.len());
        for path in paths {
            let mut sub = self.store.subscribe(path);
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = sub.next().await {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }));
        }

        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.insert(scope.to_string(), ScopeSubs { handle: id, tasks });
        }

        debug!("Attached scope {} ({} paths)", scope, paths.len());
        ScopeHandle {
            scope: scope.to_string(),
            id,
            events: rx,
        }
    }

    /// Detach the listeners behind `handle`. Idempotent; a handle that was
    /// already superseded by a newer attach for the same scope is ignored.
    pub fn detach(&self, handle: &ScopeHandle) {
        let removed = {
            let mut scopes = match self.scopes.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            match scopes.get(&handle.scope) {
                Some(subs) if subs.handle == handle.id => scopes.remove(&handle.scope),
                _ => None,
            }
        };

        if let Some(subs) = removed {
            debug!("Detached scope {}", handle.scope);
            subs.abort();
        }
    }

    /// Detach everything (app shutdown / sign-out)
    pub fn detach_all(&self) {
        let drained: Vec<ScopeSubs> = match self.scopes.lock() {
            Ok(mut scopes) => scopes.drain().map(|(_, subs)| subs).collect(),
            Err(_) => return,
        };
        for subs in drained {
            subs.abort();
        }
    }

    fn detach_scope(&self, scope: &str) {
        let removed = match self.scopes.lock() {
            Ok(mut scopes) => scopes.remove(scope),
            Err(_) => None,
        };
        if let Some(subs) = removed {
            debug!("Replacing listeners for scope {}", scope);
            subs.abort();
        }
    }
}
