/// Inbox list building: candidate listing, batched row resolution,
/// search, and the deterministic ordering used by the messages screen.
///
/// Row resolution for N candidates runs in fixed-size batches to bound
/// concurrent fan-out. A new build (or an explicit invalidate) supersedes
/// any in-flight build via a generation token; a superseded build returns
/// `Stale` and its result is discarded, never merged.
use crate::chat_service::{inbox_row_path, last_message_path, unread_path, InboxRowDoc};
use crate::error::{ChatError, Result};
use crate::identity::{Account, IdentityResolver, Role, PROBE_ORDER};
use crate::message::{conversation_key, LastMessage};
use crate::store::StoreClient;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Inbox filter: counterpart role (children / teachers / admins tabs) plus
/// free-text search
#[derive(Debug, Clone, Default)]
pub struct InboxFilter {
    pub role: Option<Role>,
    pub search: String,
}

impl InboxFilter {
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            search: String::new(),
        }
    }

    pub fn with_search(mut self, query: &str) -> Self {
        self.search = query.to_string();
        self
    }
}

/// One rendered inbox row from the viewer's perspective
#[derive(Debug, Clone, Serialize)]
pub struct InboxRow {
    pub key: String,
    pub counterpart: Account,
    /// Role-specific search text, e.g. "grade 5 section B"
    pub descriptor: String,
    pub last_message: Option<LastMessage>,
    pub unread: u64,
    pub last_activity: i64,
    pub pinned: bool,
}

#[derive(Clone)]
pub struct InboxBuilder {
    store: Arc<StoreClient>,
    resolver: IdentityResolver,
    batch: usize,
    generation: Arc<AtomicU64>,
}

impl InboxBuilder {
    pub fn new(store: Arc<StoreClient>, batch: usize) -> Self {
        let resolver = IdentityResolver::new(store.clone());
        Self {
            store,
            resolver,
            batch: batch.max(1),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Supersede any in-flight build (filter/search change, screen unmount)
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Build the ordered inbox for `viewer`. Returns `Stale` when a newer
    /// build or an invalidate superseded this one mid-flight.
    pub async fn build(
        &self,
        viewer: &str,
        filter: &InboxFilter,
        pinned: &HashSet<String>,
    ) -> Result<Vec<InboxRow>> {
        let generation = self.begin();

        let candidates = self.candidates(viewer, filter)?;
        debug!(
            "Building inbox for {} ({} candidates, generation {})",
            viewer,
            candidates.len(),
            generation
        );

        let resolved: Vec<Option<InboxRow>> = stream::iter(candidates)
            .map(|(account, descriptor)| {
                let builder = self.clone();
                let viewer = viewer.to_string();
                async move {
                    match builder.resolve_row(&viewer, account, descriptor) {
                        Ok(row) => Some(row),
                        Err(e) => {
                            // Degrade to a skipped row, never a failed screen
                            warn!("Inbox row resolution failed: {}", e);
                            None
                        }
                    }
                }
            })
            .buffered(self.batch)
            .collect()
            .await;

        self.guard(generation)?;

        let mut rows: Vec<InboxRow> = resolved.into_iter().flatten().collect();
        rows.retain(|row| row_matches_search(row, &filter.search));
        for row in &mut rows {
            row.pinned = pinned.contains(&row.key);
        }
        sort_rows(&mut rows);
        Ok(rows)
    }

    /// Re-derive a single row, e.g. after a live inbox-row snapshot. `None`
    /// when the counterpart account no longer resolves.
    pub fn refresh_row(&self, viewer: &str, key: &str, pinned: bool) -> Result<Option<InboxRow>> {
        let Some(doc) = self.row_doc(viewer, key)? else {
            return Ok(None);
        };
        let Ok(account) = self.resolver.account(&doc.counterpart) else {
            return Ok(None);
        };

        // Reverse lookup of the role record for the search descriptor
        let descriptor = self
            .resolver
            .candidates(account.role)?
            .into_iter()
            .find(|(_, record)| record.account_id() == account.id)
            .map(|(_, record)| record.descriptor())
            .unwrap_or_default();
        let mut row = InboxRow {
            key: key.to_string(),
            counterpart: account,
            descriptor,
            last_message: doc.last_message,
            unread: doc.unread,
            last_activity: doc.last_activity,
            pinned,
        };
        row.last_activity = row
            .last_message
            .as_ref()
            .map(|l| l.time_stamp)
            .unwrap_or(row.last_activity);
        Ok(Some(row))
    }

    pub(crate) fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn guard(&self, generation: u64) -> Result<()> {
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(ChatError::Stale { generation });
        }
        Ok(())
    }

    /// Candidate counterparts for the filter role (all four tables when
    /// unfiltered), excluding the viewer
    fn candidates(&self, viewer: &str, filter: &InboxFilter) -> Result<Vec<(Account, String)>> {
        let roles: Vec<Role> = match filter.role {
            Some(role) => vec![role],
            None => PROBE_ORDER.to_vec(),
        };

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for role in roles {
            for (_, record) in self.resolver.candidates(role)? {
                let account_id = record.account_id().to_string();
                if account_id == viewer || !seen.insert(account_id.clone()) {
                    continue;
                }
                match self.resolver.account(&account_id) {
                    Ok(account) => out.push((account, record.descriptor())),
                    Err(_) => warn!("Role record points at missing account {}", account_id),
                }
            }
        }
        Ok(out)
    }

    /// Resolve one row: the viewer's mirror row when present, else the
    /// canonical conversation node, else an empty never-messaged row
    fn resolve_row(&self, viewer: &str, account: Account, descriptor: String) -> Result<InboxRow> {
        let key = conversation_key(viewer, &account.id)?;

        if let Some(doc) = self.row_doc(viewer, &key)? {
            return Ok(InboxRow {
                key,
                counterpart: account,
                descriptor,
                last_activity: doc
                    .last_message
                    .as_ref()
                    .map(|l| l.time_stamp)
                    .unwrap_or(doc.last_activity),
                last_message: doc.last_message,
                unread: doc.unread,
                pinned: false,
            });
        }

        // Mirror row missing: fall back to the canonical node rather than
        // trusting a single location
        let last_message: Option<LastMessage> = match self.store.get(&last_message_path(&key))? {
            Some(value) => serde_json::from_value(value).ok(),
            None => None,
        };
        let unread = self
            .store
            .get(&unread_path(&key, viewer))?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(InboxRow {
            key,
            counterpart: account,
            descriptor,
            last_activity: last_message.as_ref().map(|l| l.time_stamp).unwrap_or(0),
            last_message,
            unread,
            pinned: false,
        })
    }

    fn row_doc(&self, viewer: &str, key: &str) -> Result<Option<InboxRowDoc>> {
        match self.store.get(&inbox_row_path(viewer, key))? {
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }
}

/// Deterministic total order: pinned first, then last activity descending,
/// then unread descending, then counterpart name ascending (case-insensitive)
pub fn sort_rows(rows: &mut [InboxRow]) {
    rows.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.last_activity.cmp(&a.last_activity))
            .then_with(|| b.unread.cmp(&a.unread))
            .then_with(|| {
                a.counterpart
                    .name
                    .to_lowercase()
                    .cmp(&b.counterpart.name.to_lowercase())
            })
    });
}

/// Case-insensitive substring match against counterpart name, role
/// descriptor, and last-message text
pub fn row_matches_search(row: &InboxRow, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    let query = query.to_lowercase();
    if row.counterpart.name.to_lowercase().contains(&query) {
        return true;
    }
    if row.descriptor.to_lowercase().contains(&query) {
        return true;
    }
    row.last_message
        .as_ref()
        .map(|l| l.text.to_lowercase().contains(&query))
        .unwrap_or(false)
}

/// Patch a rendered row list with an updated row, merging by conversation
/// key (never by index) so an in-flight optimistic update is not clobbered
pub fn merge_row(rows: &mut Vec<InboxRow>, updated: InboxRow) {
    match rows.iter_mut().find(|r| r.key == updated.key) {
        Some(existing) => *existing = updated,
        None => rows.push(updated),
    }
    sort_rows(rows);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn row(name: &str, pinned: bool, last_activity: i64, unread: u64) -> InboxRow {
        InboxRow {
            key: format!("k-{}", name),
            counterpart: Account {
                id: name.to_string(),
                name: name.to_string(),
                avatar: None,
                role: Role::Teacher,
            },
            descriptor: String::new(),
            last_message: Some(LastMessage {
                text: format!("last from {}", name),
                sender: name.to_string(),
                kind: MessageKind::Text,
                seen: false,
                time_stamp: last_activity,
            }),
            unread,
            last_activity,
            pinned,
        }
    }

    #[test]
    fn test_ordering_tie_break_chain() {
        // Ties at every level of the chain
        let mut rows = vec![
            row("zoe", false, 100, 0),
            row("Amy", false, 100, 0),   // name tie-break (case-insensitive)
            row("ben", false, 100, 5),   // unread tie-break
            row("cam", false, 200, 0),   // recency beats unread
            row("dan", true, 50, 0),     // pinned beats everything
        ];
        sort_rows(&mut rows);

        let order: Vec<&str> = rows.iter().map(|r| r.counterpart.name.as_str()).collect();
        assert_eq!(order, vec!["dan", "cam", "ben", "Amy", "zoe"]);
    }

    #[test]
    fn test_search_matches_name_descriptor_and_preview() {
        let mut r = row("Mrs Hartley", false, 10, 0);
        r.descriptor = "grade 5 section B".to_string();

        assert!(row_matches_search(&r, ""));
        assert!(row_matches_search(&r, "hartley"));
        assert!(row_matches_search(&r, "SECTION b"));
        assert!(row_matches_search(&r, "last from"));
        assert!(!row_matches_search(&r, "chemistry"));
    }

    #[test]
    fn test_merge_row_patches_by_key() {
        let mut rows = vec![row("amy", false, 100, 0), row("ben", false, 90, 0)];

        let mut updated = row("ben", false, 150, 2);
        updated.key = "k-ben".to_string();
        merge_row(&mut rows, updated);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].counterpart.name, "ben");
        assert_eq!(rows[0].unread, 2);
    }

    #[test]
    fn test_generation_guard_detects_supersession() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(StoreClient::new(temp_dir.path()).unwrap());
        let builder = InboxBuilder::new(store, 8);

        let generation = builder.begin();
        assert!(builder.guard(generation).is_ok());

        builder.invalidate();
        assert!(matches!(
            builder.guard(generation),
            Err(ChatError::Stale { .. })
        ));
    }
}
