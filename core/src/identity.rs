/// Identity resolution across role tables.
///
/// A "profile record id" may live in one of four role tables or may already
/// be a canonical account id. Tables are probed in a fixed priority order
/// (student, teacher, admin, parent) and the first match wins; record ids
/// are assumed unique across tables and this is not verified.
use crate::error::{ChatError, Result};
use crate::store::StoreClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
    Parent,
}

impl Role {
    pub fn table(&self) -> &'static str {
        match self {
            Role::Student => "Students",
            Role::Teacher => "Teachers",
            Role::Admin => "Admins",
            Role::Parent => "Parents",
        }
    }
}

/// Fixed probe order for role tables
pub const PROBE_ORDER: [Role; 4] = [Role::Student, Role::Teacher, Role::Admin, Role::Parent];

/// One record in a role table. Each shape embeds the canonical account id
/// plus role-specific fields used for inbox search descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RoleRecord {
    Student {
        account: String,
        grade: String,
        section: String,
    },
    Teacher {
        account: String,
        subject: String,
    },
    Admin {
        account: String,
        title: String,
    },
    Parent {
        account: String,
    },
}

impl RoleRecord {
    pub fn account_id(&self) -> &str {
        match self {
            RoleRecord::Student { account, .. }
            | RoleRecord::Teacher { account, .. }
            | RoleRecord::Admin { account, .. }
            | RoleRecord::Parent { account } => account,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            RoleRecord::Student { .. } => Role::Student,
            RoleRecord::Teacher { .. } => Role::Teacher,
            RoleRecord::Admin { .. } => Role::Admin,
            RoleRecord::Parent { .. } => Role::Parent,
        }
    }

    /// Role-specific search text shown under the counterpart name
    pub fn descriptor(&self) -> String {
        match self {
            RoleRecord::Student { grade, section, .. } => {
                format!("grade {} section {}", grade, section)
            }
            RoleRecord::Teacher { subject, .. } => subject.clone(),
            RoleRecord::Admin { title, .. } => title.clone(),
            RoleRecord::Parent { .. } => String::new(),
        }
    }
}

/// Canonical account as stored under `Accounts/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub role: Role,
}

impl Account {
    /// Avatar URL with the configured fallback
    pub fn avatar_url<'a>(&'a self, default: &'a str) -> &'a str {
        self.avatar.as_deref().unwrap_or(default)
    }
}

/// Result of resolving a profile record id
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub account_id: String,
    /// `None` when the input was already a canonical account id
    pub role: Option<Role>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<StoreClient>,
}

impl IdentityResolver {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    /// Resolve a profile record id to a canonical account id. Read-only.
    pub fn resolve(&self, profile_id: &str) -> Result<ResolvedIdentity> {
        for role in PROBE_ORDER {
            if let Some(record) = self.role_record(role, profile_id)? {
                debug!("Resolved {} via {} table", profile_id, role.table());
                return Ok(ResolvedIdentity {
                    account_id: record.account_id().to_string(),
                    role: Some(record.role()),
                });
            }
        }

        // Maybe the caller handed us a canonical account id directly
        if self
            .store
            .get(&format!("Accounts/{}", profile_id))?
            .is_some()
        {
            return Ok(ResolvedIdentity {
                account_id: profile_id.to_string(),
                role: None,
            });
        }

        Err(ChatError::NotFound(format!(
            "no role record or account for id {}",
            profile_id
        )))
    }

    /// Load a canonical account
    pub fn account(&self, account_id: &str) -> Result<Account> {
        let value = self
            .store
            .get(&format!("Accounts/{}", account_id))?
            .ok_or_else(|| ChatError::NotFound(format!("account {}", account_id)))?;
        let mut account: Account = serde_json::from_value(value)?;
        account.id = account_id.to_string();
        Ok(account)
    }

    /// One role-table record by id, `None` when the table has no such key
    pub fn role_record(&self, role: Role, record_id: &str) -> Result<Option<RoleRecord>> {
        match self.store.get(&format!("{}/{}", role.table(), record_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// All records of one role table, as (record id, record) pairs
    pub fn candidates(&self, role: Role) -> Result<Vec<(String, RoleRecord)>> {
        let Some(Value::Object(table)) = self.store.get(role.table())? else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for (record_id, value) in table {
            // Skip malformed rows instead of failing the whole listing
            if let Ok(record) = serde_json::from_value::<RoleRecord>(value) {
                out.push((record_id, record));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn seeded_store() -> (TempDir, Arc<StoreClient>) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(StoreClient::new(temp_dir.path()).unwrap());

        store
            .set(
                "Students/rec-s1",
                &json!({"role": "student", "account": "acc-s1", "grade": "5", "section": "B"}),
            )
            .unwrap();
        store
            .set(
                "Teachers/rec-t1",
                &json!({"role": "teacher", "account": "acc-t1", "subject": "Mathematics"}),
            )
            .unwrap();
        store
            .set("Accounts/acc-p1", &json!({"name": "Pat", "role": "parent"}))
            .unwrap();

        (temp_dir, store)
    }

    #[test]
    fn test_resolve_probes_role_tables() {
        let (_tmp, store) = seeded_store();
        let resolver = IdentityResolver::new(store);

        let student = resolver.resolve("rec-s1").unwrap();
        assert_eq!(student.account_id, "acc-s1");
        assert_eq!(student.role, Some(Role::Student));

        let teacher = resolver.resolve("rec-t1").unwrap();
        assert_eq!(teacher.account_id, "acc-t1");
        assert_eq!(teacher.role, Some(Role::Teacher));
    }

    #[test]
    fn test_resolve_falls_back_to_account_id() {
        let (_tmp, store) = seeded_store();
        let resolver = IdentityResolver::new(store);

        let direct = resolver.resolve("acc-p1").unwrap();
        assert_eq!(direct.account_id, "acc-p1");
        assert_eq!(direct.role, None);
    }

    #[test]
    fn test_resolve_not_found() {
        let (_tmp, store) = seeded_store();
        let resolver = IdentityResolver::new(store);

        assert!(matches!(
            resolver.resolve("unknown"),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn test_descriptors() {
        let student = RoleRecord::Student {
            account: "a".into(),
            grade: "5".into(),
            section: "B".into(),
        };
        assert_eq!(student.descriptor(), "grade 5 section B");

        let parent = RoleRecord::Parent { account: "p".into() };
        assert_eq!(parent.descriptor(), "");
    }

    #[test]
    fn test_avatar_fallback() {
        let account = Account {
            id: "a".into(),
            name: "A".into(),
            avatar: None,
            role: Role::Student,
        };
        assert_eq!(account.avatar_url("https://x/default.png"), "https://x/default.png");
    }
}
