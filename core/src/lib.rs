/// Classline chat synchronization core
///
/// The real-time chat subsystem of a parent-facing school app: stable
/// two-party conversation keys, an append-only message log with a
/// denormalized last-message snapshot, per-participant unread counters
/// mirrored into per-viewer inbox rows, live snapshot subscriptions with
/// scoped lifecycle, and the inbox list builder.

pub mod blob;
pub mod chat_service;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod inbox;
pub mod message;
pub mod prefs;
pub mod store;
pub mod subscription;

pub use chat_service::{ChatService, InboxRowDoc, MessageFeed};
pub use client::ChatClient;
pub use config::Config;
pub use error::{ChatError, Result};
pub use identity::{Account, IdentityResolver, ResolvedIdentity, Role, RoleRecord};
pub use inbox::{InboxBuilder, InboxFilter, InboxRow};
pub use message::{
    conversation_key, LastMessage, Message, MessageKind, OutgoingMessage, DELETED_PLACEHOLDER,
};
pub use prefs::{PrefsStore, Session};
pub use store::{StoreClient, StoreEvent, Subscription};
pub use subscription::{ScopeHandle, SubscriptionManager};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for embedding applications (RUST_LOG aware)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
