/// Composition root. Constructs the shared store client once at process
/// start and wires every component to it; screens receive these by
/// reference instead of reaching for an ambient global.
use crate::blob::BlobStore;
use crate::chat_service::ChatService;
use crate::config::Config;
use crate::error::Result;
use crate::identity::IdentityResolver;
use crate::inbox::InboxBuilder;
use crate::prefs::PrefsStore;
use crate::store::StoreClient;
use crate::subscription::SubscriptionManager;
use std::fs;
use std::sync::Arc;
use tracing::info;

pub struct ChatClient {
    pub config: Config,
    pub store: Arc<StoreClient>,
    pub resolver: IdentityResolver,
    pub chat: ChatService,
    pub inbox: InboxBuilder,
    pub subscriptions: SubscriptionManager,
    pub prefs: PrefsStore,
    pub blobs: BlobStore,
}

impl ChatClient {
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(StoreClient::new(&config.data_dir)?);
        let resolver = IdentityResolver::new(store.clone());
        let chat = ChatService::new(store.clone());
        let inbox = InboxBuilder::new(store.clone(), config.inbox_batch);
        let subscriptions = SubscriptionManager::new(store.clone());
        let prefs = PrefsStore::new(&config.data_dir)?;
        let blobs = BlobStore::new(&config.data_dir)?;

        info!("Chat client opened at {:?}", config.data_dir);
        Ok(Self {
            config,
            store,
            resolver,
            chat,
            inbox,
            subscriptions,
            prefs,
            blobs,
        })
    }

    /// Tear down all live listeners (sign-out / shutdown)
    pub fn close(&self) {
        self.subscriptions.detach_all();
        info!("Chat client closed");
    }
}
