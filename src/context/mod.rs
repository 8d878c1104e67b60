//! Process-wide cache of the current user.
//!
//! The cache has one owner, [`UserContext`], which keeps an in-memory copy
//! and a persisted copy (see [`UserStore`]) in step. Session transitions
//! drive it: an authenticated session stores the session user and then
//! refetches the full profile; an unauthenticated one clears both copies.
//!
//! Every authoritative transition bumps a generation counter. A profile
//! fetch remembers the generation it started under and only writes its
//! result if no transition happened meanwhile, so a late fetch can never
//! bring back a user after logout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub mod store;

pub use store::{FileUserStore, MemoryUserStore, UserStore, USER_KEY};

use crate::auth::repo_types::SessionUser;
use crate::rpc::Backend;

/// Where full profiles come from.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, username: &str) -> Result<Option<SessionUser>>;
}

#[async_trait]
impl ProfileSource for Backend {
    async fn fetch_profile(&self, username: &str) -> Result<Option<SessionUser>> {
        Ok(self
            .get_user_by_username(username)
            .await?
            .map(SessionUser::from_record))
    }
}

#[derive(Debug, Clone)]
pub enum SessionStatus {
    Loading,
    Authenticated(SessionUser),
    Unauthenticated,
}

#[derive(Default)]
struct Slot {
    user: Option<SessionUser>,
    loading: bool,
}

pub struct UserContext {
    store: Arc<dyn UserStore>,
    source: Arc<dyn ProfileSource>,
    slot: Mutex<Slot>,
    generation: AtomicU64,
}

impl UserContext {
    pub fn new(store: Arc<dyn UserStore>, source: Arc<dyn ProfileSource>) -> Self {
        Self {
            store,
            source,
            slot: Mutex::new(Slot::default()),
            generation: AtomicU64::new(0),
        }
    }

    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn persist(&self, user: Option<&SessionUser>) {
        let result = match user {
            Some(user) => match serde_json::to_string(user) {
                Ok(raw) => self.store.save(&raw).await,
                Err(e) => Err(e.into()),
            },
            None => self.store.clear().await,
        };
        if let Err(e) = result {
            warn!(error = %e, "user cache persistence failed");
        }
    }

    /// Load the persisted user. Missing or corrupt data leaves the cache
    /// empty; corrupt data is also removed.
    pub async fn hydrate(&self) -> Option<SessionUser> {
        let generation = self.generation.load(Ordering::SeqCst);
        let raw = match self.store.load().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "user cache unreadable");
                None
            }
        };
        let parsed = raw.and_then(|raw| match serde_json::from_str::<SessionUser>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "discarding corrupt user cache");
                None
            }
        });

        let mut slot = self.slot.lock().await;
        if !self.is_current(generation) {
            // a session transition already decided the user
            return slot.user.clone();
        }
        if parsed.is_none() {
            self.persist(None).await;
        }
        slot.user = parsed.clone();
        parsed
    }

    pub async fn session_changed(&self, status: SessionStatus) {
        match status {
            SessionStatus::Loading => {
                self.slot.lock().await.loading = true;
            }
            SessionStatus::Unauthenticated => self.logout().await,
            SessionStatus::Authenticated(user) => {
                let username = user.username.clone();
                let generation = self.bump();
                let fetch = !username.is_empty();
                {
                    let mut slot = self.slot.lock().await;
                    self.persist(Some(&user)).await;
                    slot.user = Some(user);
                    slot.loading = fetch;
                }
                if fetch {
                    self.fetch_and_store(&username, generation).await;
                }
            }
        }
    }

    /// Clear both copies; wins over any fetch in flight.
    pub async fn logout(&self) {
        self.bump();
        let mut slot = self.slot.lock().await;
        slot.user = None;
        slot.loading = false;
        self.persist(None).await;
        debug!("user cache cleared");
    }

    /// Explicit replacement of the cached user.
    pub async fn set_user(&self, user: Option<SessionUser>) {
        self.bump();
        let mut slot = self.slot.lock().await;
        self.persist(user.as_ref()).await;
        slot.user = user;
        slot.loading = false;
    }

    /// Refetch a profile without starting a new session generation.
    pub async fn refresh(&self, username: &str) -> Option<SessionUser> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.slot.lock().await.loading = true;
        self.fetch_and_store(username, generation).await;
        self.current().await
    }

    async fn fetch_and_store(&self, username: &str, generation: u64) {
        let fetched = self.source.fetch_profile(username).await;

        let mut slot = self.slot.lock().await;
        if !self.is_current(generation) {
            debug!("stale profile fetch dropped");
            return;
        }
        slot.loading = false;
        match fetched {
            Ok(Some(user)) => {
                self.persist(Some(&user)).await;
                slot.user = Some(user);
            }
            Ok(None) => debug!("profile not found; keeping session user"),
            Err(e) => warn!(error = %e, "profile fetch failed"),
        }
    }

    pub async fn current(&self) -> Option<SessionUser> {
        self.slot.lock().await.user.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.slot.lock().await.loading
    }
}
