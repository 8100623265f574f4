use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::form::session::{FormSession, SessionDeps};
use crate::models::profile::UserProfile;

/// Live form sessions, keyed by id.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<FormSession>>>>,
    deps: SessionDeps,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            deps,
        }
    }

    pub async fn create(&self, profile: Option<UserProfile>) -> Arc<FormSession> {
        let session = Arc::new(FormSession::spawn(
            &self.deps,
            profile.unwrap_or_else(UserProfile::demo),
        ));
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        session
    }

    /// Looks a session up and marks it active.
    pub async fn get(&self, id: Uuid) -> Option<Arc<FormSession>> {
        let session = self.sessions.read().await.get(&id).cloned()?;
        session.touch();
        Some(session)
    }

    /// Removes and closes a session. Returns whether it existed.
    pub async fn remove(&self, id: Uuid) -> bool {
        let Some(session) = self.sessions.write().await.remove(&id) else {
            return false;
        };
        session.close().await;
        info!("Form session {id} removed");
        true
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Closes and drops every session idle for at least `ttl`. Returns how
    /// many were dropped.
    pub async fn sweep_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<FormSession>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<Uuid> = sessions
                .values()
                .filter(|s| s.idle_for(now) >= ttl)
                .map(|s| s.id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &expired {
            session.close().await;
        }
        expired.len()
    }

    /// Sweeps idle sessions every `ttl / 4` (at least once a second).
    pub fn spawn_sweeper(&self, ttl: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        let period = (ttl / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let dropped = registry.sweep_idle(ttl).await;
                if dropped > 0 {
                    info!("Dropped {dropped} idle form sessions");
                }
            }
        })
    }
}
