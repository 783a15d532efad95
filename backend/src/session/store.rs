//! In-memory session storage keyed by an opaque cookie value.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use spend_onboarding_common::{DraftRecord, Status};
use tokio::sync::RwLock;

use super::VerificationProvider;

/// Outstanding authorization request for the login flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state: String,
    pub nonce: String,
}

impl PendingAuthorization {
    pub fn generate() -> Self {
        Self {
            state: uuid::Uuid::new_v4().simple().to_string(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

/// Outstanding authorization request with an email verification provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVerification {
    pub provider: VerificationProvider,
    pub authorization: PendingAuthorization,
}

/// Everything this service remembers about one browser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub draft: Option<DraftRecord>,
    pub pending_login: Option<PendingAuthorization>,
    pub pending_verification: Option<PendingVerification>,
}

impl Session {
    pub fn status(&self) -> Status {
        self.draft
            .as_ref()
            .map(|draft| draft.status)
            .unwrap_or(Status::Unauthenticated)
    }

    /// Active draft, or the "not logged in" rejection.
    pub fn draft(&self) -> crate::error::Result<&DraftRecord> {
        self.draft
            .as_ref()
            .ok_or_else(|| crate::error::WorkflowError::unauthorized("Not logged in"))
    }

    pub fn draft_mut(&mut self) -> crate::error::Result<&mut DraftRecord> {
        self.draft
            .as_mut()
            .ok_or_else(|| crate::error::WorkflowError::unauthorized("Not logged in"))
    }
}

#[derive(Debug)]
struct StoredSession {
    session: Session,
    touched_at: DateTime<Utc>,
}

/// Sessions by id, with idle expiry.
///
/// Handlers load a copy, work on it, and save it back only when the request
/// succeeds.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Load a session. Expired sessions are dropped and read as absent.
    pub async fn load(&self, id: &str) -> Option<Session> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                None => return None,
                Some(stored) if now - stored.touched_at <= self.ttl => {
                    return Some(stored.session.clone());
                }
                Some(_) => {}
            }
        }

        tracing::debug!("Session expired");
        self.sessions.write().await.remove(id);
        None
    }

    /// Store a session under an existing id.
    pub async fn save(&self, id: &str, session: Session) {
        let stored = StoredSession {
            session,
            touched_at: Utc::now(),
        };
        self.sessions.write().await.insert(id.to_string(), stored);
    }

    /// Store a session under a fresh id and return the id.
    pub async fn create(&self, session: Session) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.save(&id, session).await;
        self.purge_expired().await;
        id
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Drop every expired session.
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        let ttl = self.ttl;
        self.sessions
            .write()
            .await
            .retain(|_, stored| now - stored.touched_at <= ttl);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
