//! In-process session store.
//!
//! Holds every session behind one mutex, which makes the conditional
//! mark-used-and-insert trivially atomic. Intended for tests and local runs.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use uuid::Uuid;

use crate::rotation::{
    error::{Error, Result},
    session::{Session, SessionStore, StoreFuture},
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::Internal("session store lock poisoned".to_string()))
    }

    /// Snapshot of a session by primary key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the lock is poisoned.
    pub fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        Ok(self.lock()?.get(&session_id).cloned())
    }

    /// Number of stored sessions.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the lock is poisoned.
    pub fn session_count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn insert(sessions: &mut HashMap<Uuid, Session>, session: &Session) -> Result<()> {
        if sessions
            .values()
            .any(|existing| existing.linking_id == session.linking_id)
        {
            return Err(Error::Internal("duplicate linking id".to_string()));
        }
        if sessions.contains_key(&session.id) {
            return Err(Error::Internal("duplicate session id".to_string()));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn create_session<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut sessions = self.lock()?;
            Self::insert(&mut sessions, session)
        })
    }

    fn find_session_by_linking_id<'a>(&'a self, linking_id: &'a str) -> StoreFuture<'a, Session> {
        Box::pin(async move {
            self.lock()?
                .values()
                .find(|session| session.linking_id == linking_id)
                .cloned()
                .ok_or(Error::NotFound)
        })
    }

    fn mark_session_used<'a>(
        &'a self,
        session_id: Uuid,
        successor: &'a Session,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut sessions = self.lock()?;
            match sessions.get(&session_id) {
                None => return Err(Error::NotFound),
                Some(previous) if previous.used => return Err(Error::ReplayDetected),
                Some(_) => {}
            }
            Self::insert(&mut sessions, successor)?;
            if let Some(previous) = sessions.get_mut(&session_id) {
                previous.used = true;
            }
            Ok(())
        })
    }
}
