//! A checked-out pooled session.
//!
//! The caller owns a `SessionHandle` while it is InUse and gives it back
//! with `ConnectionPool::release`. Every operation races the pool's close
//! signal, so `close_all` cancels in-flight work with
//! `Disconnected("connection closed")`.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::pool::PoolTable;
use crate::ftp::transport::RemoteSession;
use crate::ftp::types::{DirEntry, EndpointKey, SessionState};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Mutex, PoisonError, Weak};
use tokio::sync::watch;

pub struct SessionHandle {
    id: u64,
    key: EndpointKey,
    session: Option<Box<dyn RemoteSession>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    last_validated: DateTime<Utc>,
    state: SessionState,
    closed: watch::Receiver<bool>,
    table: Weak<Mutex<PoolTable>>,
    released: bool,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("last_activity", &self.last_activity)
            .field("last_validated", &self.last_validated)
            .finish()
    }
}

/// Everything the pool keeps about a session while it sits Idle.
pub(crate) struct SessionParts {
    pub id: u64,
    pub key: EndpointKey,
    pub session: Box<dyn RemoteSession>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_validated: DateTime<Utc>,
}

impl SessionHandle {
    pub(crate) fn checked_out(
        parts: SessionParts,
        closed: watch::Receiver<bool>,
        table: Weak<Mutex<PoolTable>>,
    ) -> Self {
        Self {
            id: parts.id,
            key: parts.key,
            session: Some(parts.session),
            created_at: parts.created_at,
            last_activity: parts.last_activity,
            last_validated: parts.last_validated,
            state: SessionState::InUse,
            closed,
            table,
            released: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn last_validated(&self) -> DateTime<Utc> {
        self.last_validated
    }

    /// True once the pool force-closed this handle or it lost its session.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed || self.session.is_none() || *self.closed.borrow()
    }

    /// Whether the handle may go back to Idle on release.
    pub(crate) fn is_reusable(&self) -> bool {
        self.state == SessionState::InUse && !self.is_closed()
    }

    pub(crate) fn mark_validated(&mut self, at: DateTime<Utc>) {
        self.last_validated = at;
    }

    pub(crate) fn mark_stale(&mut self) {
        if self.state == SessionState::InUse {
            self.state = SessionState::Stale;
        }
    }

    /// Hand the session back to the pool; Drop no longer frees the slot.
    pub(crate) fn into_parts(mut self) -> Option<SessionParts> {
        self.released = true;
        let session = self.session.take()?;
        Some(SessionParts {
            id: self.id,
            key: self.key.clone(),
            session,
            created_at: self.created_at,
            last_activity: self.last_activity,
            last_validated: self.last_validated,
        })
    }

    /// Liveness probe; only the validator calls this.
    pub(crate) async fn probe(&mut self) -> FtpResult<()> {
        let Self { session, closed, .. } = &mut *self;
        let session = session.as_mut().ok_or_else(FtpError::connection_closed)?;
        let result = race_close(closed, session.noop()).await;
        self.settle(result)
    }

    pub async fn list_directory(&mut self, path: &str, detailed: bool) -> FtpResult<Vec<DirEntry>> {
        let Self { session, closed, .. } = &mut *self;
        let session = session.as_mut().ok_or_else(FtpError::connection_closed)?;
        let result = race_close(closed, session.list_directory(path, detailed)).await;
        self.settle(result)
    }

    pub async fn make_dir(&mut self, path: &str) -> FtpResult<()> {
        let Self { session, closed, .. } = &mut *self;
        let session = session.as_mut().ok_or_else(FtpError::connection_closed)?;
        let result = race_close(closed, session.make_dir(path)).await;
        self.settle(result)
    }

    pub async fn remove_file(&mut self, path: &str) -> FtpResult<()> {
        let Self { session, closed, .. } = &mut *self;
        let session = session.as_mut().ok_or_else(FtpError::connection_closed)?;
        let result = race_close(closed, session.remove_file(path)).await;
        self.settle(result)
    }

    pub async fn remove_dir(&mut self, path: &str) -> FtpResult<()> {
        let Self { session, closed, .. } = &mut *self;
        let session = session.as_mut().ok_or_else(FtpError::connection_closed)?;
        let result = race_close(closed, session.remove_dir(path)).await;
        self.settle(result)
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let Self { session, closed, .. } = &mut *self;
        let session = session.as_mut().ok_or_else(FtpError::connection_closed)?;
        let result = race_close(closed, session.rename(from, to)).await;
        self.settle(result)
    }

    /// Record the outcome of one operation on the handle's state.
    fn settle<T>(&mut self, result: Outcome<T>) -> FtpResult<T> {
        match result {
            Outcome::Done(Ok(v)) => Ok(v),
            Outcome::Done(Err(e)) => {
                if e.poisons_session() {
                    log::debug!("Session {} to {} is stale: {}", self.id, self.key, e);
                    self.mark_stale();
                }
                Err(e)
            }
            Outcome::Closed => {
                // The interrupted exchange left the control channel mid-reply.
                self.session = None;
                self.state = SessionState::Closed;
                Err(FtpError::connection_closed())
            }
        }
    }
}

enum Outcome<T> {
    Done(FtpResult<T>),
    Closed,
}

async fn race_close<T>(
    closed: &mut watch::Receiver<bool>,
    op: impl Future<Output = FtpResult<T>>,
) -> Outcome<T> {
    let signalled = async {
        // A dropped sender means the pool is gone, not that we were closed.
        if closed.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        biased;
        _ = signalled => Outcome::Closed,
        r = op => Outcome::Done(r),
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Dropped without release: free the slot, discard the session.
        if let Some(table) = self.table.upgrade() {
            table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .forget_in_use(self.id);
        }
        if self.session.is_some() {
            log::debug!("Session {} to {} dropped without release", self.id, self.key);
        }
    }
}
