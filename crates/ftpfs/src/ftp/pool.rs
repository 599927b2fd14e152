//! Connection pool: a bounded set of authenticated sessions keyed by
//! `EndpointKey`, with liveness-checked reuse and idle eviction.
//!
//! The handle table sits behind one `std::sync::Mutex` that is never held
//! across an `.await`: connecting, probing and closing all happen after the
//! table has been updated. A slot is reserved (counted as pending) before a
//! session is created, so concurrent acquires cannot overshoot the bound.

use crate::ftp::clock::Clock;
use crate::ftp::config::FtpFsConfig;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::liveness::LivenessValidator;
use crate::ftp::session::{SessionHandle, SessionParts};
use crate::ftp::transport::Connector;
use crate::ftp::types::{Credentials, EndpointKey, PoolStats};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::{self, Duration};

/// Book-keeping for every session the pool accounts for.
#[derive(Default)]
pub(crate) struct PoolTable {
    /// Released sessions; the most recently released is last.
    idle: Vec<SessionParts>,
    in_use: HashMap<u64, InUseSlot>,
    /// Slots reserved for sessions still connecting.
    pending: usize,
    /// Bumped by `close_all`; creations started earlier are discarded.
    epoch: u64,
    /// Per-endpoint counterpart of `epoch`, bumped by `close_endpoint`.
    endpoint_epochs: HashMap<EndpointKey, u64>,
    next_id: u64,
}

struct InUseSlot {
    key: EndpointKey,
    closer: watch::Sender<bool>,
}

impl PoolTable {
    fn size(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.pending
    }

    fn generation(&self, key: &EndpointKey) -> (u64, u64) {
        (self.epoch, self.endpoint_epochs.get(key).copied().unwrap_or(0))
    }

    fn mark_in_use(&mut self, id: u64, key: EndpointKey) -> watch::Receiver<bool> {
        let (closer, closed) = watch::channel(false);
        self.in_use.insert(id, InUseSlot { key, closer });
        closed
    }

    /// Signal and drop every InUse slot matching `filter`.
    fn force_close_in_use(&mut self, filter: impl Fn(&EndpointKey) -> bool) -> usize {
        let ids: Vec<u64> = self
            .in_use
            .iter()
            .filter(|(_, slot)| filter(&slot.key))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(slot) = self.in_use.remove(id) {
                let _ = slot.closer.send(true);
            }
        }
        ids.len()
    }

    pub(crate) fn forget_in_use(&mut self, id: u64) {
        self.in_use.remove(&id);
    }
}

/// A reserved slot for a session being created. Dropping it without
/// `commit` (error, cancellation) gives the slot back.
struct PendingSlot {
    table: Arc<Mutex<PoolTable>>,
    generation: (u64, u64),
    armed: bool,
}

impl PendingSlot {
    fn reserve(table: &mut PoolTable, shared: &Arc<Mutex<PoolTable>>, key: &EndpointKey) -> Self {
        table.pending += 1;
        Self {
            table: shared.clone(),
            generation: table.generation(key),
            armed: true,
        }
    }

    /// Turn the reservation into a real entry; caller holds the lock.
    fn commit(mut self, table: &mut PoolTable) {
        table.pending = table.pending.saturating_sub(1);
        self.armed = false;
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if self.armed {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.pending = table.pending.saturating_sub(1);
        }
    }
}

enum Step {
    Reuse(SessionParts, watch::Receiver<bool>),
    Create(PendingSlot, Option<SessionParts>),
}

pub struct ConnectionPool {
    table: Arc<Mutex<PoolTable>>,
    connector: Arc<dyn Connector>,
    validator: LivenessValidator,
    clock: Arc<dyn Clock>,
    max_sessions: usize,
    idle_timeout: chrono::Duration,
}

impl ConnectionPool {
    pub fn new(config: &FtpFsConfig, connector: Arc<dyn Connector>, clock: Arc<dyn Clock>) -> Self {
        let validator =
            LivenessValidator::new(config.validation_ttl(), config.probe_timeout(), clock.clone());
        Self {
            table: Arc::new(Mutex::new(PoolTable::default())),
            connector,
            validator,
            clock,
            max_sessions: config.max_pool_size.max(1),
            idle_timeout: config.idle_timeout(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Hand out a validated session for `key`, creating one if needed.
    pub async fn acquire(&self, key: &EndpointKey, credentials: &Credentials) -> FtpResult<SessionHandle> {
        self.evict_stale().await;

        let step = {
            let mut table = self.lock();
            if let Some(pos) = table.idle.iter().rposition(|s| s.key == *key) {
                let parts = table.idle.remove(pos);
                let closed = table.mark_in_use(parts.id, key.clone());
                Step::Reuse(parts, closed)
            } else if table.size() < self.max_sessions {
                Step::Create(PendingSlot::reserve(&mut table, &self.table, key), None)
            } else if let Some(pos) = least_recently_used(&table.idle) {
                let victim = table.idle.remove(pos);
                Step::Create(PendingSlot::reserve(&mut table, &self.table, key), Some(victim))
            } else {
                return Err(FtpError::pool_exhausted(format!(
                    "All {} pooled sessions are in use",
                    self.max_sessions
                ))
                .with_host(key.host()));
            }
        };

        match step {
            Step::Reuse(parts, closed) => {
                let mut handle = SessionHandle::checked_out(parts, closed, Arc::downgrade(&self.table));
                if self.validator.is_valid(&mut handle).await {
                    log::debug!("Reusing session {} for {}", handle.id(), key);
                    return Ok(handle);
                }

                log::info!("Discarding stale session {} for {}", handle.id(), key);
                let slot = {
                    let mut table = self.lock();
                    table
                        .in_use
                        .remove(&handle.id())
                        .map(|_| PendingSlot::reserve(&mut table, &self.table, key))
                };
                if let Some(mut parts) = handle.into_parts() {
                    parts.session.close().await;
                }
                match slot {
                    Some(slot) => self.create(key, credentials, slot).await,
                    None => Err(FtpError::connection_closed().with_host(key.host())),
                }
            }
            Step::Create(slot, victim) => {
                if let Some(mut victim) = victim {
                    log::debug!("Evicting idle session {} for {} to make room", victim.id, victim.key);
                    victim.session.close().await;
                }
                self.create(key, credentials, slot).await
            }
        }
    }

    async fn create(
        &self,
        key: &EndpointKey,
        credentials: &Credentials,
        slot: PendingSlot,
    ) -> FtpResult<SessionHandle> {
        let mut session = self
            .connector
            .connect(key.host(), key.port(), key.scheme())
            .await
            .map_err(|e| e.with_host(key.host()))?;
        if let Err(e) = session
            .authenticate(credentials.login_user(), credentials.login_password())
            .await
        {
            session.close().await;
            return Err(e.with_host(key.host()));
        }

        let now = self.clock.now();
        let mut parts = SessionParts {
            id: 0,
            key: key.clone(),
            session,
            created_at: now,
            last_activity: now,
            last_validated: now,
        };

        let closed = {
            let mut table = self.lock();
            if table.generation(key) != slot.generation {
                None
            } else {
                parts.id = table.next_id;
                table.next_id += 1;
                let closed = table.mark_in_use(parts.id, key.clone());
                slot.commit(&mut table);
                Some(closed)
            }
        };

        match closed {
            Some(closed) => {
                log::info!("Opened session {} for {}", parts.id, key);
                Ok(SessionHandle::checked_out(parts, closed, Arc::downgrade(&self.table)))
            }
            None => {
                log::debug!("Connections to {} were closed while connecting", key);
                parts.session.close().await;
                Err(FtpError::connection_closed().with_host(key.host()))
            }
        }
    }

    /// Return a handle. A healthy session goes back to Idle; a stale or
    /// force-closed one is discarded.
    pub async fn release(&self, handle: SessionHandle) {
        let reusable = handle.is_reusable();
        let id = handle.id();
        let Some(parts) = handle.into_parts() else {
            self.lock().forget_in_use(id);
            return;
        };

        let discard = {
            let mut table = self.lock();
            let tracked = table.in_use.remove(&id).is_some();
            if reusable && tracked {
                let mut parts = parts;
                parts.last_activity = self.clock.now();
                table.idle.push(parts);
                None
            } else {
                Some(parts)
            }
        };

        if let Some(mut parts) = discard {
            log::debug!("Closing released session {} for {}", parts.id, parts.key);
            parts.session.close().await;
        }
    }

    /// Close Idle sessions unused for longer than the idle timeout.
    pub async fn evict_stale(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<SessionParts> = {
            let mut table = self.lock();
            let (expired, kept): (Vec<SessionParts>, Vec<SessionParts>) = std::mem::take(&mut table.idle)
                .into_iter()
                .partition(|s| now - s.last_activity > self.idle_timeout);
            table.idle = kept;
            expired
        };

        let count = expired.len();
        for mut s in expired {
            log::debug!("Session {} for {} idle too long", s.id, s.key);
            s.session.close().await;
        }
        if count > 0 {
            log::info!("FTP pool: evicted {} idle sessions", count);
        }
        count
    }

    /// Close everything. In-flight operations fail with
    /// `Disconnected("connection closed")`.
    pub async fn close_all(&self) -> usize {
        let (idle, in_use) = {
            let mut table = self.lock();
            table.epoch += 1;
            let in_use = table.force_close_in_use(|_| true);
            (std::mem::take(&mut table.idle), in_use)
        };
        let count = idle.len() + in_use;
        for mut s in idle {
            s.session.close().await;
        }
        log::info!("FTP pool: closed all {} sessions", count);
        count
    }

    /// `close_all` restricted to one endpoint.
    pub async fn close_endpoint(&self, key: &EndpointKey) -> usize {
        let (idle, in_use) = {
            let mut table = self.lock();
            *table.endpoint_epochs.entry(key.clone()).or_insert(0) += 1;
            let in_use = table.force_close_in_use(|k| k == key);
            let (idle, kept): (Vec<SessionParts>, Vec<SessionParts>) =
                std::mem::take(&mut table.idle).into_iter().partition(|s| s.key == *key);
            table.idle = kept;
            (idle, in_use)
        };
        let count = idle.len() + in_use;
        for mut s in idle {
            s.session.close().await;
        }
        log::info!("FTP pool: closed {} sessions for {}", count, key);
        count
    }

    pub fn stats(&self) -> PoolStats {
        let table = self.lock();
        PoolStats {
            total_sessions: table.size() as u32,
            idle_sessions: table.idle.len() as u32,
            in_use_sessions: table.in_use.len() as u32,
            pending_sessions: table.pending as u32,
            max_sessions: self.max_sessions as u32,
        }
    }

    /// Distinct endpoints with at least one Idle or InUse session, ordered
    /// by base URL.
    pub fn open_endpoints(&self) -> Vec<EndpointKey> {
        let table = self.lock();
        let keys: BTreeMap<String, EndpointKey> = table
            .idle
            .iter()
            .map(|s| &s.key)
            .chain(table.in_use.values().map(|slot| &slot.key))
            .map(|k| (k.base_url(), k.clone()))
            .collect();
        keys.into_values().collect()
    }
}

fn least_recently_used(idle: &[SessionParts]) -> Option<usize> {
    idle.iter()
        .enumerate()
        .min_by_key(|(_, s)| s.last_activity)
        .map(|(pos, _)| pos)
}

/// Spawn a background task that periodically evicts idle sessions. The
/// task ends once the pool is dropped.
pub fn spawn_pool_maintenance(pool: &Arc<ConnectionPool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let pool = Arc::downgrade(pool);
    tokio::spawn(async move {
        let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(pool) = pool.upgrade() else {
                break;
            };
            pool.evict_stale().await;
        }
    })
}
