//! High-level orchestrator. Owns the pool, the stat cache, the fast-mode
//! switch and the visited-path history. This is what a file manager's
//! `ftp://` / `ftps://` filesystem delegates to.

use crate::ftp::client::FtpConnector;
use crate::ftp::clock::{Clock, SystemClock};
use crate::ftp::config::FtpFsConfig;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::fast_mode::FastModeSwitch;
use crate::ftp::path;
use crate::ftp::pool::{spawn_pool_maintenance, ConnectionPool};
use crate::ftp::session::SessionHandle;
use crate::ftp::stat_cache::StatCache;
use crate::ftp::transport::Connector;
use crate::ftp::types::{DirEntry, OpenConnection, PoolStats, StatCacheStats};
use crate::ftp::url::{BookmarkResolver, FtpUrl};
use log::info;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle for the host application.
pub type RemoteFsState = Arc<RemoteFs>;

pub struct RemoteFs {
    config: FtpFsConfig,
    pool: Arc<ConnectionPool>,
    cache: StatCache,
    fast_mode: FastModeSwitch,
    bookmarks: Option<Arc<dyn BookmarkResolver>>,
    /// base URL → last visited (password-free) URL.
    visited: Mutex<HashMap<String, String>>,
}

impl RemoteFs {
    /// Production setup: real FTP transport, wall-clock time.
    pub fn new(config: FtpFsConfig) -> FtpResult<Self> {
        let connector = Arc::new(FtpConnector::new(&config));
        Self::with_parts(config, connector, Arc::new(SystemClock))
    }

    /// Assemble from an explicit transport and clock. Validates the config.
    pub fn with_parts(
        config: FtpFsConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> FtpResult<Self> {
        config.validate()?;
        let pool = Arc::new(ConnectionPool::new(&config, connector, clock.clone()));
        let cache = StatCache::new(config.max_stat_entries, clock);
        let fast_mode = FastModeSwitch::new(config.fast_mode);
        Ok(Self {
            config,
            pool,
            cache,
            fast_mode,
            bookmarks: None,
            visited: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_bookmarks(mut self, resolver: Arc<dyn BookmarkResolver>) -> Self {
        self.bookmarks = Some(resolver);
        self
    }

    /// Start the periodic idle sweep; needs a running tokio runtime.
    pub fn start_maintenance(&self) -> tokio::task::JoinHandle<()> {
        spawn_pool_maintenance(&self.pool, self.config.maintenance_interval())
    }

    pub fn config(&self) -> &FtpFsConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> &StatCache {
        &self.cache
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn cache_stats(&self) -> StatCacheStats {
        self.cache.stats()
    }

    pub fn parse_url(&self, url: &str) -> FtpResult<FtpUrl> {
        FtpUrl::parse_with(url, self.bookmarks.as_deref())
    }

    // ─── Sessions ────────────────────────────────────────────────

    pub async fn acquire_for_url(&self, url: &str) -> FtpResult<SessionHandle> {
        let target = self.parse_url(url)?;
        self.acquire(&target).await
    }

    async fn acquire(&self, target: &FtpUrl) -> FtpResult<SessionHandle> {
        self.pool.acquire(target.endpoint(), target.credentials()).await
    }

    pub async fn release(&self, handle: SessionHandle) {
        self.pool.release(handle).await;
    }

    // ─── Listings ────────────────────────────────────────────────

    /// Entries of the directory at `url`, from the cache when possible.
    /// Only successful listings are cached.
    pub async fn list_directory(&self, url: &str) -> FtpResult<Arc<Vec<DirEntry>>> {
        let target = self.parse_url(url)?;
        self.listing(&target, None).await
    }

    /// Cache first; otherwise list through `held` or a freshly acquired
    /// session.
    async fn listing(
        &self,
        target: &FtpUrl,
        held: Option<&mut SessionHandle>,
    ) -> FtpResult<Arc<Vec<DirEntry>>> {
        let detailed = !self.fast_mode.get();
        let key = target.cache_key();
        if let Some(hit) = self.cache.get(&key, detailed) {
            log::trace!("Stat cache hit for {}", target.display_url());
            return Ok(hit.entries);
        }

        let ticket = self.cache.begin_fill();
        let result = match held {
            Some(handle) => handle.list_directory(target.path(), detailed).await,
            None => {
                let mut handle = self.acquire(target).await?;
                let result = handle.list_directory(target.path(), detailed).await;
                self.pool.release(handle).await;
                result
            }
        };
        let entries = result.map_err(|e| {
            e.with_host(target.endpoint().host())
                .with_path(target.path())
        })?;

        let entries = if detailed {
            entries
        } else {
            entries.into_iter().map(DirEntry::into_name_only).collect()
        };
        self.cache
            .put_if_current(ticket, key, entries.clone(), detailed);
        Ok(Arc::new(entries))
    }

    // ─── Fast mode / cache control ───────────────────────────────

    pub fn fast_mode(&self) -> bool {
        self.fast_mode.get()
    }

    /// Flip names-only listings. A change empties the stat cache so no
    /// listing of the old shape is served afterwards.
    pub fn set_fast_mode(&self, enabled: bool) -> bool {
        let changed = self.fast_mode.set(enabled);
        if changed {
            let dropped = self.cache.invalidate_all();
            info!(
                "FTP fast mode {}; dropped {} cached listings",
                if enabled { "on" } else { "off" },
                dropped
            );
        }
        changed
    }

    /// Drop cached listings at and beneath `url`.
    pub fn invalidate(&self, url: &str) -> FtpResult<usize> {
        let target = self.parse_url(url)?;
        Ok(self.cache.invalidate(&target.cache_key()))
    }

    // ─── Connection bookkeeping ──────────────────────────────────

    pub fn record_visited(&self, url: &str) -> FtpResult<()> {
        let target = self.parse_url(url)?;
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.base_url(), target.display_url());
        Ok(())
    }

    /// One row per endpoint with pooled sessions.
    pub fn open_connections(&self) -> Vec<OpenConnection> {
        let visited = self.visited.lock().unwrap_or_else(PoisonError::into_inner);
        self.pool
            .open_endpoints()
            .into_iter()
            .map(|key| {
                let base_url = key.base_url();
                let last_visited = visited
                    .get(&base_url)
                    .cloned()
                    .unwrap_or_else(|| format!("{}/", base_url));
                OpenConnection {
                    base_url,
                    last_visited,
                }
            })
            .collect()
    }

    /// Close the sessions of one endpoint and forget what we knew about it.
    pub async fn close_connection(&self, base_url: &str) -> FtpResult<usize> {
        let target = self.parse_url(base_url)?;
        let endpoint = target.endpoint();
        let closed = self.pool.close_endpoint(endpoint).await;
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint.base_url());
        self.cache.invalidate_endpoint(endpoint);
        Ok(closed)
    }

    pub async fn close_all_connections(&self) -> usize {
        let closed = self.pool.close_all().await;
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        closed
    }

    // ─── Entry queries ───────────────────────────────────────────

    /// The entry at `url`, looked up in its parent's listing. The root is
    /// always a directory.
    pub async fn stat(&self, url: &str) -> FtpResult<Option<DirEntry>> {
        let target = self.parse_url(url)?;
        self.stat_target(&target, None).await
    }

    async fn stat_target(
        &self,
        target: &FtpUrl,
        held: Option<&mut SessionHandle>,
    ) -> FtpResult<Option<DirEntry>> {
        let Some((parent, name)) = path::split(target.path()) else {
            return Ok(Some(DirEntry::name_only("/", true)));
        };
        let listing = self.listing(&target.with_path(&parent), held).await?;
        Ok(listing.iter().find(|e| e.name == name).cloned())
    }

    /// Any failure, unreachable server included, reads as "does not exist".
    pub async fn exists(&self, url: &str) -> bool {
        match self.stat(url).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                log::debug!("exists({}) treated as false: {}", url, e);
                false
            }
        }
    }

    pub async fn is_dir(&self, url: &str) -> bool {
        match self.stat(url).await {
            Ok(entry) => entry.map(|e| e.is_directory).unwrap_or(false),
            Err(e) => {
                log::debug!("is_dir({}) treated as false: {}", url, e);
                false
            }
        }
    }

    // ─── Mutations ───────────────────────────────────────────────

    /// Create `url` and any missing parents. An existing directory is fine;
    /// an existing file in the way is not.
    pub async fn mkdir(&self, url: &str) -> FtpResult<()> {
        let target = self.parse_url(url)?;
        let mut handle = self.acquire(&target).await?;
        let result = self.make_dirs(&target, &mut handle).await;
        self.pool.release(handle).await;
        result.map_err(|e| e.with_host(target.endpoint().host()).with_path(target.path()))
    }

    async fn make_dirs(&self, target: &FtpUrl, handle: &mut SessionHandle) -> FtpResult<()> {
        let mut first_created: Option<String> = None;
        for dir in path::ancestors_inclusive(target.path()) {
            if first_created.is_none() {
                match self.stat_target(&target.with_path(&dir), Some(&mut *handle)).await? {
                    Some(entry) if entry.is_directory => continue,
                    Some(_) => {
                        return Err(FtpError::new(
                            FtpErrorKind::CommandRejected,
                            format!("{} exists and is not a directory", dir),
                        ))
                    }
                    None => {}
                }
            }
            let made = handle.make_dir(&dir).await;
            if first_created.is_none() {
                first_created = Some(dir.clone());
            }
            if let Err(e) = made {
                self.invalidate_parent_of(target, first_created.as_deref());
                return Err(e);
            }
        }
        self.invalidate_parent_of(target, first_created.as_deref());
        Ok(())
    }

    fn invalidate_parent_of(&self, target: &FtpUrl, created: Option<&str>) {
        if let Some(parent) = created.and_then(path::parent) {
            self.cache.invalidate_exact(&target.with_path(&parent).cache_key());
        }
    }

    /// Delete a file, or a directory with everything inside it.
    pub async fn delete(&self, url: &str) -> FtpResult<()> {
        let target = self.parse_url(url)?;
        if target.path() == "/" {
            return Err(FtpError::new(
                FtpErrorKind::PermissionDenied,
                "Refusing to delete the root directory",
            )
            .with_host(target.endpoint().host()));
        }

        let mut handle = self.acquire(&target).await?;
        let result = match self.stat_target(&target, Some(&mut handle)).await {
            Ok(Some(entry)) if entry.is_directory => remove_tree(&mut handle, target.path()).await,
            Ok(Some(_)) => handle.remove_file(target.path()).await,
            Ok(None) => Err(FtpError::not_found(format!("{} does not exist", target.path()))),
            Err(e) => Err(e),
        };
        self.pool.release(handle).await;

        self.forget_subtree(&target);
        result.map_err(|e| e.with_host(target.endpoint().host()).with_path(target.path()))
    }

    /// Rename within one server. Moving between servers is the host's job
    /// (copy, then delete).
    pub async fn rename(&self, src_url: &str, dst_url: &str) -> FtpResult<()> {
        let src = self.parse_url(src_url)?;
        let dst = self.parse_url(dst_url)?;
        if src.endpoint() != dst.endpoint() {
            return Err(FtpError::unsupported(format!(
                "Cannot rename across servers ({} to {})",
                src.base_url(),
                dst.base_url()
            )));
        }

        let mut handle = self.acquire(&src).await?;
        let result = handle.rename(src.path(), dst.path()).await;
        self.pool.release(handle).await;

        self.forget_subtree(&src);
        self.forget_subtree(&dst);
        result.map_err(|e| e.with_host(src.endpoint().host()).with_path(src.path()))
    }

    /// Drop the listing that shows `target` and everything cached under it.
    fn forget_subtree(&self, target: &FtpUrl) {
        self.cache.invalidate(&target.cache_key());
        if let Some(parent) = target.parent() {
            self.cache.invalidate_exact(&parent.cache_key());
        }
    }

    /// FTP servers have no trash.
    pub async fn move_to_trash(&self, url: &str) -> FtpResult<()> {
        Err(FtpError::unsupported("FTP has no Trash support").with_path(url.to_string()))
    }
}

/// Depth-first removal; does not follow symlinks (they are deleted as
/// files).
fn remove_tree<'a>(
    handle: &'a mut SessionHandle,
    dir: &'a str,
) -> Pin<Box<dyn Future<Output = FtpResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let entries = handle.list_directory(dir, false).await?;
        for entry in entries {
            let child = path::join(dir, &entry.name);
            if entry.is_directory {
                remove_tree(handle, &child).await?;
            } else {
                handle.remove_file(&child).await?;
            }
        }
        handle.remove_dir(dir).await
    })
}
