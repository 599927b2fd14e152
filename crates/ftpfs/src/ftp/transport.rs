//! The session transport the pool drives.
//!
//! `FtpConnector` / `FtpClient` are the production implementation; tests
//! plug in in-memory fakes.

use crate::ftp::error::FtpResult;
use crate::ftp::types::{DirEntry, Scheme};
use async_trait::async_trait;

/// Opens new control connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a control connection (and, for `ftps`, secure it). The returned
    /// session is not logged in yet.
    async fn connect(&self, host: &str, port: u16, scheme: Scheme) -> FtpResult<Box<dyn RemoteSession>>;
}

/// One live control connection.
#[async_trait]
pub trait RemoteSession: Send {
    async fn authenticate(&mut self, user: &str, password: &str) -> FtpResult<()>;

    /// Cheapest possible round-trip, used only as a liveness probe.
    async fn noop(&mut self) -> FtpResult<()>;

    /// Enumerate `path`. With `detailed == false` only names and the
    /// directory flag are required.
    async fn list_directory(&mut self, path: &str, detailed: bool) -> FtpResult<Vec<DirEntry>>;

    async fn make_dir(&mut self, path: &str) -> FtpResult<()>;

    async fn remove_file(&mut self, path: &str) -> FtpResult<()>;

    /// Remove an empty directory.
    async fn remove_dir(&mut self, path: &str) -> FtpResult<()>;

    async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()>;

    /// Best-effort goodbye; never fails.
    async fn close(&mut self);
}
