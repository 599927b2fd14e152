//! # ftp — pooled FTP sessions and cached directory metadata
//!
//! Architecture:
//! - `types` — endpoint keys, credentials, directory entries, stats
//! - `error` — categorised error type shared by every layer
//! - `config` — serde-backed configuration with defaults
//! - `clock` — injectable time source (system / manual)
//! - `path` — remote path normalisation helpers
//! - `url` — `ftp://` / `ftps://` URL parsing and bookmark aliases
//! - `transport` — the `Connector` / `RemoteSession` seam
//! - `protocol` — control-channel command/response codec
//! - `tls` — rustls connector for explicit FTPS
//! - `transfer` — passive (PASV/EPSV) data channels
//! - `parser` — Unix/Windows/MLSD listing parser
//! - `client` — async FTP client implementing `RemoteSession`
//! - `session` — `SessionHandle`, the caller-owned pooled session
//! - `liveness` — NOOP probe with a validation TTL
//! - `pool` — bounded connection pool with idle reaping
//! - `stat_cache` — bounded LRU cache of directory listings
//! - `fast_mode` — process-wide detailed/names-only toggle
//! - `service` — `RemoteFs`, the façade the host talks to

pub mod types;
pub mod error;
pub mod config;
pub mod clock;
pub mod path;
pub mod url;
pub mod transport;
pub mod protocol;
pub mod tls;
pub mod transfer;
pub mod parser;
pub mod client;
pub mod session;
pub mod liveness;
pub mod pool;
pub mod stat_cache;
pub mod fast_mode;
pub mod service;

pub use types::*;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use config::FtpFsConfig;
pub use clock::{Clock, ManualClock, SystemClock};
pub use self::url::{BookmarkResolver, Bookmarks, FtpUrl};
pub use transport::{Connector, RemoteSession};
pub use client::{FtpClient, FtpConnector};
pub use session::SessionHandle;
pub use liveness::LivenessValidator;
pub use pool::{spawn_pool_maintenance, ConnectionPool};
pub use stat_cache::{CacheEntry, CacheKey, FillTicket, StatCache};
pub use fast_mode::FastModeSwitch;
pub use service::{RemoteFs, RemoteFsState};
