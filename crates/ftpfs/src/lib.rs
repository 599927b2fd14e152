//! # ftpfs — FTP/FTPS remote folders
//!
//! Connection and metadata caching layer that lets a file-manager front end
//! browse remote FTP/FTPS trees as if they were local folders:
//!   • Connection pool keyed by endpoint (scheme, host, port, user)
//!   • NOOP liveness validation with a short time-to-live
//!   • Idle sweeping and LRU eviction under a hard session cap
//!   • Bounded LRU stat cache with prefix invalidation
//!   • Fast mode (filename-only listings) with invalidate-on-flip
//!   • Async FTP/FTPS client implementing the session transport

pub mod ftp;

pub use ftp::*;
