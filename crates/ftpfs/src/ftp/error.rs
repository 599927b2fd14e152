//! FTP-layer error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised error, carrying enough context (host, path) for
/// user-facing display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
    pub host: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP / DNS failure while creating a session.
    ConnectionFailed,
    /// AUTH TLS / TLS handshake failure.
    TlsFailed,
    /// Wrong username/password.
    AuthFailed,
    /// Every pooled session is in use and the pool is full.
    PoolExhausted,
    /// Liveness probe failed; handled inside the pool.
    StaleSession,
    /// Directory enumeration failed (data channel, aborted transfer).
    ListingFailed,
    /// Session closed underneath the caller.
    Disconnected,
    /// Server returned a 4xx/5xx for a command.
    CommandRejected,
    /// Server sent an un-parseable response.
    ProtocolError,
    Timeout,
    IoError,
    NotFound,
    PermissionDenied,
    InvalidUrl,
    InvalidConfig,
    /// Operation this layer does not offer (trash, cross-server rename).
    Unsupported,
    Unknown,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            host: None,
            path: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the host unless a more specific one is already set.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        if self.host.is_none() {
            self.host = Some(host.into());
        }
        self
    }

    /// Attach the remote path unless a more specific one is already set.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn pool_exhausted(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::PoolExhausted, msg)
    }

    pub fn stale_session(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::StaleSession, msg)
    }

    pub fn listing_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ListingFailed, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    /// The error in-flight operations observe after a forced close.
    pub fn connection_closed() -> Self {
        Self::disconnected("connection closed")
    }

    pub fn command_rejected(code: u16, msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::CommandRejected, msg).with_code(code)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::IoError, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NotFound, msg)
    }

    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidUrl, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Unsupported, msg)
    }

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::Disconnected,
            425 | 426 | 451 => FtpErrorKind::ListingFailed,
            430 | 530 => FtpErrorKind::AuthFailed,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    FtpErrorKind::PermissionDenied
                } else if lower.contains("not found") || lower.contains("no such") {
                    FtpErrorKind::NotFound
                } else {
                    FtpErrorKind::CommandRejected
                }
            }
            500..=504 => FtpErrorKind::CommandRejected,
            _ if code >= 400 => FtpErrorKind::CommandRejected,
            _ => FtpErrorKind::Unknown,
        };
        Self::new(kind, text).with_code(code)
    }

    /// Whether the control channel can no longer be trusted after this
    /// error, so the session must not go back to the pool.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::Disconnected
                | FtpErrorKind::Timeout
                | FtpErrorKind::IoError
                | FtpErrorKind::ProtocolError
                | FtpErrorKind::StaleSession
        )
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)?,
            None => write!(f, "[FTP {:?}] {}", self.kind, self.message)?,
        }
        match (&self.host, &self.path) {
            (Some(host), Some(path)) => write!(f, " ({}:{})", host, path),
            (Some(host), None) => write!(f, " ({})", host),
            (None, Some(path)) => write!(f, " ({})", path),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => Self::disconnected(e.to_string()),
            _ => Self::io_error(e.to_string()),
        }
    }
}

impl From<FtpError> for String {
    fn from(e: FtpError) -> String {
        e.to_string()
    }
}
