//! Shared types for the FTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Endpoint ────────────────────────────────────────────────────────

/// URL scheme of a remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain-text FTP.
    Ftp,
    /// Explicit FTPS: plain connect, then AUTH TLS before login.
    Ftps,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ftp => "ftp",
            Scheme::Ftps => "ftps",
        }
    }

    /// Both schemes share the control port; explicit FTPS upgrades in place.
    pub fn default_port(&self) -> u16 {
        21
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ftp" => Some(Scheme::Ftp),
            "ftps" => Some(Scheme::Ftps),
            _ => None,
        }
    }

    pub fn is_secure(&self) -> bool {
        *self == Scheme::Ftps
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a reusable session. Two requests with equal keys may share a
/// pooled session; different users or hosts never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointKey {
    scheme: Scheme,
    host: String,
    port: u16,
    user: String,
}

impl EndpointKey {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            scheme,
            host: host.into().to_ascii_lowercase(),
            port,
            user: user.into(),
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// `scheme://user@host:port`, or `scheme://host:port` for anonymous keys.
    pub fn base_url(&self) -> String {
        if self.user.is_empty() {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}@{}:{}", self.scheme, self.user, self.host, self.port)
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

/// Login credentials. The password is deliberately kept out of
/// `EndpointKey` and out of every log line.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// `anonymous` / `anonymous@` when the URL carries no user.
    pub fn login_user(&self) -> &str {
        if self.user.is_empty() {
            "anonymous"
        } else {
            &self.user
        }
    }

    pub fn login_password(&self) -> &str {
        if self.user.is_empty() && self.password.is_empty() {
            "anonymous@"
        } else {
            &self.password
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

// ─── Directory Listing ───────────────────────────────────────────────

/// Detailed attributes of one entry. Every field is optional because
/// servers differ in what their listings carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub link_target: Option<String>,
}

/// Shape of a listing entry: fast mode carries names only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum EntryDetails {
    Names,
    Detailed(Attributes),
}

/// One entry of a remote directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
    pub details: EntryDetails,
}

impl DirEntry {
    pub fn name_only(name: impl Into<String>, is_directory: bool) -> Self {
        Self {
            name: name.into(),
            is_directory,
            details: EntryDetails::Names,
        }
    }

    pub fn detailed(name: impl Into<String>, is_directory: bool, attributes: Attributes) -> Self {
        Self {
            name: name.into(),
            is_directory,
            details: EntryDetails::Detailed(attributes),
        }
    }

    pub fn is_detailed(&self) -> bool {
        matches!(self.details, EntryDetails::Detailed(_))
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match &self.details {
            EntryDetails::Detailed(attrs) => Some(attrs),
            EntryDetails::Names => None,
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.attributes().and_then(|a| a.size)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.attributes().and_then(|a| a.modified)
    }

    pub fn permissions(&self) -> Option<&str> {
        self.attributes().and_then(|a| a.permissions.as_deref())
    }

    pub fn owner(&self) -> Option<&str> {
        self.attributes().and_then(|a| a.owner.as_deref())
    }

    pub fn group(&self) -> Option<&str> {
        self.attributes().and_then(|a| a.group.as_deref())
    }

    /// Drop every attribute, keeping name and directory flag.
    pub fn into_name_only(self) -> Self {
        Self {
            details: EntryDetails::Names,
            ..self
        }
    }
}

// ─── Session / Pool ──────────────────────────────────────────────────

/// Lifecycle state of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    InUse,
    Stale,
    Closed,
}

/// Statistics about the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_sessions: u32,
    pub idle_sessions: u32,
    pub in_use_sessions: u32,
    /// Sessions currently being connected/authenticated.
    pub pending_sessions: u32,
    pub max_sessions: u32,
}

/// Statistics about the stat cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatCacheStats {
    pub entries: u32,
    pub capacity: u32,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// An endpoint with pooled sessions, as shown by "open connections".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenConnection {
    pub base_url: String,
    pub last_visited: String,
}
