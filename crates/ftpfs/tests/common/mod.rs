//! In-memory FTP server used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use ftpfs::{
    Attributes, Clock, Connector, DirEntry, FtpError, FtpFsConfig, FtpResult, ManualClock,
    RemoteFs, RemoteSession, Scheme,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared state of the fake server plus counters the tests assert on.
#[derive(Default)]
pub struct MockServer {
    pub connects: AtomicUsize,
    pub logins: AtomicUsize,
    pub noops: AtomicUsize,
    pub lists: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_auth: AtomicBool,
    pub fail_noop: AtomicBool,
    /// NOOP never gets a reply.
    pub hang_noop: AtomicBool,
    pub fail_list: AtomicBool,
    /// Listings park until `release_lists` is notified.
    pub hold_lists: AtomicBool,
    pub release_lists: tokio::sync::Notify,
    /// Directory path → its entries.
    tree: Mutex<BTreeMap<String, Vec<DirEntry>>>,
    ops: Mutex<Vec<String>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        let server = Arc::new(Self::default());
        server.add_dir("/");
        server
    }

    pub fn add_dir(&self, path: &str) {
        let mut tree = self.tree.lock().unwrap();
        tree.entry(path.to_string()).or_default();
        if let Some((parent, name)) = split(path) {
            let siblings = tree.entry(parent).or_default();
            if !siblings.iter().any(|e| e.name == name) {
                siblings.push(detailed(&name, true));
            }
        }
    }

    pub fn add_file(&self, path: &str) {
        let (parent, name) = split(path).unwrap();
        let mut tree = self.tree.lock().unwrap();
        tree.entry(parent).or_default().push(detailed(&name, false));
    }

    pub fn has(&self, path: &str) -> bool {
        let Some((parent, name)) = split(path) else {
            return true;
        };
        let tree = self.tree.lock().unwrap();
        tree.get(&parent)
            .map(|entries| entries.iter().any(|e| e.name == name))
            .unwrap_or(false)
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

pub fn detailed(name: &str, is_directory: bool) -> DirEntry {
    DirEntry::detailed(
        name,
        is_directory,
        Attributes {
            size: Some(if is_directory { 4096 } else { 123 }),
            permissions: Some(if is_directory { "drwxr-xr-x" } else { "-rw-r--r--" }.into()),
            owner: Some("ftp".into()),
            group: Some("ftp".into()),
            ..Attributes::default()
        },
    )
}

fn split(path: &str) -> Option<(String, String)> {
    if path == "/" {
        return None;
    }
    let pos = path.rfind('/')?;
    let parent = if pos == 0 { "/".to_string() } else { path[..pos].to_string() };
    Some((parent, path[pos + 1..].to_string()))
}

fn missing(path: &str) -> FtpError {
    FtpError::from_reply(550, &format!("550 {}: No such file or directory", path))
}

pub struct MockConnector {
    pub server: Arc<MockServer>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &str, _port: u16, _scheme: Scheme) -> FtpResult<Box<dyn RemoteSession>> {
        tokio::task::yield_now().await;
        if self.server.fail_connect.load(Ordering::SeqCst) {
            return Err(FtpError::connection_failed(format!("{} refused the connection", host)));
        }
        let id = self.server.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            id,
            server: self.server.clone(),
        }))
    }
}

pub struct MockSession {
    id: usize,
    server: Arc<MockServer>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn authenticate(&mut self, user: &str, _password: &str) -> FtpResult<()> {
        if self.server.fail_auth.load(Ordering::SeqCst) {
            return Err(FtpError::from_reply(530, "530 Login incorrect"));
        }
        self.server.logins.fetch_add(1, Ordering::SeqCst);
        self.server.record(format!("#{} USER {}", self.id, user));
        Ok(())
    }

    async fn noop(&mut self) -> FtpResult<()> {
        self.server.noops.fetch_add(1, Ordering::SeqCst);
        if self.server.hang_noop.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.server.fail_noop.load(Ordering::SeqCst) {
            return Err(FtpError::disconnected("Server closed connection"));
        }
        Ok(())
    }

    async fn list_directory(&mut self, path: &str, detailed: bool) -> FtpResult<Vec<DirEntry>> {
        self.server.lists.fetch_add(1, Ordering::SeqCst);
        if self.server.hold_lists.load(Ordering::SeqCst) {
            self.server.release_lists.notified().await;
        }
        if self.server.fail_list.load(Ordering::SeqCst) {
            return Err(FtpError::from_reply(426, "426 Connection closed; transfer aborted"));
        }
        let entries = self
            .server
            .tree
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| missing(path))?;
        Ok(if detailed {
            entries
        } else {
            entries.into_iter().map(DirEntry::into_name_only).collect()
        })
    }

    async fn make_dir(&mut self, path: &str) -> FtpResult<()> {
        self.server.record(format!("MKD {}", path));
        let (parent, _) = split(path).ok_or_else(|| missing(path))?;
        if !self.server.tree.lock().unwrap().contains_key(&parent) {
            return Err(missing(&parent));
        }
        self.server.add_dir(path);
        Ok(())
    }

    async fn remove_file(&mut self, path: &str) -> FtpResult<()> {
        self.server.record(format!("DELE {}", path));
        let (parent, name) = split(path).ok_or_else(|| missing(path))?;
        let mut tree = self.server.tree.lock().unwrap();
        let siblings = tree.get_mut(&parent).ok_or_else(|| missing(path))?;
        let before = siblings.len();
        siblings.retain(|e| e.name != name);
        if siblings.len() == before {
            return Err(missing(path));
        }
        Ok(())
    }

    async fn remove_dir(&mut self, path: &str) -> FtpResult<()> {
        self.server.record(format!("RMD {}", path));
        let (parent, name) = split(path).ok_or_else(|| missing(path))?;
        let mut tree = self.server.tree.lock().unwrap();
        match tree.get(path) {
            Some(children) if !children.is_empty() => {
                return Err(FtpError::from_reply(550, "550 Directory not empty"))
            }
            Some(_) => {}
            None => return Err(missing(path)),
        }
        tree.remove(path);
        if let Some(siblings) = tree.get_mut(&parent) {
            siblings.retain(|e| e.name != name);
        }
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        self.server.record(format!("RNFR {} RNTO {}", from, to));
        let (from_parent, from_name) = split(from).ok_or_else(|| missing(from))?;
        let (to_parent, to_name) = split(to).ok_or_else(|| missing(to))?;
        let mut tree = self.server.tree.lock().unwrap();

        let siblings = tree.get_mut(&from_parent).ok_or_else(|| missing(from))?;
        let pos = siblings
            .iter()
            .position(|e| e.name == from_name)
            .ok_or_else(|| missing(from))?;
        let mut entry = siblings.remove(pos);
        entry.name = to_name;
        tree.entry(to_parent).or_default().push(entry);

        let moved: Vec<String> = tree
            .keys()
            .filter(|k| k.as_str() == from || k.starts_with(&format!("{}/", from)))
            .cloned()
            .collect();
        for old in moved {
            if let Some(children) = tree.remove(&old) {
                tree.insert(format!("{}{}", to, &old[from.len()..]), children);
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.server.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A `RemoteFs` over the mock server with a manual clock.
pub fn remote_fs(config: FtpFsConfig) -> (RemoteFs, Arc<MockServer>, Arc<ManualClock>) {
    let server = MockServer::new();
    let clock = Arc::new(ManualClock::default());
    let connector = Arc::new(MockConnector {
        server: server.clone(),
    });
    let fs = RemoteFs::with_parts(config, connector, clock.clone() as Arc<dyn Clock>).unwrap();
    (fs, server, clock)
}

pub fn config_with_pool(max_pool_size: usize) -> FtpFsConfig {
    FtpFsConfig {
        max_pool_size,
        ..FtpFsConfig::default()
    }
}

/// Let spawned tasks run until `done` holds.
pub async fn wait_until(done: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
