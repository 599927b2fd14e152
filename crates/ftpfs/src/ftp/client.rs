//! Production transport: one FTP control connection per `FtpClient`.
//!
//! Lifecycle: `FtpConnector::connect()` (TCP, banner, AUTH TLS for ftps) →
//! `authenticate()` (USER/PASS, FEAT, OPTS UTF8, TYPE I, PBSZ/PROT) →
//! listings and simple directory operations → `close()` (QUIT).

use crate::ftp::config::FtpFsConfig;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::parser;
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::transfer::{self, DataChannelOptions};
use crate::ftp::transport::{Connector, RemoteSession};
use crate::ftp::types::{DirEntry, Scheme};
use async_trait::async_trait;
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Capabilities advertised in the FEAT reply that listings care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFeatures {
    pub mlsd: bool,
    pub epsv: bool,
    pub utf8: bool,
}

impl ServerFeatures {
    fn from_feat_lines(lines: &[String]) -> Self {
        let raw: Vec<String> = lines
            .iter()
            .skip(1)
            .filter(|l| !l.starts_with("211"))
            .map(|l| l.trim().to_uppercase())
            .collect();
        let has = |feat: &str| raw.iter().any(|l| l.starts_with(feat));
        Self {
            mlsd: has("MLSD") || has("MLST"),
            epsv: has("EPSV"),
            utf8: has("UTF8"),
        }
    }
}

/// Opens `FtpClient`s.
#[derive(Clone)]
pub struct FtpConnector {
    connect_timeout: Duration,
    data_timeout: Duration,
    accept_invalid_certs: bool,
}

impl FtpConnector {
    pub fn new(config: &FtpFsConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            data_timeout: config.data_timeout(),
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }
}

#[async_trait]
impl Connector for FtpConnector {
    async fn connect(&self, host: &str, port: u16, scheme: Scheme) -> FtpResult<Box<dyn RemoteSession>> {
        let addr = transfer::socket_addr_string(host, port);
        log::debug!("Connecting to {}://{}", scheme, addr);

        let tcp = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| FtpError::connection_failed(format!("Connect to {} timed out", addr)))?
            .map_err(|e| FtpError::connection_failed(format!("Connect to {}: {}", addr, e)))?;
        let _ = tcp.set_nodelay(true);

        let mut codec = FtpCodec::from_tcp(tcp, self.data_timeout);
        let banner = codec.read_response().await.map_err(|e| match e.kind {
            FtpErrorKind::Timeout | FtpErrorKind::Disconnected | FtpErrorKind::IoError => {
                FtpError::connection_failed(format!("No greeting from {}: {}", addr, e.message))
            }
            _ => e,
        })?;
        if banner.code != 220 {
            return Err(FtpError::from_reply(banner.code, &banner.text())
                .with_host(host.to_string()));
        }

        let tls_config = if scheme.is_secure() {
            let resp = codec.execute("AUTH TLS").await?;
            if resp.code != 234 {
                return Err(FtpError::tls_failed(format!("AUTH TLS rejected: {}", resp.text())));
            }
            let config = tls::build_client_config(self.accept_invalid_certs)?;
            codec = tls::upgrade_to_tls(codec, host, config.clone()).await?;
            Some(config)
        } else {
            None
        };

        Ok(Box::new(FtpClient {
            host: host.to_string(),
            codec,
            tls: tls_config,
            features: ServerFeatures::default(),
            data_timeout: self.data_timeout,
        }))
    }
}

/// A connected FTP control session.
pub struct FtpClient {
    host: String,
    codec: FtpCodec,
    tls: Option<Arc<ClientConfig>>,
    features: ServerFeatures,
    data_timeout: Duration,
}

impl FtpClient {
    pub fn features(&self) -> &ServerFeatures {
        &self.features
    }

    /// A server without FEAT gets the defaults; a dead connection is an error.
    async fn probe_features(&mut self) -> FtpResult<ServerFeatures> {
        let resp = self.codec.execute("FEAT").await?;
        Ok(if resp.is_completion() {
            ServerFeatures::from_feat_lines(&resp.lines)
        } else {
            ServerFeatures::default()
        })
    }

    /// Open a data channel, send `cmd`, collect the body, then read the
    /// completion reply.
    async fn retrieve_listing(&mut self, cmd: &str) -> FtpResult<String> {
        let opts = DataChannelOptions {
            host: &self.host,
            use_epsv: self.features.epsv,
            tls: self.tls.clone(),
            timeout: self.data_timeout,
        };
        let tcp = transfer::open_data_channel(&mut self.codec, &opts).await?;

        let resp = self.codec.execute(cmd).await?;
        if !resp.is_preliminary() && !resp.is_completion() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }

        let received = match transfer::secure_data(tcp, &opts).await {
            Ok(ds) => transfer::read_to_string(ds, self.data_timeout).await,
            Err(e) => Err(e),
        };
        let body = match received {
            Ok(body) => body,
            Err(e) => {
                // Keep the control channel in step: consume the 226/426.
                if resp.is_preliminary() {
                    self.codec.read_response().await?;
                }
                return Err(e);
            }
        };

        if resp.is_preliminary() {
            let done = self.codec.read_response().await?;
            if !done.is_completion() {
                return Err(FtpError::from_reply(done.code, &done.text()));
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl RemoteSession for FtpClient {
    async fn authenticate(&mut self, user: &str, password: &str) -> FtpResult<()> {
        let user_resp = self.codec.execute(&format!("USER {}", user)).await?;
        if user_resp.code == 331 {
            let pass_resp = self.codec.execute(&format!("PASS {}", password)).await?;
            if !pass_resp.is_completion() {
                return Err(FtpError::auth_failed(format!("Login failed: {}", pass_resp.text()))
                    .with_code(pass_resp.code));
            }
        } else if !user_resp.is_completion() {
            return Err(FtpError::auth_failed(format!("USER rejected: {}", user_resp.text()))
                .with_code(user_resp.code));
        }

        self.features = self.probe_features().await?;
        if self.features.utf8 {
            // A refusal is only a reply; transport errors still end the login.
            let resp = self.codec.execute("OPTS UTF8 ON").await?;
            if !resp.is_completion() {
                log::debug!("Server declined OPTS UTF8: {}", resp.text());
            }
        }
        self.codec.expect_ok("TYPE I").await?;

        if self.tls.is_some() {
            self.codec.expect_ok("PBSZ 0").await?;
            self.codec.expect_ok("PROT P").await?;
        }
        log::debug!("Logged in to {} as {}", self.host, user);
        Ok(())
    }

    async fn noop(&mut self) -> FtpResult<()> {
        self.codec.expect_ok("NOOP").await?;
        Ok(())
    }

    async fn list_directory(&mut self, path: &str, detailed: bool) -> FtpResult<Vec<DirEntry>> {
        self.codec.expect_ok(&format!("CWD {}", path)).await?;

        let cmd = if detailed && self.features.mlsd { "MLSD" } else { "LIST -a" };
        let body = match self.retrieve_listing(cmd).await {
            // Some servers reject LIST flags outright.
            Err(e) if cmd == "LIST -a" && e.kind == FtpErrorKind::CommandRejected => {
                self.retrieve_listing("LIST").await?
            }
            other => other?,
        };

        let entries = parser::parse_listing(&body);
        Ok(if detailed {
            entries
        } else {
            entries.into_iter().map(DirEntry::into_name_only).collect()
        })
    }

    async fn make_dir(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect_ok(&format!("MKD {}", path)).await?;
        Ok(())
    }

    async fn remove_file(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect_ok(&format!("DELE {}", path)).await?;
        Ok(())
    }

    async fn remove_dir(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect_ok(&format!("RMD {}", path)).await?;
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        self.codec.expect(&format!("RNFR {}", from), 3).await?;
        self.codec.expect_ok(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = timeout(Duration::from_secs(2), self.codec.execute("QUIT")).await;
    }
}
