//! Passive data channels for listings (RFC 959 PASV, RFC 2428 EPSV).
//!
//! The data socket is TLS-wrapped when the control channel runs PROT P,
//! after the transfer command has been sent.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use lazy_static::lazy_static;
use regex::Regex;
use rustls::ClientConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::client::TlsStream;

lazy_static! {
    static ref PASV_REPLY: Regex = Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").unwrap();
    static ref EPSV_REPLY: Regex = Regex::new(r"\(\|\|\|(\d+)\|\)").unwrap();
}

/// A plain or TLS-wrapped data stream.
pub enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// How to reach and secure the data channel of one control connection.
pub struct DataChannelOptions<'a> {
    /// Control-connection host; EPSV replies and unroutable PASV addresses
    /// are resolved against it.
    pub host: &'a str,
    pub use_epsv: bool,
    pub tls: Option<Arc<ClientConfig>>,
    pub timeout: Duration,
}

/// Negotiate a passive data channel and connect to it.
///
/// Returns the bare TCP socket. Under PROT P the transfer command must go
/// out before `secure_data`; vsftpd only answers the handshake after it.
pub async fn open_data_channel(
    codec: &mut FtpCodec,
    opts: &DataChannelOptions<'_>,
) -> FtpResult<TcpStream> {
    let addr = if opts.use_epsv {
        let resp = codec.expect_ok("EPSV").await?;
        socket_addr_string(opts.host, parse_epsv_response(&resp.text())?)
    } else {
        let resp = codec.expect_ok("PASV").await?;
        let addr = parse_pasv_response(&resp.text())?;
        if addr.ip().is_unspecified() || is_private_behind_public(addr.ip(), opts.host) {
            log::debug!("PASV returned {}, using control host instead", addr.ip());
            socket_addr_string(opts.host, addr.port())
        } else {
            addr.to_string()
        }
    };
    connect_data(&addr, opts.timeout).await
}

async fn connect_data(addr: &str, connect_timeout: Duration) -> FtpResult<TcpStream> {
    timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| FtpError::listing_failed("Data connection timed out"))?
        .map_err(|e| FtpError::listing_failed(format!("Data connection to {}: {}", addr, e)))
}

/// Wrap an accepted data socket in TLS when the control channel runs
/// PROT P; otherwise pass it through.
pub async fn secure_data(tcp: TcpStream, opts: &DataChannelOptions<'_>) -> FtpResult<DataStream> {
    match &opts.tls {
        Some(config) => {
            let tls = timeout(
                opts.timeout,
                tls::wrap_data_stream(tcp, opts.host, config.clone()),
            )
            .await
            .map_err(|_| FtpError::timeout("Data channel TLS handshake timed out"))??;
            Ok(DataStream::Tls(Box::new(tls)))
        }
        None => Ok(DataStream::Plain(tcp)),
    }
}

/// `host:port` for `TcpStream::connect`; bare IPv6 literals get brackets.
pub(crate) fn socket_addr_string(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Servers behind NAT often advertise their private address.
fn is_private_behind_public(advertised: IpAddr, control_host: &str) -> bool {
    let control: Option<Ipv4Addr> = control_host.parse().ok();
    match (advertised, control) {
        (IpAddr::V4(adv), Some(ctrl)) => adv.is_private() && !ctrl.is_private(),
        _ => false,
    }
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 reply.
pub(crate) fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let caps = PASV_REPLY
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let nums: Vec<u8> = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = (nums[4] as u16) * 256 + (nums[5] as u16);
    Ok(SocketAddr::new(ip, port))
}

/// Parse the port from `229 Entering Extended Passive Mode (|||port|)`.
pub(crate) fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let caps = EPSV_REPLY
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}

/// Drain the data channel. A TLS peer that skips close_notify still ends
/// the listing.
pub async fn read_to_string(ds: DataStream, data_timeout: Duration) -> FtpResult<String> {
    let mut buf = Vec::new();
    let read = async {
        match ds {
            DataStream::Plain(mut s) => s.read_to_end(&mut buf).await.map(|_| ()),
            DataStream::Tls(mut s) => match s.read_to_end(&mut buf).await {
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(()),
                other => other.map(|_| ()),
            },
        }
    };
    timeout(data_timeout, read)
        .await
        .map_err(|_| FtpError::timeout("Timed out reading directory listing"))?
        .map_err(|e| FtpError::listing_failed(format!("Data channel read: {}", e)))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pasv() {
        let addr = parse_pasv_response("227 Entering Passive Mode (192,168,1,10,195,80)").unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.10");
        assert_eq!(addr.port(), 195 * 256 + 80);
        assert!(parse_pasv_response("227 nope").is_err());
        assert!(parse_pasv_response("227 (300,1,1,1,1,1)").is_err());
    }

    #[test]
    fn parses_epsv() {
        assert_eq!(
            parse_epsv_response("229 Entering Extended Passive Mode (|||50123|)").unwrap(),
            50123
        );
        assert!(parse_epsv_response("229 (|||99999|)").is_err());
    }

    #[test]
    fn brackets_ipv6_hosts() {
        assert_eq!(socket_addr_string("ftp.example.com", 21), "ftp.example.com:21");
        assert_eq!(socket_addr_string("192.0.2.7", 50000), "192.0.2.7:50000");
        assert_eq!(socket_addr_string("2001:db8::1", 21), "[2001:db8::1]:21");
        assert_eq!(socket_addr_string("[::1]", 2121), "[::1]:2121");
        let parsed: SocketAddr = socket_addr_string("::1", 990).parse().unwrap();
        assert_eq!(parsed.port(), 990);
    }

    #[tokio::test]
    async fn plain_data_channel_passes_through_unwrapped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"-rw-r--r-- 1 ftp ftp 3 Jan 01 2024 a.txt\r\n").await.unwrap();
        });

        let opts = DataChannelOptions {
            host: "127.0.0.1",
            use_epsv: false,
            tls: None,
            timeout: Duration::from_secs(5),
        };
        let tcp = connect_data(&addr, opts.timeout).await.unwrap();
        let ds = secure_data(tcp, &opts).await.unwrap();
        assert!(matches!(ds, DataStream::Plain(_)));
        let body = read_to_string(ds, opts.timeout).await.unwrap();
        assert!(body.ends_with("a.txt\r\n"));
        server.await.unwrap();
    }

    #[test]
    fn detects_nat_addresses() {
        let private: IpAddr = "10.0.0.5".parse().unwrap();
        assert!(is_private_behind_public(private, "203.0.113.7"));
        assert!(!is_private_behind_public(private, "10.0.0.1"));
        assert!(!is_private_behind_public(private, "ftp.example.com"));
    }
}
