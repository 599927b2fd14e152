//! Control-channel codec (RFC 959 §4).
//!
//! Sends CRLF-terminated commands and reads single- and multi-line replies:
//! ```text
//! 220-Welcome to my FTP server
//! 220-This is line 2
//! 220 End of greeting
//! ```

use crate::ftp::error::{FtpError, FtpResult};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

/// A single FTP reply (may be multi-line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Text of the final line with the code stripped.
    pub fn message(&self) -> &str {
        self.lines
            .last()
            .map(|l| l.get(4..).unwrap_or(""))
            .unwrap_or("")
    }

    pub fn is_success(&self) -> bool {
        self.code < 400
    }

    /// Positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

/// Plain or TLS-secured control stream.
pub enum ControlStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

pub struct FtpCodec {
    stream: ControlStream,
    reply_timeout: Duration,
}

impl FtpCodec {
    pub fn from_tcp(stream: TcpStream, reply_timeout: Duration) -> Self {
        Self {
            stream: ControlStream::Plain(BufReader::new(stream)),
            reply_timeout,
        }
    }

    pub fn from_tls(stream: TlsStream<TcpStream>, reply_timeout: Duration) -> Self {
        Self {
            stream: ControlStream::Tls(Box::new(BufReader::new(stream))),
            reply_timeout,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.stream, ControlStream::Tls(_))
    }

    /// Give back the plain socket for an AUTH TLS upgrade.
    pub fn into_plain(self) -> FtpResult<(TcpStream, Duration)> {
        match self.stream {
            ControlStream::Plain(reader) => Ok((reader.into_inner(), self.reply_timeout)),
            ControlStream::Tls(_) => Err(FtpError::protocol_error(
                "Cannot upgrade: connection is already TLS",
            )),
        }
    }

    /// Send a raw FTP command (CRLF is appended here).
    ///
    /// A command carrying its own CR or LF would smuggle a second command
    /// onto the wire, so it is refused before anything is written.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        if cmd.contains(['\r', '\n']) {
            return Err(FtpError::protocol_error(format!(
                "Refusing {} command with embedded line break",
                cmd.split_whitespace().next().unwrap_or("empty")
            )));
        }
        let line = format!("{}\r\n", cmd);
        match &mut self.stream {
            ControlStream::Plain(s) => {
                s.get_mut().write_all(line.as_bytes()).await?;
                s.get_mut().flush().await?;
            }
            ControlStream::Tls(s) => {
                s.get_mut().write_all(line.as_bytes()).await?;
                s.get_mut().flush().await?;
            }
        }
        if cmd.starts_with("PASS ") {
            log::trace!(">>> PASS ****");
        } else {
            log::trace!(">>> {}", cmd);
        }
        Ok(())
    }

    async fn read_line_raw(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        let read = async {
            match &mut self.stream {
                ControlStream::Plain(r) => r.read_line(&mut buf).await,
                ControlStream::Tls(r) => r.read_line(&mut buf).await,
            }
        };
        let n = timeout(self.reply_timeout, read)
            .await
            .map_err(|_| FtpError::timeout("Timed out waiting for server reply"))??;
        if n == 0 {
            return Err(FtpError::disconnected("Server closed connection"));
        }
        Ok(buf)
    }

    /// Read a complete reply, following `NNN-` continuation lines until the
    /// matching `NNN ` terminator.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line_raw().await?;
        let first = first.trim_end_matches(['\r', '\n']).to_string();
        let code = parse_code(&first)?;

        let is_multi = first.as_bytes().get(3) == Some(&b'-');
        let mut lines = vec![first];
        if is_multi {
            let terminator = format!("{} ", code);
            loop {
                let next = self.read_line_raw().await?;
                let next = next.trim_end_matches(['\r', '\n']).to_string();
                let done = next.starts_with(&terminator) || next == code.to_string();
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        log::trace!("<<< {} {}", resp.code, resp.message());
        Ok(resp)
    }

    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Send a command and require a reply in the given class (1–5).
    pub async fn expect(&mut self, cmd: &str, expected_first_digit: u16) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if resp.code / 100 != expected_first_digit {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    /// Expect a 2xx reply.
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.expect(cmd, 2).await
    }
}

/// Parse the 3-digit reply code from the start of a line.
pub(crate) fn parse_code(line: &str) -> FtpResult<u16> {
    line.get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| FtpError::protocol_error(format!("Invalid reply code in: '{}'", line)))
}
