use anyhow::{anyhow, bail, Context, Result};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{timeout, Duration},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

const REQUEST_TIMEOUT_SECS: u64 = 10;
const APPLICATION: &str = "Appliance";

/// Sends plain-HTTP GET notifications of the form
/// `<path>?fromApplication=Appliance&priority=<n>&message=<text>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notifier {
    host: String,
    port: u16,
    path: String,
}

impl Notifier {
    /// Parses `http://host[:port][/path]`.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| anyhow!("notification url must start with http://, got '{url}'"))?;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            bail!("notification url '{url}' has no host");
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse()
                    .with_context(|| format!("invalid port in notification url '{url}'"))?,
            ),
            None => (authority, 80),
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    pub fn request_target(&self, message: &str, priority: u32) -> String {
        // Keep any query the configured url already carries.
        let separator = if self.path.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}fromApplication={}&priority={}&message={}",
            self.path,
            APPLICATION,
            priority,
            encode_query_value(message)
        )
    }

    fn display_url(&self, target: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, target)
    }

    /// Sends one notification and returns the HTTP status code.
    pub async fn send(&self, message: &str, priority: u32) -> Result<u16> {
        let target = self.request_target(message, priority);
        let request = format!(
            "GET {target} HTTP/1.1\r\nHost: {}\r\nUser-Agent: shaker\r\nConnection: close\r\n\r\n",
            self.host
        );

        let exchange = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port))
                .await
                .with_context(|| format!("failed to connect to {}:{}", self.host, self.port))?;
            stream.write_all(request.as_bytes()).await?;

            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            parse_status(&response)
        };

        timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), exchange)
            .await
            .map_err(|_| anyhow!("notification request timed out after {REQUEST_TIMEOUT_SECS}s"))?
    }

    /// Sends and logs the outcome. Failures are reported, never returned.
    pub async fn notify(&self, message: &str, priority: u32) {
        let target = self.request_target(message, priority);
        match self.send(message, priority).await {
            Ok(200) => log_info!("notification sent: {message}"),
            Ok(status) => log_error!(
                "Error making request to {} - server returned {}",
                self.display_url(&target),
                status
            ),
            Err(err) => log_error!(
                "Error making request to {} - {err:#}",
                self.display_url(&target)
            ),
        }
    }
}

fn parse_status(response: &[u8]) -> Result<u16> {
    let head = String::from_utf8_lossy(response);
    let status_line = head
        .lines()
        .next()
        .ok_or_else(|| anyhow!("empty response from notification server"))?;

    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .with_context(|| format!("invalid status line '{status_line}'")),
        _ => bail!("invalid status line '{status_line}'"),
    }
}

fn encode_query_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
