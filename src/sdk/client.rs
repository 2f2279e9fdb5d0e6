use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::adapter::from_envelope;
use crate::{Datastore, Error, Options, Result, Verb};

/// Remote-mode client: ships the operation set to a compatible server as
/// HTTP/1.1 requests over pooled keep-alive connections.
///
/// A connection that fails mid-exchange is dropped and re-established; the
/// request is retried up to `max_retries` times with linear backoff.
pub struct RemoteClient {
    addr: String,
    host: String,
    token: Option<String>,
    max_retries: u32,
    timeout: Duration,
    pool: Vec<Mutex<Option<Conn>>>,
    next: AtomicUsize,
}

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RemoteClient {
    /// Connects to `url` and verifies reachability by establishing the
    /// first pooled connection up front.
    pub async fn connect(url: &str, options: &Options) -> Result<Self> {
        let (addr, host) = parse_url(url)?;
        let pool_size = options.pool_size.max(1);
        let client = Self {
            addr,
            host,
            token: options.token.clone(),
            max_retries: options.max_retries,
            timeout: Duration::from_millis(options.timeout_ms.max(1)),
            pool: (0..pool_size).map(|_| Mutex::new(None)).collect(),
            next: AtomicUsize::new(0),
        };
        *client.pool[0].lock().await = Some(client.connect_inner().await?);
        Ok(client)
    }

    async fn connect_inner(&self) -> Result<Conn> {
        let stream = timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::Remote(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| Error::Remote(format!("connect to {} failed: {e}", self.addr)))?;
        let (reader, writer) = stream.into_split();
        Ok(Conn {
            reader: BufReader::new(reader),
            writer,
        })
    }

    fn build_request(&self, verb: Verb, endpoint: &str, body: &str) -> String {
        let mut request = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
            verb.as_str(),
            endpoint,
            self.host,
            body.len()
        );
        if let Some(token) = &self.token {
            request.push_str(&format!("Authorization: Bearer {token}\r\n"));
        }
        request.push_str("Connection: keep-alive\r\n\r\n");
        request.push_str(body);
        request
    }

    async fn request(&self, verb: Verb, endpoint: &str, body: &str) -> Result<String> {
        let slot = &self.pool[self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len()];
        let mut guard = slot.lock().await;
        let request = self.build_request(verb, endpoint, body);

        let mut attempt = 0u32;
        loop {
            if guard.is_none() {
                match self.connect_inner().await {
                    Ok(conn) => *guard = Some(conn),
                    Err(e) => {
                        attempt += 1;
                        if attempt > self.max_retries {
                            return Err(e);
                        }
                        tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                        continue;
                    }
                }
            }

            let conn = guard.as_mut().unwrap();
            match timeout(self.timeout, exchange(conn, &request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => {
                    *guard = None;
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(Error::Remote(format!(
                            "request failed after {attempt} attempts: {e}"
                        )));
                    }
                }
                Err(_) => {
                    // A timed-out exchange leaves the stream mid-message.
                    *guard = None;
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(Error::Remote(format!(
                            "request timed out after {attempt} attempts"
                        )));
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
        }
    }
}

async fn exchange(conn: &mut Conn, request: &str) -> std::io::Result<String> {
    conn.writer.write_all(request.as_bytes()).await?;
    conn.writer.flush().await?;

    let mut line = String::new();
    if conn.reader.read_line(&mut line).await? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before status line",
        ));
    }

    let mut content_length = 0usize;
    loop {
        line.clear();
        if conn.reader.read_line(&mut line).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed inside headers",
            ));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "bad content-length")
                })?;
            }
        }
    }

    let mut body = vec![0u8; content_length];
    conn.reader.read_exact(&mut body).await?;
    String::from_utf8(body)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 body"))
}

fn parse_url(url: &str) -> Result<(String, String)> {
    let rest = if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else if let Some(rest) = url.strip_prefix("https://") {
        warn!("https is not supported, connecting over plain http");
        rest
    } else {
        url
    };
    let host = rest.split('/').next().unwrap_or("").to_string();
    if host.is_empty() {
        return Err(Error::Validation(format!("invalid database url: {url:?}")));
    }
    let addr = if host.contains(':') {
        host.clone()
    } else {
        format!("{host}:80")
    };
    Ok((addr, host))
}

#[async_trait]
impl Datastore for RemoteClient {
    async fn execute(&self, verb: Verb, endpoint: &str, payload: Value) -> Result<Value> {
        let body = serde_json::to_string(&payload)?;
        let response = self.request(verb, endpoint, &body).await?;
        let envelope: Value = serde_json::from_str(&response)
            .map_err(|e| Error::Remote(format!("invalid response body: {e}")))?;
        from_envelope(envelope)
    }
}
