//! Load-generating client.
//!
//! Sends one document per round trip: the document bytes, the separator,
//! then a blocking wait for the single reply line. Response latency is
//! measured around the whole exchange.

mod document;
mod report;

pub use document::{load_reference, synthesize, DocumentError};
pub use report::ResponseStats;

use std::collections::HashMap;
use std::io;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Malformed reply lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// A word without a following count.
    Unpaired(String),
    /// A count that is not a non-negative integer.
    Count { word: String, value: String },
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyError::Unpaired(word) => write!(f, "word '{word}' has no count"),
            ReplyError::Count { word, value } => {
                write!(f, "invalid count '{value}' for word '{word}'")
            }
        }
    }
}

impl std::error::Error for ReplyError {}

/// Client failures. All are fatal for the run.
#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    Reply(ReplyError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "I/O error: {e}"),
            ClientError::Reply(e) => write!(f, "Malformed reply: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}

impl From<ReplyError> for ClientError {
    fn from(e: ReplyError) -> Self {
        ClientError::Reply(e)
    }
}

/// Parse `word,count,word,count,...` into a map. Trailing commas and the
/// line terminator are ignored; an empty line is an empty map.
pub fn parse_reply(line: &str) -> Result<HashMap<String, u64>, ReplyError> {
    let body = line.trim_end_matches(['\r', '\n']).trim_end_matches(',');
    let mut counts = HashMap::new();
    if body.is_empty() {
        return Ok(counts);
    }

    let mut parts = body.split(',');
    while let Some(word) = parts.next() {
        let value = parts
            .next()
            .ok_or_else(|| ReplyError::Unpaired(word.to_string()))?;
        let count = value.parse().map_err(|_| ReplyError::Count {
            word: word.to_string(),
            value: value.to_string(),
        })?;
        counts.insert(word.to_string(), count);
    }
    Ok(counts)
}

/// One persistent connection to the word-count server.
pub struct WordCountClient<S> {
    stream: BufStream<S>,
    separator: u8,
    stats: ResponseStats,
    line: String,
}

impl WordCountClient<TcpStream> {
    /// Connect to `host:port`.
    pub async fn connect(host: &str, port: u16, separator: u8) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!(host, port, "Connected");
        Ok(Self::new(stream, separator))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> WordCountClient<S> {
    pub fn new(stream: S, separator: u8) -> Self {
        Self {
            stream: BufStream::new(stream),
            separator,
            stats: ResponseStats::new(),
            line: String::new(),
        }
    }

    pub fn stats(&self) -> &ResponseStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ResponseStats {
        &mut self.stats
    }

    /// Send one document and wait for its reply line (newline stripped).
    pub async fn send(&mut self, document: &str) -> io::Result<&str> {
        let start = Instant::now();

        self.stream.write_all(document.as_bytes()).await?;
        self.stream.write_u8(self.separator).await?;
        self.stream.flush().await?;

        self.line.clear();
        let n = self.stream.read_line(&mut self.line).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ));
        }

        self.stats.record(start.elapsed().as_secs_f64() * 1000.0);
        trace!(bytes = n, "Reply received");
        Ok(self.line.trim_end_matches('\n'))
    }

    /// Send one document and parse the reply into word counts.
    pub async fn word_count(
        &mut self,
        document: &str,
    ) -> Result<HashMap<String, u64>, ClientError> {
        let reply = self.send(document).await?;
        Ok(parse_reply(reply)?)
    }

    /// Close the write side and drop the connection.
    pub async fn shutdown(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
