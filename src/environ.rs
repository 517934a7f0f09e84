//! The SYNC-side per-request metadata mapping ("environ") and its blocking
//! input/error streams.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::scope::Scope;
use crate::streams::SyncConsumer;

/// Something that can hand back the next chunk of a request body, blocking
/// the calling thread if none is ready yet. `None` means EOF.
///
/// `Sync` (not just `Send`) so that an `Environ` holding one can sit behind
/// an `Arc` when exposed cross-task via `Scope::wsgi_environ`.
pub trait ChunkSource: Send + Sync {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;
}

/// A [`ChunkSource`] fed by the bounded stream primitives: used by
/// `SYNC→EVT`, where request body chunks arrive from the task-side
/// `receive()` loop via an [`crate::streams::AsyncToSyncStream`].
pub struct StreamChunkSource {
    consumer: SyncConsumer<Bytes>,
}

impl StreamChunkSource {
    pub fn new(consumer: SyncConsumer<Bytes>) -> Self {
        StreamChunkSource { consumer }
    }
}

impl ChunkSource for StreamChunkSource {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        use crate::error::StreamError;
        match self.consumer.get(None) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StreamError::Eof) => Ok(None),
            Err(StreamError::Closed(err)) => Err(io::Error::new(io::ErrorKind::ConnectionAborted, err)),
            Err(StreamError::Timeout) => unreachable!("wsgi.input never uses a timed get"),
        }
    }
}

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A [`ChunkSource`] over any blocking reader: used by `EVT→SYNC` to adapt
/// whatever `wsgi.input`-like stream the caller already has (a real socket,
/// a file, ...) into the same chunked interface `StreamChunkSource` offers.
pub struct ReadChunkSource<R> {
    reader: R,
}

impl<R: Read + Send + Sync> ReadChunkSource<R> {
    pub fn new(reader: R) -> Self {
        ReadChunkSource { reader }
    }
}

impl<R: Read + Send + Sync> ChunkSource for ReadChunkSource<R> {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let n = self.reader.read(&mut buf)?;
        if n == 0 {
            Ok(None)
        } else {
            buf.truncate(n);
            Ok(Some(Bytes::from(buf)))
        }
    }
}

/// `wsgi.input`: a blocking byte stream that returns `b""` at EOF and never
/// raises on EOF, with the line-oriented helpers the WSGI calling
/// convention expects on top of plain `read`.
pub struct WsgiInput {
    source: Box<dyn ChunkSource>,
    buffer: Vec<u8>,
    eof: bool,
}

impl WsgiInput {
    pub fn new(source: impl ChunkSource + 'static) -> Self {
        WsgiInput {
            source: Box::new(source),
            buffer: Vec::new(),
            eof: false,
        }
    }

    fn fill_more(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        match self.source.next_chunk()? {
            Some(chunk) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(true)
            }
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    /// Reads up to `n` bytes, or all remaining bytes when `n` is `None`.
    pub fn read(&mut self, n: Option<usize>) -> io::Result<Bytes> {
        match n {
            Some(n) => {
                while self.buffer.len() < n && self.fill_more()? {}
                let take = n.min(self.buffer.len());
                Ok(Bytes::from(self.buffer.drain(..take).collect::<Vec<u8>>()))
            }
            None => {
                while self.fill_more()? {}
                Ok(Bytes::from(std::mem::take(&mut self.buffer)))
            }
        }
    }

    /// Returns bytes up to and including the first `\n`, EOF, or `limit`,
    /// whichever comes first.
    pub fn readline(&mut self, limit: Option<usize>) -> io::Result<Bytes> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut end = pos + 1;
                if let Some(limit) = limit {
                    end = end.min(limit);
                }
                return Ok(Bytes::from(self.buffer.drain(..end).collect::<Vec<u8>>()));
            }
            if let Some(limit) = limit {
                if self.buffer.len() >= limit {
                    return Ok(Bytes::from(self.buffer.drain(..limit).collect::<Vec<u8>>()));
                }
            }
            if !self.fill_more()? {
                return Ok(Bytes::from(std::mem::take(&mut self.buffer)));
            }
        }
    }

    /// Reads all remaining lines; `hint` is an advisory total-byte-count
    /// cutoff, not a hard limit.
    pub fn readlines(&mut self, hint: Option<usize>) -> io::Result<Vec<Bytes>> {
        let mut lines = Vec::new();
        let mut total = 0usize;
        loop {
            let line = self.readline(None)?;
            if line.is_empty() {
                break;
            }
            total += line.len();
            lines.push(line);
            if let Some(hint) = hint {
                if total >= hint {
                    break;
                }
            }
        }
        Ok(lines)
    }
}

impl Iterator for WsgiInput {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.readline(None) {
            Ok(line) if line.is_empty() => None,
            Ok(line) => Some(Ok(line)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// `wsgi.errors`: routed into `tracing`, never silently discarded.
#[derive(Clone, Copy, Default)]
pub struct WsgiErrors;

impl io::Write for WsgiErrors {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        tracing::error!(target: "wsgi.errors", "{}", String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The SYNC-side environ: a case-sensitive mapping of CGI-style keys, plus
/// the blocking input/error streams and the `wsgi.*` sentinels.
pub struct Environ {
    /// CGI-style keys (`REQUEST_METHOD`, `HTTP_*`, `wsgi.url_scheme`, ...).
    pub vars: HashMap<String, String>,
    pub input: WsgiInput,
    pub errors: WsgiErrors,
    pub multithread: bool,
    pub multiprocess: bool,
    pub run_once: bool,
    /// Extension populated only by `EVT→SYNC`, exposing the originating
    /// scope.
    pub asgi_scope: Option<Arc<Scope>>,
}

impl Environ {
    pub fn new(input: WsgiInput) -> Self {
        Environ {
            vars: HashMap::new(),
            input,
            errors: WsgiErrors,
            multithread: true,
            multiprocess: false,
            run_once: false,
            asgi_scope: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }
}
