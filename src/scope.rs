//! The EVT-side per-request metadata mapping ("scope").

use bytes::Bytes;
use std::sync::Arc;

use crate::environ::Environ;

/// `scope["type"]`. Lifespan scopes are acknowledged trivially (see
/// `DESIGN.md`); everything interesting happens for `Http`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeType {
    Http,
    Lifespan,
}

/// `(host, port)` as carried by `scope["client"]`/`scope["server"]`.
pub type Address = (String, u16);

/// The EVT scope: a per-connection/per-request metadata mapping.
#[derive(Clone)]
pub struct Scope {
    pub scope_type: ScopeType,
    pub http_version: String,
    pub method: String,
    pub scheme: String,
    /// Percent-decoded path.
    pub path: String,
    /// Raw, undecoded path bytes, if the caller has them (more faithful
    /// than re-encoding `path`, since percent-decoding is lossy).
    pub raw_path: Option<Bytes>,
    pub query_string: Bytes,
    pub root_path: String,
    /// Ordered, lower-cased `(name, value)` byte pairs.
    pub headers: Vec<(Bytes, Bytes)>,
    pub client: Option<Address>,
    pub server: Option<Address>,
    /// Extension populated only by `SYNC→EVT`, exposing the originating
    /// environ to applications that want to peek across the bridge. Does
    /// not retain per-request streams beyond the request (see
    /// `translate::scope_to_environ`).
    pub wsgi_environ: Option<Arc<Environ>>,
}

// Manual impl, not derived: `wsgi_environ` is an `Option<Arc<Environ>>` and
// `Environ` (it owns a `Box<dyn ChunkSource>`) has no `Debug` impl of its
// own. Print whether the back-reference is present instead of its contents.
impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("scope_type", &self.scope_type)
            .field("http_version", &self.http_version)
            .field("method", &self.method)
            .field("scheme", &self.scheme)
            .field("path", &self.path)
            .field("raw_path", &self.raw_path)
            .field("query_string", &self.query_string)
            .field("root_path", &self.root_path)
            .field("headers", &self.headers)
            .field("client", &self.client)
            .field("server", &self.server)
            .field("wsgi_environ", &self.wsgi_environ.is_some())
            .finish()
    }
}

impl Scope {
    /// A minimal HTTP scope with sane defaults, for adapters and tests to
    /// build on via struct-update syntax.
    pub fn http(method: impl Into<String>, path: impl Into<String>) -> Self {
        Scope {
            scope_type: ScopeType::Http,
            http_version: "1.1".to_string(),
            method: method.into(),
            scheme: "http".to_string(),
            path: path.into(),
            raw_path: None,
            query_string: Bytes::new(),
            root_path: String::new(),
            headers: Vec::new(),
            client: None,
            server: None,
            wsgi_environ: None,
        }
    }
}
