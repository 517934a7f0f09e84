//! Pure, synchronous translation between [`Scope`] and the environ
//! variable map, per the header canonicalization and path/query handling
//! rules.

use std::collections::HashMap;

use bytes::Bytes;

use crate::scope::{Address, Scope, ScopeType};

/// Builds the CGI-style variable map for the given scope. Does not attach
/// `wsgi.input`/`wsgi.errors`/the `asgi.scope` back-reference — those are
/// the calling adapter's job, since they carry per-request resources this
/// pure function has no business owning.
pub fn scope_to_environ_vars(scope: &Scope) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    vars.insert("REQUEST_METHOD".to_string(), scope.method.to_uppercase());
    vars.insert("SCRIPT_NAME".to_string(), scope.root_path.clone());
    vars.insert(
        "PATH_INFO".to_string(),
        path_info(scope.path.as_str(), scope.raw_path.as_deref(), &scope.root_path),
    );
    vars.insert(
        "QUERY_STRING".to_string(),
        latin1_decode(&scope.query_string),
    );
    vars.insert(
        "SERVER_PROTOCOL".to_string(),
        format!("HTTP/{}", scope.http_version),
    );

    let (server_name, server_port) = scope
        .server
        .clone()
        .unwrap_or_else(|| ("localhost".to_string(), 80));
    vars.insert("SERVER_NAME".to_string(), server_name);
    vars.insert("SERVER_PORT".to_string(), server_port.to_string());

    if let Some((host, port)) = &scope.client {
        vars.insert("REMOTE_ADDR".to_string(), host.clone());
        vars.insert("REMOTE_PORT".to_string(), port.to_string());
    }

    vars.insert("wsgi.url_scheme".to_string(), scope.scheme.clone());

    apply_headers_to_environ(&scope.headers, &mut vars);

    vars
}

/// Reconstructs a lower-cased `(name, value)` header sequence and the rest
/// of a [`Scope`] from an environ variable map. Pure inverse of
/// [`scope_to_environ_vars`], modulo the documented header-join lossiness
/// (duplicate source headers cannot be un-joined).
pub fn environ_to_scope(vars: &HashMap<String, String>) -> Scope {
    let method = vars
        .get("REQUEST_METHOD")
        .cloned()
        .unwrap_or_else(|| "GET".to_string());
    let root_path = vars.get("SCRIPT_NAME").cloned().unwrap_or_default();
    let path_info = vars.get("PATH_INFO").cloned().unwrap_or_default();
    let query_string = vars.get("QUERY_STRING").cloned().unwrap_or_default();
    let http_version = vars
        .get("SERVER_PROTOCOL")
        .and_then(|proto| proto.strip_prefix("HTTP/"))
        .unwrap_or("1.1")
        .to_string();
    let scheme = vars
        .get("wsgi.url_scheme")
        .cloned()
        .unwrap_or_else(|| "http".to_string());

    let server = match (vars.get("SERVER_NAME"), vars.get("SERVER_PORT")) {
        (Some(name), Some(port)) => port.parse::<u16>().ok().map(|p| (name.clone(), p)),
        _ => None,
    };
    let client: Option<Address> = match (vars.get("REMOTE_ADDR"), vars.get("REMOTE_PORT")) {
        (Some(addr), Some(port)) => port.parse::<u16>().ok().map(|p| (addr.clone(), p)),
        _ => None,
    };

    Scope {
        scope_type: ScopeType::Http,
        http_version,
        method,
        scheme,
        path: format!("{root_path}{path_info}"),
        raw_path: None,
        query_string: Bytes::from(query_string.into_bytes()),
        root_path,
        headers: headers_from_environ(vars),
        client,
        server,
        wsgi_environ: None,
    }
}

/// `PATH_INFO`: percent-decoded, relative to `root_path`. The decode source
/// is `raw_path` when available (it carries the original bytes faithfully;
/// an already-decoded `path` can't be redecoded without ambiguity), falling
/// back to `path` itself otherwise.
fn path_info(path: &str, raw_path: Option<&[u8]>, root_path: &str) -> String {
    let decoded = match raw_path {
        Some(raw) => {
            let raw_str = String::from_utf8_lossy(raw);
            urlencoding::decode(&raw_str)
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| path.to_string())
        }
        None => path.to_string(),
    };
    decoded
        .strip_prefix(root_path)
        .map(|rest| rest.to_string())
        .unwrap_or(decoded)
}

/// Bytes are decoded one-to-one as latin-1 code points, per the WSGI
/// convention for `QUERY_STRING` (and generally for any environ value
/// carrying bytes that must round-trip exactly through a `str`).
fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn latin1_encode(s: &str) -> Vec<u8> {
    s.chars().map(|c| c as u8).collect()
}

/// For each header, maps to `HTTP_<UPPER(name with '-'→'_')>`, except
/// `content-type`/`content-length` which map to `CONTENT_TYPE`/
/// `CONTENT_LENGTH` with no `HTTP_` prefix. Multiple headers mapping to the
/// same key are joined with `", "`, preserving arrival order.
fn apply_headers_to_environ(headers: &[(Bytes, Bytes)], vars: &mut HashMap<String, String>) {
    for (name, value) in headers {
        let name_str = String::from_utf8_lossy(name).to_lowercase();
        let value_str = latin1_decode(value);
        let key = if name_str == "content-type" {
            "CONTENT_TYPE".to_string()
        } else if name_str == "content-length" {
            "CONTENT_LENGTH".to_string()
        } else {
            format!("HTTP_{}", name_str.to_uppercase().replace('-', "_"))
        };
        vars.entry(key)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value_str);
            })
            .or_insert(value_str);
    }
}

fn headers_from_environ(vars: &HashMap<String, String>) -> Vec<(Bytes, Bytes)> {
    let mut headers = Vec::new();
    if let Some(ct) = vars.get("CONTENT_TYPE") {
        headers.push((Bytes::from_static(b"content-type"), Bytes::from(latin1_encode(ct))));
    }
    if let Some(cl) = vars.get("CONTENT_LENGTH") {
        headers.push((
            Bytes::from_static(b"content-length"),
            Bytes::from(latin1_encode(cl)),
        ));
    }
    let mut http_headers: Vec<(&String, &String)> = vars
        .iter()
        .filter(|(k, _)| k.starts_with("HTTP_"))
        .collect();
    http_headers.sort_by_key(|(k, _)| (*k).clone());
    for (key, value) in http_headers {
        let name = key[5..].to_lowercase().replace('_', "-");
        headers.push((Bytes::from(name.into_bytes()), Bytes::from(latin1_encode(value))));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_get_path_and_query() {
        let mut scope = Scope::http("get", "/a b");
        scope.raw_path = Some(Bytes::from_static(b"/a%20b"));
        scope.query_string = Bytes::from_static(b"q=1");
        let vars = scope_to_environ_vars(&scope);
        assert_eq!(vars.get("PATH_INFO").unwrap(), "/a b");
        assert_eq!(vars.get("QUERY_STRING").unwrap(), "q=1");
        assert_eq!(vars.get("REQUEST_METHOD").unwrap(), "GET");
    }

    #[test]
    fn header_name_mapping_and_join() {
        let mut scope = Scope::http("GET", "/");
        scope.headers = vec![
            (Bytes::from_static(b"x-custom"), Bytes::from_static(b"one")),
            (Bytes::from_static(b"x-custom"), Bytes::from_static(b"two")),
            (Bytes::from_static(b"content-type"), Bytes::from_static(b"text/plain")),
            (Bytes::from_static(b"content-length"), Bytes::from_static(b"4")),
        ];
        let vars = scope_to_environ_vars(&scope);
        assert_eq!(vars.get("HTTP_X_CUSTOM").unwrap(), "one, two");
        assert_eq!(vars.get("CONTENT_TYPE").unwrap(), "text/plain");
        assert_eq!(vars.get("CONTENT_LENGTH").unwrap(), "4");
        assert!(!vars.contains_key("HTTP_CONTENT_TYPE"));
    }

    #[test]
    fn environ_to_scope_reconstructs_lowercase_headers() {
        let mut vars = HashMap::new();
        vars.insert("REQUEST_METHOD".to_string(), "POST".to_string());
        vars.insert("HTTP_X_CUSTOM".to_string(), "one, two".to_string());
        vars.insert("CONTENT_TYPE".to_string(), "application/json".to_string());
        let scope = environ_to_scope(&vars);
        assert_eq!(scope.method, "POST");
        assert!(scope
            .headers
            .iter()
            .any(|(n, v)| n.as_ref() == b"x-custom" && v.as_ref() == b"one, two"));
        assert!(scope
            .headers
            .iter()
            .any(|(n, v)| n.as_ref() == b"content-type" && v.as_ref() == b"application/json"));
    }

    #[test]
    fn server_and_client_defaults() {
        let scope = Scope::http("GET", "/");
        let vars = scope_to_environ_vars(&scope);
        assert_eq!(vars.get("SERVER_NAME").unwrap(), "localhost");
        assert_eq!(vars.get("SERVER_PORT").unwrap(), "80");
        assert!(!vars.contains_key("REMOTE_ADDR"));
    }
}
