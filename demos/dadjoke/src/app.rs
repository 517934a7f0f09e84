//! The toy SYNC application this demo wraps and round-trips through both
//! adapter directions.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use wsgi_asgi_bridge::{AdapterError, BoxBodyIter, Environ, StartResponse};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A `SyncApp`: greets whoever's in `PATH_INFO`, or echoes a POSTed name.
pub fn dad_app(
    environ: &mut Environ,
    start_response: StartResponse,
) -> Result<BoxBodyIter, AdapterError> {
    let method = environ.get("REQUEST_METHOD").unwrap_or("GET").to_string();
    let path = environ.get("PATH_INFO").unwrap_or("/").to_string();

    let body_text = match (method.as_str(), path.as_str()) {
        ("GET", "/") => "wow you made it to the root".to_string(),
        ("GET", name_path) => {
            let visits = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
            let name = name_path.trim_start_matches('/');
            format!("Hi {name}, i'm dad\n\n{visits} dads joked so far this lifetime")
        }
        ("POST", _) => {
            let body = environ.input.read(None).map_err(AdapterError::Io)?;
            let name = String::from_utf8_lossy(&body);
            let visits = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
            format!(
                "Hi {}, i'm POST_DAD\n\n{visits} dads joked so far this lifetime",
                name.trim()
            )
        }
        _ => {
            start_response.start("405 Method Not Allowed", vec![])?;
            return Ok(Box::new(std::iter::empty()));
        }
    };

    start_response.start(
        "200 OK",
        vec![(
            "Content-Type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        )],
    )?;
    let chunk: std::io::Result<Bytes> = Ok(Bytes::from(body_text.into_bytes()));
    Ok(Box::new(std::iter::once(chunk)))
}
