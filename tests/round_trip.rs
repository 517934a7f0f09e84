//! End-to-end checks that drive a real `SyncApp` through
//! `SyncToEvt` and then back out through `EvtToSync`, exercising the full
//! environ/scope translation and both bounded streams together rather than
//! either adapter direction in isolation.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use wsgi_asgi_bridge::environ::ReadChunkSource;
use wsgi_asgi_bridge::{
    take_pending, AdapterError, BoxBodyIter, Environ, EvtToSync, EvtToSyncConfig, Scheduler,
    StartResponse, SyncApp, SyncToEvt, SyncToEvtConfig, WsgiInput,
};

fn request(method: &str, body: &'static [u8]) -> Environ {
    let mut environ = Environ::new(WsgiInput::new(ReadChunkSource::new(Cursor::new(body))));
    environ.set("REQUEST_METHOD", method);
    environ
}

fn greeting_app(environ: &mut Environ, start_response: StartResponse) -> Result<BoxBodyIter, AdapterError> {
    let name = environ.get("HTTP_X_NAME").unwrap_or("stranger").to_string();
    let body = environ.input.read(None)?;
    start_response.start(
        "200 OK",
        vec![("X-Greeting".to_string(), "hi".to_string())],
    )?;
    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from(format!("hello {name}, you said: "))),
        Ok(body),
    ];
    Ok(Box::new(chunks.into_iter()))
}

fn teapot_app(_environ: &mut Environ, start_response: StartResponse) -> Result<BoxBodyIter, AdapterError> {
    start_response.start("418 I'm a Teapot", vec![])?;
    Ok(Box::new(std::iter::empty()))
}

/// Drives `environ` through `SyncToEvt(app)` wrapped in `EvtToSync`, with
/// queues bounded to 1 so every chunk has to clear real backpressure on its
/// way across both streams.
fn round_trip<A>(app: A, environ: &mut Environ) -> (wsgi_asgi_bridge::ResponseStart, Vec<u8>)
where
    A: SyncApp,
{
    let scheduler = Scheduler::start().expect("scheduler starts");
    let sync_to_evt = SyncToEvt::new(
        app,
        SyncToEvtConfig {
            workers: 1,
            send_queue_size: 1,
        },
    );
    let bridge = EvtToSync::new(
        sync_to_evt,
        scheduler,
        EvtToSyncConfig {
            wait_time: Some(Duration::from_secs(5)),
            send_queue_size: 1,
        },
    );

    let (start_response, pending) = StartResponse::new();
    let iter = bridge.call(environ, start_response).expect("call succeeds");
    let start = take_pending(&pending).expect("start_response was invoked before body");
    let body: Vec<u8> = iter
        .map(|chunk| chunk.expect("body chunk is Ok"))
        .flat_map(|bytes| bytes.to_vec())
        .collect();
    (start, body)
}

#[test]
fn headers_status_and_body_survive_the_full_round_trip_under_backpressure() {
    let mut environ = request("POST", b"pineapple on pizza");
    environ.set("HTTP_X_NAME", "Nick");

    let (start, body) = round_trip(
        greeting_app as fn(&mut Environ, StartResponse) -> Result<BoxBodyIter, AdapterError>,
        &mut environ,
    );

    assert_eq!(start.status, 200);
    assert!(start
        .headers
        .iter()
        .any(|(name, value)| name.as_ref() == b"X-Greeting" && value.as_ref() == b"hi"));
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "hello Nick, you said: pineapple on pizza"
    );
}

#[test]
fn request_header_survives_the_environ_scope_environ_round_trip() {
    // No X-Name header set at all: the app should see its own default
    // rather than some stale value leaking in from the translation layer.
    let mut environ = request("GET", b"");
    let (_, body) = round_trip(
        greeting_app as fn(&mut Environ, StartResponse) -> Result<BoxBodyIter, AdapterError>,
        &mut environ,
    );
    assert_eq!(String::from_utf8(body).unwrap(), "hello stranger, you said: ");
}

#[test]
fn unreasoned_status_code_round_trips_through_the_iana_table() {
    let mut environ = request("GET", b"");
    let (start, body) = round_trip(
        teapot_app as fn(&mut Environ, StartResponse) -> Result<BoxBodyIter, AdapterError>,
        &mut environ,
    );
    assert_eq!(start.status, 418);
    assert!(body.is_empty());
}
