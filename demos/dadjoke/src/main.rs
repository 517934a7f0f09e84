//! Smoke test for the public API: wraps the toy `dad_app` SYNC application
//! in `SyncToEvt`, wraps *that* in `EvtToSync`, and drives a few requests
//! through the round trip — exercising both adapter directions and the
//! scope/environ translation in between.

use std::io::Cursor;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wsgi_asgi_bridge::environ::ReadChunkSource;
use wsgi_asgi_bridge::{
    take_pending, AdapterError, BoxBodyIter, Environ, EvtToSync, EvtToSyncConfig, Scheduler,
    StartResponse, SyncApp, SyncToEvt, SyncToEvtConfig, WsgiInput,
};

mod app;

fn environ_for(method: &str, path: &str, body: &'static [u8]) -> Environ {
    let mut environ = Environ::new(WsgiInput::new(ReadChunkSource::new(Cursor::new(body))));
    environ.set("REQUEST_METHOD", method);
    environ.set("PATH_INFO", path);
    environ
}

fn run_request<B: SyncApp>(bridge: &B, method: &str, path: &str, body: &'static [u8]) {
    let mut environ = environ_for(method, path, body);
    let (start_response, pending) = StartResponse::new();
    match bridge.call(&mut environ, start_response) {
        Ok(iter) => {
            let start = take_pending(&pending).expect("start_response was called before body");
            let body: Vec<u8> = iter.flat_map(|chunk| chunk.unwrap().to_vec()).collect();
            println!(
                "{method} {path} -> {}\n{}\n",
                start.status,
                String::from_utf8_lossy(&body)
            );
        }
        Err(err) => eprintln!("{method} {path} -> error: {err}"),
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(fmt::layer().with_timer(fmt::time::uptime()))
        .init();

    let scheduler = Scheduler::start().expect("failed to start background scheduler");
    let sync_app: fn(&mut Environ, StartResponse) -> Result<BoxBodyIter, AdapterError> = app::dad_app;
    let sync_to_evt = SyncToEvt::new(sync_app, SyncToEvtConfig::default());
    let bridge = EvtToSync::new(sync_to_evt, scheduler, EvtToSyncConfig::default());

    run_request(&bridge, "GET", "/", b"");
    run_request(&bridge, "GET", "/Nick", b"");
    run_request(&bridge, "POST", "/", b"Grace");
}
