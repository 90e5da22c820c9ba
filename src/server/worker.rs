// src/server/worker.rs
//
// A single worker: one accepted connection, one `IdentitySwitch`, one
// `Dispatcher` loop, run to completion in the forked child.

use std::net::TcpStream;
use std::sync::Arc;

use tracing::error;

use crate::config::Config;
use crate::core::connector::StreamConnector;
use crate::core::context::TsiContext;
use crate::core::handler::dispatch::Dispatcher;
use crate::core::handler::registry::HandlerRegistry;
use crate::core::identity::IdentitySwitch;

pub fn run(stream: TcpStream, config: Arc<Config>, registry: HandlerRegistry) {
    let identity = match IdentitySwitch::initialize(&config) {
        Ok(i) => i,
        Err(e) => {
            error!(error = %e, "worker failed to initialize identity switch");
            return;
        }
    };

    let context = TsiContext {
        config: config.clone(),
        effective_uid: identity.effective_uid(),
    };

    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to clone connection for worker");
            return;
        }
    };
    let mut connector = StreamConnector::new(stream, write_half);

    let mut dispatcher = Dispatcher {
        registry,
        identity,
        config,
        context,
    };
    dispatcher.run(&mut connector);
}
