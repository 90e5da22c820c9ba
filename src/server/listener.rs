// src/server/listener.rs
//
// Top-level accept loop: bind, then fork a worker process per accepted
// connection so each connection's privileged UID/GID state stays
// isolated from every other connection. SIGCHLD is ignored so the
// kernel reaps worker children automatically; nothing here ever
// `wait()`s on them since a worker may outlive many requests.

use std::net::TcpListener;
use std::sync::Arc;

use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::{fork, ForkResult};
use tracing::{error, info};

use crate::config::Config;
use crate::core::handler::registry::HandlerRegistry;
use crate::server::worker;

pub struct TsiServer {
    listener: TcpListener,
    config: Arc<Config>,
}

impl TsiServer {
    pub fn bind(config: Arc<Config>) -> std::io::Result<Self> {
        let addr = format!("{}:{}", config.listen_host, config.listen_port);
        let listener = TcpListener::bind(&addr)?;
        info!(%addr, "TSI listening");
        Ok(Self { listener, config })
    }

    /// Accepts connections forever. `registry_factory` is called once
    /// per accepted connection, in the child, after the fork: it lets
    /// callers build a fresh `HandlerRegistry` per worker without
    /// requiring the registry itself to be `Send`/`Sync` across forks.
    pub fn run(&self, registry_factory: impl Fn() -> HandlerRegistry) -> std::io::Result<()> {
        // SAFETY: called once at startup before any connection has been
        // accepted and before any forking has happened.
        unsafe {
            signal(Signal::SIGCHLD, SigHandler::SigIgn).expect("failed to install SIGCHLD handler");
        }

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };
            info!(%peer, "accepted connection");

            // SAFETY: the server process is single-threaded up to this
            // point (the accept loop never spawns OS threads), so
            // fork() here is safe: the child starts with exactly the
            // one thread that called it.
            match unsafe { fork() } {
                Ok(ForkResult::Parent { .. }) => {
                    drop(stream);
                }
                Ok(ForkResult::Child) => {
                    let registry = registry_factory();
                    worker::run(stream, self.config.clone(), registry);
                    std::process::exit(0);
                }
                Err(e) => {
                    error!(error = %e, %peer, "fork failed, dropping connection");
                }
            }
        }
    }
}
