// src/core/handler/dispatch.rs
//
// The per-connection message loop: read a frame, resolve its command
// tag, optionally fork (for commands that open a user session), switch
// identity, invoke the handler, restore identity, and always finish
// with the `ENDOFMESSAGE` terminator.

use std::sync::Arc;

use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};
use tracing::{error, info_span, warn};

use crate::config::Config;
use crate::core::connector::Connector;
use crate::core::context::TsiContext;
use crate::core::errors::TsiError;
use crate::core::handler::builtin;
use crate::core::handler::registry::HandlerRegistry;
use crate::core::identity::IdentitySwitch;
use crate::core::message;

enum Progress {
    Continue,
    Stop,
}

/// Commands that open a dedicated OS-level user session: when
/// `open_user_sessions` is set, each of these runs in a forked child so
/// that the privileged parent never itself runs code as the target
/// user.
const SESSION_COMMANDS: &[&str] = &["TSI_EXECUTESCRIPT", "TSI_SUBMIT", "TSI_UFTP"];

pub struct Dispatcher {
    pub registry: HandlerRegistry,
    pub identity: IdentitySwitch,
    pub config: Arc<Config>,
    pub context: TsiContext,
}

impl Dispatcher {
    /// Serves requests on `connector` until the peer disconnects or an
    /// unrecoverable error occurs.
    pub fn run(&mut self, connector: &mut dyn Connector) {
        loop {
            match self.handle_one(connector) {
                Ok(Progress::Continue) => continue,
                Ok(Progress::Stop) => break,
                Err(e) => {
                    error!(error = %e, "dispatcher terminating worker");
                    break;
                }
            }
        }
    }

    fn handle_one(&mut self, connector: &mut dyn Connector) -> Result<Progress, TsiError> {
        let message = match connector.read_message() {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Progress::Stop),
            Err(e) => return Err(TsiError::from(e)),
        };

        if let Err(e) = nix::unistd::chdir(self.config.safe_dir.as_str()) {
            warn!(error = %e, dir = %self.config.safe_dir, "failed to chdir to safe directory");
        }

        let Some(tag) = message::find_command_tag(&message, |t| t == "TSI_PING" || self.registry.get(t).is_some())
        else {
            connector.failed("no recognized TSI command in message")?;
            connector.write_message("ENDOFMESSAGE")?;
            return Ok(Progress::Continue);
        };

        if tag == "TSI_PING" {
            builtin::ping(&message, connector, &self.context).ok();
            connector.write_message("ENDOFMESSAGE")?;
            return Ok(Progress::Continue);
        }

        let Some(handler) = self.registry.get(&tag) else {
            connector.failed(&format!("unknown command {tag}"))?;
            connector.write_message("ENDOFMESSAGE")?;
            return Ok(Progress::Continue);
        };

        let should_fork = self.config.open_user_sessions && SESSION_COMMANDS.contains(&tag.as_str());

        if should_fork {
            // SAFETY: this worker process is single-threaded (one
            // connection per process, no thread pool), so fork() here is
            // safe: the child inherits no other thread's locked state.
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => {
                    // The parent does not execute the handler and never
                    // reaches the terminator write below; only the
                    // child writes ENDOFMESSAGE for this request.
                    let _ = waitpid(child, None);
                    return Ok(Progress::Continue);
                }
                Ok(ForkResult::Child) => {
                    self.run_handler_transaction(&tag, handler, &message, connector);
                    let _ = connector.write_message("ENDOFMESSAGE");
                    std::process::exit(0);
                }
                Err(e) => {
                    connector.failed(&format!("fork failed: {e}"))?;
                    connector.write_message("ENDOFMESSAGE")?;
                    return Ok(Progress::Continue);
                }
            }
        }

        self.run_handler_transaction(&tag, handler, &message, connector);
        connector.write_message("ENDOFMESSAGE")?;
        Ok(Progress::Continue)
    }

    fn run_handler_transaction(
        &self,
        tag: &str,
        handler: &crate::core::handler::registry::HandlerFn,
        message: &str,
        connector: &mut dyn Connector,
    ) {
        let span = info_span!("dispatch", command = tag);
        let _enter = span.enter();

        let mut result: Result<(), TsiError> = Ok(());

        if self.config.switch_uid {
            result = match message::find_identity(message) {
                Some(identity) => self.identity.become_user(&identity.user, &identity.groups, &self.config),
                None => Err(TsiError::Protocol("missing #TSI_IDENTITY line".into())),
            };
        }

        if result.is_ok() {
            result = handler(message, connector, &self.context);
        }

        if let Err(e) = &result {
            error!(command = tag, error = %e, "request failed");
            let _ = connector.failed(&e.to_string());
        }

        if self.config.switch_uid {
            if let Err(e) = self.identity.restore_id() {
                error!(error = %e, "identity restore failed, worker cannot continue safely");
                std::process::exit(70);
            }
        }
    }
}
