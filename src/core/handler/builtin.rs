// src/core/handler/builtin.rs
//
// Commands implemented directly in core rather than delegated to a
// collaborator: `ping` (version string reply), `ping_uid` (reports the
// worker's running uid), and `execute_script` (runs the message body
// as a shell script, honoring `#TSI_DISCARD_OUTPUT`).

use std::process::Command;

use crate::core::connector::Connector;
use crate::core::context::TsiContext;
use crate::core::errors::TsiError;
use crate::core::message;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn ping(_message: &str, connector: &mut dyn Connector, _ctx: &TsiContext) -> Result<(), TsiError> {
    connector.write_message(VERSION)?;
    Ok(())
}

pub fn ping_uid(_message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError> {
    connector.write_message(VERSION)?;
    connector.write_message(&format!("running as UID [{}]", ctx.effective_uid))?;
    Ok(())
}

/// Runs the message's stripped payload as a shell script under `/bin/sh
/// -c`, in the configured safe directory. Honors
/// `#TSI_DISCARD_OUTPUT true` by suppressing stdout/stderr on success.
pub fn execute_script(message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError> {
    let discard = message::discard_output_requested(message);
    let script = message::strip_directive_lines(message);

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(&script)
        .current_dir(&ctx.config.safe_dir)
        .output()
        .map_err(|e| TsiError::Handler(format!("failed to spawn script: {e}")))?;

    if output.status.success() {
        if discard {
            connector.ok("")?;
        } else {
            let mut body = String::from_utf8_lossy(&output.stdout).into_owned();
            body.push_str(&String::from_utf8_lossy(&output.stderr));
            connector.ok(&body)?;
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        connector.failed(&format!("script exited with {}: {stderr}", output.status))?;
    }
    Ok(())
}
