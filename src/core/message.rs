// src/core/message.rs
//
// Wire-level parsing of a single TSI message: finding the command tag,
// the optional `#TSI_IDENTITY` line, and the `#TSI_DISCARD_OUTPUT` flag.
// Scans the raw message text with a handful of regexes rather than a
// structured parser.

use once_cell::sync::Lazy;
use regex::Regex;

static COMMAND_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(TSI_[A-Z_]+)").unwrap());
static IDENTITY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#TSI_IDENTITY\s+(\S+)\s+(\S+)").unwrap());
static DISCARD_OUTPUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"#TSI_DISCARD_OUTPUT\s+true").unwrap());

/// The requested identity carried by a message's `#TSI_IDENTITY` line:
/// a target username and a colon-separated list of group selectors
/// (`NONE`, `DEFAULT_GID`, or an actual group name), primary group first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedIdentity {
    pub user: String,
    pub groups: Vec<String>,
}

/// Finds the command tag: the first line containing a marker of the
/// form `#TSI_<CMD>` for which `is_recognized` returns true. Other
/// `#TSI_...` markers (`#TSI_IDENTITY`, `#TSI_DISCARD_OUTPUT`, and any
/// unknown tag) are skipped rather than mistaken for the command, so a
/// message with its identity or discard-output line ahead of the
/// command line still dispatches correctly. Returns the bare command
/// name (`TSI_PING`, not `#TSI_PING`).
pub fn find_command_tag(message: &str, is_recognized: impl Fn(&str) -> bool) -> Option<String> {
    for line in message.lines() {
        if let Some(caps) = COMMAND_TAG.captures(line) {
            let tag = &caps[1];
            if is_recognized(tag) {
                return Some(tag.to_string());
            }
        }
    }
    None
}

/// Finds and parses the `#TSI_IDENTITY <user> <g1:g2:...>` line, if
/// present anywhere in the message.
pub fn find_identity(message: &str) -> Option<RequestedIdentity> {
    let caps = IDENTITY_LINE.captures(message)?;
    Some(RequestedIdentity {
        user: caps[1].to_string(),
        groups: caps[2].split(':').map(str::to_string).collect(),
    })
}

/// True if the message carries `#TSI_DISCARD_OUTPUT true`.
pub fn discard_output_requested(message: &str) -> bool {
    DISCARD_OUTPUT.is_match(message)
}

/// Strips every `#TSI_...` directive line from a message, leaving only
/// the payload (e.g. the script body of a `TSI_EXECUTESCRIPT` request).
pub fn strip_directive_lines(message: &str) -> String {
    message
        .lines()
        .filter(|line| !line.trim_start().starts_with("#TSI_"))
        .map(|line| format!("{line}\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_known(tag: &str) -> bool {
        matches!(tag, "TSI_PING" | "TSI_EXECUTESCRIPT")
    }

    #[test]
    fn finds_simple_tag() {
        let msg = "#TSI_PING\n";
        assert_eq!(find_command_tag(msg, is_known), Some("TSI_PING".to_string()));
    }

    #[test]
    fn finds_tag_among_other_lines() {
        let msg = "#TSI_IDENTITY alice users:devs\n#TSI_EXECUTESCRIPT\necho hi\n";
        assert_eq!(find_command_tag(msg, is_known), Some("TSI_EXECUTESCRIPT".to_string()));
    }

    #[test]
    fn skips_unrecognized_markers_before_the_real_command() {
        let msg = "#TSI_DISCARD_OUTPUT true\n#TSI_MYSTERY\n#TSI_PING\n";
        assert_eq!(find_command_tag(msg, is_known), Some("TSI_PING".to_string()));
    }

    #[test]
    fn no_tag_returns_none() {
        assert_eq!(find_command_tag("just a plain line\n", is_known), None);
    }

    #[test]
    fn parses_identity_line() {
        let msg = "#TSI_EXECUTESCRIPT\n#TSI_IDENTITY alice users:devs:ops\necho hi\n";
        let id = find_identity(msg).unwrap();
        assert_eq!(id.user, "alice");
        assert_eq!(id.groups, vec!["users", "devs", "ops"]);
    }

    #[test]
    fn missing_identity_line_is_none() {
        assert!(find_identity("#TSI_PING\n").is_none());
    }

    #[test]
    fn detects_discard_output() {
        let msg = "#TSI_EXECUTESCRIPT\n#TSI_DISCARD_OUTPUT true\necho hi\n";
        assert!(discard_output_requested(msg));
        assert!(!discard_output_requested("#TSI_EXECUTESCRIPT\necho hi\n"));
    }

    #[test]
    fn strips_directives_leaving_script_body() {
        let msg = "#TSI_EXECUTESCRIPT\n#TSI_IDENTITY alice users\necho hi\ntouch out\n";
        assert_eq!(strip_directive_lines(msg), "echo hi\ntouch out\n");
    }
}
