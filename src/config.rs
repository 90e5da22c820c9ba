// src/config.rs
//
// Properties-file configuration: `key = value` lines, with two
// composite key families (`acl.<path>`, `allowed_dn.<id>`). Parsed into
// a typed `Config` and validated once at startup before anything else
// runs.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, ToSocketAddrs};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::core::errors::TsiError;

static CONFIG_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([A-Za-z0-9._\-/]+)\s*=\s*(.+?)\s*$").unwrap());

const BOOLEAN_KEYS: &[&str] = &[
    "switch_uid",
    "enforce_os_gids",
    "fail_on_invalid_gids",
    "use_id_to_resolve_gids",
    "open_user_sessions",
    "use_syslog",
    "debug",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPolicy {
    None,
    Posix,
    Nfs,
}

impl std::str::FromStr for AclPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(AclPolicy::None),
            "POSIX" => Ok(AclPolicy::Posix),
            "NFS" => Ok(AclPolicy::Nfs),
            other => Err(format!("invalid ACL policy '{other}', expected NONE, POSIX, or NFS")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub switch_uid: bool,
    pub enforce_os_gids: bool,
    pub fail_on_invalid_gids: bool,
    pub use_id_to_resolve_gids: bool,
    pub open_user_sessions: bool,
    pub use_syslog: bool,
    pub debug: bool,

    pub user_cache_ttl_secs: u64,
    pub worker_id: String,
    pub safe_dir: String,
    pub default_job_name: String,
    pub njs_machine: String,
    pub nodes_filter: String,

    /// Where the listener binds.
    pub listen_host: String,
    pub listen_port: u16,

    pub getfacl_cmd: Option<String>,
    pub setfacl_cmd: Option<String>,
    pub nfs_getfacl_cmd: Option<String>,
    pub nfs_setfacl_cmd: Option<String>,

    pub acl_policies: HashMap<String, AclPolicy>,
    pub allowed_dns: Vec<String>,
    /// Resolved from `njs_machine` at load time.
    pub allowed_ips: Vec<IpAddr>,

    /// Any key not otherwise recognized, kept verbatim for forward
    /// compatibility with collaborator-specific settings.
    pub extra: HashMap<String, String>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, TsiError> {
        let text = fs::read_to_string(path)
            .map_err(|e| TsiError::Config(format!("failed to read config file '{path}': {e}")))?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self, TsiError> {
        let mut booleans: HashMap<&str, bool> = HashMap::new();
        let mut scalars: HashMap<String, String> = HashMap::new();
        let mut acl_policies = HashMap::new();
        let mut allowed_dns = Vec::new();
        let mut extra = HashMap::new();

        for (lineno, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some(caps) = CONFIG_LINE.captures(line) else {
                warn!(line = lineno + 1, "ignoring unparseable config line");
                continue;
            };
            let key = caps[1].to_string();
            let value = caps[2].to_string();

            if let Some(&known) = BOOLEAN_KEYS.iter().find(|k| **k == key) {
                booleans.insert(known, parse_bool(&value));
            } else if let Some(path) = key.strip_prefix("acl.") {
                let policy = value
                    .parse::<AclPolicy>()
                    .map_err(|e| TsiError::Config(format!("acl.{path}: {e}")))?;
                acl_policies.insert(path.to_string(), policy);
            } else if key.strip_prefix("allowed_dn.").is_some() {
                allowed_dns.push(normalize_dn(&value));
            } else {
                extra.insert(key.clone(), value.clone());
                scalars.insert(key, value);
            }
        }

        let njs_machine = scalars.get("njs_machine").cloned().unwrap_or_else(|| "localhost".to_string());
        let allowed_ips = resolve_allowed_ips(&njs_machine);

        let config = Config {
            switch_uid: booleans.get("switch_uid").copied().unwrap_or(true),
            enforce_os_gids: booleans.get("enforce_os_gids").copied().unwrap_or(true),
            fail_on_invalid_gids: booleans.get("fail_on_invalid_gids").copied().unwrap_or(false),
            use_id_to_resolve_gids: booleans.get("use_id_to_resolve_gids").copied().unwrap_or(false),
            open_user_sessions: booleans.get("open_user_sessions").copied().unwrap_or(false),
            use_syslog: booleans.get("use_syslog").copied().unwrap_or(false),
            debug: booleans.get("debug").copied().unwrap_or(false),

            user_cache_ttl_secs: scalars
                .get("userCacheTtl")
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            worker_id: scalars.get("worker.id").cloned().unwrap_or_else(|| "1".to_string()),
            safe_dir: scalars.get("safe_dir").cloned().unwrap_or_else(|| "/tmp".to_string()),
            default_job_name: scalars
                .get("default_job_name")
                .cloned()
                .unwrap_or_else(|| "UnicoreJob".to_string()),
            njs_machine,
            nodes_filter: scalars.get("nodes_filter").cloned().unwrap_or_default(),

            listen_host: scalars.get("listen_host").cloned().unwrap_or_else(|| "127.0.0.1".to_string()),
            listen_port: scalars
                .get("listen_port")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4433),

            getfacl_cmd: scalars.get("getfacl_cmd").cloned(),
            setfacl_cmd: scalars.get("setfacl_cmd").cloned(),
            nfs_getfacl_cmd: scalars.get("nfs_getfacl_cmd").cloned(),
            nfs_setfacl_cmd: scalars.get("nfs_setfacl_cmd").cloned(),

            acl_policies,
            allowed_dns,
            allowed_ips,
            extra,
        };

        config.validate()?;
        Ok(config)
    }

    /// Whether POSIX ACL support is wired up (both commands configured).
    pub fn posix_acl_enabled(&self) -> bool {
        self.getfacl_cmd.is_some() && self.setfacl_cmd.is_some()
    }

    /// Whether NFSv4 ACL support is wired up (both commands configured).
    pub fn nfs_acl_enabled(&self) -> bool {
        self.nfs_getfacl_cmd.is_some() && self.nfs_setfacl_cmd.is_some()
    }

    fn validate(&self) -> Result<(), TsiError> {
        if !self.switch_uid && nix::unistd::geteuid().is_root() {
            return Err(TsiError::Config(
                "switch_uid=false while running as root is not a supported configuration".into(),
            ));
        }
        if self.listen_port == 0 {
            return Err(TsiError::Config("listen_port cannot be 0".into()));
        }
        if self.user_cache_ttl_secs == 0 {
            return Err(TsiError::Config("userCacheTtl cannot be 0".into()));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true")
}

/// Trims and canonicalizes whitespace around `=` separators in each
/// comma-separated RDN of a distinguished name, e.g.
/// `"CN = Alice ,O=Example"` -> `"CN=Alice,O=Example"`.
fn normalize_dn(raw: &str) -> String {
    raw.split(',')
        .map(|part| {
            let mut kv = part.splitn(2, '=');
            let k = kv.next().unwrap_or("").trim();
            let v = kv.next().unwrap_or("").trim();
            if v.is_empty() {
                k.to_string()
            } else {
                format!("{k}={v}")
            }
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn resolve_allowed_ips(njs_machine: &str) -> Vec<IpAddr> {
    let mut ips = Vec::new();
    for host in njs_machine.split(',').map(str::trim).filter(|h| !h.is_empty()) {
        match (host, 0u16).to_socket_addrs() {
            Ok(addrs) => {
                for addr in addrs {
                    info!(host, ip = %addr.ip(), "resolved allowed orchestrator host");
                    ips.push(addr.ip());
                }
            }
            Err(e) => warn!(host, error = %e, "could not resolve allowed orchestrator host"),
        }
    }
    ips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_booleans_and_defaults() {
        let text = "switch_uid = false\nenforce_os_gids = true\n";
        if nix::unistd::geteuid().is_root() {
            // switch_uid=false while running as root is rejected.
            assert!(matches!(Config::parse(text), Err(TsiError::Config(_))));
            return;
        }
        let cfg = Config::parse(text).unwrap();
        assert!(!cfg.switch_uid);
        assert!(cfg.enforce_os_gids);
        assert!(!cfg.fail_on_invalid_gids);
    }

    #[test]
    fn parses_acl_composite_keys() {
        let cfg = Config::parse("acl./data=POSIX\nacl./scratch = NFS\n").unwrap();
        assert_eq!(cfg.acl_policies.get("/data"), Some(&AclPolicy::Posix));
        assert_eq!(cfg.acl_policies.get("/scratch"), Some(&AclPolicy::Nfs));
    }

    #[test]
    fn rejects_invalid_acl_policy() {
        let err = Config::parse("acl./data=WEIRD\n").unwrap_err();
        assert!(matches!(err, TsiError::Config(_)));
    }

    #[test]
    fn parses_allowed_dn_and_normalizes() {
        let cfg = Config::parse("allowed_dn.1 = CN = Alice , O=Example\n").unwrap();
        assert_eq!(cfg.allowed_dns, vec!["CN=Alice,O=Example".to_string()]);
    }

    #[test]
    fn acl_enabled_requires_both_commands() {
        let cfg = Config::parse("getfacl_cmd=/usr/bin/getfacl\n").unwrap();
        assert!(!cfg.posix_acl_enabled());
        let cfg = Config::parse("getfacl_cmd=/usr/bin/getfacl\nsetfacl_cmd=/usr/bin/setfacl\n").unwrap();
        assert!(cfg.posix_acl_enabled());
    }

    #[test]
    fn rejects_zero_listen_port() {
        let err = Config::parse("listen_port=0\n").unwrap_err();
        assert!(matches!(err, TsiError::Config(_)));
    }

    #[test]
    fn unknown_keys_are_kept_in_extra() {
        let cfg = Config::parse("custom.thing = value\n").unwrap();
        assert_eq!(cfg.extra.get("custom.thing"), Some(&"value".to_string()));
    }
}
