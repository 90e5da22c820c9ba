// src/core/identity/switch.rs
//
// Privileged identity switching: acquire the target user's UID/GID set,
// run a request under it, and release it back to the worker's captured
// startup identity. Resolves the primary and supplementary groups,
// performs the syscalls in the fixed order required for an unprivileged
// process to end up as the target user, and verifies the result before
// ever handing control to a handler.

use std::time::Duration;

use nix::unistd::{getgroups, getresgid, getresuid, setgid, setgroups, setresgid, setresuid, Gid, Uid};

use crate::config::Config;
use crate::core::errors::TsiError;
use crate::core::identity::cache::{UserCache, UNKNOWN};

/// Selector meaning "use the OS default for this user" in a requested
/// group list.
pub const NONE: &str = "NONE";
/// Selector meaning "expand to the user's full OS supplementary group
/// list at this position".
pub const DEFAULT_GID: &str = "DEFAULT_GID";

/// Owns the worker's captured startup identity and the user/group
/// lookup cache, and carries out the acquire/verify/release sequence
/// for each request.
pub struct IdentitySwitch {
    /// Whether requests should actually switch identity. Forced `true`
    /// when the worker started as root; otherwise taken from config.
    switch_uid: bool,
    effective_uid: u32,
    effective_gid: u32,
    cache: UserCache,
}

impl IdentitySwitch {
    /// Captures the worker's real/effective ids and decides the
    /// effective `switch_uid` policy. `Config::validate` has already
    /// rejected the combination of `switch_uid = false` while running
    /// as root, so the only remaining adjustment here is forcing the
    /// flag on when the worker is root regardless of what was asked.
    pub fn initialize(config: &Config) -> Result<Self, TsiError> {
        let (_, euid, _) = getresuid()?;
        let (_, egid, _) = getresgid()?;

        let switch_uid = config.switch_uid || euid.is_root();

        Ok(Self {
            switch_uid,
            effective_uid: euid.as_raw(),
            effective_gid: egid.as_raw(),
            cache: UserCache::new(Duration::from_secs(config.user_cache_ttl_secs), config.use_id_to_resolve_gids),
        })
    }

    pub fn effective_uid(&self) -> u32 {
        self.effective_uid
    }

    pub fn switch_uid(&self) -> bool {
        self.switch_uid
    }

    pub fn cache(&self) -> &UserCache {
        &self.cache
    }

    fn check_membership(&self, group: &str, group_gid: i64, user: &str, config: &Config) -> bool {
        if !config.enforce_os_gids {
            return true;
        }
        if group_gid == self.cache.primary_gid_for_user(user) {
            return true;
        }
        self.cache.members_for_group(group).contains(user)
    }

    fn resolve_primary_group(&self, selector: &str, user: &str, config: &Config) -> Result<i64, TsiError> {
        if selector == DEFAULT_GID {
            return Ok(self.cache.primary_gid_for_user(user));
        }

        let mut gid = self.cache.gid_for_group(selector);
        if gid == UNKNOWN {
            if config.fail_on_invalid_gids {
                return Err(TsiError::Identity(format!(
                    "unknown primary group '{selector}' requested for user '{user}'"
                )));
            }
            tracing::warn!(user, group = selector, "unknown primary group, falling back to OS default");
            gid = self.cache.primary_gid_for_user(user);
        } else if !self.check_membership(selector, gid, user, config) {
            if config.fail_on_invalid_gids {
                return Err(TsiError::Identity(format!(
                    "user '{user}' is not a member of requested primary group '{selector}'"
                )));
            }
            tracing::warn!(user, group = selector, "user is not a member of requested primary group, falling back to OS default");
            gid = self.cache.primary_gid_for_user(user);
        }
        Ok(gid)
    }

    /// Mirrors `BecomeUser.get_supplementary_groups`: `requested[0]` is
    /// the primary-group selector handled separately, so this walks
    /// `requested[1..]`. `DEFAULT_GID` expands to the user's full OS
    /// supplementary list (once, even if requested more than once). A
    /// membership failure under `enforce_os_gids` is fatal only when
    /// `fail_on_invalid_gids` is set; otherwise the warning is logged
    /// but the group is still added, matching the original's fallthrough.
    fn resolve_supplementary_groups(
        &self,
        requested: &[String],
        primary: i64,
        user: &str,
        config: &Config,
    ) -> Result<Vec<i64>, TsiError> {
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        if primary >= 0 {
            seen.insert(primary);
            result.push(primary);
        }

        let mut added_default = false;
        for selector in requested.iter().skip(1) {
            if selector == DEFAULT_GID {
                if added_default {
                    continue;
                }
                added_default = true;
                for gid in self.cache.gids_for_user(user) {
                    if seen.insert(gid) {
                        result.push(gid);
                    }
                }
                continue;
            }

            let gid = self.cache.gid_for_group(selector);
            if gid == UNKNOWN {
                if config.fail_on_invalid_gids {
                    return Err(TsiError::Identity(format!(
                        "unknown supplementary group '{selector}' requested for user '{user}'"
                    )));
                }
                tracing::warn!(user, group = selector, "unknown supplementary group, skipping");
                continue;
            }

            if !self.check_membership(selector, gid, user, config) {
                if config.fail_on_invalid_gids {
                    return Err(TsiError::Identity(format!(
                        "user '{user}' is not a member of requested supplementary group '{selector}'"
                    )));
                }
                tracing::warn!(user, group = selector, "user is not a member of requested supplementary group");
            }

            if seen.insert(gid) {
                result.push(gid);
            }
        }

        Ok(result)
    }

    /// Acquires the identity named by `user`/`requested_groups`. A
    /// no-op, returning success without touching process identity, when
    /// `switch_uid` is false (property: unprivileged worker is a no-op).
    pub fn become_user(&self, user: &str, requested_groups: &[String], config: &Config) -> Result<(), TsiError> {
        if !self.switch_uid {
            return Ok(());
        }

        let new_uid = self.cache.uid_for_user(user);
        if new_uid == UNKNOWN {
            return Err(TsiError::Identity(format!("attempted to run a request for unknown user '{user}'")));
        }
        if new_uid == 0 {
            return Err(TsiError::Identity(format!("refusing to switch to uid 0 for user '{user}'")));
        }

        let primary_selector = requested_groups.first().map(String::as_str).unwrap_or(NONE);
        let (new_gid, new_gids) = if primary_selector == NONE {
            (self.cache.primary_gid_for_user(user), self.cache.gids_for_user(user))
        } else {
            let primary = self.resolve_primary_group(primary_selector, user, config)?;
            let gids = self.resolve_supplementary_groups(requested_groups, primary, user, config)?;
            (primary, gids)
        };

        if new_gid == UNKNOWN {
            return Err(TsiError::Identity(format!("could not resolve a primary group for user '{user}'")));
        }

        let uid = Uid::from_raw(new_uid as u32);
        let gid = Gid::from_raw(new_gid as u32);
        let groups: Vec<Gid> = new_gids.iter().map(|g| Gid::from_raw(*g as u32)).collect();
        let euid = Uid::from_raw(self.effective_uid);

        setgid(gid)?;
        setgroups(&groups)?;
        setresgid(gid, gid, gid)?;
        setresuid(uid, uid, euid)?;

        self.verify(new_uid, new_gid, &new_gids)
            .map_err(|e| TsiError::Identity(format!("post-switch verification failed: {e}")))?;

        apply_env(user, &self.cache.home_for_user(user));
        Ok(())
    }

    fn verify(&self, uid: i64, gid: i64, gids: &[i64]) -> Result<(), TsiError> {
        let (ruid, euid, _) = getresuid()?;
        let (rgid, egid, _) = getresgid()?;
        let actual_groups: std::collections::HashSet<i64> =
            getgroups()?.into_iter().map(|g| g.as_raw() as i64).collect();
        let expected: std::collections::HashSet<i64> = gids.iter().copied().collect();

        if ruid.as_raw() as i64 != uid
            || euid.as_raw() as i64 != uid
            || rgid.as_raw() as i64 != gid
            || egid.as_raw() as i64 != gid
            || actual_groups != expected
        {
            return Err(TsiError::Identity("uid/gid mismatch after switch".into()));
        }
        Ok(())
    }

    /// Returns the process to its captured startup identity. Always
    /// attempted by the dispatcher after a request, whether or not
    /// `become_user` actually ran. A failure here is fatal to the whole
    /// worker: the process can no longer be trusted to hold the right
    /// identity, so the caller must terminate rather than serve another
    /// request.
    pub fn restore_id(&self) -> Result<(), TsiError> {
        if !self.switch_uid {
            return Ok(());
        }

        let uid = Uid::from_raw(self.effective_uid);
        let gid = Gid::from_raw(self.effective_gid);

        setresuid(uid, uid, uid).map_err(|e| TsiError::Restore(e.to_string()))?;
        setgid(gid).map_err(|e| TsiError::Restore(e.to_string()))?;
        setgroups(&[gid]).map_err(|e| TsiError::Restore(e.to_string()))?;
        setresgid(gid, gid, gid).map_err(|e| TsiError::Restore(e.to_string()))?;

        let (ruid, euid, _) = getresuid().map_err(|e| TsiError::Restore(e.to_string()))?;
        let (rgid, egid, _) = getresgid().map_err(|e| TsiError::Restore(e.to_string()))?;
        let groups = getgroups().map_err(|e| TsiError::Restore(e.to_string()))?;

        if ruid.as_raw() != self.effective_uid
            || euid.as_raw() != self.effective_uid
            || rgid.as_raw() != self.effective_gid
            || egid.as_raw() != self.effective_gid
            || groups.len() != 1
            || groups[0].as_raw() != self.effective_gid
        {
            return Err(TsiError::Restore("post-restore identity verification failed".into()));
        }

        apply_env("nobody", "/tmp");
        Ok(())
    }
}

fn apply_env(user: &str, home: &str) {
    // SAFETY: each worker process is single-threaded for its whole
    // lifetime (fork-per-connection, no thread pool), so there is no
    // concurrent reader racing this write.
    unsafe {
        std::env::set_var("HOME", home);
        std::env::set_var("USER", user);
        std::env::set_var("LOGNAME", user);
    }
}
