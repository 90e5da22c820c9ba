// src/core/identity/cache.rs
//
// TTL-memoized OS user/group lookups: uid, primary gid, home directory,
// ordered supplementary gids, group gid, and group membership, each
// entry timestamped and re-resolved once it exceeds the configured TTL.
// Negative (unknown user/group) results are cached too, so a flood of
// lookups for a nonexistent name doesn't keep hitting the OS database.

use std::collections::{HashMap, HashSet};
use std::process::Command;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uzers::{get_group_by_name, get_user_by_name, get_user_groups};

/// Sentinel returned by single-valued lookups (uid, gid) when the name
/// does not resolve to anything in the OS user/group database.
pub const UNKNOWN: i64 = -1;

struct CacheEntry<T> {
    value: T,
    created: Instant,
}

#[derive(Default)]
struct Tables {
    /// user -> (uid, primary_gid, home)
    user_info: HashMap<String, CacheEntry<(i64, i64, String)>>,
    /// user -> ordered supplementary gids (primary first)
    user_gids: HashMap<String, CacheEntry<Vec<i64>>>,
    /// group name -> gid
    group_gid: HashMap<String, CacheEntry<i64>>,
    /// group name -> member usernames
    group_members: HashMap<String, CacheEntry<HashSet<String>>>,
}

/// A single-mutex, TTL-bounded cache of OS identity lookups shared by a
/// worker for the lifetime of its connection. Entries (including
/// negative/unknown results) expire after `ttl` and are re-resolved on
/// next access.
pub struct UserCache {
    ttl: Duration,
    use_id_command: bool,
    tables: Mutex<Tables>,
}

impl UserCache {
    pub fn new(ttl: Duration, use_id_command: bool) -> Self {
        Self {
            ttl,
            use_id_command,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn get_or_resolve<T, F>(map: &mut HashMap<String, CacheEntry<T>>, ttl: Duration, key: &str, resolve: F) -> T
    where
        T: Clone,
        F: FnOnce() -> T,
    {
        if let Some(entry) = map.get(key) {
            if entry.created.elapsed() < ttl {
                return entry.value.clone();
            }
        }
        let value = resolve();
        map.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                created: Instant::now(),
            },
        );
        value
    }

    fn user_info(&self, user: &str) -> (i64, i64, String) {
        let mut tables = self.tables.lock();
        Self::get_or_resolve(&mut tables.user_info, self.ttl, user, || {
            match get_user_by_name(user) {
                Some(u) => (
                    u.uid() as i64,
                    u.primary_group_id() as i64,
                    u.home_dir().to_string_lossy().into_owned(),
                ),
                None => (UNKNOWN, UNKNOWN, String::new()),
            }
        })
    }

    pub fn uid_for_user(&self, user: &str) -> i64 {
        self.user_info(user).0
    }

    pub fn primary_gid_for_user(&self, user: &str) -> i64 {
        self.user_info(user).1
    }

    pub fn home_for_user(&self, user: &str) -> String {
        self.user_info(user).2
    }

    pub fn gid_for_group(&self, group: &str) -> i64 {
        let mut tables = self.tables.lock();
        Self::get_or_resolve(&mut tables.group_gid, self.ttl, group, || {
            get_group_by_name(group).map(|g| g.gid() as i64).unwrap_or(UNKNOWN)
        })
    }

    /// Explicit (non-primary) members of `group`, via `getent group` so
    /// that NSS sources other than flat files (LDAP, sssd) are honored
    /// the same way the primary-lookup helpers are.
    pub fn members_for_group(&self, group: &str) -> HashSet<String> {
        let mut tables = self.tables.lock();
        Self::get_or_resolve(&mut tables.group_members, self.ttl, group, || Self::members_via_getent(group))
    }

    fn members_via_getent(group: &str) -> HashSet<String> {
        let output = match Command::new("getent").arg("group").arg(group).output() {
            Ok(o) if o.status.success() => o,
            _ => return HashSet::new(),
        };
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .split(':')
            .nth(3)
            .map(|members| members.split(',').filter(|m| !m.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Ordered set of supplementary gids for `user`, primary gid first
    /// when resolvable. Uses `getgrouplist(3)` via `uzers` by default, or
    /// shells out to `id -G` when `use_id_command` is set (for systems
    /// where NSS modules are only wired up for the external `id` binary).
    pub fn gids_for_user(&self, user: &str) -> Vec<i64> {
        let primary = self.primary_gid_for_user(user);
        let mut tables = self.tables.lock();
        Self::get_or_resolve(&mut tables.user_gids, self.ttl, user, || {
            let resolved = if self.use_id_command {
                Self::gids_via_id_command(user)
            } else {
                Self::gids_via_os_db(user, primary)
            };
            order_with_primary_first(primary, resolved)
        })
    }

    fn gids_via_os_db(user: &str, primary: i64) -> Vec<i64> {
        if primary < 0 {
            return Vec::new();
        }
        get_user_groups(user, primary as u32)
            .map(|groups| groups.iter().map(|g| g.gid() as i64).collect())
            .unwrap_or_default()
    }

    fn gids_via_id_command(user: &str) -> Vec<i64> {
        let output = match Command::new("id").arg("-G").arg(user).output() {
            Ok(o) if o.status.success() => o,
            _ => return Vec::new(),
        };
        String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .filter_map(|tok| tok.parse::<i64>().ok())
            .collect()
    }
}

fn order_with_primary_first(primary: i64, gids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(gids.len() + 1);
    if primary >= 0 {
        seen.insert(primary);
        result.push(primary);
    }
    for gid in gids {
        if seen.insert(gid) {
            result.push(gid);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_with_primary_first_dedups_and_leads_with_primary() {
        let ordered = order_with_primary_first(100, vec![200, 100, 300, 200]);
        assert_eq!(ordered, vec![100, 200, 300]);
    }

    #[test]
    fn order_with_primary_first_handles_unknown_primary() {
        let ordered = order_with_primary_first(UNKNOWN, vec![200, 300]);
        assert_eq!(ordered, vec![200, 300]);
    }

    #[test]
    fn unknown_user_resolves_to_negative_sentinels() {
        let cache = UserCache::new(Duration::from_secs(60), false);
        let name = "definitely-not-a-real-user-xyz";
        assert_eq!(cache.uid_for_user(name), UNKNOWN);
        assert_eq!(cache.primary_gid_for_user(name), UNKNOWN);
        assert_eq!(cache.home_for_user(name), "");
        assert_eq!(cache.gid_for_group(name), UNKNOWN);
        assert!(cache.members_for_group(name).is_empty());
    }
}
