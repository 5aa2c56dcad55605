//! Expiring per-actor membership set used by the drop-in block.
//!
//! An actor is "on" the watchlist from the moment a target word triggers it
//! until either a cancel word clears it, `expireDuration` elapses, or a
//! hourly sweep finds it expired.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
struct Entry {
    /// rkey of the post that triggered this actor's entry, so `preDelete` can
    /// tell "the triggering post" from "an unrelated post by the same actor".
    trigger_rkey_hash: u64,
    expires_at: Option<Instant>,
}

/// `None` duration means the entry never expires on its own.
pub struct Watchlist {
    entries: Mutex<HashMap<String, Entry>>,
}

fn hash_rkey(rkey: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    rkey.hash(&mut hasher);
    hasher.finish()
}

impl Watchlist {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Adds `did`, recording `rkey` as the trigger and `expire_in` (`None`
    /// ⇒ immortal, `Some(Duration::ZERO)` is treated the same way per the
    /// drop-in block's "0 ⇒ immortal" option semantics).
    pub fn add(&self, did: &str, rkey: &str, expire_in: Option<Duration>) {
        let expires_at = expire_in
            .filter(|d| !d.is_zero())
            .map(|d| Instant::now() + d);
        self.entries.lock().unwrap().insert(
            did.to_string(),
            Entry {
                trigger_rkey_hash: hash_rkey(rkey),
                expires_at,
            },
        );
    }

    pub fn remove(&self, did: &str) {
        self.entries.lock().unwrap().remove(did);
    }

    /// Removes `did` only if its recorded trigger rkey matches, per the
    /// drop-in block's `preDelete` semantics: a delete of an unrelated post
    /// by the same actor must leave the watchlist entry intact.
    pub fn remove_if_trigger(&self, did: &str, rkey: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(did) {
            if entry.trigger_rkey_hash == hash_rkey(rkey) {
                entries.remove(did);
            }
        }
    }

    /// True if present and not expired. Does not itself evict expired entries;
    /// the sweep task does that so `contains` stays allocation-free.
    pub fn contains(&self, did: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(did) {
            Some(entry) => entry.expires_at.is_none_or(|at| Instant::now() < at),
            None => false,
        }
    }

    pub fn list(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_none_or(|at| now < at))
            .map(|(did, _)| did.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| entry.expires_at.is_none_or(|at| now < at));
    }
}

impl Default for Watchlist {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs an hourly sweep of `watchlist` until `cancel` fires, in the same
/// `tokio::select!` + reset-sleep shape the background cleanup task uses.
pub async fn run_sweep(watchlist: std::sync::Arc<Watchlist>, cancel: CancellationToken) {
    let interval = Duration::from_secs(3600);
    let sleeper = tokio::time::sleep(interval);
    tokio::pin!(sleeper);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("watchlist sweep shutting down");
                break;
            }
            _ = &mut sleeper => {
                watchlist.sweep();
                sleeper.as_mut().reset(tokio::time::Instant::now() + interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_contains() {
        let list = Watchlist::new();
        list.add("did:plc:a", "rkey1", None);
        assert!(list.contains("did:plc:a"));
        assert!(!list.contains("did:plc:b"));
    }

    #[test]
    fn remove_if_trigger_respects_rkey() {
        let list = Watchlist::new();
        list.add("did:plc:a", "rkey1", None);
        list.remove_if_trigger("did:plc:a", "rkey2");
        assert!(list.contains("did:plc:a"), "unrelated rkey must not clear the entry");

        list.remove_if_trigger("did:plc:a", "rkey1");
        assert!(!list.contains("did:plc:a"));
    }

    #[test]
    fn zero_duration_is_immortal() {
        let list = Watchlist::new();
        list.add("did:plc:a", "rkey1", Some(Duration::ZERO));
        list.sweep();
        assert!(list.contains("did:plc:a"));
    }

    #[test]
    fn sweep_evicts_expired() {
        let list = Watchlist::new();
        list.add("did:plc:a", "rkey1", Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(20));
        list.sweep();
        assert!(!list.contains("did:plc:a"));
    }

    #[test]
    fn list_excludes_expired() {
        let list = Watchlist::new();
        list.add("did:plc:a", "rkey1", None);
        list.add("did:plc:b", "rkey2", Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(20));
        let names = list.list();
        assert_eq!(names, vec!["did:plc:a".to_string()]);
    }
}
