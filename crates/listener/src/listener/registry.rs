//! The prefix registry of one endpoint.
//!
//! Lookups never lock: the exact-host map and the two wildcard lists are immutable snapshots
//! behind [`ArcSwap`], and every update installs a modified copy with [`ArcSwap::rcu`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::ensure;
use crate::listener::prefix::{HostKind, ListenerPrefix};
use crate::protocol::ListenerError;
use crate::utils::percent_decode;

struct Entry<L> {
    prefix: ListenerPrefix,
    listener: Arc<L>,
}

impl<L> Clone for Entry<L> {
    fn clone(&self) -> Self {
        Self { prefix: self.prefix.clone(), listener: Arc::clone(&self.listener) }
    }
}

type EntryList<L> = ArcSwap<Vec<Entry<L>>>;

pub struct PrefixRegistry<L> {
    exact: ArcSwap<HashMap<ListenerPrefix, Arc<L>>>,
    /// `*` prefixes
    unhandled: EntryList<L>,
    /// `+` prefixes
    all: EntryList<L>,
}

impl<L> Default for PrefixRegistry<L> {
    fn default() -> Self {
        Self { exact: ArcSwap::from_pointee(HashMap::new()), unhandled: ArcSwap::from_pointee(Vec::new()), all: ArcSwap::from_pointee(Vec::new()) }
    }
}

impl<L> fmt::Debug for PrefixRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exact: Vec<String> = self.exact.load().keys().map(ToString::to_string).collect();
        let unhandled: Vec<String> = self.unhandled.load().iter().map(|e| e.prefix.to_string()).collect();
        let all: Vec<String> = self.all.load().iter().map(|e| e.prefix.to_string()).collect();
        f.debug_struct("PrefixRegistry").field("exact", &exact).field("unhandled", &unhandled).field("all", &all).finish()
    }
}

impl<L> PrefixRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `prefix` for `listener`.
    ///
    /// Registering an exact prefix again for the same listener is a no-op; a wildcard prefix
    /// whose path is already in its list is rejected whoever owns it.
    pub fn add(&self, prefix: &ListenerPrefix, listener: &Arc<L>) -> Result<(), ListenerError> {
        let path = prefix.path();
        ensure!(!path.contains('%') && !path.contains("//"), ListenerError::invalid_path(prefix));

        match prefix.host_kind() {
            HostKind::Unhandled => add_special(&self.unhandled, prefix, listener),
            HostKind::All => add_special(&self.all, prefix, listener),
            HostKind::Exact => {
                let mut result = Ok(());
                self.exact.rcu(|current| {
                    let mut next = HashMap::clone(current);
                    result = match current.get(prefix) {
                        Some(owner) if !Arc::ptr_eq(owner, listener) => Err(ListenerError::prefix_conflict(prefix)),
                        Some(_) => Ok(()),
                        None => {
                            next.insert(prefix.clone(), Arc::clone(listener));
                            Ok(())
                        }
                    };
                    next
                });
                result
            }
        }
    }

    /// Unregisters `prefix` if `listener` owns it. Returns whether anything was removed.
    pub fn remove(&self, prefix: &ListenerPrefix, listener: &Arc<L>) -> bool {
        match prefix.host_kind() {
            HostKind::Unhandled => remove_special(&self.unhandled, prefix, listener),
            HostKind::All => remove_special(&self.all, prefix, listener),
            HostKind::Exact => {
                let mut removed = false;
                self.exact.rcu(|current| {
                    let mut next = HashMap::clone(current);
                    removed = next.get(prefix).is_some_and(|owner| Arc::ptr_eq(owner, listener));
                    if removed {
                        next.remove(prefix);
                    }
                    next
                });
                removed
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exact.load().is_empty() && self.unhandled.load().is_empty() && self.all.load().is_empty()
    }

    /// Finds the listener for a request.
    ///
    /// Exact prefixes for `host` and `port` come first, then `*` prefixes, then `+` prefixes.
    /// Within each group the longest matching path wins.
    pub fn search(&self, host: &str, port: u16, path: &str) -> Option<Arc<L>> {
        let path = percent_decode(path);
        let path_slash = if path.ends_with('/') { path.clone() } else { format!("{path}/") };

        if !host.is_empty() {
            let exact = self.exact.load();
            let best = exact
                .iter()
                .filter(|(prefix, _)| prefix.port() == port && prefix.host().eq_ignore_ascii_case(host))
                .filter(|(prefix, _)| path.starts_with(prefix.path()) || path_slash.starts_with(prefix.path()))
                .max_by_key(|(prefix, _)| prefix.path().len());
            if let Some((_, listener)) = best {
                return Some(Arc::clone(listener));
            }
        }

        for list in [&self.unhandled, &self.all] {
            let list = list.load();
            let found = match_from_list(&list, &path).or_else(|| {
                if path == path_slash { None } else { match_from_list(&list, &path_slash) }
            });
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

fn match_from_list<L>(list: &[Entry<L>], path: &str) -> Option<Arc<L>> {
    list.iter().filter(|entry| path.starts_with(entry.prefix.path())).max_by_key(|entry| entry.prefix.path().len()).map(|entry| Arc::clone(&entry.listener))
}

fn add_special<L>(list: &EntryList<L>, prefix: &ListenerPrefix, listener: &Arc<L>) -> Result<(), ListenerError> {
    let mut result = Ok(());
    list.rcu(|current| {
        let mut next = Vec::clone(current);
        result = if current.iter().any(|entry| entry.prefix.path() == prefix.path()) {
            Err(ListenerError::prefix_in_use(prefix))
        } else {
            next.push(Entry { prefix: prefix.clone(), listener: Arc::clone(listener) });
            Ok(())
        };
        next
    });
    result
}

fn remove_special<L>(list: &EntryList<L>, prefix: &ListenerPrefix, listener: &Arc<L>) -> bool {
    let mut removed = false;
    list.rcu(|current| {
        let mut next = Vec::clone(current);
        let before = next.len();
        next.retain(|entry| !(entry.prefix.path() == prefix.path() && Arc::ptr_eq(&entry.listener, listener)));
        removed = next.len() != before;
        next
    });
    removed
}
