// src/auth/cache.rs

//! Credentials that worked, keyed by origin and realm.
//!
//! Each entry also records the directories it was used for, so a later
//! request under one of those directories can send credentials before being
//! challenged.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use url::Url;

use super::AuthCredentials;

const MAX_REALM_ENTRIES: usize = 10;
const MAX_PATHS_PER_ENTRY: usize = 10;

/// A snapshot of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    origin: Url,
    realm: String,
    scheme: String,
    auth_challenge: String,
    credentials: AuthCredentials,
    nonce_count: u32,
    paths: Vec<String>,
    created: Instant,
    last_use: Instant,
}

impl Entry {
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The challenge the credentials were last used with.
    pub fn auth_challenge(&self) -> &str {
        &self.auth_challenge
    }

    pub fn credentials(&self) -> &AuthCredentials {
        &self.credentials
    }

    pub fn nonce_count(&self) -> u32 {
        self.nonce_count
    }

    /// Directories covered by this entry, most recent first.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_use(&self) -> Instant {
        self.last_use
    }

    fn matches(&self, origin: &Url, realm: &str, scheme: &str) -> bool {
        self.origin == *origin && self.realm == realm && self.scheme == scheme
    }

    fn add_path(&mut self, path: &str) {
        let dir = parent_directory(path);
        if self.enclosing_path_len(dir).is_some() {
            return;
        }

        // Drop the paths the new one covers.
        self.paths.retain(|existing| !is_enclosing_path(dir, existing));
        if self.paths.len() >= MAX_PATHS_PER_ENTRY {
            self.paths.pop();
        }
        self.paths.insert(0, dir.to_owned());
    }

    /// Length of the stored path enclosing `dir`, if any.
    fn enclosing_path_len(&self, dir: &str) -> Option<usize> {
        self.paths
            .iter()
            .filter(|path| is_enclosing_path(path, dir))
            .map(String::len)
            .max()
    }
}

/// The cache of accepted credentials, shared by every controller.
///
/// Entries are kept most recently used first. Adding, looking up and
/// refreshing an entry all count as a use. Beyond ten realms the least
/// recently used entry is dropped.
#[derive(Debug, Default)]
pub struct AuthCache {
    entries: Mutex<VecDeque<Entry>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `credentials` for (`origin`, `realm`, `scheme`), and note that
    /// they cover the directory of `path`.
    ///
    /// An existing entry is updated and its nonce count restarts.
    pub fn add(
        &self,
        origin: &Url,
        realm: &str,
        scheme: &str,
        auth_challenge: &str,
        credentials: &AuthCredentials,
        path: &str,
    ) -> Entry {
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.iter().position(|e| e.matches(origin, realm, scheme)) {
            Some(index) => {
                touch(&mut entries, index, now);
            }
            None => {
                if entries.len() >= MAX_REALM_ENTRIES {
                    if let Some(evicted) = entries.pop_back() {
                        log::debug!(
                            "auth cache full, evicting {} realm {:?}",
                            evicted.origin,
                            evicted.realm
                        );
                    }
                }
                entries.push_front(Entry {
                    origin: origin.clone(),
                    realm: realm.to_owned(),
                    scheme: scheme.to_owned(),
                    auth_challenge: String::new(),
                    credentials: AuthCredentials::default(),
                    nonce_count: 0,
                    paths: Vec::new(),
                    created: now,
                    last_use: now,
                });
            }
        }

        let entry = &mut entries[0];
        entry.auth_challenge = auth_challenge.to_owned();
        entry.credentials = credentials.clone();
        entry.nonce_count = 1;
        entry.add_path(path);
        entry.last_use = now;
        entry.clone()
    }

    pub fn lookup_by_realm(&self, origin: &Url, realm: &str, scheme: &str) -> Option<Entry> {
        let mut entries = self.lock();
        let index = entries.iter().position(|e| e.matches(origin, realm, scheme))?;
        Some(touch(&mut entries, index, Instant::now()).clone())
    }

    /// The entry whose stored directory most closely encloses `path`.
    pub fn lookup_by_path(&self, origin: &Url, path: &str) -> Option<Entry> {
        let dir = parent_directory(path);
        let mut entries = self.lock();

        let mut best: Option<(usize, usize)> = None;
        for (index, entry) in entries.iter().enumerate() {
            if entry.origin != *origin {
                continue;
            }
            if let Some(len) = entry.enclosing_path_len(dir) {
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((index, len));
                }
            }
        }

        let (index, _) = best?;
        Some(touch(&mut entries, index, Instant::now()).clone())
    }

    /// Remove the entry, but only while it still holds `credentials`.
    pub fn remove(
        &self,
        origin: &Url,
        realm: &str,
        scheme: &str,
        credentials: &AuthCredentials,
    ) -> bool {
        let mut entries = self.lock();
        let found = entries
            .iter()
            .position(|e| e.matches(origin, realm, scheme) && e.credentials == *credentials);
        match found {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Replace the stored challenge after a stale nonce, restarting the
    /// nonce count. Returns `false` if there is no such entry.
    pub fn update_stale_challenge(
        &self,
        origin: &Url,
        realm: &str,
        scheme: &str,
        auth_challenge: &str,
    ) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|e| e.matches(origin, realm, scheme)) {
            Some(index) => {
                let entry = touch(&mut entries, index, Instant::now());
                entry.auth_challenge = auth_challenge.to_owned();
                entry.nonce_count = 1;
                true
            }
            None => false,
        }
    }

    /// Bump and return the nonce count for the next preemptive use.
    pub fn increment_nonce_count(&self, origin: &Url, realm: &str, scheme: &str) -> Option<u32> {
        let mut entries = self.lock();
        let entry = entries.iter_mut().find(|e| e.matches(origin, realm, scheme))?;
        entry.nonce_count = entry.nonce_count.wrapping_add(1);
        Some(entry.nonce_count)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Remove entries created less than `duration` ago. Returns how many.
    pub fn clear_entries_added_within(&self, duration: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| now.saturating_duration_since(e.created) >= duration);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// `"/a/b/c.html"` -> `"/a/b/"`. Paths without a `/` (proxies) stay empty.
fn parent_directory(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    }
}

/// Move the entry at `index` to the front and mark it used.
fn touch(entries: &mut VecDeque<Entry>, index: usize, now: Instant) -> &mut Entry {
    if index > 0 {
        if let Some(entry) = entries.remove(index) {
            entries.push_front(entry);
        }
    }
    let entry = &mut entries[0];
    entry.last_use = now;
    entry
}

/// The empty path only encloses itself, so proxy entries never answer
/// for server paths.
fn is_enclosing_path(container: &str, path: &str) -> bool {
    if container.is_empty() {
        path.is_empty()
    } else {
        path.starts_with(container)
    }
}
