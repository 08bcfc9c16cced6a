//! Process-wide directory listing cache.
//!
//! Only the external contract matters to the control socket: look a file up
//! in a cached listing, update an entry after a completed upload, and drop
//! listings that became stale. The store is a [`DashMap`] keyed by
//! `(server, directory)` so control threads and worker threads can touch it
//! without an outer lock.

use std::time::SystemTime;

use dashmap::DashMap;

use crate::path::RemotePath;
use crate::server::ServerInfo;

/// One file or directory inside a cached listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheEntry {
    /// Entry name.
    pub name: String,
    /// Size, if the listing reported one.
    pub size: Option<u64>,
    /// Modification time, if the listing reported one.
    pub mtime: Option<SystemTime>,
    /// `true` for directories.
    pub is_dir: bool,
}

impl CacheEntry {
    /// Creates a file entry.
    #[must_use]
    pub fn file(name: impl Into<String>, size: Option<u64>, mtime: Option<SystemTime>) -> Self {
        Self {
            name: name.into(),
            size,
            mtime,
            is_dir: false,
        }
    }

    /// Creates a directory entry.
    #[must_use]
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            mtime: None,
            is_dir: true,
        }
    }
}

/// Result of [`DirectoryCache::lookup_file`].
#[derive(Clone, Debug, Default)]
pub struct FileLookup {
    /// The entry, when one with the requested name exists.
    pub entry: Option<CacheEntry>,
    /// Whether a listing for the directory was cached at all.
    pub dir_did_exist: bool,
    /// Whether the entry name matched with exact case. `false` for a
    /// case-insensitive-only match, which callers must treat as "wrong
    /// file".
    pub matched_case: bool,
}

/// Thread-safe cache of remote directory listings.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    listings: DashMap<(ServerInfo, RemotePath), Vec<CacheEntry>>,
}

impl DirectoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listings: DashMap::new(),
        }
    }

    /// Stores (replacing) the listing of a directory.
    pub fn store_listing(&self, server: &ServerInfo, path: &RemotePath, entries: Vec<CacheEntry>) {
        self.listings
            .insert((server.clone(), path.clone()), entries);
    }

    /// Looks a file up in a cached listing.
    ///
    /// A case-insensitive match is reported with `matched_case == false` and
    /// still carries the entry, mirroring the distinction the overwrite
    /// engine needs.
    #[must_use]
    pub fn lookup_file(&self, server: &ServerInfo, path: &RemotePath, name: &str) -> FileLookup {
        let Some(listing) = self.listings.get(&(server.clone(), path.clone())) else {
            return FileLookup::default();
        };
        let mut lookup = FileLookup {
            dir_did_exist: true,
            ..FileLookup::default()
        };
        for entry in listing.iter() {
            if entry.name == name {
                lookup.entry = Some(entry.clone());
                lookup.matched_case = true;
                return lookup;
            }
            if lookup.entry.is_none() && entry.name.eq_ignore_ascii_case(name) {
                lookup.entry = Some(entry.clone());
            }
        }
        lookup
    }

    /// Updates (or creates) a file entry inside a cached listing.
    ///
    /// Returns `true` when a listing for the directory existed and was
    /// updated; without one there is nothing to update and the caller must
    /// not pretend the cache changed.
    pub fn update_file(
        &self,
        server: &ServerInfo,
        path: &RemotePath,
        name: &str,
        size: Option<u64>,
    ) -> bool {
        let Some(mut listing) = self.listings.get_mut(&(server.clone(), path.clone())) else {
            return false;
        };
        if let Some(entry) = listing.iter_mut().find(|entry| entry.name == name) {
            entry.size = size;
            entry.mtime = Some(SystemTime::now());
        } else {
            listing.push(CacheEntry::file(name, size, Some(SystemTime::now())));
        }
        true
    }

    /// Drops every cached listing for a server.
    pub fn invalidate_server(&self, server: &ServerInfo) {
        self.listings.retain(|(cached, _), _| cached != server);
    }

    /// Drops the cached listing of one directory.
    pub fn invalidate_dir(&self, server: &ServerInfo, path: &RemotePath) {
        self.listings.remove(&(server.clone(), path.clone()));
    }

    /// Number of cached listings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerInfo {
        ServerInfo::new("ftp.example.com", 21).with_user("alice")
    }

    fn dir() -> RemotePath {
        RemotePath::parse("/pub").unwrap()
    }

    #[test]
    fn lookup_distinguishes_missing_dir_from_missing_entry() {
        let cache = DirectoryCache::new();
        let lookup = cache.lookup_file(&server(), &dir(), "a.txt");
        assert!(!lookup.dir_did_exist);
        assert!(lookup.entry.is_none());

        cache.store_listing(&server(), &dir(), vec![]);
        let lookup = cache.lookup_file(&server(), &dir(), "a.txt");
        assert!(lookup.dir_did_exist);
        assert!(lookup.entry.is_none());
    }

    #[test]
    fn exact_case_wins_over_insensitive() {
        let cache = DirectoryCache::new();
        cache.store_listing(
            &server(),
            &dir(),
            vec![
                CacheEntry::file("README", Some(10), None),
                CacheEntry::file("readme", Some(20), None),
            ],
        );
        let lookup = cache.lookup_file(&server(), &dir(), "readme");
        assert!(lookup.matched_case);
        assert_eq!(lookup.entry.unwrap().size, Some(20));
    }

    #[test]
    fn case_insensitive_match_is_flagged() {
        let cache = DirectoryCache::new();
        cache.store_listing(
            &server(),
            &dir(),
            vec![CacheEntry::file("README", Some(10), None)],
        );
        let lookup = cache.lookup_file(&server(), &dir(), "readme");
        assert!(!lookup.matched_case);
        assert_eq!(lookup.entry.unwrap().name, "README");
    }

    #[test]
    fn update_requires_cached_listing() {
        let cache = DirectoryCache::new();
        assert!(!cache.update_file(&server(), &dir(), "new.bin", Some(1)));

        cache.store_listing(&server(), &dir(), vec![]);
        assert!(cache.update_file(&server(), &dir(), "new.bin", Some(1)));
        let lookup = cache.lookup_file(&server(), &dir(), "new.bin");
        assert_eq!(lookup.entry.unwrap().size, Some(1));
    }

    #[test]
    fn invalidation_is_scoped() {
        let cache = DirectoryCache::new();
        let other = ServerInfo::new("other", 21);
        cache.store_listing(&server(), &dir(), vec![]);
        cache.store_listing(&other, &dir(), vec![]);
        cache.invalidate_server(&server());
        assert!(!cache.lookup_file(&server(), &dir(), "x").dir_did_exist);
        assert!(cache.lookup_file(&other, &dir(), "x").dir_did_exist);
    }
}
