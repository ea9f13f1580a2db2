//! State derivation engine.
//!
//! Every function here is a pure fold over a slice of log events. Nothing is
//! cached between calls: the current state is recomputed from the log for each
//! query.
mod feeds;
mod folders;

use std::collections::{BTreeMap, BTreeSet, HashSet};

pub use feeds::{derive_feeds, derive_tags, favorites, normalize_tag, viewed_ids, FAVORITE_TAG};
pub use folders::{
    derive_feed_folders, derive_folders, FolderMove, FolderPath, FolderTree, DEFAULT_FOLDER,
};

use crate::storage::Event;

/// Everything derivable from the subscription log in one pass over it.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    /// Present feeds in first-insertion order.
    pub feeds: Vec<String>,
    pub tree: FolderTree,
    /// Resolved memberships of every present feed. Never empty per feed.
    pub feed_folders: BTreeMap<String, BTreeSet<FolderPath>>,
    pub tags: BTreeMap<String, BTreeSet<String>>,
    pub viewed: HashSet<String>,
}

impl FeedState {
    pub fn derive(events: &[Event]) -> Self {
        let feeds = derive_feeds(events);
        let tree = derive_folders(events);

        let mut feed_folders = derive_feed_folders(events, &tree.moves, &tree.removed);
        feed_folders.retain(|url, _| feeds.contains(url));
        for url in &feeds {
            feed_folders
                .entry(url.clone())
                .or_insert_with(|| BTreeSet::from([FolderPath::Default]));
        }

        Self {
            feeds,
            feed_folders,
            tags: derive_tags(events),
            viewed: viewed_ids(events),
            tree,
        }
    }

    pub fn contains_feed(&self, url: &str) -> bool {
        self.feeds.iter().any(|f| f == url)
    }

    pub fn folders_of(&self, url: &str) -> Option<&BTreeSet<FolderPath>> {
        self.feed_folders.get(url)
    }

    /// Resolve a raw folder reference through every recorded move.
    pub fn resolve(&self, raw: &str) -> Option<FolderPath> {
        self.tree.resolve(raw)
    }

    /// All folders worth showing: the root, every created folder and every
    /// folder some feed belongs to.
    pub fn folder_list(&self) -> Vec<FolderPath> {
        let mut all: BTreeSet<FolderPath> = self.tree.folders.clone();
        all.insert(FolderPath::Default);
        all.extend(self.feed_folders.values().flatten().cloned());
        all.into_iter().collect()
    }

    /// True when `folder` is the root or appears in [`FeedState::folder_list`].
    pub fn folder_exists(&self, folder: &FolderPath) -> bool {
        folder.is_default()
            || self.tree.folders.contains(folder)
            || self.feed_folders.values().any(|set| set.contains(folder))
    }

    pub fn favorites(&self) -> Vec<String> {
        favorites(&self.tags)
    }

    /// Present feeds with a membership equal to or nested under `folder`.
    pub fn feeds_in_folder(&self, folder: &FolderPath) -> HashSet<String> {
        self.feed_folders
            .iter()
            .filter(|(_, set)| set.iter().any(|f| f.is_within(folder)))
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Tags of present feeds, non-empty, sorted.
    pub fn present_tags(&self) -> BTreeMap<String, Vec<String>> {
        self.tags
            .iter()
            .filter(|(url, set)| !set.is_empty() && self.contains_feed(url))
            .map(|(url, set)| (url.clone(), set.iter().cloned().collect()))
            .collect()
    }
}
