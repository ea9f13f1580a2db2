//! Folder tree derivation.
//!
//! Folders are never stored as records. The tree is whatever `add_folder`,
//! `move_folder` and `remove_folder` events leave behind when replayed in log
//! order, and every folder reference anywhere in the log is interpreted through
//! the ordered list of moves.
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Serialize, Serializer};

use crate::storage::Event;

/// Name of the root folder. It always exists and cannot be moved or removed.
pub const DEFAULT_FOLDER: &str = "Default";

/// A canonical `/`-delimited folder path.
///
/// The root folder is its own variant, so "no folder given" (an absent or
/// empty field, represented by `None` at call sites) can never be confused
/// with a real path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FolderPath {
    Default,
    Named(String),
}

impl FolderPath {
    /// Parse a raw folder field. Leading, trailing and repeated `/` are
    /// dropped, so `"/A//B/"` is `A/B`. Nothing left yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let segments: Vec<&str> = raw
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(Self::from_canonical(&segments.join("/")))
        }
    }

    /// Parse a raw folder field, mapping "no folder" to the root folder.
    pub fn parse_or_default(raw: &str) -> Self {
        Self::parse(raw).unwrap_or(FolderPath::Default)
    }

    /// Build the path for a folder called `name` under `parent`.
    pub fn join(parent: Option<&FolderPath>, name: &str) -> Option<Self> {
        let name = Self::parse(name)?;
        match parent {
            Some(parent) => Self::parse(&format!("{}/{}", parent.as_str(), name.as_str())),
            None => Some(name),
        }
    }

    fn from_canonical(path: &str) -> Self {
        if path == DEFAULT_FOLDER {
            FolderPath::Default
        } else {
            FolderPath::Named(path.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FolderPath::Default => DEFAULT_FOLDER,
            FolderPath::Named(path) => path,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, FolderPath::Default)
    }

    /// Last path segment.
    pub fn leaf(&self) -> &str {
        let path = self.as_str();
        path.rsplit_once('/').map_or(path, |(_, leaf)| leaf)
    }

    /// True when `self` is `ancestor` or nested anywhere below it.
    pub fn is_within(&self, ancestor: &FolderPath) -> bool {
        let (path, prefix) = (self.as_str(), ancestor.as_str());
        path == prefix
            || (path.len() > prefix.len()
                && path.starts_with(prefix)
                && path.as_bytes()[prefix.len()] == b'/')
    }

    /// Re-root `self` from `from` onto `to`. Callers check `is_within(from)`.
    fn rebase(&self, from: &FolderPath, to: &FolderPath) -> FolderPath {
        let rest = &self.as_str()[from.as_str().len()..];
        Self::from_canonical(&format!("{}{}", to.as_str(), rest))
    }

    /// Rewrite a possibly stale reference through every move, oldest first.
    ///
    /// Each move either replaces the whole path or just the matching prefix,
    /// and later moves see the result of earlier ones.
    pub fn resolve(&self, moves: &[FolderMove]) -> FolderPath {
        moves.iter().fold(self.clone(), |current, mv| {
            if current.is_within(&mv.from) {
                current.rebase(&mv.from, &mv.to)
            } else {
                current
            }
        })
    }
}

impl Ord for FolderPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for FolderPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FolderPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One applied `move_folder`: every reference to `from` (or below it) now
/// means `to` (or the same relative path below it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMove {
    pub from: FolderPath,
    pub to: FolderPath,
}

/// The folder state left by replaying folder events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderTree {
    /// Explicitly created folders, at their current paths.
    pub folders: BTreeSet<FolderPath>,
    /// Every applied move, in log order.
    pub moves: Vec<FolderMove>,
    /// Removed subtrees not revived by a later add or move.
    pub removed: BTreeSet<FolderPath>,
}

impl FolderTree {
    /// Resolve a raw folder field through every move. Empty yields `None`.
    pub fn resolve(&self, raw: &str) -> Option<FolderPath> {
        FolderPath::parse(raw).map(|path| path.resolve(&self.moves))
    }

    /// True when `path` lies inside a removed subtree.
    pub fn is_removed(&self, path: &FolderPath) -> bool {
        self.removed.iter().any(|r| path.is_within(r))
    }
}

/// Forget removal marks that `path` revives: the path itself, anything below
/// it, and any ancestor of it.
fn clear_removed_marks(removed: &mut BTreeSet<FolderPath>, path: &FolderPath) {
    removed.retain(|r| !(r.is_within(path) || path.is_within(r)));
}

/// Replay folder events into a [`FolderTree`].
pub fn derive_folders(events: &[Event]) -> FolderTree {
    let mut tree = FolderTree::default();

    for event in events {
        match event {
            Event::AddFolder { folder } => {
                let path = FolderPath::parse_or_default(folder).resolve(&tree.moves);
                clear_removed_marks(&mut tree.removed, &path);
                tree.folders.insert(path);
            }
            Event::MoveFolder { folder, parent } => {
                let Some(old) = tree.resolve(folder) else {
                    continue;
                };
                if old.is_default() {
                    continue;
                }
                let parent = tree.resolve(parent);
                if parent.as_ref().is_some_and(|p| p.is_within(&old)) {
                    // A folder cannot move into its own subtree.
                    continue;
                }
                let Some(new_path) = FolderPath::join(parent.as_ref(), old.leaf()) else {
                    continue;
                };
                if new_path == old {
                    continue;
                }

                tree.folders = std::mem::take(&mut tree.folders)
                    .into_iter()
                    .map(|f| if f.is_within(&old) { f.rebase(&old, &new_path) } else { f })
                    .collect();
                tree.folders.insert(new_path.clone());
                clear_removed_marks(&mut tree.removed, &new_path);
                tree.moves.push(FolderMove {
                    from: old,
                    to: new_path,
                });
            }
            Event::RemoveFolder { folder } => {
                let Some(target) = tree.resolve(folder) else {
                    continue;
                };
                if target.is_default() {
                    continue;
                }
                tree.folders.retain(|f| !f.is_within(&target));
                tree.removed.insert(target);
            }
            _ => {}
        }
    }

    tree
}

/// Replay feed membership events into feed URL → folder set.
///
/// `add_feed` adds a membership, `move_feed` replaces all memberships with one,
/// `remove_feed` forgets the feed and `remove_folder` strips memberships inside
/// the removed subtree. The surviving memberships are resolved through `moves`,
/// filtered against `removed`, and an empty set becomes the root folder.
pub fn derive_feed_folders(
    events: &[Event],
    moves: &[FolderMove],
    removed: &BTreeSet<FolderPath>,
) -> BTreeMap<String, BTreeSet<FolderPath>> {
    let mut memberships: BTreeMap<String, BTreeSet<FolderPath>> = BTreeMap::new();

    for event in events {
        match event {
            Event::AddFeed { url, folder } if !url.is_empty() => {
                memberships
                    .entry(url.clone())
                    .or_default()
                    .insert(FolderPath::parse_or_default(folder));
            }
            Event::MoveFeed { url, folder } if !url.is_empty() => {
                memberships.insert(
                    url.clone(),
                    BTreeSet::from([FolderPath::parse_or_default(folder)]),
                );
            }
            Event::RemoveFeed { url } if !url.is_empty() => {
                memberships.remove(url);
            }
            Event::RemoveFolder { folder } => {
                let Some(target) = FolderPath::parse(folder).map(|f| f.resolve(moves)) else {
                    continue;
                };
                if target.is_default() {
                    continue;
                }
                for names in memberships.values_mut() {
                    names.retain(|name| !name.resolve(moves).is_within(&target));
                }
            }
            _ => {}
        }
    }

    let is_removed = |path: &FolderPath| removed.iter().any(|r| path.is_within(r));
    memberships
        .into_iter()
        .map(|(url, names)| {
            let mut resolved: BTreeSet<FolderPath> = names
                .iter()
                .map(|name| name.resolve(moves))
                .filter(|name| !is_removed(name))
                .collect();
            if resolved.is_empty() {
                resolved.insert(FolderPath::Default);
            }
            (url, resolved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn path(p: &str) -> FolderPath {
        FolderPath::parse(p).unwrap()
    }

    fn mv(from: &str, to: &str) -> FolderMove {
        FolderMove {
            from: path(from),
            to: path(to),
        }
    }

    fn add_folder(f: &str) -> Event {
        Event::AddFolder { folder: f.into() }
    }

    fn move_folder(f: &str, parent: &str) -> Event {
        Event::MoveFolder {
            folder: f.into(),
            parent: parent.into(),
        }
    }

    fn remove_folder(f: &str) -> Event {
        Event::RemoveFolder { folder: f.into() }
    }

    fn add_feed(url: &str, folder: &str) -> Event {
        Event::AddFeed {
            url: url.into(),
            folder: folder.into(),
        }
    }

    fn set(paths: &[&str]) -> BTreeSet<FolderPath> {
        paths.iter().map(|p| path(p)).collect()
    }

    #[test]
    fn test_parse_default_sentinel() {
        assert_eq!(FolderPath::parse(""), None);
        assert_eq!(FolderPath::parse("   "), None);
        assert_eq!(FolderPath::parse("Default"), Some(FolderPath::Default));
        assert_eq!(FolderPath::parse_or_default(""), FolderPath::Default);
        assert_eq!(path(" Tech ").as_str(), "Tech");
    }

    #[test]
    fn test_parse_collapses_stray_slashes() {
        assert_eq!(path("A/").as_str(), "A");
        assert_eq!(path("/A").as_str(), "A");
        assert_eq!(path("A//B").as_str(), "A/B");
        assert_eq!(path("/Work/ Tech /").as_str(), "Work/Tech");
        assert_eq!(FolderPath::parse("//"), None);
        assert_eq!(path("A/").leaf(), "A");
        assert_eq!(FolderPath::join(Some(&path("Work")), "/Tech/"), Some(path("Work/Tech")));
        assert_eq!(FolderPath::join(None, "/"), None);
    }

    #[test]
    fn test_is_within_respects_segment_boundaries() {
        assert!(path("A/B").is_within(&path("A")));
        assert!(path("A").is_within(&path("A")));
        assert!(!path("AB").is_within(&path("A")));
        assert!(!path("A").is_within(&path("A/B")));
    }

    #[test]
    fn test_leaf() {
        assert_eq!(path("Work/Tech/Rust").leaf(), "Rust");
        assert_eq!(path("Tech").leaf(), "Tech");
    }

    #[test]
    fn test_resolve_wholesale_and_prefix() {
        let moves = vec![mv("Tech", "Work/Tech")];
        assert_eq!(path("Tech").resolve(&moves), path("Work/Tech"));
        assert_eq!(path("Tech/Rust").resolve(&moves), path("Work/Tech/Rust"));
        assert_eq!(path("Technology").resolve(&moves), path("Technology"));
    }

    #[test]
    fn test_resolve_composes_moves() {
        // A/B moved under C, then C moved under D.
        let moves = vec![mv("A/B", "C/B"), mv("C", "D/C")];
        assert_eq!(path("A/B").resolve(&moves), path("D/C/B"));
    }

    #[test]
    fn test_add_then_move_folder() {
        let tree = derive_folders(&[add_folder("Tech"), move_folder("Tech", "Work")]);
        assert_eq!(tree.folders, set(&["Work/Tech"]));
        assert_eq!(tree.moves, vec![mv("Tech", "Work/Tech")]);
    }

    #[test]
    fn test_move_rewrites_descendants() {
        let tree = derive_folders(&[
            add_folder("Tech"),
            add_folder("Tech/Rust"),
            move_folder("Tech", "Work"),
        ]);
        assert_eq!(tree.folders, set(&["Work/Tech", "Work/Tech/Rust"]));
    }

    #[test]
    fn test_stale_reference_after_move_resolves() {
        // The second add uses the old name and lands under the new location.
        let tree = derive_folders(&[
            add_folder("Tech"),
            move_folder("Tech", "Work"),
            add_folder("Tech/Rust"),
        ]);
        assert_eq!(tree.folders, set(&["Work/Tech", "Work/Tech/Rust"]));
    }

    #[test]
    fn test_move_to_top_level() {
        let tree = derive_folders(&[add_folder("Work/Tech"), move_folder("Work/Tech", "")]);
        assert_eq!(tree.folders, set(&["Tech"]));
        assert_eq!(tree.moves, vec![mv("Work/Tech", "Tech")]);
    }

    #[test]
    fn test_default_folder_cannot_move_or_be_removed() {
        let tree = derive_folders(&[
            move_folder("Default", "Work"),
            remove_folder("Default"),
            move_folder("", "Work"),
        ]);
        assert!(tree.moves.is_empty());
        assert!(tree.removed.is_empty());
    }

    #[test]
    fn test_move_into_own_subtree_is_noop() {
        let tree = derive_folders(&[
            add_folder("A"),
            add_folder("A/B"),
            move_folder("A", "A/B"),
        ]);
        assert!(tree.moves.is_empty());
        assert_eq!(tree.folders, set(&["A", "A/B"]));
    }

    #[test]
    fn test_move_to_same_place_is_noop() {
        let tree = derive_folders(&[add_folder("Work/Tech"), move_folder("Work/Tech", "Work")]);
        assert!(tree.moves.is_empty());
    }

    #[test]
    fn test_remove_purges_subtree() {
        let tree = derive_folders(&[
            add_folder("X"),
            add_folder("X/Y"),
            add_folder("XY"),
            remove_folder("X"),
        ]);
        assert_eq!(tree.folders, set(&["XY"]));
        assert_eq!(tree.removed, set(&["X"]));
    }

    #[test]
    fn test_add_revives_removed() {
        let tree = derive_folders(&[add_folder("X"), remove_folder("X"), add_folder("X/Y")]);
        assert!(tree.removed.is_empty());
        assert_eq!(tree.folders, set(&["X/Y"]));
    }

    #[test]
    fn test_remove_through_stale_name() {
        let tree = derive_folders(&[
            add_folder("Tech"),
            move_folder("Tech", "Work"),
            remove_folder("Tech"),
        ]);
        assert!(tree.folders.is_empty());
        assert_eq!(tree.removed, set(&["Work/Tech"]));
    }

    #[test]
    fn test_feed_in_two_folders() {
        let events = vec![add_feed("A", ""), add_feed("A", "Tech")];
        let tree = derive_folders(&events);
        let folders = derive_feed_folders(&events, &tree.moves, &tree.removed);
        assert_eq!(folders["A"], BTreeSet::from([FolderPath::Default, path("Tech")]));
    }

    #[test]
    fn test_move_feed_replaces_memberships() {
        let events = vec![
            add_feed("A", "One"),
            add_feed("A", "Two"),
            Event::MoveFeed {
                url: "A".into(),
                folder: "Three".into(),
            },
        ];
        let folders = derive_feed_folders(&events, &[], &BTreeSet::new());
        assert_eq!(folders["A"], set(&["Three"]));
    }

    #[test]
    fn test_memberships_follow_folder_moves() {
        let events = vec![
            add_feed("A", "Tech/Rust"),
            add_folder("Tech"),
            move_folder("Tech", "Work"),
        ];
        let tree = derive_folders(&events);
        let folders = derive_feed_folders(&events, &tree.moves, &tree.removed);
        assert_eq!(folders["A"], set(&["Work/Tech/Rust"]));
    }

    #[test]
    fn test_remove_folder_falls_back_to_default() {
        let events = vec![
            add_feed("A", "X/Y"),
            add_feed("B", "X"),
            add_feed("B", "Keep"),
            remove_folder("X"),
        ];
        let tree = derive_folders(&events);
        let folders = derive_feed_folders(&events, &tree.moves, &tree.removed);
        assert_eq!(folders["A"], BTreeSet::from([FolderPath::Default]));
        assert_eq!(folders["B"], set(&["Keep"]));
    }

    #[test]
    fn test_revived_folder_does_not_restore_old_memberships() {
        let events = vec![
            add_feed("A", "X"),
            remove_folder("X"),
            add_folder("X"),
            add_feed("B", "X"),
        ];
        let tree = derive_folders(&events);
        let folders = derive_feed_folders(&events, &tree.moves, &tree.removed);
        assert_eq!(folders["A"], BTreeSet::from([FolderPath::Default]));
        assert_eq!(folders["B"], set(&["X"]));
    }

    #[test]
    fn test_remove_feed_forgets_memberships() {
        let events = vec![
            add_feed("A", "X"),
            Event::RemoveFeed { url: "A".into() },
        ];
        assert!(derive_feed_folders(&events, &[], &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_events_with_missing_fields_are_noops() {
        let events = vec![
            add_feed("", "X"),
            add_folder(""),
            move_folder("", ""),
            remove_folder(""),
        ];
        let tree = derive_folders(&events);
        // An empty add_folder names the root folder.
        assert_eq!(tree.folders, BTreeSet::from([FolderPath::Default]));
        assert!(tree.moves.is_empty());
        assert!(derive_feed_folders(&events, &tree.moves, &tree.removed).is_empty());
    }
}
