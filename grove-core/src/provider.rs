//! Filesystem item provider: classifies directories into items and files
//!
//! A directory becomes exactly one item, decided in priority order:
//! 1. exactly one markdown document directly inside it: `Physical`
//! 2. markdown somewhere in a subdirectory up to `virtual_probe_depth`
//!    levels down: `Virtual`
//! 3. otherwise: `FileCollection`, whose files are all attachments
//!
//! Reserved folders (meta and files) and dot-directories never become items,
//! and neither does a directory below the root with nothing in it.

use crate::config::ScanConfig;
use crate::content::{ContentSource, FileContent, GeneratedContent};
use crate::index::Index;
use crate::item::{File, Item, ItemKind, WatchTarget};
use crate::route::Route;
use crate::GroveError;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Scans a repository root on the local filesystem
#[derive(Debug, Clone)]
pub struct FilesystemProvider {
    root: PathBuf,
    config: ScanConfig,
}

/// Direct entries of one directory, split by type and sorted by name
struct DirListing {
    documents: Vec<PathBuf>,
    subdirectories: Vec<PathBuf>,
}

impl FilesystemProvider {
    pub fn new(root: PathBuf, config: ScanConfig) -> Self {
        Self { root, config }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Classify `dir` and build its item (without descendants)
    pub fn item_from_directory(&self, dir: &Path) -> crate::Result<Item> {
        if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
            if self.config.is_reserved(name) {
                return Err(GroveError::Classification {
                    path: dir.to_path_buf(),
                    reason: format!("'{name}' is a reserved folder name"),
                });
            }
        }
        if !dir.is_dir() {
            return Err(GroveError::Classification {
                path: dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let route = Route::from_directory(&self.root, dir)?;
        let listing = self.list(dir)?;
        let files_dir = dir.join(&self.config.files_folder);

        if let [document] = listing.documents.as_slice() {
            let content: Arc<dyn ContentSource> =
                Arc::new(FileContent::new(route.clone(), document.clone()));
            let mut targets = vec![
                WatchTarget::flat(document.clone()),
                WatchTarget::flat(dir.to_path_buf()),
            ];
            if files_dir.is_dir() {
                targets.push(WatchTarget::recursive(files_dir.clone()));
            }
            let files = self.files_under(&route, &files_dir);
            return Ok(Item::new(route, ItemKind::Physical, content, dir.to_path_buf())
                .with_files(files)
                .with_watch_targets(targets));
        }

        if self.has_markdown_descendant(dir) {
            let body = format!("# {}\n", self.display_name(dir));
            let content: Arc<dyn ContentSource> =
                Arc::new(GeneratedContent::new(route.clone(), body, dir_mtime(dir)));
            let mut targets = vec![WatchTarget::flat(dir.to_path_buf())];
            if files_dir.is_dir() {
                targets.push(WatchTarget::recursive(files_dir.clone()));
            }
            let files = self.files_under(&route, &files_dir);
            return Ok(Item::new(route, ItemKind::Virtual, content, dir.to_path_buf())
                .with_files(files)
                .with_watch_targets(targets));
        }

        let files = self.files_under(&route, dir);
        if files.is_empty() && dir != self.root {
            return Err(GroveError::Classification {
                path: dir.to_path_buf(),
                reason: "nothing to index".to_string(),
            });
        }
        let body = file_listing(&self.display_name(dir), &files);
        let content: Arc<dyn ContentSource> =
            Arc::new(GeneratedContent::new(route.clone(), body, dir_mtime(dir)));
        Ok(
            Item::new(route, ItemKind::FileCollection, content, dir.to_path_buf())
                .with_files(files)
                .with_watch_targets(vec![WatchTarget::recursive(dir.to_path_buf())]),
        )
    }

    /// Item for `dir` followed by its descendants, at most `max_depth`
    /// levels below `dir` (`None` for no limit), in pre-order.
    ///
    /// Only a failure on `dir` itself is returned; descendants that cannot
    /// be read or classified are logged and skipped.
    pub fn scan(&self, dir: &Path, max_depth: Option<usize>) -> crate::Result<Vec<Item>> {
        let item = self.item_from_directory(dir)?;
        let mut items = Vec::new();
        let descend = item.can_have_children();
        items.push(item);
        if descend {
            self.scan_children(dir, 1, max_depth, &mut items);
        }
        debug!(dir = %dir.display(), items = items.len(), "scanned directory");
        Ok(items)
    }

    /// Scan `dir` into a fresh index
    pub fn build_index(&self, dir: &Path, max_depth: Option<usize>) -> crate::Result<Index> {
        Index::from_items(self.scan(dir, max_depth)?)
    }

    fn scan_children(&self, dir: &Path, depth: usize, max_depth: Option<usize>, out: &mut Vec<Item>) {
        if max_depth.is_some_and(|max| depth > max) {
            return;
        }

        let subdirectories = match self.list(dir) {
            Ok(listing) => listing.subdirectories,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                return;
            }
        };

        // Sibling subtrees are independent; scan them in parallel and keep
        // name order when stitching the results together.
        let subtrees: Vec<Vec<Item>> = subdirectories
            .par_iter()
            .map(|sub| {
                let mut subtree = Vec::new();
                match self.item_from_directory(sub) {
                    Ok(child) => {
                        let descend = child.can_have_children();
                        subtree.push(child);
                        if descend {
                            self.scan_children(sub, depth + 1, max_depth, &mut subtree);
                        }
                    }
                    Err(e @ GroveError::Classification { .. }) => {
                        debug!(dir = %sub.display(), error = %e, "not an item");
                    }
                    Err(e) => {
                        warn!(dir = %sub.display(), error = %e, "skipping subtree");
                    }
                }
                subtree
            })
            .collect();

        out.extend(subtrees.into_iter().flatten());
    }

    fn list(&self, dir: &Path) -> crate::Result<DirListing> {
        let mut documents = Vec::new();
        let mut subdirectories = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();
            // Symlinked directories are not descended into, same as the walker
            if entry.file_type()?.is_dir() {
                if !self.config.is_excluded(&name) {
                    subdirectories.push(path);
                }
            } else if !name.starts_with('.') && self.config.is_markdown(&path) {
                documents.push(path);
            }
        }

        documents.sort();
        subdirectories.sort();
        Ok(DirListing {
            documents,
            subdirectories,
        })
    }

    /// Whether some non-excluded subdirectory, up to the probe depth, holds
    /// exactly one markdown document and so is a document item itself
    fn has_markdown_descendant(&self, dir: &Path) -> bool {
        let config = self.config.clone();
        let walker = self
            .walker(dir)
            .max_depth(Some(self.config.virtual_probe_depth + 1))
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_some_and(|t| t.is_dir())
                    || !config.is_excluded(&entry.file_name().to_string_lossy())
            })
            .build();

        let mut documents: HashMap<PathBuf, usize> = HashMap::new();
        for entry in walker.filter_map(Result::ok) {
            if entry.depth() < 2
                || !entry.file_type().is_some_and(|t| t.is_file())
                || !self.config.is_markdown(entry.path())
            {
                continue;
            }
            if let Some(parent) = entry.path().parent() {
                *documents.entry(parent.to_path_buf()).or_default() += 1;
            }
        }
        documents.values().any(|&count| count == 1)
    }

    /// Every file below `dir`, as attachments of the item at `owner`
    fn files_under(&self, owner: &Route, dir: &Path) -> Vec<File> {
        if !dir.is_dir() {
            return Vec::new();
        }

        let mut files = Vec::new();
        for entry in self.walker(dir).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable attachment");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.into_path();
            match Route::from_relative_path(&self.root, &path) {
                Ok(route) => {
                    let content = Arc::new(FileContent::new(route.clone(), path));
                    files.push(File::new(route, owner.clone(), content));
                }
                Err(e) => warn!(error = %e, "skipping attachment outside root"),
            }
        }
        files
    }

    /// Plain recursive walk: dot-entries hidden, ignore files not consulted
    fn walker(&self, dir: &Path) -> WalkBuilder {
        let mut builder = WalkBuilder::new(dir);
        builder
            .hidden(true)
            .parents(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        builder
    }

    fn display_name(&self, dir: &Path) -> String {
        dir.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.display().to_string())
    }
}

/// Markdown body listing a file collection's attachments
fn file_listing(title: &str, files: &[File]) -> String {
    let mut body = format!("# {title}\n\n");
    for file in files {
        let name = file.route().name().unwrap_or_default();
        // writing into a String cannot fail
        let _ = writeln!(body, "- [{}](/{})", name.replace('+', " "), file.route().value());
    }
    body
}

fn dir_mtime(dir: &Path) -> SystemTime {
    fs::metadata(dir)
        .and_then(|m| m.modified())
        .unwrap_or(UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn provider(dir: &TempDir) -> FilesystemProvider {
        FilesystemProvider::new(dir.path().to_path_buf(), ScanConfig::default())
    }

    #[test]
    fn test_single_markdown_is_physical() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "post/post.md", "# Post\n");
        write(dir.path(), "post/files/image.png", "png");
        write(dir.path(), "post/files/nested/data.csv", "a,b");

        let item = provider(&dir).item_from_directory(&dir.path().join("post")).unwrap();
        assert_eq!(item.kind(), ItemKind::Physical);
        assert_eq!(item.route().value(), "post");
        assert_eq!(item.title(), "Post");

        let routes: Vec<&str> = item.files().iter().map(|f| f.route().value()).collect();
        assert_eq!(routes, vec!["post/files/image.png", "post/files/nested/data.csv"]);
        assert!(item.files().iter().all(|f| f.parent().value() == "post"));
        assert!(item.files()[0].is_image());

        assert_eq!(item.watch_targets().len(), 3);
        assert!(item.watch_targets()[2].recursive);
    }

    #[test]
    fn test_markdown_below_makes_virtual() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "blog/2024/01/entry/entry.md", "# Entry\n");

        let provider = provider(&dir);
        let blog = provider.item_from_directory(&dir.path().join("blog")).unwrap();
        assert_eq!(blog.kind(), ItemKind::Virtual);
        assert!(blog.can_have_children());
        assert_eq!(blog.title(), "blog");
    }

    #[test]
    fn test_markdown_beyond_probe_depth_is_file_collection() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/b/c/d/e/doc.md", "# Deep\n");

        let item = provider(&dir).item_from_directory(&dir.path().join("a")).unwrap();
        assert_eq!(item.kind(), ItemKind::FileCollection);
        assert!(!item.can_have_children());
        assert_eq!(item.files().len(), 1);
    }

    #[test]
    fn test_attachments_only_is_file_collection() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "photos/one.jpg", "1");
        write(dir.path(), "photos/two.jpg", "2");
        write(dir.path(), "photos/.hidden", "x");

        let item = provider(&dir).item_from_directory(&dir.path().join("photos")).unwrap();
        assert_eq!(item.kind(), ItemKind::FileCollection);
        assert_eq!(item.files().len(), 2);
        let body = String::from_utf8(item.content().data().unwrap()).unwrap();
        assert!(body.starts_with("# photos\n"));
        assert!(body.contains("- [one.jpg](/photos/one.jpg)"));
    }

    #[test]
    fn test_markdown_in_reserved_folders_does_not_count() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "x/files/readme.md", "# not an item\n");
        write(dir.path(), "x/.grove/notes.md", "# meta\n");

        let item = provider(&dir).item_from_directory(&dir.path().join("x")).unwrap();
        assert_eq!(item.kind(), ItemKind::FileCollection);
    }

    #[test]
    fn test_two_markdown_files_are_not_physical() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pair/a.md", "# A\n");
        write(dir.path(), "pair/b.md", "# B\n");

        let item = provider(&dir).item_from_directory(&dir.path().join("pair")).unwrap();
        assert_eq!(item.kind(), ItemKind::FileCollection);
    }

    #[test]
    fn test_empty_directory_is_not_an_item() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("empty/nested")).unwrap();
        write(dir.path(), "doc.md", "# Doc\n");

        let provider = provider(&dir);
        let err = provider.item_from_directory(&dir.path().join("empty"));
        assert!(matches!(err, Err(GroveError::Classification { .. })));

        let routes: Vec<String> = provider
            .scan(dir.path(), None)
            .unwrap()
            .iter()
            .map(|i| i.route().value().to_string())
            .collect();
        assert_eq!(routes, vec![String::new()]);
    }

    #[test]
    fn test_empty_root_is_still_an_item() {
        let dir = TempDir::new().unwrap();
        let item = provider(&dir).item_from_directory(dir.path()).unwrap();
        assert_eq!(item.kind(), ItemKind::FileCollection);
        assert!(item.route().is_root());
    }

    #[test]
    fn test_only_multi_document_folders_below_is_not_virtual() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "outer/pair/a.md", "# A\n");
        write(dir.path(), "outer/pair/b.md", "# B\n");

        let provider = provider(&dir);
        let outer = provider.item_from_directory(&dir.path().join("outer")).unwrap();
        assert_eq!(outer.kind(), ItemKind::FileCollection);

        write(dir.path(), "outer/pair/single/doc.md", "# Single\n");
        let outer = provider.item_from_directory(&dir.path().join("outer")).unwrap();
        assert_eq!(outer.kind(), ItemKind::Virtual);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_are_not_followed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "doc.md", "# Doc\n");
        write(dir.path(), "sub/doc.md", "# Sub\n");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("sub/back")).unwrap();

        let items = provider(&dir).scan(dir.path(), None).unwrap();
        let routes: Vec<&str> = items.iter().map(|i| i.route().value()).collect();
        assert_eq!(routes, vec!["", "sub"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subtree_does_not_stop_siblings() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "doc.md", "# Doc\n");
        write(dir.path(), "alpha/doc.md", "# Alpha\n");
        write(dir.path(), "locked/doc.md", "# Locked\n");
        write(dir.path(), "omega/doc.md", "# Omega\n");

        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // privileged user: permissions are not enforced
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let provider = provider(&dir);
        let err = provider.item_from_directory(&locked);
        let items = provider.scan(dir.path(), None);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(err, Err(GroveError::Io(_))));
        let routes: Vec<String> = items
            .unwrap()
            .iter()
            .map(|i| i.route().value().to_string())
            .collect();
        assert_eq!(routes, vec!["", "alpha", "omega"]);
    }

    #[test]
    fn test_reserved_directory_cannot_be_classified() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "files/x.txt", "x");

        let err = provider(&dir).item_from_directory(&dir.path().join("files"));
        assert!(matches!(err, Err(GroveError::Classification { .. })));
    }

    #[test]
    fn test_scan_builds_tree_and_skips_reserved() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "doc.md", "# Doc\n");
        write(dir.path(), "sub/doc.md", "# Sub\n");
        write(dir.path(), "sub/child/child.md", "# Child\n");
        write(dir.path(), "files/root.txt", "attachment");
        write(dir.path(), ".git/HEAD", "ref");
        write(dir.path(), "gallery/pic.png", "png");

        let items = provider(&dir).scan(dir.path(), None).unwrap();
        let routes: Vec<&str> = items.iter().map(|i| i.route().value()).collect();
        assert_eq!(routes, vec!["", "gallery", "sub", "sub/child"]);
        assert_eq!(items[0].kind(), ItemKind::Physical);
        assert_eq!(items[0].files().len(), 1);
        assert_eq!(items[1].kind(), ItemKind::FileCollection);
    }

    #[test]
    fn test_scan_respects_max_depth() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "doc.md", "# Root\n");
        write(dir.path(), "a/doc.md", "# A\n");
        write(dir.path(), "a/b/doc.md", "# B\n");
        write(dir.path(), "a/b/c/doc.md", "# C\n");

        let provider = provider(&dir);
        assert_eq!(provider.scan(dir.path(), Some(0)).unwrap().len(), 1);
        assert_eq!(provider.scan(dir.path(), Some(2)).unwrap().len(), 3);
        assert_eq!(provider.scan(dir.path(), None).unwrap().len(), 4);

        let from_a = provider.scan(&dir.path().join("a"), Some(1)).unwrap();
        let routes: Vec<&str> = from_a.iter().map(|i| i.route().value()).collect();
        assert_eq!(routes, vec!["a", "a/b"]);
    }

    #[test]
    fn test_build_index() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "doc.md", "# Doc\n");
        write(dir.path(), "sub/doc.md", "# Sub\n");

        let index = provider(&dir).build_index(dir.path(), None).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.get(&Route::new("sub")).is_some());
        assert!(index.get(&Route::root()).unwrap().can_have_children());
    }
}
