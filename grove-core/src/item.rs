//! Items (documents) and files (attachments)

use crate::content::{combine_hashes, ContentSource};
use crate::route::Route;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

/// How a directory was classified during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Backed by exactly one markdown document
    Physical,
    /// No document of its own, but markdown further down
    Virtual,
    /// Leaf directory of attachments only
    FileCollection,
}

impl ItemKind {
    pub fn can_have_children(self) -> bool {
        matches!(self, Self::Physical | Self::Virtual)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Virtual => "virtual",
            Self::FileCollection => "file_collection",
        }
    }
}

/// A filesystem location whose modification should trigger a rescan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub recursive: bool,
}

impl WatchTarget {
    pub fn flat(path: PathBuf) -> Self {
        Self {
            path,
            recursive: false,
        }
    }

    pub fn recursive(path: PathBuf) -> Self {
        Self {
            path,
            recursive: true,
        }
    }
}

/// An attachment belonging to exactly one item
#[derive(Debug, Clone)]
pub struct File {
    route: Route,
    parent: Route,
    content: Arc<dyn ContentSource>,
}

impl File {
    pub fn new(route: Route, parent: Route, content: Arc<dyn ContentSource>) -> Self {
        Self {
            route,
            parent,
            content,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Route of the owning item
    pub fn parent(&self) -> &Route {
        &self.parent
    }

    pub fn content(&self) -> &dyn ContentSource {
        self.content.as_ref()
    }

    pub fn hash(&self) -> String {
        self.content.hash()
    }

    pub fn mime_type(&self) -> String {
        self.content.mime_type()
    }

    pub fn is_image(&self) -> bool {
        self.mime_type().starts_with("image/")
    }
}

/// One document in the index. Items are never mutated after construction;
/// a change produces a new `Item` with the same route.
#[derive(Debug)]
pub struct Item {
    route: Route,
    kind: ItemKind,
    content: Arc<dyn ContentSource>,
    files: Vec<File>,
    directory: PathBuf,
    watch_targets: Vec<WatchTarget>,
    hash: OnceLock<String>,
}

impl Item {
    pub fn new(
        route: Route,
        kind: ItemKind,
        content: Arc<dyn ContentSource>,
        directory: PathBuf,
    ) -> Self {
        Self {
            route,
            kind,
            content,
            files: Vec::new(),
            directory,
            watch_targets: Vec::new(),
            hash: OnceLock::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<File>) -> Self {
        self.files = files;
        self
    }

    pub fn with_watch_targets(mut self, targets: Vec<WatchTarget>) -> Self {
        self.watch_targets = targets;
        self
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn can_have_children(&self) -> bool {
        self.kind.can_have_children()
    }

    pub fn content(&self) -> &dyn ContentSource {
        self.content.as_ref()
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    /// Directory this item was scanned from
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn watch_targets(&self) -> &[WatchTarget] {
        &self.watch_targets
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.content.last_modified().ok()
    }

    /// Change-detection key over the document and all attachments.
    /// Computed once and kept as this item's last-known hash.
    pub fn hash(&self) -> &str {
        self.hash.get_or_init(|| {
            let content = self.content.hash();
            let files: Vec<String> = self.files.iter().map(File::hash).collect();
            combine_hashes(std::iter::once(content.as_str()).chain(files.iter().map(String::as_str)))
        })
    }

    /// First level-one heading of the document, else the directory name
    pub fn title(&self) -> String {
        self.content
            .data()
            .ok()
            .and_then(|bytes| markdown_title(&String::from_utf8_lossy(&bytes)))
            .unwrap_or_else(|| self.fallback_title())
    }

    fn fallback_title(&self) -> String {
        match self.route.name() {
            Some(name) => name.replace('+', " "),
            None => self
                .directory
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Text of the first `#` heading, if any
pub fn markdown_title(source: &str) -> Option<String> {
    let mut in_title = false;
    let mut title = String::new();

    for event in Parser::new(source) {
        match event {
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            }) => {
                in_title = true;
            }
            Event::End(TagEnd::Heading(HeadingLevel::H1)) => {
                let title = title.trim();
                return (!title.is_empty()).then(|| title.to_string());
            }
            Event::Text(text) | Event::Code(text) if in_title => {
                title.push_str(&text);
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{content_hash, GeneratedContent};
    use std::time::UNIX_EPOCH;

    fn generated(route: &str, body: &str) -> Arc<dyn ContentSource> {
        Arc::new(GeneratedContent::new(
            Route::new(route),
            body.to_string(),
            UNIX_EPOCH,
        ))
    }

    #[test]
    fn test_kind_can_have_children() {
        assert!(ItemKind::Physical.can_have_children());
        assert!(ItemKind::Virtual.can_have_children());
        assert!(!ItemKind::FileCollection.can_have_children());
    }

    #[test]
    fn test_markdown_title() {
        assert_eq!(
            markdown_title("Intro text\n\n# The `Real` Title\n\n## Sub\n"),
            Some("The Real Title".to_string())
        );
        assert_eq!(markdown_title("## Only a subheading\n"), None);
        assert_eq!(markdown_title(""), None);
    }

    #[test]
    fn test_title_falls_back_to_route_name() {
        let item = Item::new(
            Route::new("my notes"),
            ItemKind::Virtual,
            generated("my notes", "no heading here"),
            PathBuf::from("/tmp/my notes"),
        );
        assert_eq!(item.title(), "my notes");
    }

    #[test]
    fn test_hash_covers_attachments() {
        let route = Route::new("post");
        let bare = Item::new(
            route.clone(),
            ItemKind::Physical,
            generated("post", "# Post"),
            PathBuf::from("/tmp/post"),
        );
        let with_file = Item::new(
            route.clone(),
            ItemKind::Physical,
            generated("post", "# Post"),
            PathBuf::from("/tmp/post"),
        )
        .with_files(vec![File::new(
            Route::new("post/files/a.png"),
            route,
            generated("post/files/a.png", "png bytes"),
        )]);

        assert_ne!(bare.hash(), with_file.hash());
        assert_eq!(
            with_file.files()[0].hash(),
            content_hash(&Route::new("post/files/a.png"), b"png bytes")
        );
    }

    #[test]
    fn test_file_parent_and_mime() {
        let file = File::new(
            Route::new("post/files/a.png"),
            Route::new("post"),
            generated("post/files/a.png", ""),
        );
        assert_eq!(file.parent().value(), "post");
        assert!(!file.is_image()); // generated content is markdown
    }
}
