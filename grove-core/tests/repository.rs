//! End-to-end behaviour of a repository over a real directory tree

use crossbeam_channel::unbounded;
use grove_core::{ChildOrder, Config, ItemKind, Repository, Route, Update};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.watch.debounce = "200ms".to_string();
    config
}

fn open_sample() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "doc.md", "# Doc\n\nHello.\n");
    write(dir.path(), "sub/doc.md", "# Sub\n");
    let repository = Repository::open(dir.path(), fast_config()).unwrap();
    (dir, repository)
}

#[test]
fn test_initial_index() {
    let (_dir, repository) = open_sample();

    assert_eq!(repository.items().len(), 2);
    let sub = repository.item(&Route::new("sub")).unwrap();
    assert_eq!(sub.kind(), ItemKind::Physical);
    assert_eq!(sub.title(), "Sub");

    let root = repository.item(&Route::root()).unwrap();
    assert!(root.can_have_children());
    assert_eq!(root.title(), "Doc");

    let index = repository.index();
    let children = index.direct_children(&Route::root(), ChildOrder::Route);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].route(), &Route::new("sub"));
    assert_eq!(index.parent(&Route::new("sub")).unwrap().route(), &Route::root());
}

#[test]
fn test_deleted_document_is_reported() {
    let (dir, repository) = open_sample();
    fs::remove_file(dir.path().join("sub/doc.md")).unwrap();

    // an empty directory has nothing left to index
    let update = repository.reindex();
    assert_eq!(update.deleted, vec![Route::new("sub")]);
    assert_eq!(repository.items().len(), 1);
}

#[test]
fn test_document_moved_deeper_turns_item_virtual() {
    let (dir, repository) = open_sample();
    fs::create_dir_all(dir.path().join("sub/part")).unwrap();
    fs::rename(dir.path().join("sub/doc.md"), dir.path().join("sub/part/doc.md")).unwrap();

    let update = repository.reindex();
    assert_eq!(update.new, vec![Route::new("sub/part")]);
    assert_eq!(repository.item(&Route::new("sub")).unwrap().kind(), ItemKind::Virtual);
}

#[test]
fn test_watcher_coalesces_rapid_saves() {
    let (dir, repository) = open_sample();
    let (tx, rx) = unbounded::<Update>();
    repository.subscribe(tx);
    repository.start_watching(&Route::root()).unwrap();

    write(dir.path(), "doc.md", "# Doc\n\nFirst save.\n");
    write(dir.path(), "doc.md", "# Doc\n\nSecond save.\n");

    let update = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(update.modified.contains(&Route::root()));
    assert!(update.new.is_empty() && update.deleted.is_empty());

    // both saves landed inside one quiet period; nothing else follows
    assert!(rx.recv_timeout(Duration::from_millis(800)).is_err());
    assert_eq!(
        repository.item(&Route::root()).unwrap().content().data().unwrap(),
        b"# Doc\n\nSecond save.\n"
    );
}

#[test]
fn test_watcher_picks_up_new_subdirectory() {
    let (dir, repository) = open_sample();
    let (tx, rx) = unbounded::<Update>();
    repository.subscribe(tx);
    repository.start_watching(&Route::root()).unwrap();

    write(dir.path(), "fresh/photo.jpg", "jpg");
    let mut seen_new = false;
    while let Ok(update) = rx.recv_timeout(Duration::from_secs(5)) {
        if update.new.contains(&Route::new("fresh")) {
            seen_new = true;
            break;
        }
    }
    assert!(seen_new);
    assert_eq!(
        repository.item(&Route::new("fresh")).unwrap().kind(),
        ItemKind::FileCollection
    );
}

#[test]
fn test_stopped_watcher_stays_quiet() {
    let (dir, repository) = open_sample();
    let (tx, rx) = unbounded::<Update>();
    repository.subscribe(tx);

    repository.start_watching(&Route::new("sub")).unwrap();
    repository.stop_watching(&Route::new("sub"));
    write(dir.path(), "sub/doc.md", "# Sub, edited\n");

    assert!(rx.recv_timeout(Duration::from_millis(800)).is_err());
    assert_eq!(repository.reindex().modified, vec![Route::new("sub")]);
}

#[test]
fn test_generation_advances_per_cycle() {
    let (dir, repository) = open_sample();
    let start = repository.generation();

    write(dir.path(), "other/doc.md", "# Other\n");
    repository.reindex();
    repository.rescan(&Route::new("other"));

    assert_eq!(repository.generation().value(), start.value() + 2);
}
