//! Traversal integration tests over tempfile fixtures.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use nix::fcntl::OFlag;
use nix::fcntl::open;
use nix::fcntl::openat;
use nix::sys::resource::Resource;
use nix::sys::resource::getrlimit;
use nix::sys::resource::setrlimit;
use nix::sys::stat::Mode;
use nix::sys::stat::mkdirat;
use tempfile::TempDir;

use vfskit::DirStackEntry;
use vfskit::DirStackSnapshot;
use vfskit::Error;
use vfskit::FileKind;
use vfskit::FsIter;
use vfskit::Interrupt;
use vfskit::statx_path;

fn collect(iter: &mut FsIter) -> Vec<(PathBuf, FileKind)> {
    let mut out = Vec::new();
    while let Some(entry) = iter.next_entry().unwrap() {
        out.push((entry.path(), entry.kind));
    }
    out
}

fn write_file(path: &Path, content: &[u8]) {
    fs::write(path, content).unwrap();
}

#[test]
fn yields_depth_first_and_prunes_symlinks() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir(root.join("a")).unwrap();
    write_file(&root.join("a/x"), b"hello");
    symlink("/etc", root.join("b")).unwrap();
    symlink("/etc/passwd", root.join("a/y")).unwrap();

    let mut iter = FsIter::builder(root).build().unwrap();
    let entries = collect(&mut iter);

    let expected = vec![
        (root.join("a"), FileKind::Directory),
        (root.join("a/x"), FileKind::RegularFile),
    ];
    assert_eq!(entries, expected);

    let stats = iter.stats();
    assert_eq!(stats.cnt, 2);
    assert_eq!(stats.cnt_bytes, 5);
    assert_eq!(stats.current_dir, PathBuf::new());
}

#[test]
fn directories_yield_before_their_children() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("d1/d2")).unwrap();
    write_file(&root.join("d1/f1"), b"1");
    write_file(&root.join("d1/d2/f2"), b"22");
    write_file(&root.join("f0"), b"000");

    let mut iter = FsIter::builder(root).build().unwrap();
    let entries = collect(&mut iter);
    assert_eq!(entries.len(), 5);

    let position =
        |path: PathBuf| entries.iter().position(|(p, _)| *p == path).expect("yielded");
    assert!(position(root.join("d1")) < position(root.join("d1/f1")));
    assert!(position(root.join("d1")) < position(root.join("d1/d2")));
    assert!(position(root.join("d1/d2")) < position(root.join("d1/d2/f2")));
    assert_eq!(iter.stats().cnt_bytes, 6);
}

#[test]
fn entry_fd_supports_statx() {
    let tmp = TempDir::new().unwrap();
    write_file(&tmp.path().join("f"), b"data");
    let mut iter = FsIter::builder(tmp.path()).build().unwrap();
    let entry = iter.next_entry().unwrap().expect("one entry");
    let stat = vfskit::statx_fd(entry.fd, &Interrupt::new()).unwrap();
    assert_eq!(stat.kind(), Some(FileKind::RegularFile));
    assert_eq!(stat.size, Some(4));
    assert_eq!(entry.stat.ino, stat.ino);
}

#[test]
fn skip_prunes_the_yielded_directory() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir(root.join("a")).unwrap();
    write_file(&root.join("a/x"), b"x");
    write_file(&root.join("a/y"), b"y");
    fs::create_dir(root.join("b")).unwrap();
    write_file(&root.join("b/z"), b"z");

    let mut iter = FsIter::builder(root).build().unwrap();
    let mut seen = Vec::new();
    loop {
        let Some(entry) = iter.next_entry().unwrap() else {
            break;
        };
        let path = entry.path();
        let is_a = entry.kind == FileKind::Directory && entry.name == "a";
        drop(entry);
        seen.push(path);
        if is_a {
            iter.skip().unwrap();
        }
    }
    assert!(seen.contains(&root.join("a")));
    assert!(!seen.iter().any(|p| p.starts_with(root.join("a/"))));
    assert!(seen.contains(&root.join("b")));
    assert!(seen.contains(&root.join("b/z")));
}

#[test]
fn skip_outside_a_directory_yield_is_rejected() {
    let tmp = TempDir::new().unwrap();
    write_file(&tmp.path().join("f"), b"f");

    let mut iter = FsIter::builder(tmp.path()).build().unwrap();
    // Nothing yielded yet.
    assert!(matches!(iter.skip(), Err(Error::SkipMisplaced)));
    let entry = iter.next_entry().unwrap().expect("file entry");
    assert_eq!(entry.kind, FileKind::RegularFile);
    drop(entry);
    // Last yield was not a directory.
    assert!(matches!(iter.skip(), Err(Error::SkipMisplaced)));
}

#[test]
fn progress_callback_runs_on_schedule_and_aborts() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    for i in 0..6 {
        write_file(&root.join(format!("f{i}")), b"x");
    }

    let calls = Arc::new(AtomicU64::new(0));
    let counter = calls.clone();
    let mut iter = FsIter::builder(root)
        .progress(2, move |snapshot, stats| {
            assert!(!snapshot.is_empty());
            assert_eq!(stats.cnt % 2, 0);
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .build()
        .unwrap();
    let entries = collect(&mut iter);
    assert_eq!(entries.len(), 6);
    assert_eq!(calls.load(Ordering::Relaxed), 3);

    let mut iter = FsIter::builder(root)
        .progress(1, |_, _| Err("stop".into()))
        .build()
        .unwrap();
    assert!(matches!(iter.next_entry(), Err(Error::Callback(_))));
}

#[test]
fn resume_continues_inside_the_saved_directory() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir(root.join("a")).unwrap();
    for i in 0..3 {
        write_file(&root.join(format!("a/f{i}")), b"x");
    }

    let mut first = FsIter::builder(root).build().unwrap();
    let entry = first.next_entry().unwrap().expect("dir a");
    assert_eq!(entry.kind, FileKind::Directory);
    drop(entry);
    // One file inside `a` has been yielded when the snapshot is taken.
    let entry = first.next_entry().unwrap().expect("file in a");
    assert_eq!(entry.parent, root.join("a"));
    drop(entry);
    let snapshot = first.dir_stack();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.entries()[1].path, root.join("a"));
    drop(first);

    let mut resumed = FsIter::builder(root).resume(snapshot).build().unwrap();
    let entries = collect(&mut resumed);
    // No directory frame is re-yielded for the root or for `a`; everything
    // seen is a file inside `a` (the first file may repeat).
    assert!(!entries.is_empty());
    for (path, kind) in &entries {
        assert_eq!(*kind, FileKind::RegularFile);
        assert_eq!(path.parent(), Some(root.join("a").as_path()));
    }
}

#[test]
fn resume_with_stale_cookie_reports_depth_and_path() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir(root.join("a")).unwrap();

    let root_ino = statx_path(root, &Interrupt::new()).unwrap().ino.unwrap();
    let snapshot = DirStackSnapshot::from_entries(vec![
        DirStackEntry {
            path: root.to_path_buf(),
            ino: root_ino,
        },
        DirStackEntry {
            path: root.join("gone"),
            ino: u64::MAX - 1,
        },
    ]);

    let mut iter = FsIter::builder(root).resume(snapshot).build().unwrap();
    match iter.next_entry() {
        Err(Error::RestoreFailed { depth, path }) => {
            assert_eq!(depth, 0);
            assert_eq!(path, root.to_path_buf());
        }
        other => panic!("expected restore failure, got {other:?}"),
    }
}

#[test]
fn btime_cutoff_filters_new_files() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_file(&root.join("f"), b"x");

    let stat = statx_path(&root.join("f"), &Interrupt::new()).unwrap();
    let Some(btime) = stat.btime else {
        eprintln!("filesystem does not report btime; skipping");
        return;
    };

    let mut iter = FsIter::builder(root)
        .btime_cutoff(btime.secs - 10)
        .build()
        .unwrap();
    assert_eq!(collect(&mut iter).len(), 0);

    let mut iter = FsIter::builder(root)
        .btime_cutoff(btime.secs + 10)
        .build()
        .unwrap();
    assert_eq!(collect(&mut iter).len(), 1);
}

#[test]
fn non_directory_root_is_rejected() {
    let tmp = TempDir::new().unwrap();
    write_file(&tmp.path().join("f"), b"x");
    match FsIter::builder(tmp.path().join("f")).build() {
        Err(Error::NotADirectory { path }) => assert_eq!(path, tmp.path().join("f")),
        other => panic!("expected NotADirectory, got {other:?}"),
    }
}

#[test]
fn relative_path_scopes_the_walk() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("sub/inner")).unwrap();
    write_file(&root.join("sub/inner/f"), b"x");
    write_file(&root.join("outside"), b"x");

    let mut iter = FsIter::builder(root).relative_path("sub").build().unwrap();
    let entries = collect(&mut iter);
    assert_eq!(
        entries,
        vec![
            (root.join("sub/inner"), FileKind::Directory),
            (root.join("sub/inner/f"), FileKind::RegularFile),
        ]
    );
}

#[test]
fn wrong_source_errors_where_statmount_is_available() {
    let tmp = TempDir::new().unwrap();
    match FsIter::builder(tmp.path())
        .source("no-such-source-anywhere")
        .build()
    {
        Err(Error::SourceMismatch { expected, .. }) => {
            assert_eq!(expected, "no-such-source-anywhere");
        }
        // Kernels without statmount (or without a source string for this
        // mount) skip the check.
        Ok(_) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[test]
fn raised_interrupt_without_signal_pressure_is_benign() {
    let tmp = TempDir::new().unwrap();
    write_file(&tmp.path().join("f"), b"x");
    let intr = Interrupt::new();
    let iter = FsIter::builder(tmp.path()).interrupt(intr.clone()).build();
    // The token is only consulted on an EINTR retry, so without signal
    // pressure a raised token must not disturb a normal walk.
    intr.raise();
    let mut iter = iter.unwrap();
    let entries = collect(&mut iter);
    assert_eq!(entries.len(), 1);
}

/// Builds a directory chain `depth` levels deep below `root` with fd
/// chaining (absolute paths would blow PATH_MAX long before 2048).
fn build_chain(root: &Path, depth: usize) {
    let mut fd = open(
        root,
        OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .unwrap();
    for _ in 0..depth {
        mkdirat(&fd, "d", Mode::from_bits_truncate(0o755)).unwrap();
        fd = openat(
            &fd,
            "d",
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .unwrap();
    }
}

/// Frames hold two descriptors each, so a full-depth walk needs roughly
/// twice the frame cap in fds. Returns false when the limit cannot be
/// raised far enough.
fn ensure_fd_headroom(needed: u64) -> bool {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
    if soft >= needed {
        return true;
    }
    if hard < needed {
        return false;
    }
    setrlimit(Resource::RLIMIT_NOFILE, needed, hard).is_ok()
}

#[test]
fn depth_limit_is_2048_frames() {
    if !ensure_fd_headroom(3 * vfskit::DIR_STACK_LIMIT as u64) {
        eprintln!("cannot raise RLIMIT_NOFILE; skipping depth test");
        return;
    }

    // Root frame plus 2047 nested directories fills the stack exactly.
    let tmp = TempDir::new().unwrap();
    build_chain(tmp.path(), vfskit::DIR_STACK_LIMIT - 1);
    let mut iter = FsIter::builder(tmp.path()).build().unwrap();
    let mut yielded = 0u64;
    while let Some(entry) = iter.next_entry().unwrap() {
        assert_eq!(entry.kind, FileKind::Directory);
        yielded += 1;
    }
    assert_eq!(yielded, vfskit::DIR_STACK_LIMIT as u64 - 1);

    // One level deeper trips the cap, naming the directory that did not fit.
    let tmp = TempDir::new().unwrap();
    build_chain(tmp.path(), vfskit::DIR_STACK_LIMIT);
    let mut iter = FsIter::builder(tmp.path()).build().unwrap();
    loop {
        match iter.next_entry() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("expected depth error"),
            Err(Error::DepthExceeded { path }) => {
                assert!(path.ends_with("d"));
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
