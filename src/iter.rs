//! Mount-confined depth-first filesystem traversal.
//!
//! [`FsIter`] walks one mounted filesystem without ever crossing a mount
//! boundary or resolving a symlink: every child open goes through `openat2`
//! with `RESOLVE_NO_XDEV | RESOLVE_NO_SYMLINKS`, and anything the kernel
//! refuses on those grounds is silently pruned. The walk is resumable: a
//! [`DirStackSnapshot`] taken mid-traversal can seed a later iterator,
//! which re-descends by matching directory inode numbers ("cookies")
//! instead of paths.
//!
//! Descriptor lifetimes are strict. Each stack frame owns its directory
//! stream and a dirfd for child opens; popping the frame closes both. The
//! fd handed out in an [`IterEntry`] is borrowed from the iterator and is
//! closed on the next advance, which the `BorrowedFd` lifetime enforces at
//! compile time.

use std::ffi::CStr;
use std::ffi::CString;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fmt;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use log::debug;
use nix::dir::Dir;
use nix::dir::OwningIter;
use nix::dir::Type;
use nix::errno::Errno;
use nix::fcntl::OFlag;

use crate::FileKind;
use crate::error::Error;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::mount_info;
use crate::mount_info::StatmountMask;
use crate::stat;
use crate::stat::StatxRecord;
use crate::sys;
use crate::sys::abi;

/// Fixed ceiling on directory nesting within one traversal.
pub const DIR_STACK_LIMIT: usize = 2048;

const DIR_OPEN_FLAGS: OFlag = OFlag::O_RDONLY
    .union(OFlag::O_DIRECTORY)
    .union(OFlag::O_NOFOLLOW)
    .union(OFlag::O_CLOEXEC);

/// Default flags for non-directory children. `O_NONBLOCK` keeps a FIFO in
/// the tree from wedging the walk.
const DEFAULT_FILE_FLAGS: OFlag = OFlag::O_RDONLY
    .union(OFlag::O_NOFOLLOW)
    .union(OFlag::O_CLOEXEC)
    .union(OFlag::O_NONBLOCK);

const CHILD_RESOLVE: u64 = abi::RESOLVE_NO_XDEV | abi::RESOLVE_NO_SYMLINKS;

/// One level of a [`DirStackSnapshot`]: the directory's path at snapshot
/// time and its inode number.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct DirStackEntry {
    /// Absolute path of the directory when the snapshot was taken.
    pub path: PathBuf,
    /// Inode number, used as the resume cookie.
    pub ino: u64,
}

/// The iterator's open-directory chain, root first. Only used to resume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct DirStackSnapshot {
    entries: Vec<DirStackEntry>,
}

impl DirStackSnapshot {
    /// Rebuilds a snapshot from persisted entries, root first.
    pub fn from_entries(entries: Vec<DirStackEntry>) -> Self {
        Self { entries }
    }

    /// The snapshot levels, root first.
    pub fn entries(&self) -> &[DirStackEntry] {
        &self.entries
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Running totals of a traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterStats {
    /// Entries yielded so far.
    pub cnt: u64,
    /// Bytes of regular files yielded so far.
    pub cnt_bytes: u64,
    /// Directory currently being read; empty after completion.
    pub current_dir: PathBuf,
}

/// Progress callback: receives the current stack snapshot and totals.
/// Returning an error terminates the traversal with [`Error::Callback`].
pub type ProgressFn = Box<
    dyn FnMut(
            &DirStackSnapshot,
            &IterStats,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
        + Send,
>;

/// One yielded filesystem object.
///
/// `fd` belongs to the iterator: it stays valid until the next
/// [`FsIter::next_entry`] call (or until the iterator is dropped) and must
/// not be closed by the caller.
#[derive(Debug)]
pub struct IterEntry<'a> {
    /// Directory the entry was found in.
    pub parent: PathBuf,
    /// Name within the parent.
    pub name: OsString,
    /// Iterator-owned descriptor for the object.
    pub fd: BorrowedFd<'a>,
    /// `statx` taken on `fd`.
    pub stat: StatxRecord,
    /// Object kind, from the statx mode.
    pub kind: FileKind,
}

impl IterEntry<'_> {
    /// Full path of the entry.
    pub fn path(&self) -> PathBuf {
        self.parent.join(&self.name)
    }
}

struct DirFrame {
    path: PathBuf,
    ino: u64,
    dirfd: OwnedFd,
    stream: OwningIter,
}

impl DirFrame {
    fn new(path: PathBuf, ino: u64, fd: OwnedFd) -> Result<Self> {
        let stream_fd = dup(&fd)?;
        let dir = Dir::from_fd(stream_fd).map_err(|errno| Error::sys("fdopendir", errno))?;
        Ok(Self {
            path,
            ino,
            dirfd: fd,
            stream: dir.into_iter(),
        })
    }
}

fn dup(fd: &OwnedFd) -> Result<OwnedFd> {
    fd.try_clone().map_err(|err| {
        Error::sys(
            "dup",
            err.raw_os_error().map_or(Errno::EIO, Errno::from_raw),
        )
    })
}

/// Configures and opens an [`FsIter`].
pub struct FsIterBuilder {
    mountpoint: PathBuf,
    source: Option<OsString>,
    relative_path: Option<PathBuf>,
    btime_cutoff: i64,
    file_flags: OFlag,
    report_every: u64,
    callback: Option<ProgressFn>,
    resume: Option<DirStackSnapshot>,
    intr: Interrupt,
}

impl fmt::Debug for FsIterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsIterBuilder")
            .field("mountpoint", &self.mountpoint)
            .field("source", &self.source)
            .field("relative_path", &self.relative_path)
            .field("btime_cutoff", &self.btime_cutoff)
            .field("report_every", &self.report_every)
            .field("resuming", &self.resume.is_some())
            .finish_non_exhaustive()
    }
}

impl FsIterBuilder {
    fn new(mountpoint: PathBuf) -> Self {
        Self {
            mountpoint,
            source: None,
            relative_path: None,
            btime_cutoff: 0,
            file_flags: DEFAULT_FILE_FLAGS,
            report_every: 0,
            callback: None,
            resume: None,
            intr: Interrupt::default(),
        }
    }

    /// Requires the mounted filesystem's source (e.g. a ZFS dataset name)
    /// to match, byte for byte, where the kernel can report one.
    pub fn source(mut self, source: impl Into<OsString>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Starts the walk at this path below the mountpoint instead of at the
    /// mountpoint itself.
    pub fn relative_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.relative_path = Some(path.into());
        self
    }

    /// Skips non-directory entries born after this epoch second. Zero (the
    /// default) disables the filter.
    pub fn btime_cutoff(mut self, cutoff: i64) -> Self {
        self.btime_cutoff = cutoff;
        self
    }

    /// Open flags for non-directory entries. Directories always open
    /// `O_RDONLY|O_DIRECTORY|O_NOFOLLOW`.
    pub fn file_open_flags(mut self, flags: OFlag) -> Self {
        self.file_flags = flags | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC;
        self
    }

    /// Invokes `callback` after every `every`-th yielded entry. An `every`
    /// of zero disables reporting.
    pub fn progress(
        mut self,
        every: u64,
        callback: impl FnMut(
            &DirStackSnapshot,
            &IterStats,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
        + Send
        + 'static,
    ) -> Self {
        self.report_every = every;
        self.callback = Some(Box::new(callback));
        self
    }

    /// Resumes a traversal from a snapshot taken by
    /// [`FsIter::dir_stack`].
    ///
    /// Directories are rediscovered by inode number, so a directory renamed
    /// since the snapshot is still found; subsequent [`FsIter::dir_stack`]
    /// calls report its current path. Entries of the resumed directory that
    /// were yielded before the snapshot may be yielded again; callers that
    /// need exactness must deduplicate.
    pub fn resume(mut self, snapshot: DirStackSnapshot) -> Self {
        self.resume = Some(snapshot);
        self
    }

    /// Cancellation token observed between syscall retries.
    pub fn interrupt(mut self, intr: Interrupt) -> Self {
        self.intr = intr;
        self
    }

    /// Opens the root and builds the iterator.
    pub fn build(self) -> Result<FsIter> {
        let root_path = match &self.relative_path {
            Some(rel) => self.mountpoint.join(rel),
            None => self.mountpoint.clone(),
        };
        let c_root = sys::cstring(&root_path)?;
        let root_fd = sys::openat2(
            &self.intr,
            libc::AT_FDCWD,
            &c_root,
            DIR_OPEN_FLAGS,
            abi::RESOLVE_NO_SYMLINKS,
        )
        .map_err(|err| match err.errno() {
            Some(Errno::ENOTDIR) => Error::NotADirectory {
                path: root_path.clone(),
            },
            _ => err.with_path(&root_path),
        })?;
        let root_stat = stat::statx_fd(&root_fd, &self.intr)?;
        if let Some(expected) = &self.source {
            check_source(&self.intr, &root_stat, expected)?;
        }
        let cookies = match &self.resume {
            Some(snapshot) => snapshot
                .entries()
                .iter()
                .skip(1)
                .map(|entry| entry.ino)
                .collect(),
            None => Vec::new(),
        };
        let frame = DirFrame::new(root_path, root_stat.ino.unwrap_or(0), root_fd)?;
        let restoring = cookies.iter().any(|&cookie| cookie != 0);
        Ok(FsIter {
            stack: vec![frame],
            last_fd: None,
            last_was_dir: false,
            skip_pending: false,
            cookies,
            restoring,
            cnt: 0,
            cnt_bytes: 0,
            btime_cutoff: self.btime_cutoff,
            file_flags: self.file_flags,
            report_every: self.report_every,
            callback: self.callback,
            intr: self.intr,
            root_mnt_id: root_stat.mnt_id,
        })
    }
}

/// Compares the statmount source of the root's mount against the expected
/// one. Kernels without `statmount`, or replies without a source string,
/// skip the check.
fn check_source(intr: &Interrupt, root_stat: &StatxRecord, expected: &OsStr) -> Result<()> {
    if !root_stat.mnt_id_unique {
        debug!("no unique mount id; skipping source check");
        return Ok(());
    }
    let Some(mnt_id) = root_stat.mnt_id else {
        return Ok(());
    };
    match mount_info::statmount(mnt_id, StatmountMask::SB_SOURCE, intr) {
        Ok(record) => match record.sb_source {
            Some(actual) if actual != *expected => Err(Error::SourceMismatch {
                expected: expected.to_os_string(),
                actual,
            }),
            _ => Ok(()),
        },
        Err(Error::Interrupted) => Err(Error::Interrupted),
        Err(err) => {
            debug!("statmount unavailable, skipping source check: {err}");
            Ok(())
        }
    }
}

/// Depth-first iterator over one mounted filesystem.
pub struct FsIter {
    stack: Vec<DirFrame>,
    last_fd: Option<OwnedFd>,
    last_was_dir: bool,
    skip_pending: bool,
    // cookies[i] is the inode the restore must find inside frame i;
    // zero once satisfied.
    cookies: Vec<u64>,
    restoring: bool,
    cnt: u64,
    cnt_bytes: u64,
    btime_cutoff: i64,
    file_flags: OFlag,
    report_every: u64,
    callback: Option<ProgressFn>,
    intr: Interrupt,
    root_mnt_id: Option<u64>,
}

impl fmt::Debug for FsIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsIter")
            .field("depth", &self.stack.len())
            .field("cnt", &self.cnt)
            .field("cnt_bytes", &self.cnt_bytes)
            .field("restoring", &self.restoring)
            .finish_non_exhaustive()
    }
}

enum DirentRead {
    Exhausted,
    Entry {
        name: CString,
        ino: u64,
        hint: Option<Type>,
    },
}

/// Owned parts of a yield; the fd lives in `FsIter::last_fd` so the
/// borrowed [`IterEntry`] can be assembled by the caller.
struct Yielded {
    parent: PathBuf,
    name: OsString,
    stat: StatxRecord,
    kind: FileKind,
}

impl FsIter {
    /// Starts configuring a traversal rooted at `mountpoint`.
    pub fn builder(mountpoint: impl Into<PathBuf>) -> FsIterBuilder {
        FsIterBuilder::new(mountpoint.into())
    }

    /// Advances to the next entry. `Ok(None)` marks exhaustion; calling
    /// again after that keeps returning `Ok(None)`.
    pub fn next_entry(&mut self) -> Result<Option<IterEntry<'_>>> {
        // The previous entry's fd dies on advance.
        self.last_fd = None;
        self.last_was_dir = false;
        if std::mem::replace(&mut self.skip_pending, false) {
            // Drop the frame pushed for the directory that is being skipped.
            self.stack.pop();
        }
        loop {
            let idx = match self.stack.len() {
                0 => return Ok(None),
                depth => depth - 1,
            };
            match self.read_dirent(idx)? {
                DirentRead::Exhausted => {
                    let frame = self.stack.pop().expect("frame exists");
                    if self.cookie_at(idx).is_some() {
                        return Err(Error::RestoreFailed {
                            depth: idx,
                            path: frame.path,
                        });
                    }
                    // Close errors on pop are ignored.
                    continue;
                }
                DirentRead::Entry { name, ino, hint } => {
                    let bytes = name.to_bytes();
                    if bytes == b"." || bytes == b".." {
                        continue;
                    }
                    if let Some(cookie) = self.cookie_at(idx) {
                        if ino != cookie {
                            continue;
                        }
                        self.cookies[idx] = 0;
                        self.descend_restored(idx, &name)?;
                        continue;
                    }
                    if let Some(yielded) = self.admit(idx, &name, hint)? {
                        let fd = self.last_fd.as_ref().expect("admit stored the fd").as_fd();
                        return Ok(Some(IterEntry {
                            parent: yielded.parent,
                            name: yielded.name,
                            fd,
                            stat: yielded.stat,
                            kind: yielded.kind,
                        }));
                    }
                }
            }
        }
    }

    /// Requests that the children of the directory yielded by the previous
    /// [`next_entry`](Self::next_entry) call be skipped. Only valid while
    /// that directory is the last yielded entry.
    pub fn skip(&mut self) -> Result<()> {
        if !self.last_was_dir || self.last_fd.is_none() {
            return Err(Error::SkipMisplaced);
        }
        self.skip_pending = true;
        Ok(())
    }

    /// Current totals.
    pub fn stats(&self) -> IterStats {
        IterStats {
            cnt: self.cnt,
            cnt_bytes: self.cnt_bytes,
            current_dir: self
                .stack
                .last()
                .map(|frame| frame.path.clone())
                .unwrap_or_default(),
        }
    }

    /// Snapshot of the open directory chain, for resuming later.
    pub fn dir_stack(&self) -> DirStackSnapshot {
        DirStackSnapshot {
            entries: self
                .stack
                .iter()
                .map(|frame| DirStackEntry {
                    path: frame.path.clone(),
                    ino: frame.ino,
                })
                .collect(),
        }
    }

    /// Mount id of the traversal root.
    pub fn mount_id(&self) -> Option<u64> {
        self.root_mnt_id
    }

    fn cookie_at(&self, idx: usize) -> Option<u64> {
        self.cookies
            .get(idx)
            .copied()
            .filter(|&cookie| cookie != 0)
    }

    fn read_dirent(&mut self, idx: usize) -> Result<DirentRead> {
        let frame = &mut self.stack[idx];
        match frame.stream.next() {
            None => Ok(DirentRead::Exhausted),
            Some(Err(errno)) => Err(Error::sys("readdir", errno).with_path(&frame.path)),
            Some(Ok(entry)) => Ok(DirentRead::Entry {
                name: entry.file_name().to_owned(),
                ino: entry.ino(),
                hint: entry.file_type(),
            }),
        }
    }

    /// Opens and stats one child. `Ok(None)` means the child was pruned
    /// (symlink or foreign mount).
    fn open_child(
        &self,
        idx: usize,
        name: &CStr,
        hint: Option<Type>,
    ) -> Result<Option<(OwnedFd, StatxRecord)>> {
        let parent_fd = self.stack[idx].dirfd.as_raw_fd();
        let attempt = |flags: OFlag| sys::openat2(&self.intr, parent_fd, name, flags, CHILD_RESOLVE);
        let opened = match hint {
            Some(Type::Directory) => attempt(DIR_OPEN_FLAGS),
            Some(_) => attempt(self.file_flags),
            // d_type unknown: directory semantics first, fall back to the
            // caller's file flags.
            None => match attempt(DIR_OPEN_FLAGS) {
                Err(err) if err.errno() == Some(Errno::ENOTDIR) => attempt(self.file_flags),
                other => other,
            },
        };
        let fd = match opened {
            Ok(fd) => fd,
            Err(err) => match err.errno() {
                Some(errno @ (Errno::ELOOP | Errno::EXDEV)) => {
                    debug!("pruning {:?}: {errno}", self.child_path(idx, name));
                    return Ok(None);
                }
                _ => return Err(err.with_path(&self.child_path(idx, name))),
            },
        };
        let raw = sys::statx(
            &self.intr,
            fd.as_raw_fd(),
            c"",
            libc::AT_EMPTY_PATH | libc::AT_SYMLINK_NOFOLLOW,
            stat::REQUEST_MASK,
        )
        .map_err(|err| err.with_path(&self.child_path(idx, name)))?;
        Ok(Some((fd, StatxRecord::from_raw(&raw))))
    }

    fn child_path(&self, idx: usize, name: &CStr) -> PathBuf {
        self.stack[idx]
            .path
            .join(OsStr::from_bytes(name.to_bytes()))
    }

    /// Re-enters a directory matched by its restore cookie; nothing is
    /// yielded for it.
    fn descend_restored(&mut self, idx: usize, name: &CStr) -> Result<()> {
        let path = self.child_path(idx, name);
        let restore_failed = || Error::RestoreFailed {
            depth: idx,
            path: self.stack[idx].path.clone(),
        };
        let (fd, stat) = match self.open_child(idx, name, Some(Type::Directory)) {
            Ok(Some(opened)) => opened,
            // The matched inode is no longer an enterable directory.
            Ok(None) => return Err(restore_failed()),
            Err(err) if err.errno() == Some(Errno::ENOTDIR) => return Err(restore_failed()),
            Err(err) => return Err(err),
        };
        if !stat.is_dir() {
            return Err(restore_failed());
        }
        self.push_frame(path, stat.ino.unwrap_or(0), fd)?;
        if !self.cookies.iter().any(|&cookie| cookie != 0) {
            self.restoring = false;
        }
        Ok(())
    }

    /// Normal (non-restore) admission of one read dirent. Returns the
    /// parts to yield, or `None` when the entry was filtered out. On a
    /// yield the entry's fd is parked in `last_fd`.
    fn admit(&mut self, idx: usize, name: &CStr, hint: Option<Type>) -> Result<Option<Yielded>> {
        let Some((fd, stat)) = self.open_child(idx, name, hint)? else {
            return Ok(None);
        };
        let kind = stat.kind().unwrap_or(FileKind::RegularFile);
        let is_dir = kind == FileKind::Directory;
        if !is_dir && self.btime_cutoff > 0 {
            if let Some(btime) = stat.btime {
                if btime.secs > self.btime_cutoff {
                    return Ok(None);
                }
            }
        }
        let parent = self.stack[idx].path.clone();
        if is_dir {
            let path = self.child_path(idx, name);
            let frame_fd = dup(&fd)?;
            self.push_frame(path, stat.ino.unwrap_or(0), frame_fd)?;
        }
        self.cnt += 1;
        if kind == FileKind::RegularFile {
            self.cnt_bytes += stat.size.unwrap_or(0);
        }
        self.report_if_due()?;
        self.last_was_dir = is_dir;
        self.last_fd = Some(fd);
        Ok(Some(Yielded {
            parent,
            name: OsStr::from_bytes(name.to_bytes()).to_os_string(),
            stat,
            kind,
        }))
    }

    fn push_frame(&mut self, path: PathBuf, ino: u64, fd: OwnedFd) -> Result<()> {
        if self.stack.len() == DIR_STACK_LIMIT {
            return Err(Error::DepthExceeded { path });
        }
        self.stack.push(DirFrame::new(path, ino, fd)?);
        Ok(())
    }

    fn report_if_due(&mut self) -> Result<()> {
        if self.report_every == 0 || self.cnt % self.report_every != 0 {
            return Ok(());
        }
        if self.callback.is_none() {
            return Ok(());
        }
        let snapshot = self.dir_stack();
        let stats = self.stats();
        let callback = self.callback.as_mut().expect("checked above");
        callback(&snapshot, &stats).map_err(Error::Callback)
    }
}
