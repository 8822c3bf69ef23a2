// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Virtual filesystem abstraction.

The installer materializes package payloads onto an [ApkFs], a capability
interface over a writable filesystem root supporting regular files,
directories, symlinks, hardlinks, and character device nodes, with mode
bits, ownership, mtimes, and extended attributes.

Two implementations exist: [DiskFs] writes through to a directory on the
host filesystem and [MemFs] keeps everything in memory for tests. All
paths are interpreted relative to the filesystem root; a leading `/` is
accepted and stripped.
*/

mod disk;
mod memory;

pub use disk::DiskFs;
pub use memory::MemFs;

use std::{io, time::SystemTime};

/// The kind of a filesystem entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    CharDevice,
}

/// Metadata for a filesystem entry.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub kind: FileKind,
    /// Permission bits (the low 12 bits of the mode).
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
}

/// A directory listing entry.
#[derive(Clone, Debug)]
pub struct DirEntryInfo {
    pub name: String,
    pub kind: FileKind,
}

/// Normalize a root-relative path.
///
/// Strips a leading `/` and any `.` components and rejects `..` components,
/// which would escape the filesystem root.
pub fn clean_path(path: &str) -> io::Result<String> {
    let mut parts = vec![];

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path escapes filesystem root: {}", path),
                ));
            }
            part => parts.push(part),
        }
    }

    Ok(parts.join("/"))
}

/// Capability interface over a writable filesystem rooted at some directory.
///
/// Implementations must be safe for concurrent use; concurrent writers to
/// distinct paths must not corrupt each other.
pub trait ApkFs: Send + Sync {
    /// Create a directory and any missing parents, applying `mode` to
    /// directories that get created.
    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()>;

    /// Create or truncate a regular file with the given contents and mode.
    ///
    /// The parent directory must already exist.
    fn write_file(&self, path: &str, data: &[u8], mode: u32) -> io::Result<()>;

    /// Atomically replace a regular file with the given contents and mode.
    ///
    /// The new content is written to a temporary sibling and renamed into
    /// place so concurrent readers observe either the old or the new file.
    fn replace_file(&self, path: &str, data: &[u8], mode: u32) -> io::Result<()>;

    /// Read the entire contents of a regular file.
    fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;

    /// List a directory. Entries are returned sorted by name.
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>>;

    /// Stat an entry without following symlinks.
    fn metadata(&self, path: &str) -> io::Result<FileInfo>;

    /// Whether an entry exists at the path.
    fn exists(&self, path: &str) -> bool;

    /// Create a symlink at `link` pointing at `target`.
    ///
    /// `target` is stored verbatim; it is not resolved or validated.
    fn symlink(&self, target: &str, link: &str) -> io::Result<()>;

    /// Create a hardlink at `link` to the existing entry `target`.
    fn hard_link(&self, target: &str, link: &str) -> io::Result<()>;

    /// Create a character device node.
    fn mknod_char(&self, path: &str, mode: u32, major: u32, minor: u32) -> io::Result<()>;

    /// Change ownership of an entry (without following symlinks).
    fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()>;

    /// Set an extended attribute on an entry.
    fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> io::Result<()>;

    /// Set the modification time of an entry.
    fn set_mtime(&self, path: &str, mtime: SystemTime) -> io::Result<()>;
}
