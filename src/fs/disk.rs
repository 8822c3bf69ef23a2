// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Host filesystem backend. */

use {
    super::{clean_path, ApkFs, DirEntryInfo, FileInfo, FileKind},
    std::{
        fs,
        io::{self, Write},
        os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt},
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

/// An [ApkFs] writing through to a directory on the host filesystem.
#[derive(Clone, Debug)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    /// Construct an instance rooted at the given directory.
    ///
    /// The directory must exist. No other validation is performed.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("filesystem root is not a directory: {}", root.display()),
            ));
        }

        Ok(Self { root })
    }

    /// The host directory this filesystem is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        Ok(self.root.join(clean_path(path)?))
    }
}

fn kind_of(file_type: fs::FileType) -> FileKind {
    if file_type.is_dir() {
        FileKind::Dir
    } else if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_char_device() {
        FileKind::CharDevice
    } else {
        FileKind::File
    }
}

impl ApkFs for DiskFs {
    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()> {
        let path = self.resolve(path)?;

        fs::DirBuilder::new().recursive(true).mode(mode).create(path)
    }

    fn write_file(&self, path: &str, data: &[u8], mode: u32) -> io::Result<()> {
        let path = self.resolve(path)?;

        let mut fh = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&path)?;

        fh.write_all(data)?;

        // The open mode is masked by the process umask; force the full bits.
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
    }

    fn replace_file(&self, path: &str, data: &[u8], mode: u32) -> io::Result<()> {
        let path = self.resolve(path)?;
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(data)?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))?;
        tmp.persist(&path).map_err(|e| e.error)?;

        Ok(())
    }

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path)?)
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = vec![];

        for entry in fs::read_dir(self.resolve(path)?)? {
            let entry = entry?;

            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                kind: kind_of(entry.file_type()?),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries)
    }

    fn metadata(&self, path: &str) -> io::Result<FileInfo> {
        let metadata = fs::symlink_metadata(self.resolve(path)?)?;

        Ok(FileInfo {
            kind: kind_of(metadata.file_type()),
            mode: metadata.permissions().mode() & 0o7777,
            size: metadata.len(),
            uid: metadata.uid(),
            gid: metadata.gid(),
        })
    }

    fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(path) => fs::symlink_metadata(path).is_ok(),
            Err(_) => false,
        }
    }

    fn symlink(&self, target: &str, link: &str) -> io::Result<()> {
        std::os::unix::fs::symlink(target, self.resolve(link)?)
    }

    fn hard_link(&self, target: &str, link: &str) -> io::Result<()> {
        fs::hard_link(self.resolve(target)?, self.resolve(link)?)
    }

    fn mknod_char(&self, path: &str, mode: u32, major: u32, minor: u32) -> io::Result<()> {
        let path = self.resolve(path)?;

        rustix::fs::mknodat(
            rustix::fs::CWD,
            &path,
            rustix::fs::FileType::CharacterDevice,
            rustix::fs::Mode::from_raw_mode(mode),
            rustix::fs::makedev(major, minor),
        )
        .map_err(io::Error::from)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::lchown(self.resolve(path)?, Some(uid), Some(gid))
    }

    fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> io::Result<()> {
        rustix::fs::setxattr(
            self.resolve(path)?,
            name,
            value,
            rustix::fs::XattrFlags::empty(),
        )
        .map_err(io::Error::from)
    }

    fn set_mtime(&self, path: &str, mtime: SystemTime) -> io::Result<()> {
        let path = self.resolve(path)?;
        let mtime = filetime::FileTime::from_system_time(mtime);

        filetime::set_symlink_file_times(path, mtime, mtime)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_roundtrip() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = DiskFs::new(dir.path())?;

        fs.mkdir_all("etc/apk", 0o755)?;
        fs.write_file("etc/apk/world", b"busybox\n", 0o644)?;

        assert_eq!(fs.read_file("etc/apk/world")?, b"busybox\n");

        let info = fs.metadata("etc/apk/world")?;
        assert_eq!(info.kind, FileKind::File);
        assert_eq!(info.mode, 0o644);
        assert_eq!(info.size, 8);

        fs.replace_file("etc/apk/world", b"busybox\nmusl\n", 0o644)?;
        assert_eq!(fs.read_file("etc/apk/world")?, b"busybox\nmusl\n");

        Ok(())
    }

    #[test]
    fn symlinks_and_hardlinks() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = DiskFs::new(dir.path())?;

        fs.mkdir_all("bin", 0o755)?;
        fs.write_file("bin/busybox", b"#!", 0o755)?;
        fs.symlink("busybox", "bin/sh")?;
        fs.hard_link("bin/busybox", "bin/busybox.static")?;

        assert_eq!(fs.metadata("bin/sh")?.kind, FileKind::Symlink);
        assert_eq!(fs.read_file("bin/busybox.static")?, b"#!");

        Ok(())
    }

    #[test]
    fn escape_rejected() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = DiskFs::new(dir.path())?;

        assert!(fs.write_file("../outside", b"x", 0o644).is_err());

        Ok(())
    }
}
