// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package payload expansion.

[install_files] walks a package's data segment and materializes every tar
entry on the target [ApkFs] with its mode, ownership, timestamp, and
extended attributes. Entry paths are normalized relative to the
filesystem root; `..` components are rejected.

The returned file list preserves archive order and feeds the `F:`/`R:`
file lines of the package's `installed` stanza.
*/

use {
    crate::{
        error::{ApkError, Result},
        fs::{clean_path, ApkFs},
        io::{ContentDigest, DigestFlavor, DigestingReader},
    },
    std::{
        io::Read,
        time::{Duration, SystemTime},
    },
    tracing::warn,
};

/// PAX extension key prefix carrying extended attributes.
const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

/// The kind of an installed filesystem entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstalledFileKind {
    Dir,
    File,
    Symlink,
    Hardlink,
    CharDevice,
}

/// One filesystem entry materialized from a package's data segment.
#[derive(Clone, Debug)]
pub struct InstalledFile {
    /// Root-relative path, without a leading slash.
    pub path: String,
    pub kind: InstalledFileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// SHA-1 of the file content (or of the symlink target), recorded in
    /// the installed database's `Z:` lines.
    pub digest: Option<ContentDigest>,
}

/// Options controlling payload expansion.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstallOptions {
    /// Tolerate device node creation failures instead of failing, for
    /// unprivileged runs.
    pub ignore_mknod_errors: bool,
}

fn entry_path(raw: &str) -> Result<String> {
    clean_path(raw).map_err(|_| {
        ApkError::InvalidInput(format!("package entry path escapes root: {}", raw))
    })
}

fn entry_mtime(header: &tar::Header) -> Option<SystemTime> {
    header
        .mtime()
        .ok()
        .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
}

/// Materialize every entry of a data segment onto the filesystem.
pub fn install_files<R: Read>(
    fs: &dyn ApkFs,
    archive: &mut tar::Archive<R>,
    options: &InstallOptions,
) -> Result<Vec<InstalledFile>> {
    let mut installed = vec![];

    for entry in archive.entries()? {
        let mut entry = entry?;
        let header = entry.header().clone();
        let entry_type = header.entry_type();

        // PAX metadata entries describe their successor and are not
        // filesystem content themselves.
        if matches!(
            entry_type,
            tar::EntryType::XHeader | tar::EntryType::XGlobalHeader
        ) {
            continue;
        }

        let raw_path = entry.path()?.to_string_lossy().to_string();
        let path = entry_path(&raw_path)?;

        if path.is_empty() {
            continue;
        }

        let mode = header.mode()? & 0o7777;
        let uid = header.uid()? as u32;
        let gid = header.gid()? as u32;
        let mtime = entry_mtime(&header);

        let mut xattrs = vec![];

        if let Some(extensions) = entry.pax_extensions()? {
            for extension in extensions {
                let extension = extension?;

                if let Ok(key) = extension.key() {
                    if let Some(name) = key.strip_prefix(PAX_XATTR_PREFIX) {
                        xattrs.push((name.to_string(), extension.value_bytes().to_vec()));
                    }
                }
            }
        }

        let record = match entry_type {
            tar::EntryType::Directory => {
                fs.mkdir_all(&path, mode)
                    .map_err(|e| ApkError::IoPath(path.clone(), e))?;

                Some(InstalledFile {
                    path: path.clone(),
                    kind: InstalledFileKind::Dir,
                    mode,
                    uid,
                    gid,
                    digest: None,
                })
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let mut reader = DigestingReader::new(&mut entry, DigestFlavor::Sha1);
                let mut content = vec![];
                reader.read_to_end(&mut content)?;
                let (_, digest) = reader.finish();

                fs.write_file(&path, &content, mode)
                    .map_err(|e| ApkError::IoPath(path.clone(), e))?;

                Some(InstalledFile {
                    path: path.clone(),
                    kind: InstalledFileKind::File,
                    mode,
                    uid,
                    gid,
                    digest: Some(digest),
                })
            }
            tar::EntryType::Symlink => {
                let target = header
                    .link_name()?
                    .ok_or_else(|| {
                        ApkError::InvalidInput(format!("symlink {} has no target", path))
                    })?
                    .to_string_lossy()
                    .to_string();

                fs.symlink(&target, &path)
                    .map_err(|e| ApkError::IoPath(path.clone(), e))?;

                Some(InstalledFile {
                    path: path.clone(),
                    kind: InstalledFileKind::Symlink,
                    mode,
                    uid,
                    gid,
                    digest: Some(ContentDigest::sha1(target.as_bytes())),
                })
            }
            tar::EntryType::Link => {
                let target = header
                    .link_name()?
                    .ok_or_else(|| {
                        ApkError::InvalidInput(format!("hardlink {} has no target", path))
                    })?
                    .to_string_lossy()
                    .to_string();
                let target = entry_path(&target)?;

                fs.hard_link(&target, &path)
                    .map_err(|e| ApkError::IoPath(path.clone(), e))?;

                Some(InstalledFile {
                    path: path.clone(),
                    kind: InstalledFileKind::Hardlink,
                    mode,
                    uid,
                    gid,
                    digest: None,
                })
            }
            tar::EntryType::Char => {
                let major = header.device_major()?.unwrap_or(0);
                let minor = header.device_minor()?.unwrap_or(0);

                match fs.mknod_char(&path, mode, major, minor) {
                    Ok(()) => Some(InstalledFile {
                        path: path.clone(),
                        kind: InstalledFileKind::CharDevice,
                        mode,
                        uid,
                        gid,
                        digest: None,
                    }),
                    Err(e) if options.ignore_mknod_errors => {
                        warn!("unable to create device node {}: {:?}", path, e);
                        None
                    }
                    Err(e) => {
                        return Err(ApkError::Unsupported(format!(
                            "mknod {} failed: {:?}",
                            path, e
                        )));
                    }
                }
            }
            tar::EntryType::Block if options.ignore_mknod_errors => {
                warn!("skipping block device {}", path);
                None
            }
            other => {
                return Err(ApkError::Unsupported(format!(
                    "unsupported tar entry type {:?} for {}",
                    other, path
                )));
            }
        };

        let record = match record {
            Some(record) => record,
            None => continue,
        };

        if uid != 0 || gid != 0 {
            fs.chown(&path, uid, gid)
                .map_err(|e| ApkError::IoPath(path.clone(), e))?;
        }

        for (name, value) in &xattrs {
            fs.set_xattr(&path, name, value)
                .map_err(|e| ApkError::IoPath(path.clone(), e))?;
        }

        if record.kind != InstalledFileKind::Symlink {
            if let Some(mtime) = mtime {
                // Timestamps are best effort; backends without mtime
                // support must not fail the install.
                if let Err(e) = fs.set_mtime(&path, mtime) {
                    warn!("unable to set mtime on {}: {:?}", path, e);
                }
            }
        }

        installed.push(record);
    }

    Ok(installed)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            apkfile::test_support::{build_tar, TarEntry},
            fs::{FileKind, MemFs},
        },
    };

    fn archive_of(entries: &[TarEntry<'_>]) -> tar::Archive<std::io::Cursor<Vec<u8>>> {
        tar::Archive::new(std::io::Cursor::new(build_tar(entries)))
    }

    #[test]
    fn materializes_tree() -> Result<()> {
        let fs = MemFs::new();

        let mut archive = archive_of(&[
            TarEntry::Dir {
                path: "usr",
                mode: 0o755,
            },
            TarEntry::Dir {
                path: "usr/bin",
                mode: 0o755,
            },
            TarEntry::File {
                path: "usr/bin/hello",
                data: b"#!/bin/sh\necho hello\n",
                mode: 0o755,
            },
            TarEntry::Symlink {
                path: "usr/bin/hi",
                target: "hello",
            },
            TarEntry::Hardlink {
                path: "usr/bin/hello.hard",
                target: "usr/bin/hello",
            },
        ]);

        let files = install_files(&fs, &mut archive, &InstallOptions::default())?;

        assert_eq!(files.len(), 5);
        assert_eq!(fs.read_file("usr/bin/hello")?, b"#!/bin/sh\necho hello\n");
        assert_eq!(fs.metadata("usr/bin/hello")?.mode, 0o755);
        assert_eq!(fs.metadata("usr/bin/hi")?.kind, FileKind::Symlink);
        assert_eq!(fs.read_file("usr/bin/hello.hard")?, b"#!/bin/sh\necho hello\n");

        let file = files.iter().find(|f| f.path == "usr/bin/hello").unwrap();
        assert_eq!(file.kind, InstalledFileKind::File);
        assert_eq!(
            file.digest,
            Some(ContentDigest::sha1(b"#!/bin/sh\necho hello\n"))
        );

        Ok(())
    }

    #[test]
    fn rejects_path_traversal() {
        let fs = MemFs::new();

        // `tar::Header::set_path` refuses to encode a `..` component, so
        // the malicious name is written directly into the raw header
        // field to simulate a hostile archive.
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        let name = b"../evil";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(0);
        header.set_cksum();

        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, std::io::empty()).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));

        let err = install_files(&fs, &mut archive, &InstallOptions::default()).unwrap_err();
        assert!(matches!(err, ApkError::InvalidInput(_)));
    }

    #[test]
    fn unknown_entry_type_is_unsupported() {
        let fs = MemFs::new();

        // Hand-build a FIFO entry; the test builders have no reason to
        // support one.
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Fifo);
        header.set_path("run/fifo").unwrap();
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(0);
        header.set_cksum();

        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, std::io::empty()).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));

        let err = install_files(&fs, &mut archive, &InstallOptions::default()).unwrap_err();
        assert!(matches!(err, ApkError::Unsupported(_)));
    }

    #[test]
    fn ownership_applied() -> Result<()> {
        let fs = MemFs::new();

        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_path("etc/secret").unwrap();
        header.set_mode(0o600);
        header.set_uid(123);
        header.set_gid(456);
        header.set_size(4);
        header.set_cksum();

        let mut dir = tar::Header::new_ustar();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_path("etc").unwrap();
        dir.set_mode(0o755);
        dir.set_uid(0);
        dir.set_gid(0);
        dir.set_size(0);
        dir.set_cksum();

        let mut archive = tar::Archive::new(std::io::Cursor::new({
            let mut builder = tar::Builder::new(Vec::new());
            builder.append(&dir, std::io::empty()).unwrap();
            builder.append(&header, &b"sssh"[..]).unwrap();
            builder.into_inner().unwrap()
        }));

        let files = install_files(&fs, &mut archive, &InstallOptions::default())?;

        let info = fs.metadata("etc/secret")?;
        assert_eq!((info.uid, info.gid), (123, 456));
        assert_eq!(info.mode, 0o600);

        let file = files.iter().find(|f| f.path == "etc/secret").unwrap();
        assert_eq!((file.uid, file.gid), (123, 456));

        Ok(())
    }

    #[test]
    fn mknod_tolerance_skips_devices() -> Result<()> {
        // MemFs mknod succeeds, so drive the tolerance path with a
        // pre-existing entry at the device path.
        let fs = MemFs::new();
        fs.mkdir_all("dev", 0o755)?;
        fs.mknod_char("dev/null", 0o666, 1, 3)?;

        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Char);
        header.set_path("dev/null").unwrap();
        header.set_mode(0o666);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(0);
        header.set_device_major(1).unwrap();
        header.set_device_minor(3).unwrap();
        header.set_cksum();

        let build = || {
            let mut builder = tar::Builder::new(Vec::new());
            builder.append(&header, std::io::empty()).unwrap();
            builder.into_inner().unwrap()
        };

        // Strict mode fails (node already exists).
        let mut archive = tar::Archive::new(std::io::Cursor::new(build()));
        assert!(matches!(
            install_files(&fs, &mut archive, &InstallOptions::default()).unwrap_err(),
            ApkError::Unsupported(_)
        ));

        // Tolerant mode records nothing and continues.
        let mut archive = tar::Archive::new(std::io::Cursor::new(build()));
        let files = install_files(
            &fs,
            &mut archive,
            &InstallOptions {
                ignore_mknod_errors: true,
            },
        )?;
        assert!(files.is_empty());

        Ok(())
    }
}
