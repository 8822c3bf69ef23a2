// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APK database layout and state files.

[init_database] creates the canonical `/etc/apk`, `/lib/apk/db`,
`/var/cache/apk` tree, the baseline `/etc` files, and the standard
character device nodes. The other functions rewrite or append to the
database state files: `world`, `repositories`, `installed`, `scripts.tar`,
and `triggers`.

Callers are responsible for serializing database mutations; the
[Apk](crate::apk::Apk) handle wraps every call here in its database
mutex.
*/

use {
    crate::{
        error::{ApkError, Result},
        fs::ApkFs,
        install::{InstalledFile, InstalledFileKind},
        io::ContentDigest,
        package::Package,
    },
    std::io::Read,
    tracing::warn,
};

/// Path of the world file.
pub const WORLD_PATH: &str = "etc/apk/world";
/// Path of the repositories file.
pub const REPOSITORIES_PATH: &str = "etc/apk/repositories";
/// Path of the keyring directory.
pub const KEYS_PATH: &str = "etc/apk/keys";
/// Path of the installed package database.
pub const INSTALLED_PATH: &str = "lib/apk/db/installed";
/// Path of the concatenated install scripts archive.
pub const SCRIPTS_TAR_PATH: &str = "lib/apk/db/scripts.tar";
/// Path of the triggers registry.
pub const TRIGGERS_PATH: &str = "lib/apk/db/triggers";

pub(crate) struct InitDirectory {
    pub path: &'static str,
    pub mode: u32,
}

pub(crate) struct InitFile {
    pub path: &'static str,
    pub mode: u32,
    pub contents: &'static [u8],
}

pub(crate) struct InitDevice {
    pub path: &'static str,
    pub mode: u32,
    pub major: u32,
    pub minor: u32,
}

/// Directories created by [init_database].
pub(crate) const INIT_DIRECTORIES: &[InitDirectory] = &[
    InitDirectory {
        path: "dev",
        mode: 0o755,
    },
    InitDirectory {
        path: "etc/apk",
        mode: 0o755,
    },
    InitDirectory {
        path: "etc/apk/keys",
        mode: 0o755,
    },
    InitDirectory {
        path: "etc/apk/protected_paths.d",
        mode: 0o755,
    },
    InitDirectory {
        path: "lib/apk/db",
        mode: 0o755,
    },
    InitDirectory {
        path: "var/cache/apk",
        mode: 0o755,
    },
];

const OS_RELEASE: &[u8] = b"NAME=\"Alpine Linux\"\nID=alpine\nPRETTY_NAME=\"Alpine Linux\"\nHOME_URL=\"https://alpinelinux.org/\"\n";
const PASSWD: &[u8] = b"root:x:0:0:root:/root:/bin/sh\n";
const GROUP: &[u8] = b"root:x:0:root\n";
const SHADOW: &[u8] = b"root:!::0:::::\n";

/// Regular files created by [init_database].
///
/// Files already present are left alone, so their size may exceed the
/// vendored minimum.
pub(crate) const INIT_FILES: &[InitFile] = &[
    InitFile {
        path: "etc/apk/world",
        mode: 0o644,
        contents: b"",
    },
    InitFile {
        path: "etc/apk/repositories",
        mode: 0o644,
        contents: b"",
    },
    InitFile {
        path: "lib/apk/db/installed",
        mode: 0o644,
        contents: b"",
    },
    InitFile {
        path: "lib/apk/db/scripts.tar",
        mode: 0o644,
        contents: b"",
    },
    InitFile {
        path: "lib/apk/db/triggers",
        mode: 0o644,
        contents: b"",
    },
    InitFile {
        path: "etc/os-release",
        mode: 0o644,
        contents: OS_RELEASE,
    },
    InitFile {
        path: "etc/passwd",
        mode: 0o644,
        contents: PASSWD,
    },
    InitFile {
        path: "etc/group",
        mode: 0o644,
        contents: GROUP,
    },
    InitFile {
        path: "etc/shadow",
        mode: 0o640,
        contents: SHADOW,
    },
];

/// Character device nodes created by [init_database].
pub(crate) const INIT_DEVICES: &[InitDevice] = &[
    InitDevice {
        path: "dev/null",
        mode: 0o666,
        major: 1,
        minor: 3,
    },
    InitDevice {
        path: "dev/zero",
        mode: 0o666,
        major: 1,
        minor: 5,
    },
    InitDevice {
        path: "dev/random",
        mode: 0o666,
        major: 1,
        minor: 8,
    },
    InitDevice {
        path: "dev/urandom",
        mode: 0o666,
        major: 1,
        minor: 9,
    },
    InitDevice {
        path: "dev/console",
        mode: 0o620,
        major: 5,
        minor: 1,
    },
];

/// Create the canonical APK database tree.
///
/// Idempotent: already-present entries are left untouched. Device node
/// creation failures are tolerated (with a warning) when
/// `ignore_mknod_errors` is set, since unprivileged builds cannot mknod.
pub(crate) fn init_database(fs: &dyn ApkFs, ignore_mknod_errors: bool) -> Result<()> {
    for dir in INIT_DIRECTORIES {
        fs.mkdir_all(dir.path, dir.mode)
            .map_err(|e| ApkError::Init(dir.path.to_string(), e))?;
    }

    for file in INIT_FILES {
        if !fs.exists(file.path) {
            fs.write_file(file.path, file.contents, file.mode)
                .map_err(|e| ApkError::Init(file.path.to_string(), e))?;
        }
    }

    for device in INIT_DEVICES {
        if fs.exists(device.path) {
            continue;
        }

        match fs.mknod_char(device.path, device.mode, device.major, device.minor) {
            Ok(()) => {}
            Err(e) if ignore_mknod_errors => {
                warn!("unable to create device node {}: {:?}", device.path, e);
            }
            Err(e) => {
                return Err(ApkError::Unsupported(format!(
                    "mknod {} failed: {:?}",
                    device.path, e
                )));
            }
        }
    }

    Ok(())
}

fn database_error(path: &str, e: std::io::Error) -> ApkError {
    ApkError::Database(path.to_string(), format!("{:?}", e))
}

/// Rewrite the world file with the given package atoms.
///
/// The input is sorted lexicographically; duplicates are preserved, so
/// `foo` and `foo=1.0.0` both remain. Deduplication by name is a caller
/// concern.
pub(crate) fn write_world(fs: &dyn ApkFs, packages: &[String]) -> Result<()> {
    let mut packages = packages.to_vec();
    packages.sort();

    let mut contents = packages.join("\n");
    contents.push('\n');

    fs.replace_file(WORLD_PATH, contents.as_bytes(), 0o644)
        .map_err(|e| database_error(WORLD_PATH, e))
}

/// Rewrite the repositories file, preserving caller order.
pub(crate) fn write_repositories(fs: &dyn ApkFs, repositories: &[String]) -> Result<()> {
    if repositories.is_empty() {
        return Err(ApkError::InvalidInput(
            "repository list must not be empty".to_string(),
        ));
    }

    let mut contents = repositories.join("\n");
    contents.push('\n');

    fs.replace_file(REPOSITORIES_PATH, contents.as_bytes(), 0o644)
        .map_err(|e| database_error(REPOSITORIES_PATH, e))
}

fn push_field(out: &mut String, key: char, value: &str) {
    if !value.is_empty() {
        out.push(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
}

/// Render one package's `installed` stanza.
///
/// Fields appear in the canonical APK order, followed by the file list
/// (`F:`/`M:` directory lines, `R:`/`a:`/`Z:` file lines), terminated by
/// a blank line. Ownership and permission lines are only emitted when
/// they differ from the defaults (`root:root`, 0755 for directories,
/// 0644 for files).
pub(crate) fn render_stanza(package: &Package, files: &[InstalledFile]) -> String {
    let mut out = String::new();

    if !package.checksum.is_empty() {
        push_field(
            &mut out,
            'C',
            &ContentDigest::Sha1(package.checksum.clone()).q_encoded(),
        );
    }

    push_field(&mut out, 'P', &package.name);
    push_field(&mut out, 'V', &package.version);

    if let Some(arch) = package.arch {
        push_field(&mut out, 'A', arch.as_str());
    }

    if package.size > 0 {
        push_field(&mut out, 'S', &package.size.to_string());
    }

    if package.installed_size > 0 {
        push_field(&mut out, 'I', &package.installed_size.to_string());
    }

    push_field(&mut out, 'T', &package.description);
    push_field(&mut out, 'U', &package.url);
    push_field(&mut out, 'L', &package.license);
    push_field(&mut out, 'o', &package.origin);
    push_field(&mut out, 'm', &package.maintainer);

    if let Some(build_time) = package.build_time {
        push_field(&mut out, 't', &build_time.to_string());
    }

    push_field(&mut out, 'c', &package.commit);
    push_field(&mut out, 'D', &package.dependencies.join(" "));
    push_field(&mut out, 'p', &package.provides.join(" "));
    push_field(&mut out, 'r', &package.replaces.join(" "));

    let mut current_dir: Option<&str> = None;

    for file in files {
        match file.kind {
            InstalledFileKind::Dir => {
                push_field(&mut out, 'F', &file.path);

                if file.uid != 0 || file.gid != 0 || file.mode != 0o755 {
                    push_field(
                        &mut out,
                        'M',
                        &format!("{}:{}:{:o}", file.uid, file.gid, file.mode),
                    );
                }

                current_dir = Some(file.path.as_str());
            }
            _ => {
                let (dir, base) = match file.path.rsplit_once('/') {
                    Some((dir, base)) => (dir, base),
                    None => ("", file.path.as_str()),
                };

                if current_dir != Some(dir) && !dir.is_empty() {
                    push_field(&mut out, 'F', dir);
                    current_dir = Some(dir);
                }

                push_field(&mut out, 'R', base);

                if file.uid != 0 || file.gid != 0 || file.mode != 0o644 {
                    push_field(
                        &mut out,
                        'a',
                        &format!("{}:{}:{:o}", file.uid, file.gid, file.mode),
                    );
                }

                if let Some(digest) = &file.digest {
                    push_field(&mut out, 'Z', &digest.q_encoded());
                }
            }
        }
    }

    out.push('\n');

    out
}

/// Append a package's stanza to the installed database.
pub(crate) fn add_installed_package(
    fs: &dyn ApkFs,
    package: &Package,
    files: &[InstalledFile],
) -> Result<()> {
    let mut installed = fs
        .read_file(INSTALLED_PATH)
        .map_err(|e| database_error(INSTALLED_PATH, e))?;

    installed.extend_from_slice(render_stanza(package, files).as_bytes());

    fs.replace_file(INSTALLED_PATH, &installed, 0o644)
        .map_err(|e| database_error(INSTALLED_PATH, e))
}

/// Append a package's install scripts to `scripts.tar`.
///
/// Script entries are named `<name>-<version>.Q1<checksum>.<phase>`, the
/// form APK itself uses. Packages without scripts leave the archive
/// untouched.
pub(crate) fn append_scripts(
    fs: &dyn ApkFs,
    package: &Package,
    scripts: &[(String, Vec<u8>)],
) -> Result<()> {
    if scripts.is_empty() {
        return Ok(());
    }

    let existing = fs
        .read_file(SCRIPTS_TAR_PATH)
        .map_err(|e| database_error(SCRIPTS_TAR_PATH, e))?;

    let mut builder = tar::Builder::new(Vec::new());

    if !existing.is_empty() {
        let mut archive = tar::Archive::new(&existing[..]);

        for entry in archive
            .entries()
            .map_err(|e| database_error(SCRIPTS_TAR_PATH, e))?
        {
            let mut entry = entry.map_err(|e| database_error(SCRIPTS_TAR_PATH, e))?;
            let header = entry.header().clone();

            let mut content = vec![];
            entry
                .read_to_end(&mut content)
                .map_err(|e| database_error(SCRIPTS_TAR_PATH, e))?;

            builder
                .append(&header, &content[..])
                .map_err(|e| database_error(SCRIPTS_TAR_PATH, e))?;
        }
    }

    let checksum = ContentDigest::Sha1(package.checksum.clone()).q_encoded();

    for (phase, content) in scripts {
        let name = format!("{}-{}.{}.{}", package.name, package.version, checksum, phase);

        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header
            .set_path(&name)
            .map_err(|e| database_error(SCRIPTS_TAR_PATH, e))?;
        header.set_mode(0o755);
        header.set_size(content.len() as u64);
        header.set_cksum();

        builder
            .append(&header, &content[..])
            .map_err(|e| database_error(SCRIPTS_TAR_PATH, e))?;
    }

    let archive = builder
        .into_inner()
        .map_err(|e| database_error(SCRIPTS_TAR_PATH, e))?;

    fs.replace_file(SCRIPTS_TAR_PATH, &archive, 0o644)
        .map_err(|e| database_error(SCRIPTS_TAR_PATH, e))
}

/// Register a package's triggers in the triggers file.
///
/// Each line pairs the package's control checksum with the watched paths:
/// `Q1<checksum> <path> <path>...`.
pub(crate) fn append_triggers(
    fs: &dyn ApkFs,
    package: &Package,
    triggers: &[String],
) -> Result<()> {
    if triggers.is_empty() {
        return Ok(());
    }

    let mut contents = fs
        .read_file(TRIGGERS_PATH)
        .map_err(|e| database_error(TRIGGERS_PATH, e))?;

    let checksum = ContentDigest::Sha1(package.checksum.clone()).q_encoded();
    let line = format!("{} {}\n", checksum, triggers.join(" "));
    contents.extend_from_slice(line.as_bytes());

    fs.replace_file(TRIGGERS_PATH, &contents, 0o644)
        .map_err(|e| database_error(TRIGGERS_PATH, e))
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::fs::{FileKind, MemFs},
        std::io,
    };

    #[test]
    fn init_creates_every_entry() -> Result<()> {
        let fs = MemFs::new();
        init_database(&fs, false)?;

        for dir in INIT_DIRECTORIES {
            let info = fs.metadata(dir.path)?;
            assert_eq!(info.kind, FileKind::Dir, "{} should be a directory", dir.path);
            assert_eq!(info.mode, dir.mode, "mode mismatch for {}", dir.path);
        }

        for file in INIT_FILES {
            let info = fs.metadata(file.path)?;
            assert_eq!(info.kind, FileKind::File, "{} should be a file", file.path);
            assert_eq!(info.mode, file.mode, "mode mismatch for {}", file.path);
            assert!(
                info.size >= file.contents.len() as u64,
                "size mismatch for {}",
                file.path
            );
        }

        for device in INIT_DEVICES {
            let info = fs.metadata(device.path)?;
            assert_eq!(
                info.kind,
                FileKind::CharDevice,
                "{} should be a character device",
                device.path
            );
            assert_eq!(info.mode, device.mode, "mode mismatch for {}", device.path);
        }

        Ok(())
    }

    #[test]
    fn init_is_idempotent() -> Result<()> {
        let fs = MemFs::new();
        init_database(&fs, false)?;

        // Existing content survives a re-run.
        fs.replace_file(WORLD_PATH, b"busybox\n", 0o644)?;
        init_database(&fs, false)?;

        assert_eq!(fs.read_file(WORLD_PATH)?, b"busybox\n");

        Ok(())
    }

    /// A filesystem on which device node creation always fails, as it
    /// does for unprivileged processes on a real kernel.
    struct NoMknodFs(MemFs);

    impl crate::fs::ApkFs for NoMknodFs {
        fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()> {
            self.0.mkdir_all(path, mode)
        }
        fn write_file(&self, path: &str, data: &[u8], mode: u32) -> io::Result<()> {
            self.0.write_file(path, data, mode)
        }
        fn replace_file(&self, path: &str, data: &[u8], mode: u32) -> io::Result<()> {
            self.0.replace_file(path, data, mode)
        }
        fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
            self.0.read_file(path)
        }
        fn read_dir(&self, path: &str) -> io::Result<Vec<crate::fs::DirEntryInfo>> {
            self.0.read_dir(path)
        }
        fn metadata(&self, path: &str) -> io::Result<crate::fs::FileInfo> {
            self.0.metadata(path)
        }
        fn exists(&self, path: &str) -> bool {
            self.0.exists(path)
        }
        fn symlink(&self, target: &str, link: &str) -> io::Result<()> {
            self.0.symlink(target, link)
        }
        fn hard_link(&self, target: &str, link: &str) -> io::Result<()> {
            self.0.hard_link(target, link)
        }
        fn mknod_char(&self, _: &str, _: u32, _: u32, _: u32) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "Operation not permitted",
            ))
        }
        fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()> {
            self.0.chown(path, uid, gid)
        }
        fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> io::Result<()> {
            self.0.set_xattr(path, name, value)
        }
        fn set_mtime(&self, path: &str, mtime: std::time::SystemTime) -> io::Result<()> {
            self.0.set_mtime(path, mtime)
        }
    }

    #[test]
    fn mknod_tolerance() {
        let fs = NoMknodFs(MemFs::new());

        // Strict mode surfaces the failure.
        assert!(matches!(
            init_database(&fs, false).unwrap_err(),
            ApkError::Unsupported(_)
        ));

        // Best-effort mode records a warning and continues.
        let fs = NoMknodFs(MemFs::new());
        init_database(&fs, true).unwrap();
        assert!(!fs.exists("dev/null"));
        assert!(fs.exists(WORLD_PATH));
    }

    #[test]
    fn world_is_sorted_not_deduplicated() -> Result<()> {
        let fs = MemFs::new();
        fs.mkdir_all("etc/apk", 0o755)?;

        let packages = vec![
            "foo".to_string(),
            "bar".to_string(),
            "abc".to_string(),
            "zulu".to_string(),
        ];
        write_world(&fs, &packages)?;

        assert_eq!(fs.read_file(WORLD_PATH)?, b"abc\nbar\nfoo\nzulu\n");

        // Atoms with versions sort lexicographically, and a bare atom
        // does not collapse into its versioned sibling.
        let packages = vec![
            "foo=1.0.0".to_string(),
            "bar=1.2.3".to_string(),
            "abc".to_string(),
            "zulu".to_string(),
            "foo".to_string(),
        ];
        write_world(&fs, &packages)?;

        assert_eq!(
            fs.read_file(WORLD_PATH)?,
            b"abc\nbar=1.2.3\nfoo\nfoo=1.0.0\nzulu\n"
        );

        Ok(())
    }

    #[test]
    fn empty_world_permitted() -> Result<()> {
        let fs = MemFs::new();
        fs.mkdir_all("etc/apk", 0o755)?;

        write_world(&fs, &[])?;
        assert_eq!(fs.read_file(WORLD_PATH)?, b"\n");

        Ok(())
    }

    #[test]
    fn repositories_keep_order_and_reject_empty() -> Result<()> {
        let fs = MemFs::new();
        fs.mkdir_all("etc/apk", 0o755)?;

        assert!(matches!(
            write_repositories(&fs, &[]).unwrap_err(),
            ApkError::InvalidInput(_)
        ));

        let repos = vec![
            "https://dl-cdn.alpinelinux.org/alpine/v3.16/main".to_string(),
            "https://dl-cdn.alpinelinux.org/alpine/v3.16/community".to_string(),
        ];
        write_repositories(&fs, &repos)?;

        assert_eq!(
            fs.read_file(REPOSITORIES_PATH)?,
            b"https://dl-cdn.alpinelinux.org/alpine/v3.16/main\nhttps://dl-cdn.alpinelinux.org/alpine/v3.16/community\n"
        );

        Ok(())
    }

    fn sample_package() -> Package {
        Package {
            name: "hello".to_string(),
            version: "1.0.0-r0".to_string(),
            arch: Some(crate::package::Arch::X86_64),
            checksum: vec![0xab; 20],
            description: "test package".to_string(),
            license: "MIT".to_string(),
            dependencies: vec!["musl".to_string(), "so:libc.musl.so.1".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn stanza_rendering() {
        let package = sample_package();

        let files = vec![
            InstalledFile {
                path: "usr/bin".to_string(),
                kind: InstalledFileKind::Dir,
                mode: 0o755,
                uid: 0,
                gid: 0,
                digest: None,
            },
            InstalledFile {
                path: "usr/bin/hello".to_string(),
                kind: InstalledFileKind::File,
                mode: 0o755,
                uid: 0,
                gid: 0,
                digest: Some(ContentDigest::sha1(b"hi")),
            },
        ];

        let stanza = render_stanza(&package, &files);
        let lines = stanza.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], format!("C:Q1{}", base64::encode(vec![0xab; 20])));
        assert_eq!(lines[1], "P:hello");
        assert_eq!(lines[2], "V:1.0.0-r0");
        assert_eq!(lines[3], "A:x86_64");
        assert_eq!(lines[4], "T:test package");
        assert_eq!(lines[5], "L:MIT");
        assert_eq!(lines[6], "D:musl so:libc.musl.so.1");
        assert_eq!(lines[7], "F:usr/bin");
        assert_eq!(lines[8], "R:hello");
        assert_eq!(lines[9], "a:0:0:755");
        assert!(lines[10].starts_with("Z:Q1"));

        // Blank line terminated.
        assert!(stanza.ends_with("\n\n"));
    }

    #[test]
    fn installed_appends_stanzas() -> Result<()> {
        let fs = MemFs::new();
        init_database(&fs, false)?;

        let package = sample_package();
        add_installed_package(&fs, &package, &[])?;

        let mut second = sample_package();
        second.name = "world".to_string();
        add_installed_package(&fs, &second, &[])?;

        let installed = String::from_utf8(fs.read_file(INSTALLED_PATH)?).unwrap();
        let stanzas = installed
            .split("\n\n")
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        assert_eq!(stanzas.len(), 2);
        assert!(stanzas[0].contains("P:hello"));
        assert!(stanzas[1].contains("P:world"));

        Ok(())
    }

    #[test]
    fn scripts_tar_accumulates() -> Result<()> {
        let fs = MemFs::new();
        init_database(&fs, false)?;

        let package = sample_package();
        append_scripts(
            &fs,
            &package,
            &[("post-install".to_string(), b"#!/bin/sh\n".to_vec())],
        )?;

        let mut second = sample_package();
        second.name = "world".to_string();
        append_scripts(
            &fs,
            &second,
            &[("pre-install".to_string(), b"#!/bin/sh\n".to_vec())],
        )?;

        let archive_bytes = fs.read_file(SCRIPTS_TAR_PATH)?;
        let mut archive = tar::Archive::new(&archive_bytes[..]);

        let names = archive
            .entries()?
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect::<Vec<_>>();

        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("hello-1.0.0-r0.Q1"));
        assert!(names[0].ends_with(".post-install"));
        assert!(names[1].starts_with("world-1.0.0-r0.Q1"));
        assert!(names[1].ends_with(".pre-install"));

        Ok(())
    }

    #[test]
    fn triggers_registry() -> Result<()> {
        let fs = MemFs::new();
        init_database(&fs, false)?;

        let package = sample_package();
        append_triggers(&fs, &package, &["/bin".to_string(), "/usr/bin".to_string()])?;
        append_triggers(&fs, &package, &[])?;

        let contents = String::from_utf8(fs.read_file(TRIGGERS_PATH)?).unwrap();
        assert_eq!(
            contents,
            format!("Q1{} /bin /usr/bin\n", base64::encode(vec![0xab; 20]))
        );

        Ok(())
    }
}
