// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! In-memory filesystem backend used by tests. */

use {
    super::{clean_path, ApkFs, DirEntryInfo, FileInfo, FileKind},
    std::{
        collections::BTreeMap,
        io,
        sync::{Arc, Mutex},
        time::SystemTime,
    },
};

#[derive(Clone, Debug)]
enum NodeKind {
    Dir,
    File(Arc<Mutex<Vec<u8>>>),
    Symlink(String),
    CharDevice { major: u32, minor: u32 },
}

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: Option<SystemTime>,
    xattrs: BTreeMap<String, Vec<u8>>,
}

impl Node {
    fn new(kind: NodeKind, mode: u32) -> Self {
        Self {
            kind,
            mode,
            uid: 0,
            gid: 0,
            mtime: None,
            xattrs: BTreeMap::new(),
        }
    }

    fn kind(&self) -> FileKind {
        match &self.kind {
            NodeKind::Dir => FileKind::Dir,
            NodeKind::File(_) => FileKind::File,
            NodeKind::Symlink(_) => FileKind::Symlink,
            NodeKind::CharDevice { .. } => FileKind::CharDevice,
        }
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such entry: {}", path))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[0..pos],
        None => "",
    }
}

/// An [ApkFs] holding all content in memory.
///
/// Hardlinked files share their backing buffer. The root directory exists
/// implicitly. Contents are stored in a sorted map, so directory listings
/// and debug walks are deterministic.
#[derive(Default)]
pub struct MemFs {
    nodes: Mutex<BTreeMap<String, Node>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_nodes<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Node>) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "filesystem lock poisoned"))?;

        f(&mut nodes)
    }

    fn insert_node(&self, path: &str, node: Node) -> io::Result<()> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| {
            let parent = parent_of(&path);

            if !parent.is_empty() {
                match nodes.get(parent) {
                    Some(p) if matches!(p.kind, NodeKind::Dir) => {}
                    Some(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            format!("parent is not a directory: {}", parent),
                        ));
                    }
                    None => return Err(not_found(parent)),
                }
            }

            if nodes.contains_key(&path) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("entry already exists: {}", path),
                ));
            }

            nodes.insert(path, node);

            Ok(())
        })
    }
}

impl ApkFs for MemFs {
    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| {
            let mut prefix = String::new();

            for part in path.split('/').filter(|p| !p.is_empty()) {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);

                match nodes.get(&prefix) {
                    Some(node) if matches!(node.kind, NodeKind::Dir) => {}
                    Some(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("entry exists and is not a directory: {}", prefix),
                        ));
                    }
                    None => {
                        nodes.insert(prefix.clone(), Node::new(NodeKind::Dir, mode));
                    }
                }
            }

            Ok(())
        })
    }

    fn write_file(&self, path: &str, data: &[u8], mode: u32) -> io::Result<()> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| {
            let parent = parent_of(&path);

            if !parent.is_empty() {
                match nodes.get(parent) {
                    Some(p) if matches!(p.kind, NodeKind::Dir) => {}
                    Some(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            format!("parent is not a directory: {}", parent),
                        ));
                    }
                    None => return Err(not_found(parent)),
                }
            }

            match nodes.get_mut(&path) {
                Some(node) => match &node.kind {
                    NodeKind::File(content) => {
                        *content
                            .lock()
                            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))? =
                            data.to_vec();
                        node.mode = mode;
                    }
                    _ => {
                        return Err(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("entry exists and is not a file: {}", path),
                        ));
                    }
                },
                None => {
                    nodes.insert(
                        path,
                        Node::new(NodeKind::File(Arc::new(Mutex::new(data.to_vec()))), mode),
                    );
                }
            }

            Ok(())
        })
    }

    fn replace_file(&self, path: &str, data: &[u8], mode: u32) -> io::Result<()> {
        // The map mutex makes the whole replacement a single atomic step.
        self.write_file(path, data, mode)
    }

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| match nodes.get(&path) {
            Some(node) => match &node.kind {
                NodeKind::File(content) => Ok(content
                    .lock()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))?
                    .clone()),
                _ => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("not a regular file: {}", path),
                )),
            },
            None => Err(not_found(&path)),
        })
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| {
            if !path.is_empty() {
                match nodes.get(&path) {
                    Some(node) if matches!(node.kind, NodeKind::Dir) => {}
                    Some(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            format!("not a directory: {}", path),
                        ));
                    }
                    None => return Err(not_found(&path)),
                }
            }

            let prefix = if path.is_empty() {
                String::new()
            } else {
                format!("{}/", path)
            };

            let entries = nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .filter(|(k, _)| !k[prefix.len()..].contains('/'))
                .map(|(k, node)| DirEntryInfo {
                    name: k[prefix.len()..].to_string(),
                    kind: node.kind(),
                })
                .collect();

            Ok(entries)
        })
    }

    fn metadata(&self, path: &str) -> io::Result<FileInfo> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| {
            if path.is_empty() {
                return Ok(FileInfo {
                    kind: FileKind::Dir,
                    mode: 0o755,
                    size: 0,
                    uid: 0,
                    gid: 0,
                });
            }

            let node = nodes.get(&path).ok_or_else(|| not_found(&path))?;

            let size = match &node.kind {
                NodeKind::File(content) => content
                    .lock()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))?
                    .len() as u64,
                NodeKind::Symlink(target) => target.len() as u64,
                _ => 0,
            };

            Ok(FileInfo {
                kind: node.kind(),
                mode: node.mode,
                size,
                uid: node.uid,
                gid: node.gid,
            })
        })
    }

    fn exists(&self, path: &str) -> bool {
        let path = match clean_path(path) {
            Ok(path) => path,
            Err(_) => return false,
        };

        if path.is_empty() {
            return true;
        }

        self.with_nodes(|nodes| Ok(nodes.contains_key(&path)))
            .unwrap_or(false)
    }

    fn symlink(&self, target: &str, link: &str) -> io::Result<()> {
        self.insert_node(
            link,
            Node::new(NodeKind::Symlink(target.to_string()), 0o777),
        )
    }

    fn hard_link(&self, target: &str, link: &str) -> io::Result<()> {
        let target = clean_path(target)?;

        let node = self.with_nodes(|nodes| {
            let node = nodes.get(&target).ok_or_else(|| not_found(&target))?;

            match &node.kind {
                // The backing buffer is shared, as on a real filesystem.
                NodeKind::File(_) => Ok(node.clone()),
                _ => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("hardlink target is not a file: {}", target),
                )),
            }
        })?;

        self.insert_node(link, node)
    }

    fn mknod_char(&self, path: &str, mode: u32, major: u32, minor: u32) -> io::Result<()> {
        self.insert_node(path, Node::new(NodeKind::CharDevice { major, minor }, mode))
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| {
            let node = nodes.get_mut(&path).ok_or_else(|| not_found(&path))?;
            node.uid = uid;
            node.gid = gid;

            Ok(())
        })
    }

    fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> io::Result<()> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| {
            let node = nodes.get_mut(&path).ok_or_else(|| not_found(&path))?;
            node.xattrs.insert(name.to_string(), value.to_vec());

            Ok(())
        })
    }

    fn set_mtime(&self, path: &str, mtime: SystemTime) -> io::Result<()> {
        let path = clean_path(path)?;

        self.with_nodes(|nodes| {
            let node = nodes.get_mut(&path).ok_or_else(|| not_found(&path))?;
            node.mtime = Some(mtime);

            Ok(())
        })
    }
}
