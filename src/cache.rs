// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! On-disk package cache.

Fetched package bytes are cached under a caller-supplied root directory,
keyed by the URL-encoded repository base URI, the architecture, and the
package filename:

```text
<root>/<urlencode(repo-uri)>/<arch>/<name>-<version>.apk
<root>/<urlencode(repo-uri)>/<arch>/<name>-<version>.apk.etag
<root>/<urlencode(repo-uri)>/<arch>/<name>-<version>/        (expanded)
```

The `.etag` sidecar stores the validator the byte file was fetched (or
revalidated) under and drives conditional requests. The sidecar is always
written before the byte file is renamed into place, so a reader never
observes a byte file beside an ETag that was not valid for it.

The cache never deletes entries; eviction is the caller's concern.
*/

use {
    crate::{
        apkfile::ApkSegments,
        error::{ApkError, Result},
        repository::RepositoryPackage,
        transport::{Client, FetchOutcome, HttpResponse},
    },
    std::{
        fs,
        io::Write,
        path::{Path, PathBuf},
    },
    tracing::{debug, warn},
    url::Url,
};

/// Filename of the signature segment inside an expanded cache directory.
pub const EXPANDED_SIGNATURE: &str = "signature.tar.gz";
/// Filename of the control segment inside an expanded cache directory.
pub const EXPANDED_CONTROL: &str = "control.tar.gz";
/// Filename of the data segment inside an expanded cache directory.
pub const EXPANDED_DATA: &str = "data.tar.gz";
/// Directory holding the unpacked control tree inside an expanded cache
/// directory.
pub const EXPANDED_CONTROL_DIR: &str = "control";

fn cache_error(path: &Path, e: std::io::Error) -> ApkError {
    ApkError::Cache(path.display().to_string(), e)
}

/// A package read back from the cache's expanded form.
pub struct CachedPackage {
    /// The expanded cache directory the package was loaded from.
    pub dir: PathBuf,
    /// The package's segments.
    pub segments: ApkSegments,
}

impl CachedPackage {
    /// Reassemble the original `.apk` byte stream.
    pub fn apk_bytes(&self) -> Vec<u8> {
        self.segments.apk_bytes()
    }
}

/// The on-disk package cache.
#[derive(Clone, Debug)]
pub struct PackageCache {
    root: PathBuf,
    demote_on_error: bool,
}

impl PackageCache {
    /// Construct a cache rooted at the given directory.
    ///
    /// With `demote_on_error` set, an unusable cache path degrades to
    /// fetching without the cache instead of failing the operation.
    pub fn new(root: impl AsRef<Path>, demote_on_error: bool) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            demote_on_error,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The cache directory for a package's repository and architecture.
    pub fn package_dir(&self, package: &RepositoryPackage) -> PathBuf {
        let encoded: String =
            url::form_urlencoded::byte_serialize(package.repository().uri.as_bytes()).collect();

        self.root.join(encoded).join(package.arch().as_str())
    }

    /// The cached byte file for a package.
    pub fn package_file(&self, package: &RepositoryPackage) -> PathBuf {
        self.package_dir(package).join(package.package().filename())
    }

    /// The ETag sidecar for a package's byte file.
    pub fn etag_file(&self, package: &RepositoryPackage) -> PathBuf {
        let mut name = package.package().filename();
        name.push_str(".etag");

        self.package_dir(package).join(name)
    }

    /// The expanded directory for a package, named by stripping `.apk`.
    ///
    /// A package name that itself ends in `.apk` collides here; that is
    /// an invariant of the naming scheme.
    pub fn expanded_dir(&self, package: &RepositoryPackage) -> PathBuf {
        let filename = package.package().filename();
        let stem = filename.strip_suffix(".apk").unwrap_or(&filename);

        self.package_dir(package).join(stem)
    }

    /// Fetch a package's bytes, consulting and maintaining the cache.
    pub async fn fetch(&self, client: &Client, package: &RepositoryPackage) -> Result<Vec<u8>> {
        match self.fetch_inner(client, package).await {
            Err(ApkError::Cache(path, e)) if self.demote_on_error => {
                warn!(
                    "cache path {} unusable ({:?}); fetching without cache",
                    path, e
                );

                let url = Url::parse(&package.url())?;

                Ok(client.get(&url).await?.body)
            }
            other => other,
        }
    }

    async fn fetch_inner(&self, client: &Client, package: &RepositoryPackage) -> Result<Vec<u8>> {
        let url = Url::parse(&package.url())?;
        let apk_path = self.package_file(package);
        let etag_path = self.etag_file(package);

        let cached = apk_path.is_file();
        let etag = match fs::read_to_string(&etag_path) {
            Ok(etag) => Some(etag.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(cache_error(&etag_path, e)),
        };

        match (cached, etag) {
            (true, Some(etag)) => match client.get_conditional(&url, &etag).await {
                Ok(FetchOutcome::NotModified) => {
                    debug!("cache hit for {} (etag {} current)", package, etag);

                    fs::read(&apk_path).map_err(|e| cache_error(&apk_path, e))
                }
                Ok(FetchOutcome::New(response)) => {
                    debug!("cache stale for {}; replacing", package);

                    let body = response.body.clone();
                    self.store(package, response)?;

                    Ok(body)
                }
                Err(ApkError::Network(url, reason)) => {
                    // Stale-while-disconnected: an unreachable mirror
                    // falls back to the cached copy.
                    warn!("fetch of {} failed ({}); serving cached copy", url, reason);

                    fs::read(&apk_path).map_err(|e| cache_error(&apk_path, e))
                }
                Err(e) => Err(e),
            },
            (true, None) => {
                // No validator stored, so there is nothing to revalidate
                // against; serve the cached bytes without a network call.
                debug!("cache hit for {} (no etag)", package);

                fs::read(&apk_path).map_err(|e| cache_error(&apk_path, e))
            }
            (false, _) => {
                let response = client.get(&url).await?;
                let body = response.body.clone();

                self.store(package, response)?;

                Ok(body)
            }
        }
    }

    /// Write a fetched response into the cache.
    ///
    /// The byte file is written to a temporary sibling and renamed into
    /// place. The ETag sidecar is written (or removed) before that rename
    /// so the sidecar is never newer than the bytes beside it.
    fn store(&self, package: &RepositoryPackage, response: HttpResponse) -> Result<()> {
        let dir = self.package_dir(package);
        fs::create_dir_all(&dir).map_err(|e| cache_error(&dir, e))?;

        let apk_path = self.package_file(package);
        let etag_path = self.etag_file(package);

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| cache_error(&dir, e))?;
        tmp.write_all(&response.body)
            .map_err(|e| cache_error(&apk_path, e))?;

        match response.etag {
            Some(etag) => {
                let mut etag_tmp =
                    tempfile::NamedTempFile::new_in(&dir).map_err(|e| cache_error(&dir, e))?;
                etag_tmp
                    .write_all(etag.as_bytes())
                    .map_err(|e| cache_error(&etag_path, e))?;
                etag_tmp
                    .persist(&etag_path)
                    .map_err(|e| cache_error(&etag_path, e.error))?;
            }
            None => match fs::remove_file(&etag_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(cache_error(&etag_path, e)),
            },
        }

        tmp.persist(&apk_path)
            .map_err(|e| cache_error(&apk_path, e.error))?;

        Ok(())
    }

    /// Load a package from its expanded cache directory, if complete.
    ///
    /// Returns `None` when the expanded form is absent. A present form is
    /// revalidated against the package's control checksum; mismatching
    /// content is treated as absent.
    pub fn expanded(&self, package: &RepositoryPackage) -> Result<Option<CachedPackage>> {
        let dir = self.expanded_dir(package);

        if !dir.is_dir() {
            return Ok(None);
        }

        let control = match fs::read(dir.join(EXPANDED_CONTROL)) {
            Ok(control) => control,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cache_error(&dir, e)),
        };

        let data = match fs::read(dir.join(EXPANDED_DATA)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cache_error(&dir, e)),
        };

        let signature = match fs::read(dir.join(EXPANDED_SIGNATURE)) {
            Ok(signature) => Some(signature),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(cache_error(&dir, e)),
        };

        let segments = ApkSegments {
            signature,
            control,
            data,
        };

        let checksum = &package.package().checksum;

        if !checksum.is_empty() && !segments.control_digest().matches_bytes(checksum) {
            warn!("expanded cache for {} fails checksum; ignoring", package);

            return Ok(None);
        }

        Ok(Some(CachedPackage { dir, segments }))
    }

    /// Write a package's expanded form into the cache.
    ///
    /// The directory is populated at a temporary sibling and renamed into
    /// place, so readers only ever observe a complete expansion. Losing a
    /// rename race to a concurrent expansion is not an error.
    pub fn write_expanded(
        &self,
        package: &RepositoryPackage,
        segments: &ApkSegments,
    ) -> Result<CachedPackage> {
        let parent = self.package_dir(package);
        fs::create_dir_all(&parent).map_err(|e| cache_error(&parent, e))?;

        let dir = self.expanded_dir(package);

        if !dir.is_dir() {
            let tmp = tempfile::Builder::new()
                .prefix(".expand-")
                .tempdir_in(&parent)
                .map_err(|e| cache_error(&parent, e))?;

            if let Some(signature) = &segments.signature {
                fs::write(tmp.path().join(EXPANDED_SIGNATURE), signature)
                    .map_err(|e| cache_error(tmp.path(), e))?;
            }

            fs::write(tmp.path().join(EXPANDED_CONTROL), &segments.control)
                .map_err(|e| cache_error(tmp.path(), e))?;
            fs::write(tmp.path().join(EXPANDED_DATA), &segments.data)
                .map_err(|e| cache_error(tmp.path(), e))?;

            let control_dir = tmp.path().join(EXPANDED_CONTROL_DIR);
            fs::create_dir(&control_dir).map_err(|e| cache_error(&control_dir, e))?;

            for (name, content) in segments.control_entries()? {
                // Control archives are flat; anything nested would have
                // been produced by a hostile package.
                if name.contains('/') || name.is_empty() {
                    continue;
                }

                fs::write(control_dir.join(&name), content)
                    .map_err(|e| cache_error(&control_dir, e))?;
            }

            let tmp_path = tmp.into_path();

            match fs::rename(&tmp_path, &dir) {
                Ok(()) => {}
                Err(e) if dir.is_dir() => {
                    debug!("lost expansion race for {}: {:?}", package, e);
                    let _ = fs::remove_dir_all(&tmp_path);
                }
                Err(e) => return Err(cache_error(&dir, e)),
            }
        }

        self.expanded(package)?.ok_or_else(|| {
            ApkError::Cache(
                dir.display().to_string(),
                std::io::Error::new(std::io::ErrorKind::Other, "expanded form incomplete"),
            )
        })
    }
}
