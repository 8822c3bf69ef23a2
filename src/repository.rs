// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository model.

A [Repository] is a base URI under which `<arch>/APKINDEX.tar.gz` and the
package files live. Index decoding is performed elsewhere; this crate
consumes the decoded catalog through [ApkIndex] and addresses a concrete
fetchable package with [RepositoryPackage].
*/

use {
    crate::package::{Arch, Package},
    std::sync::Arc,
};

/// A package repository, identified by its base URI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Repository {
    pub uri: String,
}

impl Repository {
    pub fn new(uri: impl ToString) -> Self {
        Self {
            uri: uri.to_string(),
        }
    }

    /// Combine this repository with its decoded index.
    pub fn with_index(&self, index: &ApkIndex) -> RepositoryWithIndex {
        RepositoryWithIndex {
            repository: self.clone(),
            packages: index.packages.clone(),
        }
    }

    /// The URL of this repository's index for an architecture.
    pub fn index_url(&self, arch: Arch) -> String {
        format!("{}/{}/APKINDEX.tar.gz", self.uri.trim_end_matches('/'), arch)
    }
}

/// A decoded `APKINDEX` catalog.
///
/// Produced by the index parser, which is outside this crate; carried
/// here only as the package list it yields.
#[derive(Clone, Debug, Default)]
pub struct ApkIndex {
    pub description: String,
    pub packages: Vec<Arc<Package>>,
}

/// A [Repository] joined with its decoded package list.
#[derive(Clone, Debug)]
pub struct RepositoryWithIndex {
    repository: Repository,
    packages: Vec<Arc<Package>>,
}

impl RepositoryWithIndex {
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn packages(&self) -> &[Arc<Package>] {
        &self.packages
    }
}

/// A package addressed within a concrete repository.
///
/// Carries everything needed to fetch the package file.
#[derive(Clone, Debug)]
pub struct RepositoryPackage {
    package: Arc<Package>,
    repository: Repository,
}

impl RepositoryPackage {
    pub fn new(package: Arc<Package>, repository: &RepositoryWithIndex) -> Self {
        Self {
            package,
            repository: repository.repository().clone(),
        }
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// The architecture directory this package is published under.
    pub fn arch(&self) -> Arch {
        self.package.arch.unwrap_or_default()
    }

    /// The fully qualified URL of the package file:
    /// `<repo-uri>/<arch>/<name>-<version>.apk`.
    pub fn url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.repository.uri.trim_end_matches('/'),
            self.arch(),
            self.package.filename()
        )
    }
}

impl std::fmt::Display for RepositoryPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.package)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn package_url() {
        let package = Arc::new(Package {
            name: "alpine-baselayout".to_string(),
            version: "3.2.0-r23".to_string(),
            arch: Some(Arch::X86_64),
            ..Default::default()
        });

        let repo = Repository::new("https://dl-cdn.alpinelinux.org/alpine/v3.16/main");
        let with_index = repo.with_index(&ApkIndex {
            description: String::new(),
            packages: vec![package.clone()],
        });

        let rp = RepositoryPackage::new(package, &with_index);

        assert_eq!(
            rp.url(),
            "https://dl-cdn.alpinelinux.org/alpine/v3.16/main/x86_64/alpine-baselayout-3.2.0-r23.apk"
        );
    }

    #[test]
    fn index_url() {
        let repo = Repository::new("https://dl-cdn.alpinelinux.org/alpine/v3.16/main/");

        assert_eq!(
            repo.index_url(Arch::Aarch64),
            "https://dl-cdn.alpinelinux.org/alpine/v3.16/main/aarch64/APKINDEX.tar.gz"
        );
    }
}
