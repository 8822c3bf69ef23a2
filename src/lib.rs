// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Alpine Linux (APK) packaging primitives.

This crate builds minimal Alpine Linux root filesystem images from a
declarative description: given package references and repository URIs, it
fetches package files from remote mirrors, verifies their signatures, and
unpacks them into a target filesystem, including the Alpine package
database metadata that makes the result a valid, inspectable APK
installation.

The canonical home of this crate is <https://github.com/indygreg/PyOxidizer>.
Please file issues and pull requests there.

# A Tour of Functionality

The [apk::Apk] handle is the entry point. Constructed over a virtual
filesystem, it initializes the APK database tree ([apk::Apk::init_db]),
maintains the `world`, `repositories`, and keyring state files, and
installs packages end to end ([apk::Apk::install_package]): fetch,
verify, expand, record.

The [fs] module defines the [fs::ApkFs] capability interface over a
writable filesystem, with [fs::DiskFs] writing through to a host
directory and [fs::MemFs] holding everything in memory for tests.

Package files are the concatenation of up to three gzip streams
(signature, control, data) with no explicit framing. The [apkfile]
module recovers the segment boundaries ([apkfile::ApkSegments::split]),
enforces the control checksum, and verifies RSA signatures against the
installed keyring.

Remote I/O goes through the [transport] module: [transport::Client]
resolves per-host Basic auth credentials via the [auth::Authenticator]
trait and speaks plain or conditional (`If-None-Match`) GET. The
transport itself is pluggable; [transport::ReqwestTransport] talks to
real servers and [transport::FilesystemTransport] serves local
fixtures.

Fetched packages land in an on-disk cache ([cache::PackageCache]) keyed
by repository URI, architecture, and filename, revalidated with ETag
sidecars, and optionally held in a pre-expanded directory form.

The [database] module owns the on-disk database layout: the static
`InitDB` tree, `etc/apk/world` and `etc/apk/repositories` rewriting, the
`lib/apk/db/installed` stanza format, and the `scripts.tar` and
`triggers` registries. The [install] module materializes data-segment
tar entries onto the filesystem with modes, ownership, timestamps, and
xattrs.

[package::Package], [repository::Repository], and
[repository::RepositoryPackage] model the catalog entities produced by
the (external) APKINDEX parser. [version::ApkVersion] implements the APK
version grammar and ordering.

# Scope

Dependency resolution, APKINDEX decoding, and image assembly CLIs are
intentionally outside this crate; they consume the interfaces above.
*/

pub mod apk;
pub mod apkfile;
pub mod auth;
pub mod cache;
pub mod database;
pub mod error;
pub mod fs;
pub mod install;
pub mod io;
pub mod keyring;
pub mod package;
pub mod repository;
pub mod transport;
pub mod version;

pub use crate::{
    apk::{Apk, ApkBuilder},
    error::{ApkError, Result},
};
