// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Keyring management.

Trusted RSA public keys live as PEM files in `etc/apk/keys/`, each named
by the basename of the URL or local path it came from. Signature
verification selects keys from this directory by the `<keyname>` embedded
in a package's `.SIGN.RSA.<keyname>` entry.
*/

use {
    crate::{
        error::{ApkError, Result},
        fs::{ApkFs, FileKind},
        package::Arch,
        transport::Client,
    },
    percent_encoding::percent_decode_str,
    tracing::warn,
    url::Url,
};

/// Host directory scanned for distribution keys when no explicit
/// locations are given. Keys for a target architecture live in a
/// subdirectory named after it.
pub const DEFAULT_SYSTEM_KEYRING_PATH: &str = "usr/share/apk/keys";

/// Filename suffix of APK public keys.
const KEY_SUFFIX: &str = ".rsa.pub";

/// The canonical filename for a key source: the final path segment,
/// percent-decoded for URLs.
pub(crate) fn key_basename(source: &str) -> Result<String> {
    let basename = if source.starts_with("http://") || source.starts_with("https://") {
        let url = Url::parse(source)?;

        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy().to_string())
            .unwrap_or_default()
    } else {
        source
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    };

    if basename.is_empty() {
        Err(ApkError::InvalidInput(format!(
            "cannot derive key name from: {}",
            source
        )))
    } else {
        Ok(basename)
    }
}

/// Obtain one key's name and PEM content.
///
/// HTTP and HTTPS sources are fetched through the authenticated client
/// (credentials may ride in the URL userinfo); anything else is read as a
/// local path on the host filesystem.
pub(crate) async fn fetch_key(client: &Client, source: &str) -> Result<(String, Vec<u8>)> {
    let name = key_basename(source)?;

    if source.starts_with("http://") || source.starts_with("https://") {
        let url = Url::parse(source)?;
        let response = client.get(&url).await?;

        Ok((name, response.body))
    } else {
        let content = std::fs::read(source)
            .map_err(|e| ApkError::Keyring(format!("reading key {}: {:?}", source, e)))?;

        Ok((name, content))
    }
}

/// Discover `*.rsa.pub` keys in system keyring directories.
///
/// With no explicit locations, scans the target architecture's
/// subdirectory of [DEFAULT_SYSTEM_KEYRING_PATH]. Missing directories are
/// skipped with a warning; finding no key at all is an error.
pub(crate) fn discover_system_keys(
    fs: &dyn ApkFs,
    arch: Arch,
    locations: &[String],
) -> Result<Vec<String>> {
    let default = format!("{}/{}", DEFAULT_SYSTEM_KEYRING_PATH, arch);
    let locations = if locations.is_empty() {
        std::slice::from_ref(&default)
    } else {
        locations
    };

    let mut ring = vec![];

    for location in locations {
        let entries = match fs.read_dir(location) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("keyring directory {} does not exist", location);
                continue;
            }
            Err(e) => {
                return Err(ApkError::Keyring(format!(
                    "reading keyring directory {}: {:?}",
                    location, e
                )));
            }
        };

        for entry in entries {
            if entry.kind == FileKind::File && entry.name.ends_with(KEY_SUFFIX) {
                ring.push(format!("{}/{}", location.trim_end_matches('/'), entry.name));
            }
        }
    }

    if ring.is_empty() {
        Err(ApkError::Keyring(
            "no suitable keyring directory found".to_string(),
        ))
    } else {
        Ok(ring)
    }
}

/// Read the installed keyring: `(name, PEM content)` for every file in
/// `etc/apk/keys/`. An absent keyring directory yields an empty list.
pub(crate) fn read_keyring(fs: &dyn ApkFs) -> Result<Vec<(String, Vec<u8>)>> {
    let entries = match fs.read_dir(crate::database::KEYS_PATH) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(ApkError::Keyring(format!(
                "reading keyring directory: {:?}",
                e
            )));
        }
    };

    let mut keys = vec![];

    for entry in entries {
        if entry.kind != FileKind::File {
            continue;
        }

        let path = format!("{}/{}", crate::database::KEYS_PATH, entry.name);
        let content = fs
            .read_file(&path)
            .map_err(|e| ApkError::Keyring(format!("reading key {}: {:?}", path, e)))?;

        keys.push((entry.name, content));
    }

    Ok(keys)
}
