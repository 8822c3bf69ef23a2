// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APK package file reading.

An `.apk` file is a concatenation of up to three independently valid gzip
streams:

1. An optional *signature* segment whose tar entries are named `.SIGN.*`.
2. The *control* segment, a tar archive holding `.PKGINFO` and optional
   install scripts. The SHA-1 over this segment's raw gzip bytes is the
   package's control checksum.
3. The *data* segment, a tar archive of payload files.

The segment boundaries are not framed. [ApkSegments::split] recovers them
by decoding each gzip member to its natural end over a cursor that only
consumes the member's own bytes, leaving the residual input positioned at
the next member. The gzip magic (`1f 8b`) is checked on the residual as a
cheap sanity guard against malformed concatenations.
*/

use {
    crate::{
        error::{ApkError, Result},
        io::ContentDigest,
    },
    flate2::bufread::GzDecoder,
    rsa::pkcs8::DecodePublicKey,
    std::io::{Cursor, Read},
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Prefix of tar entry names in the signature segment.
const SIGNATURE_PREFIX: &str = ".SIGN.";

/// Prefix of RSA signature entries: `.SIGN.RSA.<keyname>`.
const RSA_SIGNATURE_PREFIX: &str = ".SIGN.RSA.";

/// Control archive entry names that are install scripts, in the order
/// APK runs them.
pub const INSTALL_SCRIPT_NAMES: &[&str] = &[
    ".pre-install",
    ".post-install",
    ".pre-upgrade",
    ".post-upgrade",
    ".pre-deinstall",
    ".post-deinstall",
    ".trigger",
];

/// Decode one gzip member, consuming exactly its bytes from the cursor.
fn read_gzip_member(name: &str, cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(&mut *cursor);
    let mut decompressed = vec![];

    decoder.read_to_end(&mut decompressed).map_err(|e| {
        ApkError::Integrity(name.to_string(), format!("corrupt gzip stream: {:?}", e))
    })?;

    Ok(decompressed)
}

/// The name of the first entry of a tar archive held in memory.
fn first_entry_name(tar_bytes: &[u8]) -> Result<Option<String>> {
    let mut archive = tar::Archive::new(tar_bytes);

    match archive.entries()?.next() {
        Some(entry) => Ok(Some(entry?.path()?.to_string_lossy().to_string())),
        None => Ok(None),
    }
}

/// An RSA signature found in a package's signature segment.
#[derive(Clone, Debug)]
pub struct PackageSignature {
    /// The keyring entry name the signature claims to be made with.
    pub key_name: String,
    /// The raw signature bytes.
    pub signature: Vec<u8>,
}

/// A package file split into its raw gzip segments.
///
/// Each field holds the still-compressed bytes of one segment, so the
/// original file is the concatenation `signature? + control + data` and
/// checksums over raw segment bytes can be computed directly.
#[derive(Clone, Debug)]
pub struct ApkSegments {
    /// The signature segment, when the package is signed.
    pub signature: Option<Vec<u8>>,
    /// The control segment.
    pub control: Vec<u8>,
    /// The data segment.
    pub data: Vec<u8>,
}

impl ApkSegments {
    /// Split a package file into its segments.
    ///
    /// `name` is used for error context only. Accepts both signed
    /// (3 segment) and unsigned (2 segment) packages.
    pub fn split(name: &str, data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let first_start = 0usize;
        let first_tar = read_gzip_member(name, &mut cursor)?;
        let first_end = cursor.position() as usize;

        let signed = first_entry_name(&first_tar)?
            .map(|n| n.starts_with(SIGNATURE_PREFIX))
            .unwrap_or(false);

        let (signature, control_start, control_end) = if signed {
            read_gzip_member(name, &mut cursor)?;
            let control_end = cursor.position() as usize;

            (
                Some(data[first_start..first_end].to_vec()),
                first_end,
                control_end,
            )
        } else {
            (None, first_start, first_end)
        };

        let residual = &data[control_end..];

        if residual.is_empty() {
            return Err(ApkError::Integrity(
                name.to_string(),
                "package has no data segment".to_string(),
            ));
        }

        if !residual.starts_with(&GZIP_MAGIC) {
            return Err(ApkError::Integrity(
                name.to_string(),
                "data segment is not a gzip stream".to_string(),
            ));
        }

        Ok(Self {
            signature,
            control: data[control_start..control_end].to_vec(),
            data: residual.to_vec(),
        })
    }

    /// Reassemble the original package byte stream.
    pub fn apk_bytes(&self) -> Vec<u8> {
        let mut out = vec![];

        if let Some(signature) = &self.signature {
            out.extend_from_slice(signature);
        }

        out.extend_from_slice(&self.control);
        out.extend_from_slice(&self.data);

        out
    }

    /// The SHA-1 digest over the raw control segment bytes.
    pub fn control_digest(&self) -> ContentDigest {
        ContentDigest::sha1(&self.control)
    }

    /// Verify the control segment against the expected control checksum.
    pub fn verify_control_checksum(&self, name: &str, expected: &[u8]) -> Result<()> {
        let digest = self.control_digest();

        if digest.matches_bytes(expected) {
            Ok(())
        } else {
            Err(ApkError::Integrity(
                name.to_string(),
                format!(
                    "control checksum mismatch: expected {}, got {}",
                    hex::encode(expected),
                    digest.digest_hex()
                ),
            ))
        }
    }

    /// The RSA signatures present in the signature segment.
    pub fn signatures(&self) -> Result<Vec<PackageSignature>> {
        let raw = match &self.signature {
            Some(raw) => raw,
            None => return Ok(vec![]),
        };

        let mut decoder = GzDecoder::new(&raw[..]);
        let mut tar_bytes = vec![];
        decoder.read_to_end(&mut tar_bytes)?;

        let mut archive = tar::Archive::new(&tar_bytes[..]);
        let mut signatures = vec![];

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().to_string();

            if let Some(key_name) = path.strip_prefix(RSA_SIGNATURE_PREFIX) {
                let mut signature = vec![];
                entry.read_to_end(&mut signature)?;

                signatures.push(PackageSignature {
                    key_name: key_name.to_string(),
                    signature,
                });
            }
        }

        Ok(signatures)
    }

    /// Verify the package signature against a keyring.
    ///
    /// `keys` pairs keyring entry names with PEM-encoded RSA public keys.
    /// The `.SIGN.RSA.<keyname>` entries whose `<keyname>` appears in the
    /// keyring are candidates; at least one candidate signature must
    /// verify over the SHA-1 of the control segment bytes.
    pub fn verify_signature(&self, name: &str, keys: &[(String, Vec<u8>)]) -> Result<()> {
        let signatures = self.signatures()?;

        if signatures.is_empty() {
            return Err(ApkError::Integrity(
                name.to_string(),
                "package has no signature".to_string(),
            ));
        }

        let digest = self.control_digest();
        let mut matched = false;

        for signature in &signatures {
            let pem = match keys.iter().find(|(n, _)| n == &signature.key_name) {
                Some((_, pem)) => pem,
                None => continue,
            };

            matched = true;

            let pem = std::str::from_utf8(pem).map_err(|_| {
                ApkError::Keyring(format!("key {} is not valid PEM", signature.key_name))
            })?;

            let public_key = rsa::RsaPublicKey::from_public_key_pem(pem)?;

            if public_key
                .verify(
                    rsa::Pkcs1v15Sign::new::<sha1::Sha1>(),
                    digest.digest_bytes(),
                    &signature.signature,
                )
                .is_ok()
            {
                return Ok(());
            }
        }

        Err(ApkError::Integrity(
            name.to_string(),
            if matched {
                "signature verification failed".to_string()
            } else {
                "no signature matches a trusted key".to_string()
            },
        ))
    }

    /// A tar reader over the decompressed control segment.
    pub fn control_archive(&self) -> tar::Archive<flate2::read::GzDecoder<Cursor<&[u8]>>> {
        tar::Archive::new(flate2::read::GzDecoder::new(Cursor::new(&self.control[..])))
    }

    /// A tar reader over the decompressed data segment.
    pub fn data_archive(&self) -> tar::Archive<flate2::read::GzDecoder<Cursor<&[u8]>>> {
        tar::Archive::new(flate2::read::GzDecoder::new(Cursor::new(&self.data[..])))
    }

    /// All control segment entries as `(name, content)` pairs.
    ///
    /// Entry names are normalized without a leading `./`.
    pub fn control_entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut archive = self.control_archive();
        let mut entries = vec![];

        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry
                .path()?
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();

            let mut content = vec![];
            entry.read_to_end(&mut content)?;

            entries.push((name, content));
        }

        Ok(entries)
    }

    /// The parsed `.PKGINFO` from the control segment, if present.
    pub fn pkginfo(&self) -> Result<Option<PkgInfo>> {
        for (name, content) in self.control_entries()? {
            if name == ".PKGINFO" {
                return Ok(Some(PkgInfo::parse(&String::from_utf8_lossy(&content))));
            }
        }

        Ok(None)
    }

    /// Install scripts from the control segment, as `(phase, content)`
    /// pairs in APK execution order.
    pub fn install_scripts(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.control_entries()?;
        let mut scripts = vec![];

        for name in INSTALL_SCRIPT_NAMES {
            if let Some((_, content)) = entries.iter().find(|(n, _)| n == name) {
                scripts.push((name.trim_start_matches('.').to_string(), content.clone()));
            }
        }

        Ok(scripts)
    }
}

/// A parsed `.PKGINFO` file.
///
/// `.PKGINFO` is a line-oriented `key = value` file; keys may repeat.
#[derive(Clone, Debug, Default)]
pub struct PkgInfo {
    fields: Vec<(String, String)>,
}

impl PkgInfo {
    pub fn parse(data: &str) -> Self {
        let fields = data
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .filter_map(|line| {
                line.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            })
            .collect();

        Self { fields }
    }

    /// The first value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for a key, in file order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// The trigger paths this package watches, whitespace separated in
    /// the `triggers` field.
    pub fn triggers(&self) -> Vec<String> {
        self.get("triggers")
            .map(|v| v.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }
}


#[cfg(test)]
mod test {
    use {
        super::{test_support::*, *},
        crate::error::ApkError,
    };

    fn sample_package() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let control = control_segment("hello", "1.0.0-r0", &[]);
        let data = data_segment(&[
            TarEntry::Dir {
                path: "usr/bin",
                mode: 0o755,
            },
            TarEntry::File {
                path: "usr/bin/hello",
                data: b"#!/bin/sh\necho hello\n",
                mode: 0o755,
            },
        ]);
        let package = concat_segments(&[&control, &data]);

        (control, data, package)
    }

    #[test]
    fn split_unsigned() -> crate::error::Result<()> {
        let (control, data, package) = sample_package();

        let segments = ApkSegments::split("hello", &package)?;

        assert!(segments.signature.is_none());
        assert_eq!(segments.control, control);
        assert_eq!(segments.data, data);
        assert_eq!(segments.apk_bytes(), package);

        Ok(())
    }

    #[test]
    fn split_signed() -> crate::error::Result<()> {
        let key = generate_key();
        let (control, data, _) = sample_package();
        let signature = signature_segment(&control, "test@example.com-abcd1234.rsa.pub", &key);
        let package = concat_segments(&[&signature, &control, &data]);

        let segments = ApkSegments::split("hello", &package)?;

        assert_eq!(segments.signature.as_deref(), Some(&signature[..]));
        assert_eq!(segments.control, control);
        assert_eq!(segments.data, data);

        let signatures = segments.signatures()?;
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].key_name, "test@example.com-abcd1234.rsa.pub");

        Ok(())
    }

    #[test]
    fn missing_data_segment() {
        let control = control_segment("hello", "1.0.0-r0", &[]);

        let err = ApkSegments::split("hello", &control).unwrap_err();
        assert!(matches!(err, ApkError::Integrity(_, _)));
    }

    #[test]
    fn control_checksum_verification() -> crate::error::Result<()> {
        let (control, _, package) = sample_package();
        let segments = ApkSegments::split("hello", &package)?;

        let expected = segments.control_digest();
        segments.verify_control_checksum("hello", expected.digest_bytes())?;

        // A single byte mutation in the control segment is detected. The
        // gzip header MTIME field is not covered by the member CRC, so
        // decoding still succeeds and the checksum must catch it.
        let mut mutated = control.clone();
        mutated[4] ^= 0xff;
        let (_, data, _) = sample_package();
        let tampered = concat_segments(&[&mutated, &data]);

        let segments = ApkSegments::split("hello", &tampered)?;
        let err = segments
            .verify_control_checksum("hello", expected.digest_bytes())
            .unwrap_err();

        assert!(matches!(err, ApkError::Integrity(_, _)));

        Ok(())
    }

    #[test]
    fn signature_verification() -> crate::error::Result<()> {
        let key = generate_key();
        let key_name = "builder-5e69ca50.rsa.pub";

        let (control, data, _) = sample_package();
        let signature = signature_segment(&control, key_name, &key);
        let package = concat_segments(&[&signature, &control, &data]);

        let segments = ApkSegments::split("hello", &package)?;

        let keyring = vec![(key_name.to_string(), public_key_pem(&key))];
        segments.verify_signature("hello", &keyring)?;

        // A different key under the same name fails verification.
        let other = generate_key();
        let bad_keyring = vec![(key_name.to_string(), public_key_pem(&other))];
        assert!(matches!(
            segments.verify_signature("hello", &bad_keyring).unwrap_err(),
            ApkError::Integrity(_, _)
        ));

        // A keyring without the named key rejects the package.
        let unrelated = vec![("other.rsa.pub".to_string(), public_key_pem(&key))];
        assert!(matches!(
            segments.verify_signature("hello", &unrelated).unwrap_err(),
            ApkError::Integrity(_, _)
        ));

        // An unsigned package cannot pass signature verification.
        let unsigned = ApkSegments::split("hello", &concat_segments(&[&control, &data]))?;
        assert!(unsigned.verify_signature("hello", &keyring).is_err());

        Ok(())
    }

    #[test]
    fn pkginfo_and_scripts() -> crate::error::Result<()> {
        let control = control_segment(
            "hello",
            "1.0.0-r0",
            &[
                (".post-install", b"#!/bin/sh\ntrue\n" as &[u8]),
                (".trigger", b"#!/bin/sh\nrun\n"),
            ],
        );
        let data = data_segment(&[TarEntry::File {
            path: "etc/hello.conf",
            data: b"",
            mode: 0o644,
        }]);

        let segments = ApkSegments::split("hello", &concat_segments(&[&control, &data]))?;

        let pkginfo = segments.pkginfo()?.expect("control has .PKGINFO");
        assert_eq!(pkginfo.get("pkgname"), Some("hello"));
        assert_eq!(pkginfo.get("pkgver"), Some("1.0.0-r0"));
        assert!(pkginfo.triggers().is_empty());

        let scripts = segments.install_scripts()?;
        let phases = scripts.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>();
        assert_eq!(phases, vec!["post-install", "trigger"]);

        Ok(())
    }

    #[test]
    fn pkginfo_triggers() {
        let pkginfo = PkgInfo::parse(
            "pkgname = busybox\ntriggers = /bin /sbin /usr/bin\n# comment\ndepend = musl\n",
        );

        assert_eq!(
            pkginfo.triggers(),
            vec!["/bin".to_string(), "/sbin".to_string(), "/usr/bin".to_string()]
        );
        assert_eq!(pkginfo.get_all("depend"), vec!["musl"]);
    }
}
