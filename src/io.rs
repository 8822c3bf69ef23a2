// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers.

Content digest primitives shared by the package fetcher, the APK stream
reader, and the installed database writer. APK identifies content by the
SHA-1 of a package's control segment and encodes it in database files as
`Q1<base64>`, which [ContentDigest::q_encoded] produces.
*/

use {
    crate::error::Result,
    sha1::Digest,
    std::{fmt::Formatter, io::Read},
};

/// Digest algorithm flavor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestFlavor {
    Sha1,
    Sha256,
}

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Compute the SHA-1 digest of a buffer.
    pub fn sha1(data: &[u8]) -> Self {
        Self::Sha1(sha1::Sha1::digest(data).to_vec())
    }

    /// Compute the SHA-256 digest of a buffer.
    pub fn sha256(data: &[u8]) -> Self {
        Self::Sha256(sha2::Sha256::digest(data).to_vec())
    }

    /// Create a new SHA-1 instance by parsing a hex digest.
    pub fn sha1_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(DigestFlavor::Sha1, digest)
    }

    /// Obtain an instance by parsing a hex string as a [DigestFlavor].
    pub fn from_hex_digest(flavor: DigestFlavor, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)?;

        Ok(match flavor {
            DigestFlavor::Sha1 => Self::Sha1(digest),
            DigestFlavor::Sha256 => Self::Sha256(digest),
        })
    }

    /// Create a new hasher matching the type of this digest.
    pub fn new_hasher(&self) -> Box<dyn digest::DynDigest + Send> {
        match self {
            Self::Sha1(_) => Box::new(sha1::Sha1::default()),
            Self::Sha256(_) => Box::new(sha2::Sha256::default()),
        }
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Encode this digest the way APK database files spell it.
    ///
    /// SHA-1 digests use the `Q1` prefix, SHA-256 the `Q2` prefix, each
    /// followed by the standard base64 encoding of the raw digest.
    pub fn q_encoded(&self) -> String {
        match self {
            Self::Sha1(data) => format!("Q1{}", base64::encode(data)),
            Self::Sha256(data) => format!("Q2{}", base64::encode(data)),
        }
    }

    /// Whether this digest matches the given expected raw bytes.
    pub fn matches_bytes(&self, expected: &[u8]) -> bool {
        self.digest_bytes() == expected
    }

    /// Obtain the [DigestFlavor] for this digest.
    pub fn flavor(&self) -> DigestFlavor {
        match self {
            Self::Sha1(_) => DigestFlavor::Sha1,
            Self::Sha256(_) => DigestFlavor::Sha256,
        }
    }
}

/// A [Read] adapter that computes a [ContentDigest] as data is read.
///
/// The digest is only complete once the source has been drained.
pub struct DigestingReader<R> {
    hasher: Box<dyn digest::DynDigest + Send>,
    flavor: DigestFlavor,
    source: R,
}

impl<R: Read> DigestingReader<R> {
    /// Construct a new instance computing the given digest flavor.
    pub fn new(source: R, flavor: DigestFlavor) -> Self {
        let hasher: Box<dyn digest::DynDigest + Send> = match flavor {
            DigestFlavor::Sha1 => Box::new(sha1::Sha1::default()),
            DigestFlavor::Sha256 => Box::new(sha2::Sha256::default()),
        };

        Self {
            hasher,
            flavor,
            source,
        }
    }

    /// Finish the stream.
    ///
    /// Returns the source reader and the resolved [ContentDigest].
    pub fn finish(self) -> (R, ContentDigest) {
        let digest = self.hasher.finalize().to_vec();

        let digest = match self.flavor {
            DigestFlavor::Sha1 => ContentDigest::Sha1(digest),
            DigestFlavor::Sha256 => ContentDigest::Sha256(digest),
        };

        (self.source, digest)
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.source.read(buf)?;

        if size > 0 {
            self.hasher.update(&buf[0..size]);
        }

        Ok(size)
    }
}
