// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package model. */

use {
    crate::{error::ApkError, version::ApkVersion},
    std::{
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A target architecture, in APK spelling.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Arch {
    X86_64,
    X86,
    Aarch64,
    Armhf,
    Armv7,
    Ppc64le,
    S390x,
    Riscv64,
}

impl Arch {
    /// The architecture of the running host.
    pub fn host() -> Self {
        match std::env::consts::ARCH {
            "x86" => Self::X86,
            "aarch64" => Self::Aarch64,
            "arm" => Self::Armv7,
            "powerpc64" => Self::Ppc64le,
            "s390x" => Self::S390x,
            "riscv64" => Self::Riscv64,
            _ => Self::X86_64,
        }
    }

    /// The APK spelling of this architecture.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::X86 => "x86",
            Self::Aarch64 => "aarch64",
            Self::Armhf => "armhf",
            Self::Armv7 => "armv7",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
        }
    }
}

impl Default for Arch {
    fn default() -> Self {
        Self::host()
    }
}

impl Display for Arch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = ApkError;

    /// Parse an architecture from its APK spelling or common aliases
    /// (`amd64`, `arm64`, `386`, `arm`).
    fn from_str(s: &str) -> Result<Self, ApkError> {
        Ok(match s {
            "x86_64" | "amd64" => Self::X86_64,
            "x86" | "386" | "i386" => Self::X86,
            "aarch64" | "arm64" => Self::Aarch64,
            "armhf" => Self::Armhf,
            "armv7" | "arm" => Self::Armv7,
            "ppc64le" => Self::Ppc64le,
            "s390x" => Self::S390x,
            "riscv64" => Self::Riscv64,
            _ => return Err(ApkError::InvalidInput(format!("unknown architecture: {}", s))),
        })
    }
}

/// A package as described by an APKINDEX entry.
///
/// Instances are immutable once constructed. The `checksum` field holds
/// the 20 byte SHA-1 digest of the package's control segment, which the
/// stream reader verifies during installation.
#[derive(Clone, Debug, Default)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub arch: Option<Arch>,
    pub checksum: Vec<u8>,
    pub description: String,
    pub url: String,
    pub license: String,
    pub origin: String,
    pub maintainer: String,
    /// Build timestamp, seconds since the Unix epoch.
    pub build_time: Option<i64>,
    pub commit: String,
    /// Size of the `.apk` file in bytes.
    pub size: u64,
    /// Size of the installed payload in bytes.
    pub installed_size: u64,
    pub dependencies: Vec<String>,
    pub provides: Vec<String>,
    pub replaces: Vec<String>,
}

impl Package {
    /// The filename this package is published under: `<name>-<version>.apk`.
    pub fn filename(&self) -> String {
        format!("{}-{}.apk", self.name, self.version)
    }

    /// The parsed form of `version`, for ordering comparisons.
    pub fn parsed_version(&self) -> Result<ApkVersion, ApkError> {
        ApkVersion::parse(&self.version)
    }
}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arch_parsing() {
        assert_eq!("x86_64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!("arm64".parse::<Arch>().unwrap(), Arch::Aarch64);
        assert!("mips".parse::<Arch>().is_err());
    }

    #[test]
    fn filename() {
        let package = Package {
            name: "alpine-baselayout".to_string(),
            version: "3.2.0-r23".to_string(),
            ..Default::default()
        };

        assert_eq!(package.filename(), "alpine-baselayout-3.2.0-r23.apk");
    }

    #[test]
    fn version_ordering_between_packages() {
        let older = Package {
            name: "busybox".to_string(),
            version: "1.35.0-r17".to_string(),
            ..Default::default()
        };
        let newer = Package {
            name: "busybox".to_string(),
            version: "1.35.0-r29".to_string(),
            ..Default::default()
        };

        assert!(older.parsed_version().unwrap() < newer.parsed_version().unwrap());
    }
}
