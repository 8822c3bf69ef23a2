// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APK package version string handling. */

use {
    crate::error::{ApkError, Result},
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A pre- or post-release suffix in an APK version string.
///
/// Suffixes are introduced by `_` and sort around the bare version:
/// `_alpha`, `_beta`, `_pre`, and `_rc` sort before it, `_cvs`, `_svn`,
/// `_git`, `_hg`, and `_p` after it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionSuffix {
    Alpha,
    Beta,
    Pre,
    Rc,
    Cvs,
    Svn,
    Git,
    Hg,
    P,
}

impl VersionSuffix {
    fn rank(&self) -> i32 {
        match self {
            Self::Alpha => -4,
            Self::Beta => -3,
            Self::Pre => -2,
            Self::Rc => -1,
            Self::Cvs => 1,
            Self::Svn => 2,
            Self::Git => 3,
            Self::Hg => 4,
            Self::P => 5,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Pre => "pre",
            Self::Rc => "rc",
            Self::Cvs => "cvs",
            Self::Svn => "svn",
            Self::Git => "git",
            Self::Hg => "hg",
            Self::P => "p",
        }
    }
}

impl FromStr for VersionSuffix {
    type Err = ApkError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "alpha" => Self::Alpha,
            "beta" => Self::Beta,
            "pre" => Self::Pre,
            "rc" => Self::Rc,
            "cvs" => Self::Cvs,
            "svn" => Self::Svn,
            "git" => Self::Git,
            "hg" => Self::Hg,
            "p" => Self::P,
            _ => return Err(ApkError::Version(format!("unknown suffix: _{}", s))),
        })
    }
}

/// An APK package version.
///
/// The format is `digits{.digits}[letter]{_suffix[digits]}[-r digits]`.
/// Sorting rules follow apk-tools: numeric components compare numerically,
/// a trailing letter compares by ASCII value, suffixes sort around the bare
/// version per [VersionSuffix], and the `-r` build revision breaks remaining
/// ties.
#[derive(Clone, Debug)]
pub struct ApkVersion {
    original: String,
    components: Vec<u64>,
    letter: Option<char>,
    suffixes: Vec<(VersionSuffix, u64)>,
    revision: u64,
}

fn parse_number(s: &str, full: &str) -> Result<u64> {
    s.parse::<u64>()
        .map_err(|_| ApkError::Version(full.to_string()))
}

fn split_leading_digits(s: &str) -> (&str, &str) {
    let pos = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    s.split_at(pos)
}

impl ApkVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(ApkError::Version("empty version string".to_string()));
        }

        // The build revision is the part after the final `-r`, if present.
        let (mut remainder, revision) = match s.rsplit_once("-r") {
            Some((head, rev)) if !rev.is_empty() && rev.chars().all(|c| c.is_ascii_digit()) => {
                (head, parse_number(rev, s)?)
            }
            _ => (s, 0),
        };

        let mut components = vec![];

        loop {
            let (digits, rest) = split_leading_digits(remainder);

            if digits.is_empty() {
                return Err(ApkError::Version(s.to_string()));
            }

            components.push(parse_number(digits, s)?);

            if let Some(rest) = rest.strip_prefix('.') {
                remainder = rest;
            } else {
                remainder = rest;
                break;
            }
        }

        let letter = match remainder.chars().next() {
            Some(c) if c.is_ascii_lowercase() => {
                remainder = &remainder[1..];
                Some(c)
            }
            _ => None,
        };

        let mut suffixes = vec![];

        while let Some(rest) = remainder.strip_prefix('_') {
            let pos = rest
                .char_indices()
                .find(|(_, c)| !c.is_ascii_lowercase())
                .map(|(i, _)| i)
                .unwrap_or(rest.len());

            let suffix = VersionSuffix::from_str(&rest[0..pos])?;
            let (digits, rest) = split_leading_digits(&rest[pos..]);

            let value = if digits.is_empty() {
                0
            } else {
                parse_number(digits, s)?
            };

            suffixes.push((suffix, value));
            remainder = rest;
        }

        if !remainder.is_empty() {
            return Err(ApkError::Version(s.to_string()));
        }

        Ok(Self {
            original: s.to_string(),
            components,
            letter,
            suffixes,
            revision,
        })
    }

    /// The numeric version components, in order.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// The build revision (`-r` component), 0 when absent.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl Display for ApkVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for ApkVersion {
    type Err = ApkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialEq for ApkVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ApkVersion {}

impl PartialOrd for ApkVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ApkVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let components = self
            .components
            .iter()
            .copied()
            .zip(other.components.iter().copied())
            .map(|(a, b)| a.cmp(&b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| self.components.len().cmp(&other.components.len()));

        if components != Ordering::Equal {
            return components;
        }

        // A trailing letter sorts after its absence: 1.2a > 1.2.
        let letter = self.letter.cmp(&other.letter);

        if letter != Ordering::Equal {
            return letter;
        }

        let max = self.suffixes.len().max(other.suffixes.len());

        for i in 0..max {
            // A missing suffix has rank 0, between pre-release and
            // post-release suffixes.
            let (a_rank, a_num) = self
                .suffixes
                .get(i)
                .map(|(s, n)| (s.rank(), *n))
                .unwrap_or((0, 0));
            let (b_rank, b_num) = other
                .suffixes
                .get(i)
                .map(|(s, n)| (s.rank(), *n))
                .unwrap_or((0, 0));

            let suffix = a_rank.cmp(&b_rank).then(a_num.cmp(&b_num));

            if suffix != Ordering::Equal {
                return suffix;
            }
        }

        self.revision.cmp(&other.revision)
    }
}
