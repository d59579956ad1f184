//! Version tags: `v?MAJOR.MINOR.PATCH[-pre]`.

use std::cmp::Ordering;
use std::fmt;

use crate::domain::{PipelineError, Result};

/// A parsed release tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTag {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl VersionTag {
    pub fn parse(tag: &str) -> Result<Self> {
        let trimmed = tag.trim();
        let input = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let invalid = || PipelineError::DeployRejected(format!("invalid version tag '{}'", tag));

        let (version_part, pre) = match input.split_once('-') {
            Some((v, p)) if !p.is_empty() => (v, Some(p.to_string())),
            Some(_) => return Err(invalid()),
            None => (input, None),
        };

        let parts: Vec<&str> = version_part.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        // Plain digits without leading zeros, so the tag survives a round trip.
        let number = |s: &str| {
            let canonical = !s.is_empty()
                && s.bytes().all(|b| b.is_ascii_digit())
                && (s == "0" || !s.starts_with('0'));
            if !canonical {
                return Err(invalid());
            }
            s.parse::<u64>().map_err(|_| invalid())
        };

        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
            pre,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// Pre-release < release for equal numeric versions.
    pub fn cmp_version(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

/// Index version string, without any `v` prefix.
impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}
