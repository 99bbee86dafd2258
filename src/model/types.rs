//! Identity types for the document model.
//!
//! Foundation types used throughout the merge engine: node identifiers,
//! external package identifiers, and the left/right branch [`Side`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// A stable 128-bit node identity, shared by the ancestor and both branches.
///
/// Displayed and serialized as a hyphenated lowercase UUID
/// (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`). Parsing also accepts the bare
/// 32-digit hex form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(u128);

impl NodeId {
    /// Create a `NodeId` from a raw `u128`.
    #[must_use]
    pub const fn from_u128(id: u128) -> Self {
        Self(id)
    }

    /// Return the inner `u128` value.
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// Derive a deterministic identity from a salt and a list of parent ids.
    ///
    /// The same inputs always yield the same id, so nodes synthesized during
    /// a merge (virtual slot copies, placeholder args) are byte-identical
    /// across re-runs.
    #[must_use]
    pub fn derive(salt: &str, parts: &[Self]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        for part in parts {
            hasher.update(part.0.to_be_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0_u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(u128::from_be_bytes(bytes))
    }

    /// Parse a `NodeId` from UUID text or 32 lowercase hex digits.
    ///
    /// # Errors
    /// Returns an error if the string is not a well-formed identifier.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let hex: String = if s.len() == 36 {
            let groups: Vec<&str> = s.split('-').collect();
            let lens: Vec<usize> = groups.iter().map(|g| g.len()).collect();
            if lens != [8, 4, 4, 4, 12] {
                return Err(IdError {
                    value: s.to_owned(),
                    reason: "expected UUID groups of 8-4-4-4-12 hex digits".to_owned(),
                });
            }
            groups.concat()
        } else {
            s.to_owned()
        };
        if hex.len() != 32 {
            return Err(IdError {
                value: s.to_owned(),
                reason: format!("expected 32 hex digits, got {}", hex.len()),
            });
        }
        if !hex
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(IdError {
                value: s.to_owned(),
                reason: "must contain only lowercase hex characters (0-9, a-f)".to_owned(),
            });
        }
        let n = u128::from_str_radix(&hex, 16).map_err(|e| IdError {
            value: s.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self(n))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = format!("{:032x}", self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl FromStr for NodeId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = IdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

/// Error returned when parsing a [`NodeId`] fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdError {
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node id {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for IdError {}

// ---------------------------------------------------------------------------
// PackageId
// ---------------------------------------------------------------------------

/// Identifier of an external package (another document) a site may depend on.
///
/// A pinned dependency reads `name@version`, e.g. `icons@1.4.0`. Two ids with
/// the same [`name`](Self::name) are versions of one package.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Wrap a package identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The package name without its version.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(name, _)| name)
    }

    /// The pinned version, if any.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, v)| v)
    }

    /// Sort key for versions of one package: dot-separated numeric segments
    /// (non-numeric segments count as zero), then the raw text. Unversioned
    /// ids sort lowest.
    #[must_use]
    pub fn version_key(&self) -> (Vec<u64>, &str) {
        let v = self.version().unwrap_or("");
        let segments = v
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap_or(0))
            .collect();
        (segments, v)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// One of the two branches being merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The left branch (`L`).
    Left,
    /// The right branch (`R`).
    Right,
}

impl Side {
    /// The opposite branch.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
