//! Protocol version reporting and compatibility

use std::fmt;

use semver::Version;

/// Version of a transfer endpoint. Any component may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferVersion {
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub revision: Option<u64>,
    pub edition: String,
}

impl TransferVersion {
    pub fn new(major: u64, minor: u64, revision: u64, edition: &str) -> TransferVersion {
        TransferVersion {
            major: Some(major),
            minor: Some(minor),
            revision: Some(revision),
            edition: edition.to_owned(),
        }
    }

    /// Version of a sender that only reports its major number.
    pub fn major_only(major: u64) -> TransferVersion {
        TransferVersion {
            major: Some(major),
            ..Default::default()
        }
    }

    pub fn from_semver(version: &Version, edition: &str) -> TransferVersion {
        TransferVersion::new(version.major, version.minor, version.patch, edition)
    }

    /// Parse `major[.minor[.revision]]`; a full semver string is also
    /// accepted. Unparseable input yields an all-unknown version.
    pub fn parse(s: &str, edition: &str) -> TransferVersion {
        if let Ok(version) = Version::parse(s) {
            return TransferVersion::from_semver(&version, edition);
        }
        let mut parts = s.trim().split('.').map(|part| part.parse::<u64>().ok());
        TransferVersion {
            major: parts.next().flatten(),
            minor: parts.next().flatten(),
            revision: parts.next().flatten(),
            edition: edition.to_owned(),
        }
    }

    /// Version of this build of the receiver.
    pub fn current() -> TransferVersion {
        TransferVersion::parse(env!("CARGO_PKG_VERSION"), "Community")
    }

    /// Endpoints interoperate when both report the same major version.
    pub fn is_compatible_with(&self, other: &TransferVersion) -> bool {
        matches!((self.major, other.major), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Display for TransferVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_else(|| "?".to_owned());
        write!(
            f,
            "{}.{}.{}",
            part(self.major),
            part(self.minor),
            part(self.revision)
        )?;
        if !self.edition.is_empty() {
            write!(f, " ({})", self.edition)?;
        }
        Ok(())
    }
}

/// Reports the receiver's own version.
pub trait VersionSource: Send + Sync {
    fn version(&self) -> TransferVersion;
}

#[derive(Debug, Clone)]
pub struct StaticVersionSource(pub TransferVersion);

impl Default for StaticVersionSource {
    fn default() -> Self {
        StaticVersionSource(TransferVersion::current())
    }
}

impl VersionSource for StaticVersionSource {
    fn version(&self) -> TransferVersion {
        self.0.clone()
    }
}
