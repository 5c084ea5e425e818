use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A permission tag a skill must declare in its manifest to be granted the
/// corresponding privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read files outside the tenant working directory.
    FsRead,
    /// Write to the filesystem.
    FsWrite,
    /// Spawn processes.
    Exec,
    /// Make outbound network connections.
    Net,
    /// Privileged system access (device control, system settings).
    System,
}

/// Capabilities that require the master PIN before a skill carrying them may run.
pub const DANGEROUS_CAPABILITIES: [Capability; 4] = [
    Capability::FsWrite,
    Capability::Exec,
    Capability::Net,
    Capability::System,
];

/// Ordered set of capabilities, as declared by a manifest or a skill.
pub type CapabilitySet = BTreeSet<Capability>;

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::FsRead,
        Capability::FsWrite,
        Capability::Exec,
        Capability::Net,
        Capability::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FsRead => "fs_read",
            Self::FsWrite => "fs_write",
            Self::Exec => "exec",
            Self::Net => "net",
            Self::System => "system",
        }
    }

    pub fn is_dangerous(&self) -> bool {
        DANGEROUS_CAPABILITIES.contains(self)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown capability '{s}' (valid: {})", valid.join(", "))
            })
    }
}

/// True iff any capability in `caps` is dangerous.
pub fn requires_pin<'a>(caps: impl IntoIterator<Item = &'a Capability>) -> bool {
    caps.into_iter().any(Capability::is_dangerous)
}

/// Check a caller-supplied token against the configured master PIN.
///
/// An empty configured PIN never matches, so an unconfigured host refuses
/// every dangerous invocation.
pub fn pin_matches(token: Option<&str>, master_pin: &str) -> bool {
    !master_pin.is_empty() && token == Some(master_pin)
}
