//! The closed sets of client devices and configuration profiles.

use serde::{Deserialize, Serialize};

/// A client application that may receive a device-specific configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Matisse,
    Libreoffice,
    Chrome,
    Edge,
    Firefox,
    Misc,
}

impl Device {
    /// Every known device, in display order.
    pub const ALL: [Self; 6] = [
        Self::Matisse,
        Self::Libreoffice,
        Self::Chrome,
        Self::Edge,
        Self::Firefox,
        Self::Misc,
    ];

    /// Wire identifier, as used in URLs and payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Matisse => "matisse",
            Self::Libreoffice => "libreoffice",
            Self::Chrome => "chrome",
            Self::Edge => "edge",
            Self::Firefox => "firefox",
            Self::Misc => "misc",
        }
    }

    /// Directory holding this device's templates, relative to the
    /// configuration root.
    #[must_use]
    pub const fn template_dir(self) -> &'static str {
        self.as_str()
    }

    /// Parse a user-supplied identifier (trimmed, case-insensitive).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|d| d.as_str() == wanted)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown device: {s}"))
    }
}

/// A named configuration variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Prod,
    Dev,
    Int,
}

impl Profile {
    pub const ALL: [Self; 3] = [Self::Prod, Self::Dev, Self::Int];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Dev => "dev",
            Self::Int => "int",
        }
    }

    /// Parse a user-supplied profile (trimmed, case-insensitive).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|p| p.as_str() == wanted)
    }

    /// The requested profile, or `default` when it is absent or unknown.
    #[must_use]
    pub fn or_default(requested: Option<&str>, default: Self) -> Self {
        requested.and_then(Self::parse).unwrap_or(default)
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown profile: {s}"))
    }
}
