//! Configuration templates and placeholder substitution.
//!
//! Templates are JSON files under a configuration root:
//!
//! ```text
//! config/
//!   config.json              generic, any profile
//!   config.dev.json          generic, dev profile
//!   matisse/config.json      device, any profile
//!   matisse/config.prod.json device, prod profile
//! ```
//!
//! Files are read on every lookup so that operators can edit them without
//! restarting the service. The service never writes to this tree.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::device::{Device, Profile};
use crate::error::TemplateError;

/// `${{NAME}}` (preferred) or `${NAME}` (legacy), `NAME` in `[A-Z0-9_]+`.
#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{([A-Z0-9_]+)\}\}|\$\{([A-Z0-9_]+)\}")
        .expect("placeholder pattern is a valid regex")
});

/// Values available for placeholder substitution.
///
/// Captured once at startup; `Debug` never prints values because the
/// process environment routinely holds credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    /// Snapshot every environment variable whose name could appear in a
    /// placeholder.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::vars()
            .filter(|(name, _)| is_placeholder_name(name))
            .collect()
    }

    /// Value for `name`, treating empty values as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Variables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variables")
            .field("count", &self.values.len())
            .finish_non_exhaustive()
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// Result of substituting placeholders in a template body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    /// The substituted text.
    pub text: String,
    /// Placeholder names that had no (or an empty) value, deduplicated and
    /// sorted.
    pub missing: Vec<String>,
}

/// Replace every placeholder in `body` with its value, or with the empty
/// string when the variable is unset.
///
/// Substitution is a single textual pass: values are inserted verbatim and
/// never re-scanned, so text without placeholders comes back unchanged.
#[must_use]
pub fn substitute(body: &str, vars: &Variables) -> Substitution {
    let mut missing = Vec::new();
    let text = PLACEHOLDER.replace_all(body, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        if let Some(value) = vars.get(name) {
            value.to_owned()
        } else {
            missing.push(name.to_owned());
            String::new()
        }
    });
    let text = text.into_owned();
    missing.sort_unstable();
    missing.dedup();
    Substitution { text, missing }
}

/// A template file selected for a `(profile, device)` request.
#[derive(Debug, Clone)]
pub struct ConfigTemplate {
    /// Profile the template was selected for.
    pub profile: Profile,
    /// Device whose directory provided the template, `None` for generic.
    pub device: Option<Device>,
    /// File the body was read from.
    pub path: PathBuf,
    /// Raw template content.
    pub body: String,
}

/// Read-only access to the template tree.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Candidate files in priority order, each tagged with the device whose
    /// directory it lives in.
    #[must_use]
    pub fn candidates(&self, profile: Profile, device: Option<Device>) -> Vec<(Option<Device>, PathBuf)> {
        let profile_file = format!("config.{profile}.json");
        let mut out = Vec::with_capacity(4);
        if let Some(device) = device {
            let dir = self.root.join(device.template_dir());
            out.push((Some(device), dir.join(&profile_file)));
            out.push((Some(device), dir.join("config.json")));
        }
        out.push((None, self.root.join(&profile_file)));
        out.push((None, self.root.join("config.json")));
        out
    }

    /// Load the first existing candidate.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::NotFound`] if no candidate exists and
    /// [`TemplateError::Read`] if one exists but cannot be read.
    pub async fn load(
        &self,
        profile: Profile,
        device: Option<Device>,
    ) -> Result<ConfigTemplate, TemplateError> {
        for (owner, path) in self.candidates(profile, device) {
            match tokio::fs::read_to_string(&path).await {
                Ok(body) => {
                    return Ok(ConfigTemplate {
                        profile,
                        device: owner,
                        path,
                        body,
                    });
                }
                Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {}
                Err(e) => {
                    return Err(TemplateError::Read {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(TemplateError::NotFound {
            profile: profile.to_string(),
        })
    }
}
