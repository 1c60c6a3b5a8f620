//! Configuration resolution: template selection, substitution, validation
//! and versioning.

use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::device::{Device, Profile};
use crate::error::TemplateError;
use crate::template::{TemplateStore, Variables, substitute};

/// Startup-time knobs for [`ConfigResolver`].
#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    /// Profile used when the request omits one or names an unknown one.
    pub default_profile: Profile,
    /// Value injected as the top-level `enabled` key of object documents.
    pub enabled: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            default_profile: Profile::Prod,
            enabled: true,
        }
    }
}

/// A fully resolved configuration document.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub profile: Profile,
    pub device: Option<Device>,
    /// The parsed document.
    pub document: Value,
    /// Canonical serialization of `document`; this is what clients receive.
    pub body: Vec<u8>,
    /// Lowercase hex SHA-256 of `body`.
    pub version: String,
}

/// Resolves `(profile, device)` requests against the template store.
///
/// Resolution has no side effects: the template tree is only read, and the
/// variable snapshot is fixed at construction.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    store: TemplateStore,
    variables: Arc<Variables>,
    settings: ResolverSettings,
}

impl ConfigResolver {
    #[must_use]
    pub fn new(store: TemplateStore, variables: Arc<Variables>, settings: ResolverSettings) -> Self {
        Self {
            store,
            variables,
            settings,
        }
    }

    /// Resolve the configuration for an optional profile and device.
    ///
    /// A blank `device` is treated as no device.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::UnknownDevice`] if `device` is not a known device.
    /// - [`TemplateError::NotFound`] if no template matches.
    /// - [`TemplateError::Read`] if a template cannot be read.
    /// - [`TemplateError::InvalidJson`] if the substituted template does not
    ///   parse as JSON.
    pub async fn resolve(
        &self,
        profile: Option<&str>,
        device: Option<&str>,
    ) -> Result<ResolvedConfig, TemplateError> {
        let profile = Profile::or_default(profile, self.settings.default_profile);
        let device = device
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                Device::parse(raw).ok_or_else(|| TemplateError::UnknownDevice {
                    device: raw.trim().to_owned(),
                })
            })
            .transpose()?;

        let template = self.store.load(profile, device).await?;
        let substituted = substitute(&template.body, &self.variables);
        for name in &substituted.missing {
            warn!(
                variable = %name,
                template = %template.path.display(),
                "template variable missing or empty, substituted with empty string"
            );
        }

        let mut document: Value =
            serde_json::from_str(&substituted.text).map_err(|e| TemplateError::InvalidJson {
                path: template.path.display().to_string(),
                reason: e.to_string(),
            })?;
        if let Value::Object(map) = &mut document {
            map.insert("enabled".to_owned(), Value::Bool(self.settings.enabled));
        }

        let body = serde_json::to_vec(&document).map_err(|e| TemplateError::InvalidJson {
            path: template.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let version = hex::encode(Sha256::digest(&body));

        debug!(
            profile = %profile,
            device = device.map(Device::as_str),
            template = %template.path.display(),
            version = %version,
            "configuration resolved"
        );

        Ok(ResolvedConfig {
            profile,
            device,
            document,
            body,
            version,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::Path;

    fn resolver(root: &Path, vars: &[(&str, &str)]) -> ConfigResolver {
        ConfigResolver::new(
            TemplateStore::new(root),
            Arc::new(vars.iter().copied().collect()),
            ResolverSettings::default(),
        )
    }

    #[tokio::test]
    async fn resolves_device_template_with_variables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("matisse")).unwrap();
        std::fs::write(
            dir.path().join("matisse/config.prod.json"),
            r#"{"owuiEndpoint":"${PUBLIC_BASE_URL}/api/"}"#,
        )
        .unwrap();
        let r = resolver(dir.path(), &[("PUBLIC_BASE_URL", "https://server.com")]);

        let out = r.resolve(Some("prod"), Some("matisse")).await.unwrap();
        assert_eq!(out.document["owuiEndpoint"], "https://server.com/api/");
        assert_eq!(out.document["enabled"], true);
        assert_eq!(out.device, Some(Device::Matisse));
        assert_eq!(out.version.len(), 64);
        assert!(!String::from_utf8(out.body).unwrap().contains("${"));
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"b":"${B}","a":[1,2,{"z":1,"y":2}]}"#,
        )
        .unwrap();
        let r = resolver(dir.path(), &[("B", "x")]);

        let first = r.resolve(None, None).await.unwrap();
        let second = r.resolve(None, None).await.unwrap();
        assert_eq!(first.body, second.body);
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn version_tracks_template_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"v":1}"#).unwrap();
        let r = resolver(dir.path(), &[]);

        let before = r.resolve(None, None).await.unwrap();
        std::fs::write(&path, r#"{"v":2}"#).unwrap();
        let after = r.resolve(None, None).await.unwrap();
        assert_ne!(before.version, after.version);
    }

    #[tokio::test]
    async fn version_tracks_variable_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"owuiEndpoint":"${{PUBLIC_BASE_URL}}/api/"}"#,
        )
        .unwrap();

        let a = resolver(dir.path(), &[("PUBLIC_BASE_URL", "https://a.example.com")])
            .resolve(None, None)
            .await
            .unwrap();
        let b = resolver(dir.path(), &[("PUBLIC_BASE_URL", "https://b.example.com")])
            .resolve(None, None)
            .await
            .unwrap();
        assert_ne!(a.version, b.version);
        assert_eq!(b.document["owuiEndpoint"], "https://b.example.com/api/");
    }

    #[tokio::test]
    async fn blank_device_means_generic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"g":1}"#).unwrap();
        let r = resolver(dir.path(), &[]);

        for blank in ["", "  "] {
            let out = r.resolve(None, Some(blank)).await.unwrap();
            assert!(out.device.is_none());
            assert_eq!(out.document["g"], 1);
        }
    }

    #[tokio::test]
    async fn unknown_profile_uses_default_and_device_falls_back_to_generic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.prod.json"), r#"{"p":"prod"}"#).unwrap();
        let r = resolver(dir.path(), &[]);

        let out = r.resolve(Some("staging"), Some("Chrome")).await.unwrap();
        assert_eq!(out.profile, Profile::Prod);
        assert_eq!(out.device, Some(Device::Chrome));
        assert_eq!(out.document["p"], "prod");
    }

    #[tokio::test]
    async fn unknown_device_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        let r = resolver(dir.path(), &[]);

        let err = r.resolve(None, Some("invalid-device")).await.unwrap_err();
        assert!(matches!(err, TemplateError::UnknownDevice { ref device } if device == "invalid-device"));
    }

    #[tokio::test]
    async fn substitution_that_breaks_json_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"n": ${PORT}}"#).unwrap();
        let r = resolver(dir.path(), &[]);

        let err = r.resolve(None, None).await.unwrap_err();
        assert!(matches!(err, TemplateError::InvalidJson { .. }));
    }

    #[tokio::test]
    async fn enabled_flag_follows_settings_and_skips_non_objects() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"enabled":true}"#).unwrap();
        std::fs::write(dir.path().join("config.dev.json"), "[1]").unwrap();
        let r = ConfigResolver::new(
            TemplateStore::new(dir.path()),
            Arc::new(Variables::default()),
            ResolverSettings {
                default_profile: Profile::Prod,
                enabled: false,
            },
        );

        let obj = r.resolve(None, None).await.unwrap();
        assert_eq!(obj.document["enabled"], false);
        let arr = r.resolve(Some("dev"), None).await.unwrap();
        assert_eq!(arr.document, serde_json::json!([1]));
    }
}
