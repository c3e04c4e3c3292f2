//! Artifacts produced by completed jobs.

use crate::utils::{now_utc, prefixed_id, Timestamp};
use serde::{Deserialize, Serialize};

/// An output a target declares it will produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact name (e.g. "bundle.js").
    pub name: String,
    /// Artifact type (e.g. "bundle", "package", "report").
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Path relative to the target's output directory.
    #[serde(default)]
    pub path: String,
}

impl ArtifactSpec {
    /// Creates a new artifact declaration.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            path: path.into(),
        }
    }
}

/// An immutable output recorded on a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier.
    pub id: String,
    /// Artifact name.
    pub name: String,
    /// Artifact type.
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Locator of the artifact.
    pub path: String,
    /// Size in bytes (0 when the locator is not a local file).
    pub size_bytes: u64,
    /// Hex SHA-256 checksum.
    pub checksum: String,
    /// When the artifact was recorded.
    pub created_at: Timestamp,
}

impl Artifact {
    /// Creates a new artifact.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        path: impl Into<String>,
        size_bytes: u64,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            id: prefixed_id("artifact"),
            name: name.into(),
            artifact_type: artifact_type.into(),
            path: path.into(),
            size_bytes,
            checksum: checksum.into(),
            created_at: now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_creation() {
        let artifact = Artifact::new("bundle.js", "bundle", "dist/bundle.js", 42, "abc");
        assert!(artifact.id.starts_with("artifact-"));
        assert_eq!(artifact.size_bytes, 42);
    }

    #[test]
    fn test_artifact_spec_serialization() {
        let spec = ArtifactSpec::new("app.tar.gz", "package", "app.tar.gz");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "package");
        let back: ArtifactSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
