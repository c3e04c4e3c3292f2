//! Inbound request types.

use serde::{Deserialize, Serialize};

/// Request to build a target at a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Build target id.
    pub target_id: String,
    /// Version to build.
    pub version: String,
    /// Advisory priority; admission stays FIFO.
    #[serde(default)]
    pub priority: i32,
}

impl BuildRequest {
    /// Creates a build request with priority 0.
    #[must_use]
    pub fn new(target_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            version: version.into(),
            priority: 0,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Request to deploy a version to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Deploy target id.
    pub target_id: String,
    /// Version to deploy.
    pub version: String,
}

impl DeployRequest {
    /// Creates a deploy request.
    #[must_use]
    pub fn new(target_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            version: version.into(),
        }
    }
}

/// Any request the engine accepts, as received from an outer surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineRequest {
    /// Start a build job.
    StartBuild(BuildRequest),
    /// Start a deploy job.
    StartDeployment(DeployRequest),
    /// Cancel a running job.
    CancelJob {
        /// The job to cancel.
        job_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_wire_format() {
        let json = r#"{"type":"start_build","target_id":"web","version":"1.2.0"}"#;
        let request: EngineRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request, EngineRequest::StartBuild(BuildRequest::new("web", "1.2.0")));

        let cancel = EngineRequest::CancelJob { job_id: "job-1".into() };
        assert_eq!(
            serde_json::to_string(&cancel).unwrap(),
            r#"{"type":"cancel_job","job_id":"job-1"}"#
        );
    }

    #[test]
    fn test_deploy_request_roundtrip() {
        let request = EngineRequest::StartDeployment(DeployRequest::new("prod", "2.0.0"));
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(serde_json::from_str::<EngineRequest>(&json).unwrap(), request);
    }
}
