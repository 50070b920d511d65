//! Claim/release operation types.
//!
//! A claim moves a worker from the shared default queue onto the
//! exclusive queue of one build; a release moves it back.

use serde::{Deserialize, Serialize};

/// Reason reported when a claim finds the worker off the default queue.
pub const REASON_IN_USE: &str = "worker is already in use";

/// Claim request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Build to bind the worker to.
    #[serde(rename = "buildID", alias = "build_id")]
    pub build_id: String,
    /// Workspace the setup script runs in. Required when `script` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Optional setup script.
    #[serde(default, rename = "setupScript", alias = "script", skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// Release request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    /// Build whose exclusive queue is released.
    #[serde(rename = "buildID", alias = "build_id")]
    pub build_id: String,
    /// Workspace the teardown script runs in. Required when `script` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Optional teardown script.
    #[serde(default, rename = "teardownScript", alias = "script", skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// Script output attached to a successful claim or release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseReport {
    #[serde(rename = "buildID")]
    pub build_id: String,
    pub stdout: String,
    pub stderr: String,
    /// Exit code of the setup/teardown script, 0 when none was given.
    pub retcode: i32,
}

/// Result record of a claim or release.
///
/// Serialized as `{"status": "ok", "buildID": .., "stdout": .., "stderr": ..,
/// "retcode": ..}` or `{"status": "fail", "reason": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LeaseResponse {
    Ok(LeaseReport),
    Fail { reason: String },
}

impl LeaseResponse {
    /// The "worker is already in use" rejection.
    pub fn in_use() -> Self {
        Self::Fail {
            reason: REASON_IN_USE.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// The script report, if the operation went through.
    pub fn report(&self) -> Option<&LeaseReport> {
        match self {
            Self::Ok(report) => Some(report),
            Self::Fail { .. } => None,
        }
    }

    /// The rejection reason, if the operation was refused.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Fail { reason } => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_response_shape() {
        let response = LeaseResponse::Ok(LeaseReport {
            build_id: "b1".to_string(),
            stdout: "ready".to_string(),
            stderr: String::new(),
            retcode: 0,
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"status": "ok", "buildID": "b1", "stdout": "ready", "stderr": "", "retcode": 0})
        );
    }

    #[test]
    fn test_fail_response_shape() {
        let value = serde_json::to_value(LeaseResponse::in_use()).unwrap();
        assert_eq!(value, json!({"status": "fail", "reason": "worker is already in use"}));
    }

    #[test]
    fn test_claim_request_accepts_aliases() {
        let req: ClaimRequest = serde_json::from_value(json!({
            "build_id": "b7",
            "workspace": "ws",
            "setupScript": "exit 0"
        }))
        .unwrap();
        assert_eq!(req.build_id, "b7");
        assert_eq!(req.workspace.as_deref(), Some("ws"));
        assert_eq!(req.script.as_deref(), Some("exit 0"));
    }

    #[test]
    fn test_release_request_optional_fields() {
        let req: ReleaseRequest = serde_json::from_value(json!({"buildID": "b2"})).unwrap();
        assert_eq!(req.build_id, "b2");
        assert!(req.workspace.is_none());
        assert!(req.script.is_none());
    }

    #[test]
    fn test_scripts_serialize_under_wire_names() {
        let claim = ClaimRequest {
            build_id: "b3".to_string(),
            workspace: Some("ws".to_string()),
            script: Some("make deps".to_string()),
        };
        let value = serde_json::to_value(&claim).unwrap();
        assert_eq!(
            value,
            json!({"buildID": "b3", "workspace": "ws", "setupScript": "make deps"})
        );
        let back: ClaimRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, claim);

        let release = ReleaseRequest {
            build_id: "b3".to_string(),
            workspace: Some("ws".to_string()),
            script: Some("make clean".to_string()),
        };
        let value = serde_json::to_value(&release).unwrap();
        assert_eq!(value["teardownScript"], "make clean");
        assert!(value.get("script").is_none());
    }

    #[test]
    fn test_plain_script_key_still_accepted() {
        let req: ReleaseRequest =
            serde_json::from_value(json!({"buildID": "b4", "script": "exit 0"})).unwrap();
        assert_eq!(req.script.as_deref(), Some("exit 0"));
    }
}
