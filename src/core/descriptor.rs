//! Work descriptors and the responses they produce.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Opaque, serializable description of one unit of work.
///
/// Identity is `uuid`. An empty uuid is replaced by a generated one when the descriptor is
/// pushed to the scheduler; after that the descriptor is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkDescriptor {
    /// Unique identifier of the unit of work.
    #[serde(default)]
    pub uuid: String,
    /// Identifies the executable behavior, resolved through a `WorkRegistry`.
    pub work_kind: String,
    /// Compatibility tags the executing backend must understand.
    #[serde(default)]
    pub compatibility: Vec<String>,
    /// Arguments handed to the behavior.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl WorkDescriptor {
    /// Descriptor for `work_kind` with no uuid, tags or arguments.
    pub fn new(work_kind: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            work_kind: work_kind.into(),
            compatibility: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Set an explicit uuid.
    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Set the argument list.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Add a compatibility tag.
    #[must_use]
    pub fn with_compatibility(mut self, tag: impl Into<String>) -> Self {
        self.compatibility.push(tag.into());
        self
    }

    /// Whether a uuid has been assigned.
    #[must_use]
    pub fn has_uuid(&self) -> bool {
        !self.uuid.is_empty()
    }
}

/// Final response of a unit of work.
///
/// Execution failures are carried in `exception` rather than surfaced as errors, so a caller
/// waiting on a completion handle always receives a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkResponse {
    /// Value produced by a successful run.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Failure message of an unsuccessful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl WorkResponse {
    /// Successful response.
    #[must_use]
    pub const fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            exception: None,
        }
    }

    /// Failed response.
    pub fn failed(exception: impl Into<String>) -> Self {
        Self {
            result: None,
            exception: Some(exception.into()),
        }
    }

    /// Whether the response carries an exception.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.exception.is_some()
    }
}

/// Reads a present field as `Some`, so an explicit `null` result survives a round trip.
/// Only an absent field is `None`.
pub(crate) fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl From<Result<Value, String>> for WorkResponse {
    fn from(outcome: Result<Value, String>) -> Self {
        match outcome {
            Ok(value) => Self::ok(value),
            Err(message) => Self::failed(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_defaults_from_json() {
        let descriptor: WorkDescriptor =
            serde_json::from_str(r#"{"workKind":"render"}"#).unwrap();
        assert!(!descriptor.has_uuid());
        assert_eq!(descriptor.work_kind, "render");
        assert!(descriptor.args.is_empty());
    }

    #[test]
    fn test_descriptor_camel_case_wire_names() {
        let descriptor = WorkDescriptor::new("render")
            .with_uuid("a")
            .with_compatibility("chrome")
            .with_args(vec![json!(1)]);
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["workKind"], "render");
        assert_eq!(value["compatibility"][0], "chrome");
    }

    #[test]
    fn test_response_from_outcome() {
        assert!(!WorkResponse::from(Ok(json!(3))).is_failure());
        let failed = WorkResponse::from(Err("boom".to_string()));
        assert_eq!(failed.exception.as_deref(), Some("boom"));
        assert!(failed.result.is_none());
    }
}
