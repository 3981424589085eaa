use crate::models::task::Task;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One position-addressed change between two snapshots
///
/// Paths are `/<index>` for `Add`/`Remove` and `/<index>/<field>` for
/// `Replace`. Indexes refer to snapshot array positions, not task ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Task },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path } => path,
        }
    }
}

/// Output of one diff run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub has_changes: bool,
    pub patches: Vec<PatchOperation>,
}

/// Serialized-size comparison of a full snapshot against its patch list
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Savings {
    pub full_size: usize,
    pub patch_size: usize,
    pub saved_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskStatus;

    #[test]
    fn test_patch_wire_format() {
        let replace = PatchOperation::Replace {
            path: "/0/progress".to_string(),
            value: Value::from(75.0),
        };
        let json = serde_json::to_value(&replace).unwrap();
        assert_eq!(json["op"], "replace");
        assert_eq!(json["path"], "/0/progress");
        assert_eq!(json["value"], 75.0);

        let remove = PatchOperation::Remove {
            path: "/3".to_string(),
        };
        let json = serde_json::to_value(&remove).unwrap();
        assert_eq!(json, serde_json::json!({"op": "remove", "path": "/3"}));

        let add = PatchOperation::Add {
            path: "/1".to_string(),
            value: Task::new("h", "name", TaskStatus::Queued),
        };
        let json = serde_json::to_value(&add).unwrap();
        assert_eq!(json["op"], "add");
        assert_eq!(json["value"]["status"], "queued");
    }
}
