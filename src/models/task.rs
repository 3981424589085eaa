use serde::{Deserialize, Serialize};

/// Canonical task status shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Downloading,
    Seeding,
    Paused,
    Queued,
    Checking,
    Completed,
    Error,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Downloading => "downloading",
            TaskStatus::Seeding => "seeding",
            TaskStatus::Paused => "paused",
            TaskStatus::Queued => "queued",
            TaskStatus::Checking => "checking",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A torrent as seen on one poll of one server
///
/// Built fresh from every backend response. `progress` is a percentage and
/// always lies in `[0, 100]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Backend-native id or info hash
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub progress: f64,
    /// Total size in bytes
    pub size: u64,
    /// Bytes per second
    pub download_speed: u64,
    /// Bytes per second
    pub upload_speed: u64,
    /// Seconds remaining, -1 or 0 when unknown
    pub eta: i64,
    pub save_path: String,
    /// Epoch milliseconds, 0 when unknown
    pub added_date: i64,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// Field names in the order the differ compares them
pub const TASK_FIELDS: [&str; 12] = [
    "id",
    "name",
    "status",
    "progress",
    "size",
    "download_speed",
    "upload_speed",
    "eta",
    "save_path",
    "added_date",
    "category",
    "tags",
];

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            progress: 0.0,
            size: 0,
            download_speed: 0,
            upload_speed: 0,
            eta: 0,
            save_path: String::new(),
            added_date: 0,
            category: None,
            tags: Vec::new(),
        }
    }

    /// Set progress from a percentage, clamped to `[0, 100]`
    pub fn with_progress(mut self, percent: f64) -> Self {
        self.progress = clamp_progress(percent);
        self
    }

    /// Set progress from a `0..=1` fraction
    pub fn with_fraction(self, fraction: f64) -> Self {
        self.with_progress(fraction * 100.0)
    }
}

pub fn clamp_progress(percent: f64) -> f64 {
    if percent.is_nan() {
        return 0.0;
    }
    percent.clamp(0.0, 100.0)
}

/// Turn an empty string into `None`
pub fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Split a comma separated tag list, dropping blanks
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped() {
        let task = Task::new("a", "A", TaskStatus::Downloading).with_progress(140.0);
        assert_eq!(task.progress, 100.0);

        let task = Task::new("a", "A", TaskStatus::Downloading).with_progress(-3.0);
        assert_eq!(task.progress, 0.0);

        let task = Task::new("a", "A", TaskStatus::Downloading).with_progress(f64::NAN);
        assert_eq!(task.progress, 0.0);
    }

    #[test]
    fn test_fraction_is_rescaled() {
        let task = Task::new("a", "A", TaskStatus::Downloading).with_fraction(0.5);
        assert_eq!(task.progress, 50.0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Seeding).unwrap();
        assert_eq!(json, "\"seeding\"");
        assert_eq!(TaskStatus::Checking.to_string(), "checking");
    }

    #[test]
    fn test_field_list_matches_serialized_task() {
        let task = Task::new("a", "A", TaskStatus::Queued);
        let value = serde_json::to_value(&task).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), TASK_FIELDS.len());
        for field in TASK_FIELDS {
            assert!(object.contains_key(field), "missing field {}", field);
        }
    }

    #[test]
    fn test_split_tags() {
        assert_eq!(split_tags("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_tags("").is_empty());
    }
}
