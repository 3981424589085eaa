use crate::core::error::PatchError;
use crate::models::patch::{DiffResult, PatchOperation};
use crate::models::task::{Task, TASK_FIELDS};
use serde_json::{Map, Value};

/// Compute the position-addressed patch list turning `previous` into `current`
///
/// Overlapping positions produce one `replace` per differing field, extra
/// positions in `current` produce `add`s in order, and positions dropped from
/// `previous` produce `remove`s from the highest index down so each stays
/// valid when applied in sequence. Every path is offset by `start_index`.
pub fn diff(previous: &[Task], current: &[Task], start_index: usize) -> DiffResult {
    let mut patches = Vec::new();
    let shared = previous.len().min(current.len());

    for (index, (old, new)) in previous.iter().zip(current.iter()).enumerate() {
        if old == new {
            continue;
        }
        let old_fields = task_fields(old);
        let new_fields = task_fields(new);
        let position = start_index + index;

        for field in TASK_FIELDS {
            let old_value = old_fields.get(field).unwrap_or(&Value::Null);
            let new_value = new_fields.get(field).unwrap_or(&Value::Null);
            if old_value != new_value {
                patches.push(PatchOperation::Replace {
                    path: format!("/{}/{}", position, field),
                    value: new_value.clone(),
                });
            }
        }
    }

    for (offset, task) in current.iter().enumerate().skip(shared) {
        patches.push(PatchOperation::Add {
            path: format!("/{}", start_index + offset),
            value: task.clone(),
        });
    }

    for index in (shared..previous.len()).rev() {
        patches.push(PatchOperation::Remove {
            path: format!("/{}", start_index + index),
        });
    }

    DiffResult {
        has_changes: !patches.is_empty(),
        patches,
    }
}

/// Apply `patches` in order to a copy of `baseline`
///
/// `baseline` must be indexed the same way as the snapshot the patches were
/// computed from.
pub fn apply(baseline: &[Task], patches: &[PatchOperation], start_index: usize) -> Result<Vec<Task>, PatchError> {
    let mut tasks = baseline.to_vec();

    for patch in patches {
        match patch {
            PatchOperation::Add { path, value } => {
                let (index, field) = parse_path(path, start_index)?;
                if field.is_some() {
                    return Err(PatchError::InvalidPath(path.clone()));
                }
                if index > tasks.len() {
                    return Err(PatchError::OutOfRange { index, len: tasks.len() });
                }
                tasks.insert(index, value.clone());
            }
            PatchOperation::Replace { path, value } => {
                let (index, field) = parse_path(path, start_index)?;
                let field = field.ok_or_else(|| PatchError::InvalidPath(path.clone()))?;
                let len = tasks.len();
                let task = tasks.get_mut(index).ok_or(PatchError::OutOfRange { index, len })?;
                *task = replace_field(task, field, value, path)?;
            }
            PatchOperation::Remove { path } => {
                let (index, field) = parse_path(path, start_index)?;
                if field.is_some() {
                    return Err(PatchError::InvalidPath(path.clone()));
                }
                if index >= tasks.len() {
                    return Err(PatchError::OutOfRange { index, len: tasks.len() });
                }
                tasks.remove(index);
            }
        }
    }

    Ok(tasks)
}

fn task_fields(task: &Task) -> Map<String, Value> {
    match serde_json::to_value(task) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Split `/<index>[/<field>]` and remove the window offset
fn parse_path(path: &str, start_index: usize) -> Result<(usize, Option<&str>), PatchError> {
    let invalid = || PatchError::InvalidPath(path.to_string());

    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    let (raw_index, field) = match rest.split_once('/') {
        Some((index, field)) if !field.is_empty() && !field.contains('/') => (index, Some(field)),
        Some(_) => return Err(invalid()),
        None => (rest, None),
    };

    let absolute: usize = raw_index.parse().map_err(|_| invalid())?;
    let index = absolute.checked_sub(start_index).ok_or_else(invalid)?;
    Ok((index, field))
}

fn replace_field(task: &Task, field: &str, value: &Value, path: &str) -> Result<Task, PatchError> {
    if !TASK_FIELDS.contains(&field) {
        return Err(PatchError::UnknownField(field.to_string()));
    }

    let mut fields = task_fields(task);
    fields.insert(field.to_string(), value.clone());

    serde_json::from_value(Value::Object(fields)).map_err(|e| PatchError::InvalidValue {
        path: path.to_string(),
        reason: e.to_string(),
    })
}
