use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::utils::calendar_date;

pub const TASK_CATEGORIES: &[&str] = &["work", "personal", "shopping", "health", "general"];
pub const IDEA_CATEGORIES: &[&str] = &[
    "work", "personal", "shopping", "health", "general", "creative", "business", "learning",
];
pub const PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];

pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_PRIORITY: &str = "medium";
pub const DEFAULT_TASK_COLOR: &str = "#3B82F6";
pub const DEFAULT_IDEA_COLOR: &str = "#F59E0B";
pub const UNTITLED_IDEA: &str = "Untitled";

/// A record kept in its own persisted collection.
///
/// Each implementor owns one storage key and knows how to build itself from
/// creation input, apply a partial update and check its own field invariants.
pub trait Entity: Clone + Serialize + DeserializeOwned {
    /// Key under which the whole collection is persisted
    const STORAGE_KEY: &'static str;
    /// Prefix used for generated ids
    const ID_PREFIX: &'static str;
    /// Human-readable name used in diagnostics
    const LABEL: &'static str;
    /// Wire names of the fields an imported record must carry as non-empty strings
    const REQUIRED_FIELDS: &'static [&'static str];

    type New;
    type Patch;

    fn build(new: Self::New, id: String, now: String) -> Self;
    fn id(&self) -> &str;
    fn category(&self) -> &str;
    fn priority(&self) -> &str;
    /// Apply a partial update, then check only the invariants of the fields
    /// it changed. Untouched fields are left alone even if they would fail
    /// [`Entity::check`].
    fn apply(&mut self, patch: Self::Patch) -> Result<(), String>;
    fn touch(&mut self, now: String);

    /// Fill timestamps missing from an imported record
    fn stamp_missing(&mut self, now: &str);

    /// Field invariants enforced on create
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub due_date: String, // YYYY-MM-DD, start of the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default = "default_category")]
    pub category: String, // work, personal, shopping, health, general
    #[serde(default = "default_priority")]
    pub priority: String, // low, medium, high, urgent
    #[serde(default = "default_task_color")]
    pub color: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub id: String,
    pub title: String,
    #[serde(default, alias = "content", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_idea_color")]
    pub color: String,
    #[serde(default, deserialize_with = "tags::deserialize")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Input for creating a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub content: String,
    pub due_date: String,
    pub end_date: Option<String>,
    pub comment: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub color: Option<String>,
}

impl NewTask {
    pub fn new(content: impl Into<String>, due_date: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            due_date: due_date.into(),
            ..Default::default()
        }
    }
}

/// Partial update for a task. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub content: Option<String>,
    pub comment: Option<Option<String>>,
    pub due_date: Option<String>,
    pub end_date: Option<Option<String>>,
    pub is_completed: Option<bool>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub color: Option<String>,
}

/// Input for creating an idea
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewIdea {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub color: Option<String>,
    pub tags: Vec<String>,
}

impl NewIdea {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Partial update for an idea. `Some(None)` clears the description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdeaPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub color: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl Task {
    /// Inclusive calendar span covered by the task, if its dates parse
    pub fn span(&self) -> Option<(chrono::NaiveDate, chrono::NaiveDate)> {
        let start = calendar_date(&self.due_date)?;
        let end = self
            .end_date
            .as_deref()
            .and_then(calendar_date)
            .unwrap_or(start);
        Some((start, end))
    }
}

impl Entity for Task {
    const STORAGE_KEY: &'static str = crate::store::keys::TASKS;
    const ID_PREFIX: &'static str = "task";
    const LABEL: &'static str = "Task";
    const REQUIRED_FIELDS: &'static [&'static str] = &["id", "content", "dueDate"];

    type New = NewTask;
    type Patch = TaskPatch;

    fn build(new: NewTask, id: String, now: String) -> Self {
        Self {
            id,
            content: new.content,
            comment: new.comment.filter(|c| !c.is_empty()),
            due_date: new.due_date,
            end_date: new.end_date.filter(|d| !d.is_empty()),
            is_completed: false,
            category: new.category.unwrap_or_else(default_category),
            priority: new.priority.unwrap_or_else(default_priority),
            color: new.color.unwrap_or_else(default_task_color),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn priority(&self) -> &str {
        &self.priority
    }

    fn apply(&mut self, patch: TaskPatch) -> Result<(), String> {
        let dates_changed = patch.due_date.is_some() || patch.end_date.is_some();
        if let Some(content) = patch.content {
            self.content = content;
            self.check_content()?;
        }
        if let Some(comment) = patch.comment {
            self.comment = comment;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = end_date;
        }
        if let Some(is_completed) = patch.is_completed {
            self.is_completed = is_completed;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if dates_changed {
            self.check_dates()?;
        }
        Ok(())
    }

    fn touch(&mut self, now: String) {
        self.updated_at = now;
    }

    fn stamp_missing(&mut self, now: &str) {
        stamp_missing(&mut self.created_at, &mut self.updated_at, now);
    }

    fn check(&self) -> Result<(), String> {
        self.check_content()?;
        self.check_dates()
    }
}

impl Task {
    fn check_content(&self) -> Result<(), String> {
        if self.content.trim().is_empty() {
            return Err("content must not be empty".to_string());
        }
        Ok(())
    }

    fn check_dates(&self) -> Result<(), String> {
        let start = calendar_date(&self.due_date)
            .ok_or_else(|| format!("invalid due date '{}'", self.due_date))?;
        if let Some(end_raw) = &self.end_date {
            let end = calendar_date(end_raw)
                .ok_or_else(|| format!("invalid end date '{}'", end_raw))?;
            if end < start {
                return Err(format!(
                    "end date {} is before due date {}",
                    end_raw, self.due_date
                ));
            }
        }
        Ok(())
    }
}

impl Entity for Idea {
    const STORAGE_KEY: &'static str = crate::store::keys::IDEAS;
    const ID_PREFIX: &'static str = "idea";
    const LABEL: &'static str = "Idea";
    const REQUIRED_FIELDS: &'static [&'static str] = &["id", "title"];

    type New = NewIdea;
    type Patch = IdeaPatch;

    fn build(new: NewIdea, id: String, now: String) -> Self {
        let title = if new.title.trim().is_empty() {
            UNTITLED_IDEA.to_string()
        } else {
            new.title
        };
        Self {
            id,
            title,
            description: new.description,
            category: new.category.unwrap_or_else(default_category),
            priority: new.priority.unwrap_or_else(default_priority),
            color: new.color.unwrap_or_else(default_idea_color),
            tags: new.tags,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn priority(&self) -> &str {
        &self.priority
    }

    fn apply(&mut self, patch: IdeaPatch) -> Result<(), String> {
        if let Some(title) = patch.title {
            self.title = title;
            self.check()?;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        Ok(())
    }

    fn touch(&mut self, now: String) {
        self.updated_at = now;
    }

    fn stamp_missing(&mut self, now: &str) {
        stamp_missing(&mut self.created_at, &mut self.updated_at, now);
    }

    fn check(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        Ok(())
    }
}

fn stamp_missing(created_at: &mut String, updated_at: &mut String, now: &str) {
    if created_at.is_empty() {
        *created_at = now.to_string();
    }
    if updated_at.is_empty() {
        *updated_at = created_at.clone();
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_priority() -> String {
    DEFAULT_PRIORITY.to_string()
}

fn default_task_color() -> String {
    DEFAULT_TASK_COLOR.to_string()
}

fn default_idea_color() -> String {
    DEFAULT_IDEA_COLOR.to_string()
}

/// Idea tags on the wire.
///
/// The server-backed planner stored tags as a JSON-encoded string (`""` when
/// empty), the local one as a plain array. Both decode here into the
/// canonical `Vec<String>`; output is always the plain array.
pub mod tags {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTags {
        List(Vec<String>),
        Encoded(String),
    }

    /// Decode a string-encoded tag list. Malformed input yields no tags.
    pub fn decode(raw: &str) -> Vec<String> {
        if raw.trim().is_empty() {
            return Vec::new();
        }
        serde_json::from_str(raw).unwrap_or_default()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<RawTags>::deserialize(deserializer)? {
            Some(RawTags::List(list)) => list,
            Some(RawTags::Encoded(raw)) => decode(&raw),
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(due: &str, end: Option<&str>) -> Task {
        let mut new = NewTask::new("Write report", due);
        new.end_date = end.map(str::to_string);
        Task::build(new, "task_1".into(), "2024-01-01T00:00:00.000Z".into())
    }

    #[test]
    fn task_build_applies_defaults() {
        let t = task("2024-01-10", None);
        assert_eq!(t.category, "general");
        assert_eq!(t.priority, "medium");
        assert_eq!(t.color, DEFAULT_TASK_COLOR);
        assert!(!t.is_completed);
        assert_eq!(t.created_at, t.updated_at);
    }

    #[test]
    fn task_check_rejects_inverted_range() {
        assert!(task("2024-01-10", Some("2024-01-12")).check().is_ok());
        assert!(task("2024-01-10", Some("2024-01-10")).check().is_ok());
        let err = task("2024-01-10", Some("2024-01-09")).check().unwrap_err();
        assert!(err.contains("before due date"));
        assert!(task("soon", None).check().is_err());
    }

    #[test]
    fn task_span_defaults_end_to_start() {
        let (start, end) = task("2024-01-10", None).span().unwrap();
        assert_eq!(start, end);
    }

    #[test]
    fn task_wire_format_is_camel_case() {
        let value = serde_json::to_value(task("2024-01-10", None)).unwrap();
        assert_eq!(value["dueDate"], "2024-01-10");
        assert_eq!(value["isCompleted"], false);
        assert!(value.get("endDate").is_none());
        assert!(value.get("comment").is_none());
    }

    #[test]
    fn task_accepts_null_optionals() {
        let t: Task = serde_json::from_value(json!({
            "id": "t1", "content": "x", "dueDate": "2024-01-01",
            "comment": null, "endDate": null, "userId": "demo-user-id"
        }))
        .unwrap();
        assert_eq!(t.comment, None);
        assert_eq!(t.end_date, None);
        assert_eq!(t.category, "general");
    }

    #[test]
    fn idea_tags_accept_array_and_encoded_string() {
        let from_array: Idea =
            serde_json::from_value(json!({"id": "i1", "title": "a", "tags": ["x", "y"]})).unwrap();
        let from_string: Idea =
            serde_json::from_value(json!({"id": "i1", "title": "a", "tags": "[\"x\",\"y\"]"}))
                .unwrap();
        let from_empty: Idea =
            serde_json::from_value(json!({"id": "i1", "title": "a", "tags": ""})).unwrap();
        let from_null: Idea =
            serde_json::from_value(json!({"id": "i1", "title": "a", "tags": null})).unwrap();
        assert_eq!(from_array.tags, vec!["x", "y"]);
        assert_eq!(from_string.tags, from_array.tags);
        assert!(from_empty.tags.is_empty());
        assert!(from_null.tags.is_empty());

        let out = serde_json::to_value(&from_string).unwrap();
        assert_eq!(out["tags"], json!(["x", "y"]));
    }

    #[test]
    fn idea_reads_legacy_content_as_description() {
        let idea: Idea =
            serde_json::from_value(json!({"id": "i1", "title": "a", "content": "body"})).unwrap();
        assert_eq!(idea.description.as_deref(), Some("body"));
    }

    #[test]
    fn idea_build_names_untitled() {
        let idea = Idea::build(NewIdea::new("  "), "idea_1".into(), "now".into());
        assert_eq!(idea.title, UNTITLED_IDEA);
        assert_eq!(idea.color, DEFAULT_IDEA_COLOR);
    }

    #[test]
    fn apply_checks_only_patched_fields() {
        let mut inverted = task("2024-03-10", Some("2024-03-01"));
        inverted.content = "  ".into();

        let toggle = TaskPatch {
            is_completed: Some(true),
            ..Default::default()
        };
        assert!(inverted.apply(toggle).is_ok());
        assert!(inverted.is_completed);

        let recolor = TaskPatch {
            color: Some("#000000".into()),
            ..Default::default()
        };
        assert!(inverted.apply(recolor).is_ok());

        let reword = TaskPatch {
            content: Some("".into()),
            ..Default::default()
        };
        assert!(inverted.apply(reword).is_err());

        let fix_end = TaskPatch {
            end_date: Some(Some("2024-03-12".into())),
            ..Default::default()
        };
        assert!(inverted.apply(fix_end).is_ok());
    }

    #[test]
    fn stamp_missing_fills_only_empty_timestamps() {
        let mut t: Task =
            serde_json::from_value(json!({"id": "t1", "content": "x", "dueDate": "2024-01-01"}))
                .unwrap();
        t.stamp_missing("2024-06-01T00:00:00.000Z");
        assert_eq!(t.created_at, "2024-06-01T00:00:00.000Z");
        assert_eq!(t.updated_at, t.created_at);

        let mut kept = task("2024-01-10", None);
        kept.stamp_missing("2099-01-01T00:00:00.000Z");
        assert_eq!(kept.created_at, "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn malformed_encoded_tags_decode_to_nothing() {
        assert!(tags::decode("not json").is_empty());
    }
}
