//! Backup documents: export, validation, merge/replace import and statistics.
//!
//! The service works on the persisted collections directly. Repositories that
//! were loaded before an import or [`ImportExportService::clear_all`] keep
//! their old view until they are reloaded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::rc::Rc;
use thiserror::Error;

use crate::models::{Entity, Idea, Task};
use crate::store::{KeyValueStore, StorageError, WriteBatch};
use crate::utils::now_timestamp;

pub const EXPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported file format: expected a backup document or a list of tasks or ideas")]
    UnsupportedFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: String,
    pub export_date: String,
    pub tasks: Vec<Task>,
    pub ideas: Vec<Idea>,
    pub metadata: ExportMetadata,
}

/// Derived summary, informational only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub total_tasks: usize,
    pub total_ideas: usize,
    pub completed_tasks: usize,
    pub categories: Vec<String>,
    pub priorities: Vec<String>,
}

/// Shape of an inbound file, decided once when it is read
#[derive(Debug, Clone, PartialEq)]
pub enum ImportDocument {
    FullBundle(Value),
    TaskList(Vec<Value>),
    IdeaList(Vec<Value>),
}

impl ImportDocument {
    pub fn parse(text: &str) -> Result<Self, TransferError> {
        Self::detect(serde_json::from_str(text)?)
    }

    /// An object carrying `version`, `tasks` and `ideas` is a full bundle.
    /// A list is tasks when its first record has a `dueDate`, ideas otherwise.
    pub fn detect(value: Value) -> Result<Self, TransferError> {
        let is_bundle = value.as_object().is_some_and(|map| {
            map.get("version").is_some_and(|v| !v.is_null())
                && map.get("tasks").is_some_and(Value::is_array)
                && map.get("ideas").is_some_and(Value::is_array)
        });
        if is_bundle {
            return Ok(Self::FullBundle(value));
        }

        match value {
            Value::Array(records) => {
                let is_tasks = records
                    .first()
                    .and_then(|first| first.get("dueDate"))
                    .is_some_and(is_truthy);
                if is_tasks {
                    Ok(Self::TaskList(records))
                } else {
                    Ok(Self::IdeaList(records))
                }
            }
            _ => Err(TransferError::UnsupportedFormat),
        }
    }
}

/// `null`, `false`, zero and `""` do not mark a list as tasks
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Keep local records and drop inbound ones whose id already exists.
    /// When false the inbound collection replaces the local one.
    pub merge_with_existing: bool,
}

impl ImportOptions {
    pub fn merge() -> Self {
        Self {
            merge_with_existing: true,
        }
    }

    pub fn replace() -> Self {
        Self {
            merge_with_existing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub tasks: usize,
    pub ideas: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub success: bool,
    pub errors: Vec<String>,
    /// Size of each collection after the import
    pub imported: Counts,
    /// Inbound records dropped because their id was already present,
    /// locally on merge or earlier in the same list
    pub skipped: Counts,
}

impl ImportReport {
    fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            imported: Counts::default(),
            skipped: Counts::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityImportReport {
    pub success: bool,
    pub errors: Vec<String>,
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub success: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStats {
    pub tasks: TaskStats,
    pub ideas: IdeaStats,
    pub categories: usize,
    pub priorities: usize,
    pub total_size: u64,
    pub formatted_size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdeaStats {
    pub total: usize,
    pub size: u64,
}

struct Merged<E> {
    items: Vec<E>,
    skipped: usize,
}

pub struct ImportExportService {
    store: Rc<KeyValueStore>,
}

impl ImportExportService {
    pub fn new(store: Rc<KeyValueStore>) -> Self {
        Self { store }
    }

    fn load<E: Entity>(&self) -> Vec<E> {
        self.store.get(E::STORAGE_KEY).unwrap_or_default()
    }

    pub fn export_tasks(&self) -> Vec<Task> {
        self.load()
    }

    pub fn export_ideas(&self) -> Vec<Idea> {
        self.load()
    }

    pub fn export_all(&self) -> ExportDocument {
        let tasks = self.export_tasks();
        let ideas = self.export_ideas();

        let metadata = ExportMetadata {
            total_tasks: tasks.len(),
            total_ideas: ideas.len(),
            completed_tasks: tasks.iter().filter(|t| t.is_completed).count(),
            categories: distinct_categories(&tasks, &ideas),
            priorities: distinct_priorities(&tasks, &ideas),
        };

        ExportDocument {
            version: EXPORT_VERSION.to_string(),
            export_date: now_timestamp(),
            tasks,
            ideas,
            metadata,
        }
    }

    /// Structural check of a full document. Only the required string fields of
    /// each record are looked at; one message per failing record.
    pub fn validate(&self, document: &Value) -> ValidationReport {
        let Some(map) = document.as_object() else {
            return ValidationReport {
                valid: false,
                errors: vec!["Invalid data format".to_string()],
            };
        };

        let mut errors = Vec::new();
        if let Some(Value::Array(tasks)) = map.get("tasks") {
            errors.extend(record_errors::<Task>(tasks));
        }
        if let Some(Value::Array(ideas)) = map.get("ideas") {
            errors.extend(record_errors::<Idea>(ideas));
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Import both collections from a full document.
    ///
    /// Nothing is written unless the whole document validates and decodes.
    /// Both collections are then written in one storage transaction. A missing
    /// collection counts as an empty inbound list.
    pub fn import_all(&self, document: &Value, options: ImportOptions) -> ImportReport {
        let validation = self.validate(document);
        if !validation.valid {
            return ImportReport::failed(validation.errors);
        }

        let tasks = collection(document, "tasks");
        let ideas = collection(document, "ideas");

        let (tasks, ideas) = match (
            self.merge::<Task>(tasks, options),
            self.merge::<Idea>(ideas, options),
        ) {
            (Ok(tasks), Ok(ideas)) => (tasks, ideas),
            (tasks, ideas) => {
                let mut errors = tasks.err().unwrap_or_default();
                errors.extend(ideas.err().unwrap_or_default());
                return ImportReport::failed(errors);
            }
        };

        if let Err(e) = self.persist_both(&tasks.items, &ideas.items) {
            tracing::error!(error = %e, "import failed to persist");
            return ImportReport::failed(vec![format!("Import failed: {}", e)]);
        }

        tracing::info!(
            tasks = tasks.items.len(),
            ideas = ideas.items.len(),
            skipped_tasks = tasks.skipped,
            skipped_ideas = ideas.skipped,
            merge = options.merge_with_existing,
            "imported backup"
        );

        ImportReport {
            success: true,
            errors: Vec::new(),
            imported: Counts {
                tasks: tasks.items.len(),
                ideas: ideas.items.len(),
            },
            skipped: Counts {
                tasks: tasks.skipped,
                ideas: ideas.skipped,
            },
        }
    }

    fn persist_both(&self, tasks: &[Task], ideas: &[Idea]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(Task::STORAGE_KEY, tasks)?;
        batch.put(Idea::STORAGE_KEY, ideas)?;
        self.store.try_write_batch(batch)
    }

    pub fn import_tasks(&self, tasks: &[Value], options: ImportOptions) -> EntityImportReport {
        self.import_entities::<Task>(tasks, options)
    }

    pub fn import_ideas(&self, ideas: &[Value], options: ImportOptions) -> EntityImportReport {
        self.import_entities::<Idea>(ideas, options)
    }

    fn import_entities<E: Entity>(&self, records: &[Value], options: ImportOptions) -> EntityImportReport {
        let failed = |errors| EntityImportReport {
            success: false,
            errors,
            imported: 0,
            skipped: 0,
        };

        let errors = record_errors::<E>(records);
        if !errors.is_empty() {
            return failed(errors);
        }

        let merged = match self.merge::<E>(records, options) {
            Ok(merged) => merged,
            Err(errors) => return failed(errors),
        };

        if let Err(e) = self.store.try_set(E::STORAGE_KEY, &merged.items) {
            tracing::error!(key = E::STORAGE_KEY, error = %e, "import failed to persist");
            return failed(vec![format!("Import failed: {}", e)]);
        }

        tracing::info!(
            key = E::STORAGE_KEY,
            total = merged.items.len(),
            skipped = merged.skipped,
            "imported collection"
        );

        EntityImportReport {
            success: true,
            errors: Vec::new(),
            imported: merged.items.len(),
            skipped: merged.skipped,
        }
    }

    /// Route a detected document to the matching import
    pub fn import_document(&self, document: &ImportDocument, options: ImportOptions) -> ImportReport {
        let single = |report: EntityImportReport, as_tasks: bool| {
            let counts = |n| {
                if as_tasks {
                    Counts { tasks: n, ideas: 0 }
                } else {
                    Counts { tasks: 0, ideas: n }
                }
            };
            ImportReport {
                success: report.success,
                errors: report.errors,
                imported: counts(report.imported),
                skipped: counts(report.skipped),
            }
        };

        match document {
            ImportDocument::FullBundle(value) => self.import_all(value, options),
            ImportDocument::TaskList(tasks) => single(self.import_tasks(tasks, options), true),
            ImportDocument::IdeaList(ideas) => single(self.import_ideas(ideas, options), false),
        }
    }

    /// Combine inbound records with the local collection (merge) or with
    /// nothing (replace). Either way the first record seen for an id wins.
    fn merge<E: Entity>(&self, inbound: &[Value], options: ImportOptions) -> Result<Merged<E>, Vec<String>> {
        let incoming = decode_records::<E>(inbound)?;

        let mut items: Vec<E> = if options.merge_with_existing {
            self.load()
        } else {
            Vec::with_capacity(incoming.len())
        };
        let mut seen: HashSet<String> = items.iter().map(|e| e.id().to_string()).collect();
        let mut skipped = 0;
        for entity in incoming {
            if seen.insert(entity.id().to_string()) {
                items.push(entity);
            } else {
                skipped += 1;
            }
        }
        Ok(Merged { items, skipped })
    }

    /// Remove both collections from storage
    pub fn clear_all(&self) -> ClearReport {
        let errors: Vec<String> = [Task::STORAGE_KEY, Idea::STORAGE_KEY]
            .into_iter()
            .filter_map(|key| {
                self.store
                    .try_remove(key)
                    .err()
                    .map(|e| format!("Failed to clear data: {}", e))
            })
            .collect();

        ClearReport {
            success: errors.is_empty(),
            errors,
        }
    }

    pub fn stats(&self) -> DataStats {
        let tasks = self.export_tasks();
        let ideas = self.export_ideas();

        let completed = tasks.iter().filter(|t| t.is_completed).count();
        let tasks_size = json_len(&tasks);
        let ideas_size = json_len(&ideas);
        let total_size = tasks_size + ideas_size;

        DataStats {
            tasks: TaskStats {
                total: tasks.len(),
                completed,
                pending: tasks.len() - completed,
                size: tasks_size,
            },
            ideas: IdeaStats {
                total: ideas.len(),
                size: ideas_size,
            },
            categories: distinct_categories(&tasks, &ideas).len(),
            priorities: distinct_priorities(&tasks, &ideas).len(),
            total_size,
            formatted_size: format_bytes(total_size),
        }
    }
}

fn collection<'a>(document: &'a Value, field: &str) -> &'a [Value] {
    document
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn record_errors<E: Entity>(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let missing: Vec<&str> = E::REQUIRED_FIELDS
                .iter()
                .copied()
                .filter(|field| {
                    !record
                        .get(field)
                        .and_then(Value::as_str)
                        .is_some_and(|s| !s.is_empty())
                })
                .collect();
            (!missing.is_empty()).then(|| {
                format!(
                    "{} {}: missing or invalid {}",
                    E::LABEL,
                    index + 1,
                    missing.join(", ")
                )
            })
        })
        .collect()
}

fn decode_records<E: Entity>(records: &[Value]) -> Result<Vec<E>, Vec<String>> {
    let now = now_timestamp();
    let mut decoded = Vec::with_capacity(records.len());
    let mut errors = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match E::deserialize(record) {
            Ok(mut entity) => {
                entity.stamp_missing(&now);
                decoded.push(entity);
            }
            Err(e) => errors.push(format!("{} {}: {}", E::LABEL, index + 1, e)),
        }
    }
    if errors.is_empty() { Ok(decoded) } else { Err(errors) }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .map(str::to_string)
        .collect()
}

fn distinct_categories(tasks: &[Task], ideas: &[Idea]) -> Vec<String> {
    distinct(
        tasks
            .iter()
            .map(Entity::category)
            .chain(ideas.iter().map(Entity::category)),
    )
}

fn distinct_priorities(tasks: &[Task], ideas: &[Idea]) -> Vec<String> {
    distinct(
        tasks
            .iter()
            .map(Entity::priority)
            .chain(ideas.iter().map(Entity::priority)),
    )
}

fn json_len<T: Serialize>(value: &T) -> u64 {
    serde_json::to_string(value).map_or(0, |s| s.len() as u64)
}

/// Human-readable size with base-1024 units and at most two decimals
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
