use chrono::NaiveDate;
use std::rc::Rc;
use thiserror::Error;

use crate::models::{Entity, Idea, Task, TaskPatch};
use crate::store::{KeyValueStore, StorageError};
use crate::utils::{generate_id, now_timestamp};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Invalid {label}: {reason}")]
    Invalid { label: &'static str, reason: String },
    #[error("Failed to save '{key}': {source}")]
    Persist {
        key: &'static str,
        #[source]
        source: StorageError,
    },
}

/// In-memory collection of one entity type, persisted as a single JSON array.
///
/// Every mutation rewrites the whole array. When that write fails the
/// in-memory change is kept and the error is both returned and remembered in
/// [`Repository::last_error`]; memory and storage stay apart until the next
/// successful write or a [`Repository::reload`].
pub struct Repository<E: Entity> {
    store: Rc<KeyValueStore>,
    items: Vec<E>,
    last_error: Option<String>,
}

pub type TaskRepository = Repository<Task>;
pub type IdeaRepository = Repository<Idea>;

impl<E: Entity> Repository<E> {
    /// Load the persisted collection from the store
    pub fn load(store: Rc<KeyValueStore>) -> Self {
        let mut repo = Self {
            store,
            items: Vec::new(),
            last_error: None,
        };
        repo.reload();
        repo
    }

    /// Replace the in-memory collection with what the store holds.
    /// An unreadable collection loads as empty.
    pub fn reload(&mut self) {
        match self.store.try_get::<Vec<E>>(E::STORAGE_KEY) {
            Ok(items) => {
                self.items = items.unwrap_or_default();
                self.last_error = None;
            }
            Err(e) => {
                tracing::warn!(key = E::STORAGE_KEY, error = %e, "stored collection unreadable, starting empty");
                self.items = Vec::new();
                self.last_error = Some(e.to_string());
            }
        }
    }

    pub fn all(&self) -> &[E] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Diagnostic from the last failed load or save, cleared by the next success
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Create, append and persist a new entity
    pub fn create(&mut self, new: E::New) -> Result<E, RepositoryError> {
        let entity = E::build(new, generate_id(E::ID_PREFIX), now_timestamp());
        entity.check().map_err(|reason| RepositoryError::Invalid {
            label: E::LABEL,
            reason,
        })?;

        self.items.push(entity.clone());
        self.persist()?;
        tracing::debug!(id = entity.id(), "created {}", E::LABEL);
        Ok(entity)
    }

    /// Merge a patch into an existing entity. `Ok(false)` if the id is unknown.
    pub fn update(&mut self, id: &str, patch: E::Patch) -> Result<bool, RepositoryError> {
        let Some(index) = self.items.iter().position(|item| item.id() == id) else {
            return Ok(false);
        };

        let mut updated = self.items[index].clone();
        updated.apply(patch).map_err(|reason| RepositoryError::Invalid {
            label: E::LABEL,
            reason,
        })?;
        updated.touch(now_timestamp());

        self.items[index] = updated;
        self.persist()?;
        Ok(true)
    }

    /// Remove the entity with this id. `Ok(false)` if nothing matched.
    pub fn delete(&mut self, id: &str) -> Result<bool, RepositoryError> {
        let Some(index) = self.items.iter().position(|item| item.id() == id) else {
            return Ok(false);
        };
        self.items.remove(index);
        self.persist()?;
        tracing::debug!(id, "deleted {}", E::LABEL);
        Ok(true)
    }

    /// Empty the collection and drop its storage key
    pub fn clear(&mut self) -> Result<(), RepositoryError> {
        self.items.clear();
        self.store
            .try_remove(E::STORAGE_KEY)
            .map_err(|source| self.record(source))
    }

    fn persist(&mut self) -> Result<(), RepositoryError> {
        match self.store.try_set(E::STORAGE_KEY, &self.items) {
            Ok(()) => {
                self.last_error = None;
                Ok(())
            }
            Err(source) => Err(self.record(source)),
        }
    }

    fn record(&mut self, source: StorageError) -> RepositoryError {
        tracing::error!(key = E::STORAGE_KEY, error = %source, "error saving collection");
        let err = RepositoryError::Persist {
            key: E::STORAGE_KEY,
            source,
        };
        self.last_error = Some(err.to_string());
        err
    }
}

impl Repository<Task> {
    pub fn toggle_completion(&mut self, id: &str, is_completed: bool) -> Result<bool, RepositoryError> {
        self.update(
            id,
            TaskPatch {
                is_completed: Some(is_completed),
                ..Default::default()
            },
        )
    }

    /// Tasks whose span covers `date`, both ends inclusive
    pub fn tasks_on(&self, date: NaiveDate) -> Vec<&Task> {
        self.items
            .iter()
            .filter(|task| {
                task.span()
                    .is_some_and(|(start, end)| start <= date && date <= end)
            })
            .collect()
    }

    /// Tasks whose span overlaps `[start, end]`
    pub fn tasks_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<&Task> {
        self.items
            .iter()
            .filter(|task| {
                task.span()
                    .is_some_and(|(task_start, task_end)| task_start <= end && task_end >= start)
            })
            .collect()
    }
}

impl Repository<Idea> {
    pub fn by_category(&self, category: &str) -> Vec<&Idea> {
        self.items.iter().filter(|idea| idea.category == category).collect()
    }

    pub fn by_priority(&self, priority: &str) -> Vec<&Idea> {
        self.items.iter().filter(|idea| idea.priority == priority).collect()
    }

    /// Case-insensitive substring match on title or description
    pub fn search(&self, query: &str) -> Vec<&Idea> {
        let query = query.to_lowercase();
        self.items
            .iter()
            .filter(|idea| {
                idea.title.to_lowercase().contains(&query)
                    || idea
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&query))
            })
            .collect()
    }
}
