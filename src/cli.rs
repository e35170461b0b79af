use chrono::{Datelike, Duration, NaiveDate};
use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

use crate::models::{
    IDEA_CATEGORIES, Idea, IdeaPatch, NewIdea, NewTask, PRIORITIES, TASK_CATEGORIES, Task, TaskPatch,
};
use crate::repository::{IdeaRepository, RepositoryError, TaskRepository};
use crate::store::KeyValueStore;
use crate::transfer::{ImportDocument, ImportExportService, ImportOptions, ImportReport, TransferError, format_bytes};
use crate::utils::{get_current_date_string, parse_date, split_list};

#[derive(Parser)]
#[command(name = "planner")]
#[command(about = "Weekly planner - tasks and ideas with JSON backup")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    /// Keep data in memory only; nothing is written to disk
    #[arg(long)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show today's tasks (default if no subcommand)
    Today,
    /// Add a new task
    AddTask {
        /// What needs doing
        content: String,
        /// Start date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        due: Option<String>,
        /// Last day of a multi-day task (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(TASK_CATEGORIES.iter().copied()))]
        category: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(PRIORITIES.iter().copied()))]
        priority: Option<String>,
        /// Hex color, e.g. #3B82F6
        #[arg(long)]
        color: Option<String>,
    },
    /// Add a new idea
    AddIdea {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(IDEA_CATEGORIES.iter().copied()))]
        category: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(PRIORITIES.iter().copied()))]
        priority: Option<String>,
        #[arg(long)]
        color: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
    },
    /// List tasks, optionally for a day or a date range
    Tasks(TaskFilter),
    /// List ideas, optionally filtered
    Ideas {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        /// Case-insensitive text search in title and description
        #[arg(long)]
        search: Option<String>,
    },
    /// Change fields of a task
    EditTask {
        id: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        due: Option<String>,
        #[arg(long, conflicts_with = "clear_end")]
        end: Option<String>,
        /// Make the task a single-day task again
        #[arg(long)]
        clear_end: bool,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(TASK_CATEGORIES.iter().copied()))]
        category: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(PRIORITIES.iter().copied()))]
        priority: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Change fields of an idea
    EditIdea {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(IDEA_CATEGORIES.iter().copied()))]
        category: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(PRIORITIES.iter().copied()))]
        priority: Option<String>,
        #[arg(long)]
        color: Option<String>,
        /// Comma-separated tags, replacing the current ones
        #[arg(long)]
        tags: Option<String>,
    },
    /// Mark a task as completed
    Toggle {
        id: String,
        /// Mark as not completed instead
        #[arg(long)]
        undo: bool,
    },
    /// Delete a task
    DeleteTask { id: String },
    /// Delete an idea
    DeleteIdea { id: String },
    /// Write a JSON backup
    Export {
        #[arg(long, conflicts_with = "ideas_only")]
        tasks_only: bool,
        #[arg(long)]
        ideas_only: bool,
        /// Output file, defaults to weekly-planner-backup-<date>.json
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import a JSON backup or a task/idea list
    Import {
        file: PathBuf,
        /// Overwrite local data instead of merging into it
        #[arg(long)]
        replace: bool,
    },
    /// Show data statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show storage availability and usage
    Status,
    /// Delete all tasks and ideas
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct TaskFilter {
    /// Tasks active on this day (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["from", "to", "week"])]
    pub date: Option<String>,
    /// Start of a date range (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    pub from: Option<String>,
    /// End of a date range (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    pub to: Option<String>,
    /// Tasks in the current Monday-Sunday week
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub week: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Repository(#[from] RepositoryError),
    #[error("Failed to parse date: {0}")]
    DateParseError(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Transfer(#[from] TransferError),
    #[error("Failed to serialize export: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Import failed:\n{0}")]
    ImportFailed(String),
    #[error("Clear failed:\n{0}")]
    ClearFailed(String),
    #[error("Refusing to delete all data without --yes")]
    ConfirmationRequired,
}

/// Everything a command needs, built once in `main` and passed in
pub struct Context {
    pub store: Rc<KeyValueStore>,
    pub tasks: TaskRepository,
    pub ideas: IdeaRepository,
    pub transfer: ImportExportService,
}

impl Context {
    pub fn new(store: KeyValueStore) -> Self {
        let store = Rc::new(store);
        Self {
            tasks: TaskRepository::load(Rc::clone(&store)),
            ideas: IdeaRepository::load(Rc::clone(&store)),
            transfer: ImportExportService::new(Rc::clone(&store)),
            store,
        }
    }
}

fn parse_date_arg(value: &str) -> Result<NaiveDate, CliError> {
    if value.eq_ignore_ascii_case("today") {
        return parse_date_arg(&get_current_date_string());
    }
    parse_date(value)
        .map_err(|e| CliError::DateParseError(format!("Invalid date format '{}': {}", value, e)))
}

/// Validate a date argument and return it in stored form
fn date_string(value: &str) -> Result<String, CliError> {
    Ok(parse_date_arg(value)?.format("%Y-%m-%d").to_string())
}

/// Monday and Sunday of the week containing `day`
pub fn week_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

pub fn format_task_line(task: &Task) -> String {
    let check = if task.is_completed { "x" } else { " " };
    let dates = match &task.end_date {
        Some(end) if end != &task.due_date => format!("{}..{}", task.due_date, end),
        _ => task.due_date.clone(),
    };
    format!(
        "[{}] {:<22} {}  ({}/{})  {}",
        check, dates, task.content, task.category, task.priority, task.id
    )
}

pub fn format_idea_line(idea: &Idea) -> String {
    let tags = if idea.tags.is_empty() {
        String::new()
    } else {
        format!("  #{}", idea.tags.join(" #"))
    };
    format!(
        "{}  ({}/{}){}  {}",
        idea.title, idea.category, idea.priority, tags, idea.id
    )
}

fn print_tasks(tasks: &[&Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
    }
    for task in tasks {
        println!("{}", format_task_line(task));
    }
}

/// Handle the default view: tasks active today
pub fn handle_today(tasks: &TaskRepository) -> Result<(), CliError> {
    let today = parse_date_arg("today")?;
    println!("{}", today.format("%A, %Y-%m-%d"));
    print_tasks(&tasks.tasks_on(today));
    Ok(())
}

/// Handle the add-task command
pub fn handle_add_task(
    mut new: NewTask,
    default_color: &str,
    tasks: &mut TaskRepository,
) -> Result<(), CliError> {
    new.due_date = if new.due_date.is_empty() {
        get_current_date_string()
    } else {
        date_string(&new.due_date)?
    };
    if let Some(end) = new.end_date.take() {
        new.end_date = Some(date_string(&end)?);
    }
    new.color.get_or_insert_with(|| default_color.to_string());

    let task = tasks.create(new)?;
    println!("Task created successfully (ID: {})", task.id);
    Ok(())
}

/// Handle the add-idea command
pub fn handle_add_idea(
    mut new: NewIdea,
    tags: Option<String>,
    default_color: &str,
    ideas: &mut IdeaRepository,
) -> Result<(), CliError> {
    new.tags = tags.as_deref().map(split_list).unwrap_or_default();
    new.color.get_or_insert_with(|| default_color.to_string());

    let idea = ideas.create(new)?;
    println!("Idea created successfully (ID: {})", idea.id);
    Ok(())
}

/// Handle the tasks listing
pub fn handle_list_tasks(filter: &TaskFilter, tasks: &TaskRepository) -> Result<(), CliError> {
    let mut listed: Vec<&Task> = if let Some(date) = &filter.date {
        tasks.tasks_on(parse_date_arg(date)?)
    } else if let (Some(from), Some(to)) = (&filter.from, &filter.to) {
        tasks.tasks_in_range(parse_date_arg(from)?, parse_date_arg(to)?)
    } else if filter.week {
        let (monday, sunday) = week_bounds(parse_date_arg("today")?);
        println!("Week of {} - {}", monday, sunday);
        tasks.tasks_in_range(monday, sunday)
    } else {
        tasks.all().iter().collect()
    };

    listed.sort_by(|a, b| a.due_date.cmp(&b.due_date));
    print_tasks(&listed);
    Ok(())
}

/// Handle the ideas listing
pub fn handle_list_ideas(
    category: Option<&str>,
    priority: Option<&str>,
    search: Option<&str>,
    ideas: &IdeaRepository,
) -> Result<(), CliError> {
    let mut listed: Vec<&Idea> = match search {
        Some(query) => ideas.search(query),
        None => ideas.all().iter().collect(),
    };
    if let Some(category) = category {
        listed.retain(|idea| idea.category == category);
    }
    if let Some(priority) = priority {
        listed.retain(|idea| idea.priority == priority);
    }

    if listed.is_empty() {
        println!("No ideas.");
    }
    for idea in listed {
        println!("{}", format_idea_line(idea));
    }
    Ok(())
}

/// Handle the edit-task command
pub fn handle_edit_task(id: &str, mut patch: TaskPatch, tasks: &mut TaskRepository) -> Result<(), CliError> {
    if let Some(due) = patch.due_date.take() {
        patch.due_date = Some(date_string(&due)?);
    }
    if let Some(end) = patch.end_date.take() {
        patch.end_date = Some(end.as_deref().map(date_string).transpose()?);
    }

    if !tasks.update(id, patch)? {
        return Err(CliError::NotFound { kind: "Task", id: id.to_string() });
    }
    println!("Task updated (ID: {})", id);
    Ok(())
}

/// Handle the edit-idea command
pub fn handle_edit_idea(
    id: &str,
    mut patch: IdeaPatch,
    tags: Option<String>,
    ideas: &mut IdeaRepository,
) -> Result<(), CliError> {
    patch.tags = tags.as_deref().map(split_list);
    if !ideas.update(id, patch)? {
        return Err(CliError::NotFound { kind: "Idea", id: id.to_string() });
    }
    println!("Idea updated (ID: {})", id);
    Ok(())
}

/// Handle the toggle command
pub fn handle_toggle(id: &str, undo: bool, tasks: &mut TaskRepository) -> Result<(), CliError> {
    if !tasks.toggle_completion(id, !undo)? {
        return Err(CliError::NotFound { kind: "Task", id: id.to_string() });
    }
    let state = if undo { "not completed" } else { "completed" };
    println!("Task marked as {} (ID: {})", state, id);
    Ok(())
}

/// Handle the delete-task command
pub fn handle_delete_task(id: &str, tasks: &mut TaskRepository) -> Result<(), CliError> {
    if !tasks.delete(id)? {
        return Err(CliError::NotFound { kind: "Task", id: id.to_string() });
    }
    println!("Task deleted (ID: {})", id);
    Ok(())
}

/// Handle the delete-idea command
pub fn handle_delete_idea(id: &str, ideas: &mut IdeaRepository) -> Result<(), CliError> {
    if !ideas.delete(id)? {
        return Err(CliError::NotFound { kind: "Idea", id: id.to_string() });
    }
    println!("Idea deleted (ID: {})", id);
    Ok(())
}

/// Default export file name for today
pub fn default_export_name(tasks_only: bool, ideas_only: bool) -> PathBuf {
    let kind = if tasks_only {
        "tasks"
    } else if ideas_only {
        "ideas"
    } else {
        "backup"
    };
    PathBuf::from(format!("weekly-planner-{}-{}.json", kind, get_current_date_string()))
}

/// Handle the export command; returns the written path
pub fn handle_export(
    tasks_only: bool,
    ideas_only: bool,
    output: Option<PathBuf>,
    transfer: &ImportExportService,
) -> Result<PathBuf, CliError> {
    let path = output.unwrap_or_else(|| default_export_name(tasks_only, ideas_only));

    let json = if tasks_only {
        serde_json::to_string_pretty(&transfer.export_tasks())?
    } else if ideas_only {
        serde_json::to_string_pretty(&transfer.export_ideas())?
    } else {
        serde_json::to_string_pretty(&transfer.export_all())?
    };
    fs::write(&path, json)?;

    println!("Exported to {}", path.display());
    Ok(path)
}

/// Handle the import command
pub fn handle_import(path: &Path, replace: bool, transfer: &ImportExportService) -> Result<ImportReport, CliError> {
    let text = fs::read_to_string(path)?;
    let document = ImportDocument::parse(&text)?;
    let options = ImportOptions {
        merge_with_existing: !replace,
    };

    let report = transfer.import_document(&document, options);
    if !report.success {
        return Err(CliError::ImportFailed(report.errors.join("\n")));
    }

    println!(
        "Import complete: {} tasks, {} ideas ({} duplicates skipped)",
        report.imported.tasks,
        report.imported.ideas,
        report.skipped.tasks + report.skipped.ideas
    );
    Ok(report)
}

/// Handle the stats command
pub fn handle_stats(json: bool, transfer: &ImportExportService) -> Result<(), CliError> {
    let stats = transfer.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!(
        "Tasks: {} ({} completed, {} pending)",
        stats.tasks.total, stats.tasks.completed, stats.tasks.pending
    );
    println!("Ideas: {}", stats.ideas.total);
    println!("Categories in use: {}", stats.categories);
    println!("Priorities in use: {}", stats.priorities);
    println!("Data size: {}", stats.formatted_size);
    Ok(())
}

/// Handle the status command
pub fn handle_status(ctx: &Context) -> Result<(), CliError> {
    if !ctx.store.is_available() {
        println!("Storage: unavailable");
        return Ok(());
    }

    let usage = ctx.store.usage();
    match usage.quota {
        Some(quota) => println!(
            "Storage: available, {} of {} used{}",
            format_bytes(usage.bytes),
            format_bytes(quota),
            if usage.near_limit { " (near limit)" } else { "" }
        ),
        None => println!("Storage: available, {} used", format_bytes(usage.bytes)),
    }
    for error in [ctx.tasks.last_error(), ctx.ideas.last_error()].into_iter().flatten() {
        println!("Warning: {}", error);
    }
    Ok(())
}

/// Handle the clear command
pub fn handle_clear(yes: bool, ctx: &mut Context) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::ConfirmationRequired);
    }
    let report = ctx.transfer.clear_all();
    if !report.success {
        return Err(CliError::ClearFailed(report.errors.join("\n")));
    }
    ctx.tasks.reload();
    ctx.ideas.reload();
    println!("All tasks and ideas deleted.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context() -> Context {
        Context::new(KeyValueStore::in_memory())
    }

    #[test]
    fn cli_parses_add_task() {
        let cli = Cli::try_parse_from([
            "planner", "add-task", "Call mom", "--due", "2024-05-01", "--category", "personal",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::AddTask { content, due, category, .. }) => {
                assert_eq!(content, "Call mom");
                assert_eq!(due.as_deref(), Some("2024-05-01"));
                assert_eq!(category.as_deref(), Some("personal"));
            }
            _ => panic!("expected add-task"),
        }
    }

    #[test]
    fn cli_rejects_unknown_category() {
        assert!(Cli::try_parse_from(["planner", "add-task", "x", "--category", "hobby"]).is_err());
        assert!(Cli::try_parse_from(["planner", "add-idea", "x", "--category", "creative"]).is_ok());
    }

    #[test]
    fn week_bounds_run_monday_to_sunday() {
        let wednesday = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let (monday, sunday) = week_bounds(wednesday);
        assert_eq!(monday, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert_eq!(sunday, NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());
        assert_eq!(week_bounds(monday), (monday, sunday));
    }

    #[test]
    fn add_task_normalises_dates_and_applies_color() {
        let mut ctx = context();
        let mut new = NewTask::new("Plan trip", "2024-06-01");
        new.end_date = Some("2024-06-03".into());
        handle_add_task(new, "#123456", &mut ctx.tasks).unwrap();

        let task = &ctx.tasks.all()[0];
        assert_eq!(task.color, "#123456");
        assert_eq!(task.end_date.as_deref(), Some("2024-06-03"));

        let bad = NewTask::new("Oops", "06/01/2024");
        assert!(matches!(
            handle_add_task(bad, "#123456", &mut ctx.tasks),
            Err(CliError::DateParseError(_))
        ));
    }

    #[test]
    fn add_task_without_due_uses_today() {
        let mut ctx = context();
        handle_add_task(NewTask::new("Now", ""), "#000000", &mut ctx.tasks).unwrap();
        assert_eq!(ctx.tasks.all()[0].due_date, get_current_date_string());
    }

    #[test]
    fn missing_ids_surface_as_not_found() {
        let mut ctx = context();
        assert!(matches!(
            handle_toggle("task_nope", false, &mut ctx.tasks),
            Err(CliError::NotFound { kind: "Task", .. })
        ));
        assert!(matches!(
            handle_delete_idea("idea_nope", &mut ctx.ideas),
            Err(CliError::NotFound { kind: "Idea", .. })
        ));
    }

    #[test]
    fn edit_task_can_clear_end_date() {
        let mut ctx = context();
        let mut new = NewTask::new("Trip", "2024-06-01");
        new.end_date = Some("2024-06-03".into());
        handle_add_task(new, "#000000", &mut ctx.tasks).unwrap();
        let id = ctx.tasks.all()[0].id.clone();

        let patch = TaskPatch {
            end_date: Some(None),
            ..Default::default()
        };
        handle_edit_task(&id, patch, &mut ctx.tasks).unwrap();
        assert_eq!(ctx.tasks.get(&id).unwrap().end_date, None);
    }

    #[test]
    fn export_then_import_through_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.json");

        let mut source = context();
        handle_add_task(NewTask::new("A", "2024-01-01"), "#000000", &mut source.tasks).unwrap();
        handle_add_idea(NewIdea::new("B"), Some("x, y".into()), "#111111", &mut source.ideas).unwrap();
        handle_export(false, false, Some(path.clone()), &source.transfer).unwrap();

        let target = context();
        let report = handle_import(&path, false, &target.transfer).unwrap();
        assert_eq!(report.imported.tasks, 1);
        assert_eq!(report.imported.ideas, 1);
        assert_eq!(target.transfer.export_ideas()[0].tags, vec!["x", "y"]);
    }

    #[test]
    fn single_collection_export_imports_as_list() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let mut source = context();
        handle_add_task(NewTask::new("A", "2024-01-01"), "#000000", &mut source.tasks).unwrap();
        handle_export(true, false, Some(path.clone()), &source.transfer).unwrap();

        let target = context();
        let report = handle_import(&path, true, &target.transfer).unwrap();
        assert_eq!(report.imported.tasks, 1);
        assert_eq!(report.imported.ideas, 0);
    }

    #[test]
    fn clear_requires_confirmation_and_reloads() {
        let mut ctx = context();
        handle_add_task(NewTask::new("A", "2024-01-01"), "#000000", &mut ctx.tasks).unwrap();
        assert!(matches!(handle_clear(false, &mut ctx), Err(CliError::ConfirmationRequired)));
        assert_eq!(ctx.tasks.len(), 1);

        handle_clear(true, &mut ctx).unwrap();
        assert!(ctx.tasks.is_empty());
    }

    #[test]
    fn task_line_shows_range_and_state() {
        let mut ctx = context();
        let mut new = NewTask::new("Conference", "2024-01-10");
        new.end_date = Some("2024-01-12".into());
        handle_add_task(new, "#000000", &mut ctx.tasks).unwrap();
        let id = ctx.tasks.all()[0].id.clone();
        ctx.tasks.toggle_completion(&id, true).unwrap();

        let line = format_task_line(&ctx.tasks.all()[0]);
        assert!(line.starts_with("[x] 2024-01-10..2024-01-12"));
        assert!(line.contains("Conference"));
        assert!(line.ends_with(&id));
    }
}
