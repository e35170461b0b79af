use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use weekly_planner::cli::{Cli, Commands, Context};
use weekly_planner::models::{IdeaPatch, NewIdea, NewTask, TaskPatch};
use weekly_planner::{Config, Database, KeyValueStore, Profile};

fn main() -> Result<()> {
    // Set up error reporting with color-eyre
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "weekly_planner=info,planner=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Determine profile: --dev flag enables dev mode, otherwise use prod
    let profile = if cli.dev { Profile::Dev } else { Profile::Prod };

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_with_profile(profile)?,
    };

    let store = if cli.ephemeral {
        KeyValueStore::in_memory()
    } else {
        let db_path = config.get_database_path();
        let db = Database::new(
            db_path
                .to_str()
                .ok_or_else(|| color_eyre::eyre::eyre!("Database path contains invalid UTF-8"))?,
        )?;
        KeyValueStore::new(db)
    };

    let mut ctx = Context::new(store.with_quota(config.storage_quota()));

    // Dispatch to appropriate command handler
    match cli.command.unwrap_or(Commands::Today) {
        Commands::Today => weekly_planner::cli::handle_today(&ctx.tasks)?,
        Commands::AddTask {
            content,
            due,
            end,
            comment,
            category,
            priority,
            color,
        } => {
            let new = NewTask {
                content,
                due_date: due.unwrap_or_default(),
                end_date: end,
                comment,
                category,
                priority,
                color,
            };
            weekly_planner::cli::handle_add_task(new, &config.default_task_color, &mut ctx.tasks)?;
        }
        Commands::AddIdea {
            title,
            description,
            category,
            priority,
            color,
            tags,
        } => {
            let new = NewIdea {
                title,
                description,
                category,
                priority,
                color,
                tags: Vec::new(),
            };
            weekly_planner::cli::handle_add_idea(new, tags, &config.default_idea_color, &mut ctx.ideas)?;
        }
        Commands::Tasks(filter) => weekly_planner::cli::handle_list_tasks(&filter, &ctx.tasks)?,
        Commands::Ideas {
            category,
            priority,
            search,
        } => weekly_planner::cli::handle_list_ideas(
            category.as_deref(),
            priority.as_deref(),
            search.as_deref(),
            &ctx.ideas,
        )?,
        Commands::EditTask {
            id,
            content,
            due,
            end,
            clear_end,
            comment,
            category,
            priority,
            color,
        } => {
            let patch = TaskPatch {
                content,
                comment: comment.map(|c| (!c.is_empty()).then_some(c)),
                due_date: due,
                end_date: if clear_end { Some(None) } else { end.map(Some) },
                is_completed: None,
                category,
                priority,
                color,
            };
            weekly_planner::cli::handle_edit_task(&id, patch, &mut ctx.tasks)?;
        }
        Commands::EditIdea {
            id,
            title,
            description,
            category,
            priority,
            color,
            tags,
        } => {
            let patch = IdeaPatch {
                title,
                description: description.map(|d| (!d.is_empty()).then_some(d)),
                category,
                priority,
                color,
                tags: None,
            };
            weekly_planner::cli::handle_edit_idea(&id, patch, tags, &mut ctx.ideas)?;
        }
        Commands::Toggle { id, undo } => weekly_planner::cli::handle_toggle(&id, undo, &mut ctx.tasks)?,
        Commands::DeleteTask { id } => weekly_planner::cli::handle_delete_task(&id, &mut ctx.tasks)?,
        Commands::DeleteIdea { id } => weekly_planner::cli::handle_delete_idea(&id, &mut ctx.ideas)?,
        Commands::Export {
            tasks_only,
            ideas_only,
            output,
        } => {
            weekly_planner::cli::handle_export(tasks_only, ideas_only, output, &ctx.transfer)?;
        }
        Commands::Import { file, replace } => {
            weekly_planner::cli::handle_import(&file, replace, &ctx.transfer)?;
        }
        Commands::Stats { json } => weekly_planner::cli::handle_stats(json, &ctx.transfer)?,
        Commands::Status => weekly_planner::cli::handle_status(&ctx)?,
        Commands::Clear { yes } => weekly_planner::cli::handle_clear(yes, &mut ctx)?,
    }

    Ok(())
}
