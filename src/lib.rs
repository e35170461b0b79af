pub mod cli;
pub mod config;
pub mod database;
pub mod models;
pub mod repository;
pub mod store;
pub mod transfer;
pub mod utils;

pub use config::Config;
pub use database::Database;
pub use models::{Idea, Task};
pub use repository::{IdeaRepository, TaskRepository};
pub use store::KeyValueStore;
pub use transfer::ImportExportService;
pub use utils::Profile;
