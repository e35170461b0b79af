use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use uuid::Uuid;

/// Profile mode for the application (dev or prod)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    fn app_name(self) -> &'static str {
        match self {
            Profile::Dev => "weekly-planner-dev",
            Profile::Prod => "weekly-planner",
        }
    }
}

/// Get the configuration directory path for the planner
/// If profile is Dev, uses "weekly-planner-dev" instead of "weekly-planner"
pub fn get_config_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "weekly-planner", profile.app_name())
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the data directory path for the planner
pub fn get_data_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "weekly-planner", profile.app_name())
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand `~` in a path string to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse a date string in ISO 8601 format (YYYY-MM-DD)
pub fn parse_date(date_str: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
}

/// Read the calendar date out of a stored date field.
///
/// Accepts plain `YYYY-MM-DD` as well as full RFC 3339 timestamps, which is
/// what records exported by the server-backed planner carry.
pub fn calendar_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = parse_date(value) {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    value.get(..10).and_then(|prefix| parse_date(prefix).ok())
}

/// Get the current date as an ISO 8601 string (YYYY-MM-DD)
pub fn get_current_date_string() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Current instant as an ISO 8601 timestamp with millisecond precision
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Generate a record id of the form `{prefix}_{uuid}`
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Split a comma-separated list, trimming entries and dropping empty ones
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_date_accepts_plain_and_timestamp_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(calendar_date("2024-03-05"), Some(expected));
        assert_eq!(calendar_date("2024-03-05T00:00:00.000Z"), Some(expected));
        assert_eq!(calendar_date("2024-03-05 10:00"), Some(expected));
        assert_eq!(calendar_date("next tuesday"), None);
        assert_eq!(calendar_date(""), None);
    }

    #[test]
    fn generated_ids_carry_prefix_and_differ() {
        let a = generate_id("task");
        let b = generate_id("task");
        assert!(a.starts_with("task_"));
        assert_ne!(a, b);
    }

    #[test]
    fn split_list_trims_and_skips_blanks() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn expand_path_leaves_absolute_paths_alone() {
        assert_eq!(expand_path("/tmp/planner.db"), PathBuf::from("/tmp/planner.db"));
    }
}
