// serverbackup/src/utils/naming.rs
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const LOG_TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Keeps user supplied labels safe for object keys.
fn sanitize_label(label: &str) -> Option<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        trimmed
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect(),
    )
}

/// `backup_<taskId>_<YYYYMMDDHHMMSS>.<ext>`, or `<label>_backup_...` when a label is appended.
pub fn backup_file_name(task_id: u64, appended: Option<&str>, extension: &str, at: DateTime<Utc>) -> String {
    let base = format!(
        "backup_{}_{}.{}",
        task_id,
        at.format(FILE_TIMESTAMP_FORMAT),
        extension.trim_start_matches('.')
    );
    match appended.and_then(sanitize_label) {
        Some(label) => format!("{}_{}", label, base),
        None => base,
    }
}

/// File name prefix shared by every artifact of a task, up to (not including) the task id.
pub fn rotation_pattern(appended: Option<&str>) -> String {
    match appended.and_then(sanitize_label) {
        Some(label) => format!("{}_backup_", label),
        None => "backup_".to_string(),
    }
}

/// Joins an optional destination directory and a file name into an object key.
pub fn object_key(store_path: Option<&str>, file_name: &str) -> String {
    match store_path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(dir) => format!("{}/{}", dir, file_name),
        None => file_name.to_string(),
    }
}

pub fn parse_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = name, "Unknown time zone, falling back to UTC.");
            Tz::UTC
        }
    }
}

/// `[DD-MM-YYYY HH:MM:SS] message\n` rendered in `tz`.
pub fn log_line(message: &str, tz: Tz, at: DateTime<Utc>) -> String {
    format!("[{}] {}\n", at.with_timezone(&tz).format(LOG_TIMESTAMP_FORMAT), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regex::Regex;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap()
    }

    #[test]
    fn file_name_without_label() {
        let name = backup_file_name(42, None, "sql", at());
        assert_eq!(name, "backup_42_20240309070503.sql");
        assert!(Regex::new(r"^backup_\d+_\d{14}\.sql$").unwrap().is_match(&name));
    }

    #[test]
    fn file_name_with_label() {
        let name = backup_file_name(7, Some("custom"), ".zip", at());
        assert_eq!(name, "custom_backup_7_20240309070503.zip");
        assert!(Regex::new(r"^custom_backup_\d+_\d{14}\.zip$").unwrap().is_match(&name));
    }

    #[test]
    fn blank_label_is_ignored_and_unsafe_characters_replaced() {
        assert_eq!(backup_file_name(1, Some("  "), "sql", at()), "backup_1_20240309070503.sql");
        assert_eq!(
            backup_file_name(1, Some("my site/prod"), "sql", at()),
            "my_site_prod_backup_1_20240309070503.sql"
        );
        assert_eq!(rotation_pattern(Some("my site/prod")), "my_site_prod_backup_");
        assert_eq!(rotation_pattern(None), "backup_");
    }

    #[test]
    fn same_second_gives_same_name() {
        assert_eq!(backup_file_name(3, None, "sql", at()), backup_file_name(3, None, "sql", at()));
        let later = at() + chrono::Duration::seconds(1);
        assert_ne!(backup_file_name(3, None, "sql", at()), backup_file_name(3, None, "sql", later));
    }

    #[test]
    fn object_key_joins_store_path() {
        assert_eq!(object_key(Some("/backups/"), "a.zip"), "backups/a.zip");
        assert_eq!(object_key(Some(""), "a.zip"), "a.zip");
        assert_eq!(object_key(None, "a.zip"), "a.zip");
    }

    #[test]
    fn log_line_uses_task_timezone() {
        let tz = parse_timezone("Europe/London");
        assert_eq!(log_line("Backup task started.", tz, at()), "[09-03-2024 07:05:03] Backup task started.\n");

        let tz = parse_timezone("Asia/Tokyo");
        assert_eq!(log_line("x", tz, at()), "[09-03-2024 16:05:03] x\n");
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_timezone("Mars/Olympus"), Tz::UTC);
    }
}
