// serverbackup/src/remote/shell.rs
use std::borrow::Cow;

/// Single-quotes `value` for a POSIX shell unless it is made only of safe characters.
pub fn quote(value: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
}

/// Parent directory of a remote path, `dirname` style.
pub fn parent_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(index) => &trimmed[..index],
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values_stay_unquoted() {
        assert_eq!(quote("table1"), "table1");
        assert_eq!(quote("/var/backups/dump.sql"), "/var/backups/dump.sql");
    }

    #[test]
    fn hostile_values_are_quoted() {
        assert_eq!(quote("users; rm -rf /"), "'users; rm -rf /'");
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn parent_dir_like_dirname() {
        assert_eq!(parent_dir("/tmp/run/backup.zip"), "/tmp/run");
        assert_eq!(parent_dir("/backup.zip"), "/");
        assert_eq!(parent_dir("backup.zip"), ".");
        assert_eq!(parent_dir("/tmp/run/"), "/tmp");
    }
}
