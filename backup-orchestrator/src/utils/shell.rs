//! POSIX shell quoting. The only place where argument text becomes shell text.

use std::borrow::Cow;

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@' | '%' | '+' | '=' | ',')
}

/// Quote `arg` for `sh`. Plain words pass through untouched.
pub fn quote(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && arg.chars().all(is_safe) {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
}

/// The form a secret takes inside single quotes after [`quote`].
pub fn quoted_body(arg: &str) -> String {
    arg.replace('\'', r"'\''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words_unquoted() {
        assert_eq!(quote("--keep-daily"), "--keep-daily");
        assert_eq!(quote("/backups/repo1"), "/backups/repo1");
        assert_eq!(quote("user@host:/srv"), "user@host:/srv");
    }

    #[test]
    fn test_special_characters_quoted() {
        assert_eq!(quote("my file"), "'my file'");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("*.tmp"), "'*.tmp'");
    }

    #[test]
    fn test_single_quote_escaped() {
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
