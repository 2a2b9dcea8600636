//! Shared utility functions for the hive crate.

/// Lowercase, hyphen-separated slug of `title`, at most `max_len` bytes.
///
/// Runs of non-alphanumeric characters collapse into one hyphen and the slug
/// never starts or ends with one. Truncation stops before a character that
/// would not fit, so multi-byte characters are never split.
pub fn slugify(title: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(title.len().min(max_len));
    let mut gap = false;

    for c in title.chars().flat_map(char::to_lowercase) {
        if !c.is_alphanumeric() {
            gap = !slug.is_empty();
            continue;
        }
        let sep = usize::from(gap);
        if slug.len() + sep + c.len_utf8() > max_len {
            break;
        }
        if gap {
            slug.push('-');
            gap = false;
        }
        slug.push(c);
    }
    slug
}

/// Validate a feature or task identifier used as a directory name.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name == "." || name == ".." {
        return Err("name cannot be a relative path component".to_string());
    }
    if name.contains(['/', '\\']) {
        return Err("name cannot contain path separators".to_string());
    }
    if name.starts_with('.') {
        return Err("name cannot start with '.'".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Setup Base Project", 40), "setup-base-project");
    }

    #[test]
    fn test_slugify_collapses_punctuation() {
        assert_eq!(slugify("Auth: JWT & refresh -- tokens!", 40), "auth-jwt-refresh-tokens");
    }

    #[test]
    fn test_slugify_truncates_without_trailing_hyphen() {
        assert_eq!(slugify("abc def ghi", 8), "abc-def");
    }

    #[test]
    fn test_slugify_never_splits_multibyte_chars() {
        assert_eq!(slugify("Café Über", 4), "caf");
        assert_eq!(slugify("Café Über", 5), "café");
        assert_eq!(slugify("  -- leading", 40), "leading");
    }

    #[test]
    fn test_slugify_empty() {
        assert_eq!(slugify("***", 40), "");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("auth-flow").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(".hidden").is_err());
    }
}
