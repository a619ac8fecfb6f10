//! Validation helpers for DTOs.

use std::collections::HashSet;

use validator::ValidationError;

/// Shortest accepted student name, in characters.
pub const MIN_NAME_CHARS: usize = 2;
/// Longest accepted student name, in characters.
pub const MAX_NAME_CHARS: usize = 50;
/// Longest accepted option label, in characters.
pub const MAX_OPTION_CHARS: usize = 100;

/// Validates a student display name after trimming.
///
/// Names are 2 to 50 characters of ASCII letters, digits and spaces.
pub fn validate_student_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("name_empty");
        err.message = Some("Name cannot be empty".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if !(MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&length) {
        let mut err = ValidationError::new("name_length");
        err.message = Some(
            format!(
                "Name must be between {MIN_NAME_CHARS} and {MAX_NAME_CHARS} characters (got {length})"
            )
            .into(),
        );
        return Err(err);
    }

    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
    {
        let mut err = ValidationError::new("name_format");
        err.message = Some("Name can only contain letters, numbers and spaces".into());
        return Err(err);
    }

    Ok(())
}

/// Validates poll option labels after trimming: non-empty, bounded and distinct.
pub fn validate_option_labels(options: &[String]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for option in options {
        let label = option.trim();
        if label.is_empty() {
            let mut err = ValidationError::new("option_empty");
            err.message = Some("Options cannot be empty".into());
            return Err(err);
        }
        if label.chars().count() > MAX_OPTION_CHARS {
            let mut err = ValidationError::new("option_length");
            err.message =
                Some(format!("Options must be at most {MAX_OPTION_CHARS} characters").into());
            return Err(err);
        }
        if !seen.insert(label) {
            let mut err = ValidationError::new("option_duplicate");
            err.message = Some(format!("Option `{label}` is listed twice").into());
            return Err(err);
        }
    }
    Ok(())
}

/// Trim a chat message and strip angle brackets.
pub fn sanitize_chat_message(message: &str) -> String {
    message
        .trim()
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect()
}

/// First human readable message carried by a validation error.
pub fn describe(err: &ValidationError) -> String {
    err.message
        .as_ref()
        .map(|message| message.to_string())
        .unwrap_or_else(|| err.code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_student_name_valid() {
        assert!(validate_student_name("Alice").is_ok());
        assert!(validate_student_name("  Bob 2 ").is_ok());
        assert!(validate_student_name(&"a".repeat(50)).is_ok());
    }

    #[test]
    fn test_validate_student_name_invalid() {
        assert_eq!(validate_student_name("   ").unwrap_err().code, "name_empty");
        assert_eq!(
            validate_student_name(&"a".repeat(51)).unwrap_err().code,
            "name_length"
        );
        assert_eq!(validate_student_name(" A ").unwrap_err().code, "name_length");
        assert_eq!(
            validate_student_name("Al!ce").unwrap_err().code,
            "name_format"
        );
        assert_eq!(
            validate_student_name("<script>").unwrap_err().code,
            "name_format"
        );
    }

    #[test]
    fn test_validate_option_labels() {
        let ok = vec!["Red".to_string(), "Blue".to_string()];
        assert!(validate_option_labels(&ok).is_ok());

        let blank = vec!["Red".to_string(), "  ".to_string()];
        assert_eq!(
            validate_option_labels(&blank).unwrap_err().code,
            "option_empty"
        );

        let dup = vec!["Red".to_string(), " Red ".to_string()];
        assert_eq!(
            validate_option_labels(&dup).unwrap_err().code,
            "option_duplicate"
        );

        let long = vec!["Red".to_string(), "x".repeat(101)];
        assert_eq!(
            validate_option_labels(&long).unwrap_err().code,
            "option_length"
        );
    }

    #[test]
    fn test_sanitize_chat_message() {
        assert_eq!(
            sanitize_chat_message("  <b>hello</b> "),
            "bhello/b"
        );
    }
}
