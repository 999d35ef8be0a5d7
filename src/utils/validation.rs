use serde_json::{Map, Value as JsonValue};
use validator::Validate;

use crate::error::{Error, ErrorKind, Result};
use crate::models::folder::Folder;
use crate::models::test_history::TestHistory;

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_FOLDER_NAME_LENGTH: usize = 50;
pub const MAX_QUESTION_POINTS: u32 = 100;

pub fn validate<T: Validate>(val: &T) -> Result<()> {
    val.validate().map_err(Error::from)
}

#[derive(Validate)]
struct EmailField {
    #[validate(email)]
    email: String,
}

pub fn validate_email(email: &str) -> Result<()> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("email", "Email is required"));
    }
    let field = EmailField {
        email: trimmed.to_string(),
    };
    if field.validate().is_err() {
        return Err(Error::backend(ErrorKind::InvalidEmail, format!("`{}` is not a valid email", trimmed)));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::validation("password", "Password is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::backend(
            ErrorKind::WeakPassword,
            format!("Password must be at least {} characters", MIN_PASSWORD_LENGTH),
        ));
    }
    Ok(())
}

pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::validation("userId", "User id is required"));
    }
    if user_id.contains('/') {
        return Err(Error::validation("userId", "User id must not contain '/'"));
    }
    Ok(())
}

pub fn validate_test_history(history: &TestHistory) -> Result<()> {
    validate_user_id(&history.user_id)?;
    validate(history)?;

    if let Some(score) = history.score {
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(Error::validation("score", "Score must be a number between 0 and 100"));
        }
    }
    for (idx, q) in history.questions.iter().enumerate() {
        if q.prompt.trim().is_empty() {
            return Err(Error::validation(
                format!("questions[{}].question", idx),
                "Question text is required",
            ));
        }
        if !(1..=MAX_QUESTION_POINTS).contains(&q.points) {
            return Err(Error::validation(
                format!("questions[{}].points", idx),
                format!("Points must be between 1 and {}", MAX_QUESTION_POINTS),
            ));
        }
        q.check_answer_shape()
            .map_err(|msg| Error::validation(format!("questions[{}]", idx), msg))?;
    }
    for (idx, answer) in history.user_answers.iter().enumerate() {
        if !history.questions.iter().any(|q| q.id == answer.question_id) {
            return Err(Error::validation(
                format!("userAnswers[{}].questionId", idx),
                format!("`{}` does not match any question", answer.question_id),
            ));
        }
    }
    if let Some(folder_id) = &history.folder_id {
        if folder_id.trim().is_empty() {
            return Err(Error::validation("folderId", "Folder id must not be blank"));
        }
    }
    Ok(())
}

pub fn validate_folder(folder: &Folder) -> Result<()> {
    validate_user_id(&folder.user_id)?;
    validate(folder)?;
    if folder.name.trim().is_empty() {
        return Err(Error::validation("name", "Folder name is required"));
    }
    if let Some(color) = &folder.color {
        let hex = color.strip_prefix('#').unwrap_or("");
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::validation("color", "Color must look like #RRGGBB"));
        }
    }
    Ok(())
}

/// Returns a copy of `value` with every null-valued object entry removed, at
/// any depth. Nulls are how absent (`None`) fields serialize, and the store
/// keeps no such fields. Array elements are kept as they are.
pub fn sanitize_for_store(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let cleaned: Map<String, JsonValue> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), sanitize_for_store(v)))
                .collect();
            JsonValue::Object(cleaned)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sanitize_for_store).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_strips_absent_fields_recursively() {
        let input = json!({"a": 1, "b": null, "c": {"d": null, "e": 2}});
        assert_eq!(sanitize_for_store(&input), json!({"a": 1, "c": {"e": 2}}));
    }

    #[test]
    fn sanitize_preserves_arrays_and_scalars() {
        let input = json!({"list": [{"x": null, "y": 1}, 3, null], "s": "keep"});
        assert_eq!(
            sanitize_for_store(&input),
            json!({"list": [{"y": 1}, 3, null], "s": "keep"})
        );
        assert_eq!(sanitize_for_store(&json!(5)), json!(5));
    }

    #[test]
    fn email_checks() {
        assert!(validate_email("student@example.com").is_ok());
        assert_eq!(validate_email("").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(validate_email("not-an-email").unwrap_err().kind(), ErrorKind::InvalidEmail);
    }

    #[test]
    fn password_checks() {
        assert!(validate_password("hunter22").is_ok());
        assert_eq!(validate_password("").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(validate_password("abc").unwrap_err().kind(), ErrorKind::WeakPassword);
    }

    #[test]
    fn user_id_checks() {
        assert!(validate_user_id("u_123").is_ok());
        assert!(validate_user_id("  ").is_err());
        assert!(validate_user_id("a/b").is_err());
    }
}
