use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0:?} is required")]
    Missing(&'static str),
    #[error("{field:?} exceeds maximum allowed characters of ({max})")]
    TooLong { field: &'static str, max: usize },
    #[error("{field:?} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("{kind:?} is not a valid event type for {os}")]
    UnsupportedType { kind: String, os: &'static str },
    #[error("{0:?} is not a valid os_name value")]
    UnknownOs(String),
}

pub(crate) fn check_present(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    Ok(())
}

pub(crate) fn check_max_chars(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}
