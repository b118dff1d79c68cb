use thiserror::Error;

use crate::field::Field;

/// Why a cron expression failed to parse. Every variant names the field it
/// occurred in so callers can point at the offending position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected 6 or 7 whitespace-separated fields, got {count}")]
    FieldCount { count: usize },

    #[error("{field} field: invalid token '{token}'")]
    InvalidToken { field: Field, token: String },

    #[error("{field} field: value {value} out of range {min}-{max}")]
    OutOfRange {
        field: Field,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field} field: unknown name '{name}'")]
    UnknownName { field: Field, name: String },

    #[error("{field} field: step must be greater than zero")]
    ZeroStep { field: Field },

    #[error("day-of-week field: nth occurrence must be 1-5, got {nth}")]
    NthOutOfRange { nth: u32 },

    #[error("day-of-month and day-of-week cannot both be '?'")]
    BothDayFieldsUnspecified,
}

impl ParseError {
    #[must_use]
    pub fn invalid_token(field: Field, token: impl Into<String>) -> Self {
        Self::InvalidToken {
            field,
            token: token.into(),
        }
    }

    #[must_use]
    pub fn unknown_name(field: Field, name: impl Into<String>) -> Self {
        Self::UnknownName {
            field,
            name: name.into(),
        }
    }

    /// The field the error occurred in, if it is specific to one.
    pub fn field(&self) -> Option<Field> {
        match self {
            Self::InvalidToken { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::UnknownName { field, .. }
            | Self::ZeroStep { field } => Some(*field),
            Self::NthOutOfRange { .. } => Some(Field::DayOfWeek),
            Self::FieldCount { .. } | Self::BothDayFieldsUnspecified => None,
        }
    }
}
