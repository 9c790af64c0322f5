//! Field rules for the RSVP form. Messages are shown to the guest and are
//! therefore in Hebrew.

use crate::types::{FormData, MAX_GUESTS, RsvpStatus};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 50;
pub const BLESSING_MAX_CHARS: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Name,
    Status,
    Guests,
    Blessing,
}

impl Field {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Status => "status",
            Field::Guests => "guests",
            Field::Blessing => "blessing",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldError {
    NameBlank,
    NameTooShort,
    NameTooLong,
    NameInvalidChars,
    StatusInvalid,
    GuestsNegative,
    GuestsTooMany,
    GuestsRequiredForYes,
    BlessingTooLong,
}

impl FieldError {
    pub const fn message(&self) -> &'static str {
        match self {
            FieldError::NameBlank => "שם לא יכול להיות ריק",
            FieldError::NameTooShort => "שם חייב להכיל לפחות 2 תווים",
            FieldError::NameTooLong => "שם לא יכול להיות ארוך מ-50 תווים",
            FieldError::NameInvalidChars => "שם חייב להכיל רק אותיות עבריות, אנגליות ומרווחים",
            FieldError::StatusInvalid => "יש לבחור סטטוס הגעה",
            FieldError::GuestsNegative => "מספר אורחים לא יכול להיות שלילי",
            FieldError::GuestsTooMany => "מספר אורחים לא יכול להיות גדול מ-10",
            FieldError::GuestsRequiredForYes => "יש לבחור לפחות אורח אחד",
            FieldError::BlessingTooLong => "ברכה לא יכולה להיות ארוכה מ-500 תווים",
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Validation errors keyed by field, at most one per field, in field order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldErrors(IndexMap<Field, FieldError>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: Field) -> Option<FieldError> {
        self.0.get(&field).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, FieldError)> + '_ {
        self.0.iter().map(|(field, error)| (*field, *error))
    }

    /// Field name to localized message, the shape the UI renders inline.
    pub fn messages(&self) -> IndexMap<&'static str, &'static str> {
        self.iter()
            .map(|(field, error)| (field.as_str(), error.message()))
            .collect()
    }

    fn insert(&mut self, field: Field, error: FieldError) {
        self.0.entry(field).or_insert(error);
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphabetic() || ('\u{0590}'..='\u{05FF}').contains(&c) || c.is_whitespace()
}

pub fn validate_name(name: &str) -> Result<(), FieldError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FieldError::NameBlank);
    }

    let len = trimmed.chars().count();
    if len < NAME_MIN_CHARS {
        return Err(FieldError::NameTooShort);
    }
    if len > NAME_MAX_CHARS {
        return Err(FieldError::NameTooLong);
    }
    if !name.chars().all(is_name_char) {
        return Err(FieldError::NameInvalidChars);
    }

    Ok(())
}

/// Parses a raw status value coming from an untyped input.
pub fn validate_status(raw: &str) -> Result<RsvpStatus, FieldError> {
    raw.parse().map_err(|_| FieldError::StatusInvalid)
}

pub fn validate_guests(status: RsvpStatus, guests: i64) -> Result<(), FieldError> {
    if guests < 0 {
        return Err(FieldError::GuestsNegative);
    }
    if guests > i64::from(MAX_GUESTS) {
        return Err(FieldError::GuestsTooMany);
    }
    if status == RsvpStatus::Yes && guests < 1 {
        return Err(FieldError::GuestsRequiredForYes);
    }
    Ok(())
}

pub fn validate_blessing(blessing: &str) -> Result<(), FieldError> {
    if blessing.chars().count() > BLESSING_MAX_CHARS {
        return Err(FieldError::BlessingTooLong);
    }
    Ok(())
}

/// Derives the full error map for `form`. Pure, so it can back live
/// validation as well as the submit path.
pub fn validate_form(form: &FormData) -> FieldErrors {
    let mut errors = FieldErrors::default();

    if let Err(e) = validate_name(&form.name) {
        errors.insert(Field::Name, e);
    }
    if let Err(e) = validate_guests(form.status, form.guests) {
        errors.insert(Field::Guests, e);
    }
    if let Err(e) = validate_blessing(&form.blessing) {
        errors.insert(Field::Blessing, e);
    }

    errors
}
