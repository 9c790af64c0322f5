use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest party size a single invitation may answer for.
pub const MAX_GUESTS: u32 = 10;

/// Attendance intent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsvpStatus {
    #[default]
    Yes,
    Maybe,
    No,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown RSVP status: {0:?}")]
pub struct UnknownStatus(pub String);

impl RsvpStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RsvpStatus::Yes => "yes",
            RsvpStatus::Maybe => "maybe",
            RsvpStatus::No => "no",
        }
    }

    /// Label shown to the guest on the confirmation view.
    pub const fn label(&self) -> &'static str {
        match self {
            RsvpStatus::Yes => "מגיע",
            RsvpStatus::Maybe => "אולי",
            RsvpStatus::No => "לא מגיע",
        }
    }

    /// Applies the party-size invariant: nobody comes with a "no", at least
    /// one person comes with a "yes".
    pub fn normalize_guests(&self, guests: u32) -> u32 {
        match self {
            RsvpStatus::No => 0,
            RsvpStatus::Yes => guests.clamp(1, MAX_GUESTS),
            RsvpStatus::Maybe => guests.min(MAX_GUESTS),
        }
    }
}

impl FromStr for RsvpStatus {
    type Err = UnknownStatus;

    // Older spreadsheet rows store the Hebrew labels instead of the codes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "yes" | "YES" | "Yes" | "מגיע" => Ok(RsvpStatus::Yes),
            "maybe" | "MAYBE" | "Maybe" | "אולי" => Ok(RsvpStatus::Maybe),
            "no" | "NO" | "No" | "לא מגיע" => Ok(RsvpStatus::No),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for RsvpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical guest response as held by the remote store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpRecord {
    pub report_id: String,
    pub name: String,
    pub status: RsvpStatus,
    pub guests: u32,
    #[serde(default)]
    pub blessing: String,
}

/// A record as persisted on the device, stamped with the time it was written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRsvp {
    #[serde(flatten)]
    pub record: RsvpRecord,
    pub updated_at: u64,
}

impl CachedRsvp {
    pub fn new(record: RsvpRecord, updated_at: u64) -> Self {
        CachedRsvp { record, updated_at }
    }
}

/// Editable form contents. `guests` is signed so out-of-range input can be
/// held and reported rather than silently wrapped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormData {
    pub name: String,
    pub status: RsvpStatus,
    pub guests: i64,
    pub blessing: String,
}

impl Default for FormData {
    fn default() -> Self {
        FormData {
            name: String::new(),
            status: RsvpStatus::Yes,
            guests: 1,
            blessing: String::new(),
        }
    }
}

impl From<&RsvpRecord> for FormData {
    fn from(record: &RsvpRecord) -> Self {
        FormData {
            name: record.name.clone(),
            status: record.status,
            guests: i64::from(record.guests),
            blessing: record.blessing.clone(),
        }
    }
}

/// Partial update merged into `FormData`; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormUpdate {
    pub name: Option<String>,
    pub status: Option<RsvpStatus>,
    pub guests: Option<i64>,
    pub blessing: Option<String>,
}

impl FormUpdate {
    pub fn name(name: impl Into<String>) -> Self {
        FormUpdate {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn status(status: RsvpStatus) -> Self {
        FormUpdate {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn guests(guests: i64) -> Self {
        FormUpdate {
            guests: Some(guests),
            ..Default::default()
        }
    }

    pub fn blessing(blessing: impl Into<String>) -> Self {
        FormUpdate {
            blessing: Some(blessing.into()),
            ..Default::default()
        }
    }
}
