//! Guest-facing notifications. The text is Hebrew; diagnostics stay in the
//! logs.

use crate::remote::UpsertAction;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    Submitted(UpsertAction),
    ValidationFailed,
    SubmitFailed,
    Reset,
}

impl Notice {
    pub const fn message(&self) -> &'static str {
        match self {
            Notice::Submitted(UpsertAction::Create) => "האישור נשלח בהצלחה! 🎉",
            Notice::Submitted(UpsertAction::Update) => "האישור עודכן בהצלחה! 🎉",
            Notice::ValidationFailed => "יש שגיאות בטופס. אנא תקן אותן ונסה שוב.",
            Notice::SubmitFailed => "אירעה שגיאה בשליחת האישור. אנא נסה שוב.",
            Notice::Reset => "הטופס אופס מחדש",
        }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Notice::ValidationFailed | Notice::SubmitFailed)
    }
}

/// Where notices end up, typically a toast in the UI.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log. Used where no UI is attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        if notice.is_error() {
            tracing::warn!(notice = ?notice, "{}", notice.message());
        } else {
            tracing::info!(notice = ?notice, "{}", notice.message());
        }
    }
}
