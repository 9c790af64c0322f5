//! The RSVP form: editable state, validation and submission.

use crate::bootstrap::Snapshot;
use crate::cache::LocalCache;
use crate::notify::{Notice, Notifier};
use crate::remote::{RemoteError, RsvpRemote, UpsertAction, UpsertRequest};
use crate::types::{FormData, FormUpdate, RsvpRecord, RsvpStatus};
use crate::validation::{FieldErrors, validate_form};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormState {
    pub form_data: FormData,
    pub errors: FieldErrors,
    /// Name taken from the invitation link. Its presence locks the name field.
    pub name_from_url: Option<String>,
    pub id_from_url: Option<String>,
    pub report_id: Option<String>,
    /// Submitted during this session.
    pub submitted: bool,
    /// A response exists, from this session or an earlier one.
    pub already_submitted: bool,
}

impl FormState {
    pub fn is_name_locked(&self) -> bool {
        self.name_from_url.is_some()
    }

    pub fn is_form_ready(&self) -> bool {
        !self.form_data.name.trim().is_empty() && self.errors.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted {
        record: RsvpRecord,
        action: UpsertAction,
    },
    Invalid(FieldErrors),
    /// The store did not accept the response. `None` when it answered but
    /// the answer could not be trusted.
    Failed(Option<RemoteError>),
    NotReady,
    /// Another submission is in flight.
    Busy,
}

/// Clears the in-flight flag however the submission ends.
struct SubmittingGuard<'a>(&'a AtomicBool);

impl Drop for SubmittingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn names_match(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

pub struct FormController {
    state: Mutex<FormState>,
    submitting: AtomicBool,
    cache: LocalCache,
    remote: Arc<dyn RsvpRemote>,
    notifier: Arc<dyn Notifier>,
}

impl FormController {
    /// Builds the form from whatever the bootstrap knows. The link's name wins
    /// over a cached one. A cached record for a different guest than the one
    /// the link names is ignored.
    pub fn from_snapshot(
        snapshot: &Snapshot,
        cache: LocalCache,
        remote: Arc<dyn RsvpRemote>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let name_from_url = snapshot.url.name.clone();
        let id_from_url = snapshot.url.id.clone();

        let record = snapshot.record.as_ref().filter(|record| {
            let same_id = id_from_url.as_deref() == Some(record.report_id.as_str());
            let same_name = name_from_url
                .as_deref()
                .is_none_or(|name| names_match(name, &record.name));
            same_id || same_name
        });

        let mut form_data = record.map(FormData::from).unwrap_or_default();
        if let Some(name) = &name_from_url {
            form_data.name = name.clone();
        }

        let report_id = record
            .map(|record| record.report_id.clone())
            .or_else(|| id_from_url.clone())
            .or_else(|| match &name_from_url {
                // A bare identity can only be trusted when no other guest is named.
                None => cache.saved_report_id(),
                Some(_) => None,
            });

        // A saved identity alone keeps the form editable, in update mode,
        // until the record behind it is known.
        let already_submitted = record.is_some();

        FormController {
            state: Mutex::new(FormState {
                form_data,
                errors: FieldErrors::default(),
                name_from_url,
                id_from_url,
                report_id,
                submitted: false,
                already_submitted,
            }),
            submitting: AtomicBool::new(false),
            cache,
            remote,
            notifier,
        }
    }

    pub fn state(&self) -> FormState {
        self.state.lock().clone()
    }

    pub fn form_data(&self) -> FormData {
        self.state.lock().form_data.clone()
    }

    pub fn errors(&self) -> FieldErrors {
        self.state.lock().errors.clone()
    }

    pub fn report_id(&self) -> Option<String> {
        self.state.lock().report_id.clone()
    }

    pub fn is_name_locked(&self) -> bool {
        self.state.lock().is_name_locked()
    }

    pub fn is_form_ready(&self) -> bool {
        self.state.lock().is_form_ready()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::Acquire)
    }

    pub fn is_submitted(&self) -> bool {
        let state = self.state.lock();
        state.submitted || state.already_submitted
    }

    /// Merges a partial update. Once errors are showing they are re-derived
    /// on every change so they clear as the guest fixes them.
    pub fn set_form_data(&self, update: FormUpdate) {
        let mut state = self.state.lock();

        if let Some(name) = update.name {
            // A locked name survives transient empty values.
            if !(state.is_name_locked() && name.trim().is_empty()) {
                state.form_data.name = name;
            }
        }
        if let Some(guests) = update.guests {
            state.form_data.guests = guests;
        }
        if let Some(blessing) = update.blessing {
            state.form_data.blessing = blessing;
        }
        if let Some(status) = update.status {
            state.form_data.status = status;
            match status {
                RsvpStatus::No => state.form_data.guests = 0,
                RsvpStatus::Yes if state.form_data.guests < 1 => state.form_data.guests = 1,
                _ => {}
            }
        }

        if !state.errors.is_empty() {
            state.errors = validate_form(&state.form_data);
        }
    }

    /// Re-derives the error map from the current data. Returns whether the
    /// form is valid.
    pub fn validate_form(&self) -> bool {
        let mut state = self.state.lock();
        state.errors = validate_form(&state.form_data);
        state.errors.is_empty()
    }

    fn build_request(&self) -> Result<UpsertRequest, FieldErrors> {
        let mut state = self.state.lock();
        state.errors = validate_form(&state.form_data);
        if !state.errors.is_empty() {
            return Err(state.errors.clone());
        }

        let data = &state.form_data;
        // Validation bounds guests to 0..=MAX_GUESTS.
        let guests = u32::try_from(data.guests).unwrap_or(0);
        Ok(UpsertRequest {
            name: data.name.split_whitespace().collect::<Vec<_>>().join(" "),
            status: data.status,
            guests: data.status.normalize_guests(guests),
            blessing: data.blessing.trim().to_string(),
            report_id: state.report_id.clone(),
        })
    }

    pub async fn handle_submit(&self) -> SubmitOutcome {
        if !self.is_form_ready() {
            return SubmitOutcome::NotReady;
        }
        if self.submitting.swap(true, Ordering::AcqRel) {
            return SubmitOutcome::Busy;
        }
        let _guard = SubmittingGuard(&self.submitting);

        let request = match self.build_request() {
            Ok(request) => request,
            Err(errors) => {
                tracing::debug!(fields = errors.len(), "submission blocked by validation");
                self.notifier.notify(Notice::ValidationFailed);
                return SubmitOutcome::Invalid(errors);
            }
        };

        let outcome = match self.remote.upsert(&request, None).await {
            Ok(outcome) if outcome.ok => outcome,
            Ok(outcome) => {
                tracing::warn!(?outcome, "store did not confirm the submission");
                self.notifier.notify(Notice::SubmitFailed);
                return SubmitOutcome::Failed(None);
            }
            Err(e) => {
                tracing::warn!("submission failed: {e}");
                self.notifier.notify(Notice::SubmitFailed);
                return SubmitOutcome::Failed(Some(e));
            }
        };

        let action = outcome.action.unwrap_or(match request.report_id {
            Some(_) => UpsertAction::Update,
            None => UpsertAction::Create,
        });
        let record = RsvpRecord {
            report_id: outcome
                .report_id
                .or_else(|| request.report_id.clone())
                .unwrap_or_default(),
            name: request.name,
            status: request.status,
            guests: request.guests,
            blessing: request.blessing,
        };

        if !record.report_id.is_empty() {
            self.cache.save_report_id(&record.report_id);
            self.cache.save(&record);
        }
        self.cache.set_submitted(true);

        {
            let mut state = self.state.lock();
            state.form_data = FormData::from(&record);
            state.report_id = Some(record.report_id.clone()).filter(|id| !id.is_empty());
            state.submitted = true;
            state.already_submitted = true;
        }

        tracing::info!(
            report_id = %record.report_id,
            action = action.as_str(),
            status = record.status.as_str(),
            guests = record.guests,
            "RSVP submitted"
        );
        self.notifier.notify(Notice::Submitted(action));

        SubmitOutcome::Submitted { record, action }
    }

    /// Forgets the stored response so the guest can answer again. Identity and
    /// name carried by the link are kept.
    pub fn handle_reset(&self) {
        {
            let mut state = self.state.lock();
            state.submitted = false;
            state.already_submitted = false;
            state.report_id = state.id_from_url.clone();
            state.form_data = FormData {
                name: state.name_from_url.clone().unwrap_or_default(),
                ..FormData::default()
            };
            state.errors = FieldErrors::default();
        }

        self.cache.clear();
        self.cache.clear_report_id();
        self.cache.set_submitted(false);
        self.notifier.notify(Notice::Reset);
    }
}
