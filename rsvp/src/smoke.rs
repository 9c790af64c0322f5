//! End-to-end check of a deployed proxy: create a response, update it with
//! the id the store handed back, then read it again.

use rsvp_client::remote::{FetchOutcome, RsvpRemote, UpsertAction, UpsertRequest};
use rsvp_client::{RemoteError, RsvpStatus};

pub const DEFAULT_NAME: &str = "בדיקת מערכת";

#[derive(thiserror::Error, Debug)]
pub enum SmokeError {
    #[error("{step}: {source}")]
    Remote {
        step: &'static str,
        #[source]
        source: RemoteError,
    },
    #[error("{step}: {reason}")]
    Unexpected { step: &'static str, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmokeReport {
    pub report_id: String,
    pub created: Option<UpsertAction>,
    pub updated: Option<UpsertAction>,
}

fn remote_err(step: &'static str) -> impl FnOnce(RemoteError) -> SmokeError {
    move |source| SmokeError::Remote { step, source }
}

pub async fn run(remote: &dyn RsvpRemote, name: &str) -> Result<SmokeReport, SmokeError> {
    let create = UpsertRequest {
        name: name.to_string(),
        status: RsvpStatus::Yes,
        guests: 2,
        blessing: String::new(),
        report_id: None,
    };
    let created = remote
        .upsert(&create, None)
        .await
        .map_err(remote_err("create"))?;
    let report_id = match &created.report_id {
        Some(id) if created.ok => id.clone(),
        _ => {
            return Err(SmokeError::Unexpected {
                step: "create",
                reason: format!("store did not confirm the write: {created:?}"),
            });
        }
    };
    tracing::info!(%report_id, action = ?created.action, "created");

    let update = UpsertRequest {
        status: RsvpStatus::No,
        guests: 0,
        report_id: Some(report_id.clone()),
        ..create
    };
    let updated = remote
        .upsert(&update, None)
        .await
        .map_err(remote_err("update"))?;
    if !updated.ok {
        return Err(SmokeError::Unexpected {
            step: "update",
            reason: format!("store did not confirm the write: {updated:?}"),
        });
    }
    if let Some(id) = &updated.report_id
        && *id != report_id
    {
        return Err(SmokeError::Unexpected {
            step: "update",
            reason: format!("update created a new record {id} instead of {report_id}"),
        });
    }
    tracing::info!(%report_id, action = ?updated.action, "updated");

    match remote
        .fetch_by_id(&report_id, None)
        .await
        .map_err(remote_err("fetch"))?
    {
        FetchOutcome::Found(record) if record.status == RsvpStatus::No => {}
        FetchOutcome::Found(record) => {
            return Err(SmokeError::Unexpected {
                step: "fetch",
                reason: format!("expected status no, read back {}", record.status),
            });
        }
        FetchOutcome::NotFound => {
            return Err(SmokeError::Unexpected {
                step: "fetch",
                reason: format!("{report_id} not found after writing it"),
            });
        }
    }
    tracing::info!(%report_id, "read back");

    Ok(SmokeReport {
        report_id,
        created: created.action,
        updated: updated.action,
    })
}
