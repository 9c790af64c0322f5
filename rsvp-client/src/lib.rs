//! Client side of the wedding RSVP site: everything between the page load
//! and the proxy.
//!
//! A page mounts a [`bootstrap::Bootstrap`], renders from its snapshots, and
//! hands the settled snapshot to a [`form::FormController`] for editing and
//! submission.

pub mod bootstrap;
pub mod cache;
pub mod cancel;
pub mod form;
pub mod metrics_defs;
pub mod notify;
pub mod remote;
pub mod storage;
pub mod types;
pub mod url_params;
pub mod validation;
pub mod visit;

#[cfg(test)]
mod testutils;

pub use bootstrap::{Bootstrap, Phase, Snapshot};
pub use cache::LocalCache;
pub use form::{FormController, SubmitOutcome};
pub use remote::{RemoteClient, RemoteError, RsvpRemote};
pub use types::{FormData, FormUpdate, RsvpRecord, RsvpStatus};
