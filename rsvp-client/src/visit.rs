//! Fire-and-forget visit tracking for personalised invitation links.

use crate::remote::RsvpRemote;
use crate::url_params::UrlParams;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Mobile,
    Tablet,
    Desktop,
}

impl Device {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent else {
            return Device::Desktop;
        };
        let ua = ua.to_ascii_lowercase();

        if ua.contains("ipad")
            || ua.contains("tablet")
            || (ua.contains("android") && !ua.contains("mobile"))
        {
            return Device::Tablet;
        }

        const MOBILE_MARKERS: &[&str] = &[
            "mobi",
            "iphone",
            "ipod",
            "android",
            "blackberry",
            "iemobile",
            "opera mini",
        ];
        if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) {
            return Device::Mobile;
        }

        Device::Desktop
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Device::Mobile => "mobile",
            Device::Tablet => "tablet",
            Device::Desktop => "desktop",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VisitRequest {
    pub name: String,
    #[serde(rename = "reportId", skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    pub device: Device,
}

/// Reports at most one visit per instance. Nothing it does can fail or
/// delay the caller.
pub struct VisitTracker {
    remote: Arc<dyn RsvpRemote>,
    tracked: AtomicBool,
}

impl VisitTracker {
    pub fn new(remote: Arc<dyn RsvpRemote>) -> Self {
        VisitTracker {
            remote,
            tracked: AtomicBool::new(false),
        }
    }

    /// Spawns the report when the link names a guest. Returns the task handle
    /// when a report was started.
    pub fn track(&self, params: &UrlParams, user_agent: Option<&str>) -> Option<JoinHandle<()>> {
        let name = params.name.clone()?;

        let Ok(handle) = Handle::try_current() else {
            tracing::debug!("no async runtime, not tracking visit");
            return None;
        };

        if self.tracked.swap(true, Ordering::SeqCst) {
            return None;
        }

        let visit = VisitRequest {
            name,
            report_id: params.id.clone(),
            device: Device::from_user_agent(user_agent),
        };
        let remote = self.remote.clone();

        Some(handle.spawn(async move {
            match remote.track_visit(&visit).await {
                Ok(()) => tracing::debug!(device = visit.device.as_str(), "visit tracked"),
                Err(e) => tracing::warn!("failed to track visit: {e}"),
            }
        }))
    }
}
