pub mod api;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod not_found;
pub mod proxy_service;
pub mod rate_limit;
pub mod upstream;

#[cfg(test)]
mod testutils;

use crate::config::Config;
use crate::errors::ProxyError;
use crate::not_found::NotFoundCache;
use crate::proxy_service::{ProxyService, ProxyState};
use crate::rate_limit::RateLimiter;
use crate::upstream::Upstream;
use hyper::header::HeaderValue;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(config: Config) -> Result<(), ProxyError> {
    config.validate()?;

    if config.upstream_url.is_none() {
        tracing::warn!("no upstream URL configured; every /api endpoint will answer 500");
    }

    let upstream = Upstream::new(
        config.upstream_url.clone(),
        Duration::from_secs(config.timeouts.upstream_secs),
    )?;
    let upstream_configured = upstream.is_configured();

    let state = ProxyState {
        upstream,
        rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
        not_found: NotFoundCache::new(),
        allowed_origin: HeaderValue::from_str(&config.allowed_origin)?,
        calendar_path: config.calendar_path.clone(),
    };

    let admin_service: AdminService<ProxyError> =
        AdminService::new().with_check("upstream_configured", move || upstream_configured);

    let proxy_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        ProxyService::new(state),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(proxy_task, admin_task)?;
    Ok(())
}
