//! Metrics definitions for the RSVP client.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "client.cache.hit",
    metric_type: MetricType::Counter,
    description: "Cache loads that returned a fresh record",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "client.cache.miss",
    metric_type: MetricType::Counter,
    description: "Cache loads that found nothing, an expired record or an unreadable store",
};

pub const CACHE_WRITE_FAILED: MetricDef = MetricDef {
    name: "client.cache.write_failed",
    metric_type: MetricType::Counter,
    description: "Cache writes swallowed because the store rejected them",
};

pub const REVALIDATION: MetricDef = MetricDef {
    name: "client.revalidation",
    metric_type: MetricType::Counter,
    description: "Background revalidations. Tagged with outcome.",
};

pub const ALL_METRICS: &[MetricDef] = &[CACHE_HIT, CACHE_MISS, CACHE_WRITE_FAILED, REVALIDATION];
