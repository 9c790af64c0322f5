use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "proxy.requests",
    metric_type: MetricType::Counter,
    description: "Requests handled by the proxy. Tagged with route, status.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "proxy.request.duration",
    metric_type: MetricType::Histogram,
    description: "Proxy request duration in seconds. Tagged with route.",
};

pub const RATE_LIMITED: MetricDef = MetricDef {
    name: "proxy.rate_limited",
    metric_type: MetricType::Counter,
    description: "Write requests rejected by the per-IP rate limiter. Tagged with route.",
};

pub const RATE_LIMIT_CLIENTS: MetricDef = MetricDef {
    name: "proxy.rate_limit.clients",
    metric_type: MetricType::Gauge,
    description: "Distinct client IPs the rate limiter currently remembers",
};

pub const UPSTREAM_DURATION: MetricDef = MetricDef {
    name: "upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Spreadsheet upstream call duration in seconds. Tagged with action.",
};

pub const UPSTREAM_RETRIES: MetricDef = MetricDef {
    name: "upstream.retries",
    metric_type: MetricType::Counter,
    description: "Retries on the direct write path",
};

pub const NOT_FOUND_CACHE_HIT: MetricDef = MetricDef {
    name: "proxy.not_found_cache.hit",
    metric_type: MetricType::Counter,
    description: "Reads answered from the not-found cache",
};

pub const NOT_FOUND_CACHE_MISS: MetricDef = MetricDef {
    name: "proxy.not_found_cache.miss",
    metric_type: MetricType::Counter,
    description: "Reads that had to go to the upstream",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    REQUEST_DURATION,
    RATE_LIMITED,
    RATE_LIMIT_CLIENTS,
    UPSTREAM_DURATION,
    UPSTREAM_RETRIES,
    NOT_FOUND_CACHE_HIT,
    NOT_FOUND_CACHE_MISS,
];
