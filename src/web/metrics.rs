use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use salvo::http::header::{CONTENT_TYPE, HeaderValue};
use salvo::prelude::*;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

static EVENTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DEDUPLICATED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DROPPED: AtomicU64 = AtomicU64::new(0);
static DELIVERIES_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static DELIVERIES_FAILED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_HANDLED: AtomicU64 = AtomicU64::new(0);
static WEBHOOK_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static WEBHOOK_CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
static WEBHOOK_CACHE_EVICTIONS: AtomicU64 = AtomicU64::new(0);
static EMOTES_MATERIALIZED: AtomicU64 = AtomicU64::new(0);
static MODERATION_EDITS: AtomicU64 = AtomicU64::new(0);

/// Process-wide relay counters.
pub struct Metrics;

impl Metrics {
    /// Pins the uptime origin; call once at startup.
    pub fn start() {
        Lazy::force(&STARTED_AT);
    }

    pub fn event_received() {
        EVENTS_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_deduplicated() {
        EVENTS_DEDUPLICATED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dropped() {
        EVENTS_DROPPED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_succeeded() {
        DELIVERIES_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed() {
        DELIVERIES_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_handled() {
        COMMANDS_HANDLED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_cache_hit() {
        WEBHOOK_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_cache_miss() {
        WEBHOOK_CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_cache_eviction() {
        WEBHOOK_CACHE_EVICTIONS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn emote_materialized() {
        EMOTES_MATERIALIZED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn moderation_edit() {
        MODERATION_EDITS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds() -> u64 {
        STARTED_AT.elapsed().as_secs()
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: &AtomicU64) {
    out.push_str(&format!(
        "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
        value.load(Ordering::Relaxed)
    ));
}

pub fn format_prometheus() -> String {
    let hits = WEBHOOK_CACHE_HITS.load(Ordering::Relaxed);
    let misses = WEBHOOK_CACHE_MISSES.load(Ordering::Relaxed);
    let lookups = hits + misses;
    let hit_rate = if lookups > 0 {
        (hits as f64 / lookups as f64) * 100.0
    } else {
        0.0
    };

    let mut out = format!(
        "# HELP relay_uptime_seconds Number of seconds the relay has been running\n\
         # TYPE relay_uptime_seconds gauge\n\
         relay_uptime_seconds {}\n\n",
        Metrics::uptime_seconds()
    );
    counter(&mut out, "relay_events_received_total", "Chat events received", &EVENTS_RECEIVED);
    counter(
        &mut out,
        "relay_events_deduplicated_total",
        "Chat events dropped as duplicates",
        &EVENTS_DEDUPLICATED,
    );
    counter(
        &mut out,
        "relay_events_dropped_total",
        "Chat events with no mapped destination",
        &EVENTS_DROPPED,
    );
    counter(
        &mut out,
        "relay_deliveries_succeeded_total",
        "Messages delivered to a destination",
        &DELIVERIES_SUCCEEDED,
    );
    counter(
        &mut out,
        "relay_deliveries_failed_total",
        "Deliveries that failed or timed out",
        &DELIVERIES_FAILED,
    );
    counter(&mut out, "relay_commands_handled_total", "Inline commands executed", &COMMANDS_HANDLED);
    counter(&mut out, "relay_webhook_cache_hits_total", "Webhook cache hits", &WEBHOOK_CACHE_HITS);
    counter(
        &mut out,
        "relay_webhook_cache_misses_total",
        "Webhook cache misses",
        &WEBHOOK_CACHE_MISSES,
    );
    counter(
        &mut out,
        "relay_webhook_cache_evictions_total",
        "Webhooks evicted after a failed delivery",
        &WEBHOOK_CACHE_EVICTIONS,
    );
    counter(
        &mut out,
        "relay_emotes_materialized_total",
        "Emotes uploaded as custom emoji",
        &EMOTES_MATERIALIZED,
    );
    counter(
        &mut out,
        "relay_moderation_edits_total",
        "Relayed messages redacted or restored",
        &MODERATION_EDITS,
    );
    out.push_str(&format!(
        "# HELP relay_webhook_cache_hit_rate_percent Webhook cache hit rate as percentage\n\
         # TYPE relay_webhook_cache_hit_rate_percent gauge\n\
         relay_webhook_cache_hit_rate_percent {hit_rate}\n"
    ));
    out
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    res.render(format_prometheus());
}
