//! Repeated-behavior detection.
//!
//! Signals inside the lookback window are grouped per subject and behavior. Driver
//! groups are evaluated first; a vehicle group is dropped when any of its signals
//! already fed a driver pattern for the same behavior, so one event never raises two
//! incidents. Incident creation is idempotent through the `(tenant, dedupe_key)`
//! constraint. The key carries the bucket of the pattern's first event, so every
//! sweep that sees the same run of events lands on the same incident.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Duration, DurationRound, Utc};
use tracing::{error, info};
use uuid::Uuid;

use super::{tenants_in_scope, SweepOptions, SweepSummary};
use crate::db::Store;
use crate::models::incident::{
    Incident, IncidentPriority, IncidentSignal, IncidentStatus, LinkRole, SubjectType,
    DEFAULT_RELEVANCE, PATTERN_INCIDENT_TYPE,
};
use crate::models::signal::{normalize_behavior, Severity, Signal};
use crate::policy::{PatternPolicy, TenantPolicy};
use crate::processor::pipeline::Engine;

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub behavior: String,
    pub signal_ids: Vec<Uuid>,
    pub severity: Severity,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

#[derive(Default)]
struct Group<'a> {
    signals: Vec<&'a Signal>,
}

impl<'a> Group<'a> {
    fn into_pattern(self, subject_type: SubjectType, subject_id: &str, behavior: &str) -> Pattern {
        let subject_name = self.signals.iter().find_map(|s| match subject_type {
            SubjectType::Driver => s.driver_name.clone(),
            SubjectType::Vehicle => s.vehicle_name.clone(),
        });
        let severity = self
            .signals
            .iter()
            .map(|s| s.severity)
            .max_by_key(|s| s.rank())
            .unwrap_or(Severity::Info);
        let first_at = self.signals.iter().map(|s| s.occurred_at).min();
        let last_at = self.signals.iter().map(|s| s.occurred_at).max();
        Pattern {
            subject_type,
            subject_id: subject_id.to_string(),
            subject_name,
            behavior: behavior.to_string(),
            signal_ids: self.signals.iter().map(|s| s.signal_id).collect(),
            severity,
            first_at: first_at.unwrap_or_default(),
            last_at: last_at.unwrap_or_default(),
        }
    }
}

fn significant_behaviors(signal: &Signal, allow: &HashSet<String>) -> Vec<String> {
    let mut out: Vec<String> = signal
        .behavior_labels
        .iter()
        .map(|b| normalize_behavior(b))
        .filter(|b| allow.contains(b))
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Finds every subject that repeated a significant behavior at least `threshold` times.
pub fn detect_patterns(signals: &[Signal], policy: &PatternPolicy) -> Vec<Pattern> {
    let allow: HashSet<String> = policy
        .significant_behaviors
        .iter()
        .map(|b| normalize_behavior(b))
        .collect();

    let mut by_driver: BTreeMap<(String, String), Group> = BTreeMap::new();
    let mut by_vehicle: BTreeMap<(String, String), Group> = BTreeMap::new();
    for signal in signals {
        for behavior in significant_behaviors(signal, &allow) {
            if let Some(driver) = signal.driver_id.as_deref().filter(|d| !d.is_empty()) {
                by_driver
                    .entry((driver.to_string(), behavior.clone()))
                    .or_default()
                    .signals
                    .push(signal);
            }
            if let Some(vehicle) = signal.vehicle_id.as_deref().filter(|v| !v.is_empty()) {
                by_vehicle
                    .entry((vehicle.to_string(), behavior.clone()))
                    .or_default()
                    .signals
                    .push(signal);
            }
        }
    }

    let mut patterns = Vec::new();
    let mut claimed: HashMap<String, HashSet<Uuid>> = HashMap::new();

    for ((driver, behavior), group) in by_driver {
        if group.signals.len() < policy.threshold {
            continue;
        }
        claimed
            .entry(behavior.clone())
            .or_default()
            .extend(group.signals.iter().map(|s| s.signal_id));
        patterns.push(group.into_pattern(SubjectType::Driver, &driver, &behavior));
    }

    for ((vehicle, behavior), group) in by_vehicle {
        if group.signals.len() < policy.threshold {
            continue;
        }
        let overlaps = claimed
            .get(&behavior)
            .is_some_and(|ids| group.signals.iter().any(|s| ids.contains(&s.signal_id)));
        if overlaps {
            continue;
        }
        patterns.push(group.into_pattern(SubjectType::Vehicle, &vehicle, &behavior));
    }
    patterns
}

/// `pattern:<behavior>:<subject type>:<subject id>:<bucket of first event>`
pub fn pattern_dedupe_key(pattern: &Pattern, bucket_minutes: i64) -> String {
    let bucket = pattern
        .first_at
        .duration_trunc(Duration::minutes(bucket_minutes))
        .unwrap_or(pattern.first_at);
    format!(
        "pattern:{}:{}:{}:{}",
        pattern.behavior,
        pattern.subject_type,
        pattern.subject_id,
        bucket.format("%Y%m%dT%H%M")
    )
}

/// Creates the incident unless one with the same key exists. Links are written only
/// by the caller that won the insert.
pub async fn create_incident_if_absent(
    store: &dyn Store,
    incident: &Incident,
    signal_ids: &[Uuid],
) -> Result<bool> {
    if !store.insert_incident(incident).await? {
        return Ok(false);
    }
    let links: Vec<IncidentSignal> = signal_ids
        .iter()
        .map(|id| IncidentSignal {
            incident_id: incident.incident_id,
            signal_id: *id,
            role: LinkRole::Supporting,
            relevance: DEFAULT_RELEVANCE,
        })
        .collect();
    store.link_incident_signals(&links).await?;
    Ok(true)
}

fn build_incident(tenant_id: Uuid, pattern: &Pattern, dedupe_key: String, now: DateTime<Utc>) -> Incident {
    let who = pattern
        .subject_name
        .clone()
        .unwrap_or_else(|| pattern.subject_id.clone());
    Incident {
        incident_id: Uuid::new_v4(),
        tenant_id,
        incident_type: PATTERN_INCIDENT_TYPE.to_string(),
        priority: IncidentPriority::from_severity(pattern.severity),
        status: IncidentStatus::Open,
        subject_type: pattern.subject_type,
        subject_id: pattern.subject_id.clone(),
        subject_name: pattern.subject_name.clone(),
        behavior: pattern.behavior.clone(),
        dedupe_key,
        title: format!(
            "Repeated {} by {} {}",
            pattern.behavior.replace('_', " "),
            pattern.subject_type,
            who
        ),
        summary: Some(format!(
            "{} events between {} and {}",
            pattern.signal_ids.len(),
            pattern.first_at.format("%H:%M"),
            pattern.last_at.format("%H:%M UTC")
        )),
        created_at: now,
    }
}

pub async fn run(engine: &Engine, opts: SweepOptions, now: DateTime<Utc>) -> Result<SweepSummary> {
    let mut summary = SweepSummary::new("patterns", &opts);
    let store = engine.store.as_ref();

    for tenant in tenants_in_scope(store, &opts).await? {
        let policy = TenantPolicy::load_or_default(tenant.tenant_id, &tenant.settings.0).patterns;
        let since = now - Duration::hours(policy.window_hours);
        let signals = match store.signals_since(tenant.tenant_id, since).await {
            Ok(s) => s,
            Err(e) => {
                error!(
                    "Pattern sweep could not load signals for tenant {}: {:#}",
                    tenant.tenant_id, e
                );
                summary.failed += 1;
                continue;
            }
        };

        for pattern in detect_patterns(&signals, &policy) {
            summary.examined += 1;
            let key = pattern_dedupe_key(&pattern, policy.bucket_minutes);
            if opts.dry_run {
                info!("[dry-run] Pattern {} ({} signals)", key, pattern.signal_ids.len());
                summary.created += 1;
                continue;
            }
            let incident = build_incident(tenant.tenant_id, &pattern, key, now);
            match create_incident_if_absent(store, &incident, &pattern.signal_ids).await {
                Ok(true) => {
                    info!("Incident {} opened: {}", incident.incident_id, incident.title);
                    summary.created += 1;
                }
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!("Failed to record pattern {}: {:#}", incident.dedupe_key, e);
                    summary.failed += 1;
                }
            }
        }
    }

    info!(
        "Pattern sweep: {} patterns, {} incidents created, {} already open",
        summary.examined, summary.created, summary.skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::memory::MemoryStore;
    use crate::processor::assessor::RuleAssessor;
    use crate::testing::{at, tenant, RecordingProvider, SignalBuilder};
    use serde_json::json;

    fn crashes(tenant_id: Uuid, driver: Option<&str>) -> Vec<Signal> {
        [0u32, 30, 59]
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let b = SignalBuilder::new(tenant_id, &format!("crash-{}", i))
                    .vehicle("v1")
                    .behaviors(&["crash"])
                    .occurred_at(at(10, *m));
                match driver {
                    Some(d) => b.driver(d).build(),
                    None => b.build(),
                }
            })
            .collect()
    }

    #[test]
    fn test_driver_pattern_suppresses_vehicle_pattern() {
        let signals = crashes(Uuid::new_v4(), Some("d1"));
        let patterns = detect_patterns(&signals, &PatternPolicy::default());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].subject_type, SubjectType::Driver);
        assert_eq!(patterns[0].subject_id, "d1");
        assert_eq!(patterns[0].signal_ids.len(), 3);
        assert_eq!(patterns[0].severity, Severity::Critical);
    }

    #[test]
    fn test_vehicle_pattern_without_driver() {
        let signals = crashes(Uuid::new_v4(), None);
        let patterns = detect_patterns(&signals, &PatternPolicy::default());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].subject_type, SubjectType::Vehicle);
        assert_eq!(patterns[0].subject_id, "v1");
    }

    #[test]
    fn test_below_threshold_and_insignificant_behaviors_are_ignored() {
        let tenant_id = Uuid::new_v4();
        let mut signals = crashes(tenant_id, Some("d1"));
        signals.pop();
        signals.push(
            SignalBuilder::new(tenant_id, "idle")
                .driver("d1")
                .behaviors(&["idling"])
                .build(),
        );
        assert!(detect_patterns(&signals, &PatternPolicy::default()).is_empty());
    }

    #[test]
    fn test_dedupe_key_buckets_time() {
        let mut pattern =
            detect_patterns(&crashes(Uuid::new_v4(), Some("d1")), &PatternPolicy::default())
                .remove(0);
        let a = pattern_dedupe_key(&pattern, 30);
        assert_eq!(a, "pattern:crash:driver:d1:20260301T1000");

        pattern.first_at = at(10, 25);
        assert_eq!(pattern_dedupe_key(&pattern, 30), a);
        pattern.first_at = at(10, 35);
        assert_ne!(pattern_dedupe_key(&pattern, 30), a);
    }

    #[tokio::test]
    async fn test_sweeps_in_later_buckets_reuse_the_incident() {
        let store = Arc::new(MemoryStore::new());
        let t = tenant(json!({}));
        let tenant_id = t.tenant_id;
        store.add_tenant(t).await;
        for s in crashes(tenant_id, Some("d1")) {
            store.insert_signal(&s).await.unwrap();
        }
        let engine = Engine::new(
            store.clone(),
            Arc::new(RecordingProvider::default()),
            Arc::new(RuleAssessor),
        );

        let mut created = 0;
        for (hour, minute) in [(11, 0), (11, 35), (12, 5), (12, 40)] {
            let summary = run(&engine, SweepOptions::all(), at(hour, minute)).await.unwrap();
            assert_eq!(summary.examined, 1);
            created += summary.created;
        }
        assert_eq!(created, 1);
        assert_eq!(store.list_incidents(tenant_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_crashes_open_one_incident() {
        let store = Arc::new(MemoryStore::new());
        let t = tenant(json!({}));
        let tenant_id = t.tenant_id;
        store.add_tenant(t).await;
        for s in crashes(tenant_id, Some("d1")) {
            store.insert_signal(&s).await.unwrap();
        }
        let engine = Engine::new(
            store.clone(),
            Arc::new(RecordingProvider::default()),
            Arc::new(RuleAssessor),
        );

        let first = run(&engine, SweepOptions::all(), at(11, 0)).await.unwrap();
        assert_eq!(first.created, 1);
        let second = run(&engine, SweepOptions::all(), at(11, 10)).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 1);

        let incidents = store.list_incidents(tenant_id).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].priority, IncidentPriority::P1);
        assert_eq!(incidents[0].subject_type, SubjectType::Driver);

        let links = store.incident_signals(incidents[0].incident_id).await.unwrap();
        assert_eq!(links.len(), 3);
        assert!(links
            .iter()
            .all(|l| l.role == LinkRole::Supporting && l.relevance == DEFAULT_RELEVANCE));
    }

    #[tokio::test]
    async fn test_dry_run_creates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let t = tenant(json!({}));
        let tenant_id = t.tenant_id;
        store.add_tenant(t).await;
        for s in crashes(tenant_id, None) {
            store.insert_signal(&s).await.unwrap();
        }
        let engine = Engine::new(
            store.clone(),
            Arc::new(RecordingProvider::default()),
            Arc::new(RuleAssessor),
        );
        let opts = SweepOptions {
            tenant_id: Some(tenant_id),
            dry_run: true,
        };
        let summary = run(&engine, opts, at(11, 0)).await.unwrap();
        assert_eq!(summary.created, 1);
        assert!(store.list_incidents(tenant_id).await.unwrap().is_empty());
    }
}
