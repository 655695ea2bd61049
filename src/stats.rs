//! Stats aggregation
//!
//! Ingestion-time work is O(1) per event: histogram bumps, per-IP and
//! per-user-agent running counts, and a bounded recent-events ring. A
//! periodic tick performs the O(n log n) rebuild (top-N lists, trailing-24h
//! window), publishes the snapshot, and persists it to a single JSON file.
//! The persisted snapshot is loaded at startup so histograms survive a
//! restart; the ring and the running counters deliberately start empty.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::geo::GeoResolver;
use crate::models::{AttackEvent, CanaryAlert, StatsSnapshot, TopIp, TopUserAgent, WindowCounts};
use crate::registry::AttackerRegistry;

const MAX_RECENT_EVENTS: usize = 10_000;
const TOP_N: usize = 20;
const CANARY_KEY_DISPLAY_LEN: usize = 24;

/// Running count with an insertion sequence so top-N ties resolve to the
/// first-observed entry.
#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct RecentEvent {
    timestamp: DateTime<Utc>,
    source_ip: Option<IpAddr>,
}

#[derive(Default)]
struct Counters {
    total_events: u64,
    by_category: HashMap<String, u64>,
    by_port: HashMap<String, u64>,
    by_country: HashMap<String, u64>,
    by_asn: HashMap<String, u64>,
    ip_counts: HashMap<IpAddr, Counter>,
    ua_counts: HashMap<String, Counter>,
    recent: VecDeque<RecentEvent>,
    canary_alerts: Vec<CanaryAlert>,
    next_seq: u64,
}

impl Counters {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

pub struct StatsAggregator {
    counters: Mutex<Counters>,
    snapshot: RwLock<StatsSnapshot>,
    registry: Arc<AttackerRegistry>,
    geo: Arc<GeoResolver>,
    path: PathBuf,
    /// Port counted for events that carry no listener port
    fallback_port: u16,
}

impl StatsAggregator {
    pub fn new(
        path: impl AsRef<Path>,
        registry: Arc<AttackerRegistry>,
        geo: Arc<GeoResolver>,
        fallback_port: u16,
    ) -> Self {
        let aggregator = Self {
            counters: Mutex::new(Counters::default()),
            snapshot: RwLock::new(StatsSnapshot::default()),
            registry,
            geo,
            path: path.as_ref().to_path_buf(),
            fallback_port,
        };
        aggregator.load();
        aggregator
    }

    /// Seed counters from the persisted snapshot, if any. A corrupt or
    /// missing file just means starting cold.
    fn load(&self) {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return,
        };
        let persisted: StatsSnapshot = match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("Ignoring corrupt stats snapshot: {}", err);
                return;
            }
        };

        info!(
            "Seeded stats from snapshot: {} events, {} categories",
            persisted.total_events,
            persisted.by_category.len()
        );

        let mut counters = self.counters.lock();
        counters.total_events = persisted.total_events;
        counters.by_category = persisted.by_category.clone();
        counters.by_port = persisted.by_port.clone();
        counters.by_country = persisted.by_country.clone();
        counters.by_asn = persisted.by_asn.clone();
        counters.canary_alerts = persisted.canary_alerts.clone();
        drop(counters);

        *self.snapshot.write() = persisted;
    }

    /// O(1) per-event counter update on the ingestion path
    pub fn ingest(&self, event: &AttackEvent) {
        let mut counters = self.counters.lock();

        counters.total_events += 1;

        if let Some(category) = event.category {
            *counters
                .by_category
                .entry(category.as_str().to_string())
                .or_insert(0) += 1;
        }

        let port = event.port.unwrap_or(self.fallback_port);
        *counters.by_port.entry(port.to_string()).or_insert(0) += 1;

        if let Some(geo) = &event.geo {
            if let Some(country) = &geo.country {
                *counters.by_country.entry(country.clone()).or_insert(0) += 1;
            }
            if let Some(asn) = geo.asn {
                let key = match &geo.asn_org {
                    Some(org) => format!("AS{asn} {org}"),
                    None => format!("AS{asn}"),
                };
                *counters.by_asn.entry(key).or_insert(0) += 1;
            }
        }

        if let Some(ip) = event.source_ip {
            let seq = counters.next_seq();
            counters
                .ip_counts
                .entry(ip)
                .and_modify(|counter| counter.count += 1)
                .or_insert(Counter { count: 1, seq });
        }

        if let Some(ua) = event.user_agent() {
            let seq = counters.next_seq();
            counters
                .ua_counts
                .entry(ua.to_string())
                .and_modify(|counter| counter.count += 1)
                .or_insert(Counter { count: 1, seq });
        }

        counters.recent.push_back(RecentEvent {
            timestamp: event.timestamp,
            source_ip: event.source_ip,
        });
        while counters.recent.len() > MAX_RECENT_EVENTS {
            counters.recent.pop_front();
        }
    }

    /// Record a canary key sighting. The exposed primitive for external
    /// canary-hit detection; nothing in the pipeline calls it automatically.
    pub fn record_canary_alert(&self, ip: IpAddr, key: &str, used_at: DateTime<Utc>) {
        let truncated: String = key.chars().take(CANARY_KEY_DISPLAY_LEN).collect();
        self.counters.lock().canary_alerts.push(CanaryAlert {
            ip,
            key: format!("{truncated}..."),
            used_at,
        });
    }

    /// The O(n log n) tick: rebuild top-N lists and the trailing-24h window
    /// from the authoritative counters, publish the result.
    pub fn rebuild(&self) -> StatsSnapshot {
        // Take what the rebuild needs under the lock, then release it so
        // ingestion continues while we sort and enrich.
        let counters = self.counters.lock();
        let total_events = counters.total_events;
        let unique_ips = counters.ip_counts.len() as u64;
        let by_category = counters.by_category.clone();
        let by_port = counters.by_port.clone();
        let by_country = counters.by_country.clone();
        let by_asn = counters.by_asn.clone();
        let canary_alerts = counters.canary_alerts.clone();
        let ip_counts: Vec<(IpAddr, Counter)> = counters
            .ip_counts
            .iter()
            .map(|(ip, counter)| (*ip, *counter))
            .collect();
        let ua_counts: Vec<(String, Counter)> = counters
            .ua_counts
            .iter()
            .map(|(ua, counter)| (ua.clone(), *counter))
            .collect();
        let recent: Vec<RecentEvent> = counters.recent.iter().copied().collect();
        drop(counters);

        let mut top_ips = ip_counts;
        top_ips.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.1.seq.cmp(&b.1.seq)));
        top_ips.truncate(TOP_N);

        let mut top_uas = ua_counts;
        top_uas.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.1.seq.cmp(&b.1.seq)));
        top_uas.truncate(TOP_N);

        let cutoff = Utc::now() - Duration::hours(24);
        let mut window_ips: Vec<IpAddr> = Vec::new();
        let mut window_events = 0u64;
        for event in recent.iter().filter(|e| e.timestamp > cutoff) {
            window_events += 1;
            if let Some(ip) = event.source_ip {
                if !window_ips.contains(&ip) {
                    window_ips.push(ip);
                }
            }
        }

        let snapshot = StatsSnapshot {
            total_events,
            unique_ips,
            by_category,
            by_port,
            by_country,
            by_asn,
            top_ips: top_ips
                .into_iter()
                .map(|(ip, counter)| TopIp {
                    ip,
                    count: counter.count,
                    categories: self.registry.categories_of(ip),
                    geo: self.geo.lookup(ip),
                })
                .collect(),
            top_user_agents: top_uas
                .into_iter()
                .map(|(ua, counter)| TopUserAgent {
                    ua,
                    count: counter.count,
                })
                .collect(),
            canary_alerts,
            last_24h: WindowCounts {
                events: window_events,
                unique_ips: window_ips.len() as u64,
            },
        };

        *self.snapshot.write() = snapshot.clone();
        snapshot
    }

    /// Rebuild and persist to the snapshot file. A persistence failure
    /// leaves the in-memory snapshot authoritative until the next flush.
    pub fn flush(&self) {
        let snapshot = self.rebuild();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.path, json) {
                    warn!("Failed to persist stats snapshot: {}", err);
                } else {
                    debug!("Stats snapshot persisted ({} events)", snapshot.total_events);
                }
            }
            Err(err) => warn!("Failed to encode stats snapshot: {}", err),
        }
    }

    /// Latest rebuilt snapshot; safe to call concurrently with ingestion
    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, GeoInfo, Protocol};
    use tempfile::TempDir;

    fn aggregator(dir: &TempDir) -> StatsAggregator {
        StatsAggregator::new(
            dir.path().join("stats.json"),
            Arc::new(AttackerRegistry::new()),
            Arc::new(GeoResolver::disabled()),
            18789,
        )
    }

    fn event(ip: &str, category: Category) -> AttackEvent {
        AttackEvent::new(Protocol::Http, "GET", "/")
            .with_source(ip.parse().unwrap(), 40000)
            .with_category(category)
    }

    #[test]
    fn test_category_histogram() {
        let dir = TempDir::new().unwrap();
        let stats = aggregator(&dir);

        for _ in 0..3 {
            stats.ingest(&event("203.0.113.1", Category::RceAttempt));
        }
        stats.ingest(&event("203.0.113.2", Category::Scan));

        let snapshot = stats.rebuild();
        assert_eq!(snapshot.total_events, 4);
        assert_eq!(snapshot.by_category.get("rce_attempt"), Some(&3));
        assert_eq!(snapshot.by_category.get("scan"), Some(&1));
        assert_eq!(snapshot.unique_ips, 2);
    }

    #[test]
    fn test_port_and_country_histograms() {
        let dir = TempDir::new().unwrap();
        let stats = aggregator(&dir);

        let mut probe = event("203.0.113.1", Category::Scan).with_port(18791);
        probe.geo = Some(GeoInfo {
            country: Some("NL".to_string()),
            ..Default::default()
        });
        stats.ingest(&probe);
        // no listener port recorded: counted under the gateway port
        stats.ingest(&event("203.0.113.1", Category::Scan));

        let snapshot = stats.rebuild();
        assert_eq!(snapshot.by_port.get("18791"), Some(&1));
        assert_eq!(snapshot.by_port.get("18789"), Some(&1));
        assert_eq!(snapshot.by_country.get("NL"), Some(&1));
    }

    #[test]
    fn test_top_ips_ordering_and_ties() {
        let dir = TempDir::new().unwrap();
        let stats = aggregator(&dir);

        // tie between .1 and .2 at two events each; .1 observed first
        stats.ingest(&event("203.0.113.1", Category::Scan));
        stats.ingest(&event("203.0.113.2", Category::Scan));
        stats.ingest(&event("203.0.113.1", Category::Scan));
        stats.ingest(&event("203.0.113.2", Category::Scan));
        for _ in 0..5 {
            stats.ingest(&event("203.0.113.3", Category::Recon));
        }

        let snapshot = stats.rebuild();
        let ips: Vec<String> = snapshot.top_ips.iter().map(|t| t.ip.to_string()).collect();
        assert_eq!(ips, vec!["203.0.113.3", "203.0.113.1", "203.0.113.2"]);
        assert_eq!(snapshot.top_ips[0].count, 5);
    }

    #[test]
    fn test_top_user_agents() {
        let dir = TempDir::new().unwrap();
        let stats = aggregator(&dir);

        for _ in 0..4 {
            stats.ingest(
                &event("203.0.113.1", Category::Scan).with_header("user-agent", "zgrab/0.x"),
            );
        }
        stats.ingest(&event("203.0.113.2", Category::Scan).with_header("user-agent", "curl/8.0"));

        let snapshot = stats.rebuild();
        assert_eq!(snapshot.top_user_agents[0].ua, "zgrab/0.x");
        assert_eq!(snapshot.top_user_agents[0].count, 4);
        assert_eq!(snapshot.top_user_agents[1].ua, "curl/8.0");
    }

    #[test]
    fn test_last_24h_window() {
        let dir = TempDir::new().unwrap();
        let stats = aggregator(&dir);

        let mut stale = event("203.0.113.9", Category::Scan);
        stale.timestamp = Utc::now() - Duration::hours(30);
        stats.ingest(&stale);
        stats.ingest(&event("203.0.113.1", Category::Scan));
        stats.ingest(&event("203.0.113.1", Category::Scan));

        let snapshot = stats.rebuild();
        assert_eq!(snapshot.last_24h.events, 2);
        assert_eq!(snapshot.last_24h.unique_ips, 1);
        // totals still count the stale event
        assert_eq!(snapshot.total_events, 3);
    }

    #[test]
    fn test_ring_is_bounded() {
        let dir = TempDir::new().unwrap();
        let stats = aggregator(&dir);

        for _ in 0..(MAX_RECENT_EVENTS + 500) {
            stats.ingest(&event("203.0.113.1", Category::Scan));
        }

        let counters = stats.counters.lock();
        assert_eq!(counters.recent.len(), MAX_RECENT_EVENTS);
        assert_eq!(counters.total_events, (MAX_RECENT_EVENTS + 500) as u64);
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let dir = TempDir::new().unwrap();

        {
            let stats = aggregator(&dir);
            stats.ingest(&event("203.0.113.1", Category::RceAttempt));
            stats.ingest(&event("203.0.113.2", Category::Scan));
            stats.record_canary_alert(
                "203.0.113.1".parse().unwrap(),
                "sk-ant-REDACTED",
                Utc::now(),
            );
            stats.flush();
        }

        // simulated restart: histograms seed from disk, running counters
        // start empty
        let stats = aggregator(&dir);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_events, 2);
        assert_eq!(snapshot.by_category.get("rce_attempt"), Some(&1));
        assert_eq!(snapshot.canary_alerts.len(), 1);
        assert!(snapshot.canary_alerts[0].key.starts_with("sk-ant-api03-HONEYPOT"));
        assert!(snapshot.canary_alerts[0].key.ends_with("..."));

        // new events accumulate on top of the seeded totals
        stats.ingest(&event("203.0.113.3", Category::Scan));
        let snapshot = stats.rebuild();
        assert_eq!(snapshot.total_events, 3);
        // per-IP counters restarted empty, so only the new IP is ranked
        assert_eq!(snapshot.top_ips.len(), 1);
    }

    #[test]
    fn test_persistence_failure_keeps_memory_authoritative() {
        let dir = TempDir::new().unwrap();
        let unwritable = dir.path().join("missing-dir").join("stats.json");
        let stats = StatsAggregator::new(
            unwritable,
            Arc::new(AttackerRegistry::new()),
            Arc::new(GeoResolver::disabled()),
            18789,
        );

        stats.ingest(&event("203.0.113.1", Category::Scan));
        stats.flush();

        // the write failed, the snapshot is still served
        assert_eq!(stats.snapshot().total_events, 1);
    }
}
