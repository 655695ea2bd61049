//! The telemetry pipeline
//!
//! Wires the classifier, attacker registry, journal, stats aggregator, rate
//! limiter and live broadcast into the single ingestion path the protocol
//! surfaces call into: classify, track, persist, aggregate, notify. Also
//! owns the periodic work (stats flush, log rotation, rate-limit cleanup)
//! and the graceful shutdown sequence.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::broadcast::{EventBroadcast, SubscriberId};
use crate::canary::CanaryKeys;
use crate::classify::Classifier;
use crate::config::Config;
use crate::geo::GeoResolver;
use crate::journal::{Journal, Stream};
use crate::models::{AttackEvent, Category, StatsSnapshot};
use crate::ratelimit::RateLimiter;
use crate::registry::AttackerRegistry;
use crate::state::RuntimeState;
use crate::stats::StatsAggregator;

const ROTATION_INTERVAL: Duration = Duration::from_secs(86_400);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Which per-session transcript a raw frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Ws,
    Cdp,
}

impl SessionKind {
    fn stream(self) -> Stream {
        match self {
            SessionKind::Ws => Stream::WsSessions,
            SessionKind::Cdp => Stream::CdpSessions,
        }
    }
}

pub struct Pipeline {
    config: Config,
    state: Arc<RuntimeState>,
    registry: Arc<AttackerRegistry>,
    classifier: Classifier,
    limiter: Arc<RateLimiter>,
    journal: Journal,
    stats: Arc<StatsAggregator>,
    broadcast: Arc<EventBroadcast>,
    geo: Arc<GeoResolver>,
}

impl Pipeline {
    /// Build the full pipeline from configuration: create the storage
    /// layout, load GeoIP databases, seed stats from the persisted snapshot,
    /// and generate this process's canary key set.
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.data_dir()).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config.data_dir().display()
            )
        })?;

        let geo = Arc::new(GeoResolver::open(
            &config.geoip.city_db,
            &config.geoip.asn_db,
        ));
        let registry = Arc::new(AttackerRegistry::new());
        let classifier = Classifier::new(registry.clone(), config.listeners.cdp_port)?;
        let limiter = Arc::new(RateLimiter::new(config.limits));
        let journal = Journal::start(&config.data_dir())?;
        let stats = Arc::new(StatsAggregator::new(
            config.stats_path(),
            registry.clone(),
            geo.clone(),
            config.listeners.port,
        ));
        let state = Arc::new(RuntimeState::new(CanaryKeys::generate(&config.canary.prefix)));

        info!(
            "Telemetry pipeline ready, writing to {} (retention: {} days)",
            config.data_dir().display(),
            config.general.log_retention_days
        );

        Ok(Self {
            config,
            state,
            registry,
            classifier,
            limiter,
            journal,
            stats,
            broadcast: Arc::new(EventBroadcast::default()),
            geo,
        })
    }

    /// Ingest one event: enrich with geo and category, update the attacker
    /// registry, persist, aggregate, and notify live subscribers. Returns the
    /// enriched record as written.
    pub fn log(&self, mut event: AttackEvent) -> AttackEvent {
        if event.geo.is_none() {
            event.geo = event.source_ip.and_then(|ip| self.geo.lookup(ip));
        }
        let category = match event.category {
            Some(category) => category,
            None => {
                let category = self.classifier.classify(&event);
                event.category = Some(category);
                category
            }
        };

        if let Some(ip) = event.source_ip {
            self.registry.track(ip, category);
        }

        let date_key = event.timestamp.format("%Y-%m-%d").to_string();
        self.journal.append(Stream::Attacks, &date_key, &event);

        self.stats.ingest(&event);
        self.broadcast.emit(&event);

        event
    }

    /// Side channel for raw per-session frames: bypasses classification and
    /// stats, producing session transcripts only. Anything but a JSON object
    /// is dropped silently.
    pub fn log_session_frame(&self, kind: SessionKind, session_id: &str, frame: Value) {
        let Value::Object(mut frame) = frame else {
            debug!("Dropping malformed session frame for {}", session_id);
            return;
        };
        frame
            .entry("timestamp")
            .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));

        self.journal
            .append(kind.stream(), session_id, &Value::Object(frame));
    }

    /// Latest rebuilt stats snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&AttackEvent) + Send + Sync + 'static,
    {
        self.broadcast.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcast.unsubscribe(id)
    }

    pub fn track(&self, ip: IpAddr, category: Category) {
        self.registry.track(ip, category);
    }

    pub fn is_returning(&self, ip: IpAddr) -> bool {
        self.registry.is_returning(ip)
    }

    pub fn mark_exfiltrated(&self, ip: IpAddr) {
        self.registry.mark_exfiltrated(ip);
    }

    pub fn http_admit(&self, ip: IpAddr) -> bool {
        self.limiter.http_admit(ip)
    }

    pub fn stream_connect(&self, ip: IpAddr) -> bool {
        self.limiter.stream_connect(ip)
    }

    pub fn stream_disconnect(&self, ip: IpAddr) {
        self.limiter.stream_disconnect(ip)
    }

    pub fn frame_admit(&self, session_id: &str) -> bool {
        self.limiter.frame_admit(session_id)
    }

    pub fn geo_lookup(&self, ip: IpAddr) -> Option<crate::models::GeoInfo> {
        self.geo.lookup(ip)
    }

    pub fn registry(&self) -> &AttackerRegistry {
        &self.registry
    }

    pub fn runtime_state(&self) -> &RuntimeState {
        &self.state
    }

    pub fn canary_keys(&self) -> &CanaryKeys {
        self.state.canary()
    }

    pub fn aggregator(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the independent periodic tasks. Each holds only the service it
    /// drives, so none of them blocks the ingestion path.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let stats = self.stats.clone();
        let flush_every = Duration::from_secs(self.config.stats.flush_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(flush_every);
            tick.tick().await;
            loop {
                tick.tick().await;
                stats.flush();
            }
        }));

        // Rotation runs once at startup, then daily.
        let journal = self.journal.clone();
        let retention_days = self.config.general.log_retention_days;
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(ROTATION_INTERVAL);
            loop {
                tick.tick().await;
                journal.rotate(retention_days);
            }
        }));

        let limiter = self.limiter.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                limiter.cleanup();
            }
        }));

        tasks
    }

    /// Flush the stats snapshot and close every log writer. Callers abort
    /// the background tasks first; after this returns no partial lines exist
    /// on disk.
    pub async fn shutdown(&self) {
        self.stats.flush();
        self.journal.shutdown().await;
        info!("Telemetry pipeline shut down");
    }
}
