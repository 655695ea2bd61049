//! Core data types
//!
//! The event record traveling through the telemetry pipeline, the
//! classification categories, geo lookup results, and the aggregated
//! stats snapshot served to the dashboard.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Protocol surface an event arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Ws,
    Cdp,
    Canvas,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Ws => write!(f, "ws"),
            Protocol::Cdp => write!(f, "cdp"),
            Protocol::Canvas => write!(f, "canvas"),
        }
    }
}

/// Classification label assigned to one observed interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ReturningAttacker,
    RceAttempt,
    LfiAttempt,
    PromptInjection,
    WebhookInjection,
    SkillPoisoning,
    Persistence,
    Impersonation,
    CdpExploit,
    ProxyAbuse,
    Exploit,
    TokenBypass,
    DataExfil,
    Recon,
    Scan,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ReturningAttacker => "returning_attacker",
            Category::RceAttempt => "rce_attempt",
            Category::LfiAttempt => "lfi_attempt",
            Category::PromptInjection => "prompt_injection",
            Category::WebhookInjection => "webhook_injection",
            Category::SkillPoisoning => "skill_poisoning",
            Category::Persistence => "persistence",
            Category::Impersonation => "impersonation",
            Category::CdpExploit => "cdp_exploit",
            Category::ProxyAbuse => "proxy_abuse",
            Category::Exploit => "exploit",
            Category::TokenBypass => "token_bypass",
            Category::DataExfil => "data_exfil",
            Category::Recon => "recon",
            Category::Scan => "scan",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GeoIP lookup result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub country_name: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
}

impl GeoInfo {
    /// Fixed sentinel for private/loopback sources, returned without
    /// consulting any database.
    pub fn private() -> Self {
        Self {
            country: Some("PRIVATE".to_string()),
            country_name: Some("Private Network".to_string()),
            ..Default::default()
        }
    }

    pub fn is_private(&self) -> bool {
        self.country.as_deref() == Some("PRIVATE")
    }
}

/// One interaction observed on a deception surface.
///
/// Immutable once logged; the pipeline fills in `geo` and `category` at
/// ingestion when the producing surface did not supply them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    #[serde(default)]
    pub source_port: u16,
    pub protocol: Protocol,
    pub method: String,
    pub path: String,
    /// Listener port the traffic arrived on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
}

impl AttackEvent {
    /// Create a new event with the ingestion timestamp assigned now
    pub fn new(protocol: Protocol, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source_ip: None,
            source_port: 0,
            protocol,
            method: method.into(),
            path: path.into(),
            port: None,
            headers: HashMap::new(),
            body: Value::Null,
            session_id: None,
            auth_token: None,
            category: None,
            geo: None,
        }
    }

    pub fn with_source(mut self, ip: IpAddr, port: u16) -> Self {
        self.source_ip = Some(ip);
        self.source_port = port;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("user-agent").map(|s| s.as_str())
    }
}

/// Per-IP entry by volume in the stats snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopIp {
    pub ip: IpAddr,
    pub count: u64,
    pub categories: Vec<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
}

/// Per-user-agent entry by volume in the stats snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUserAgent {
    pub ua: String,
    pub count: u64,
}

/// A recorded canary key sighting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryAlert {
    pub ip: IpAddr,
    /// Truncated key material, enough to identify which decoy leaked
    pub key: String,
    pub used_at: DateTime<Utc>,
}

/// Trailing 24-hour window counts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WindowCounts {
    pub events: u64,
    pub unique_ips: u64,
}

/// The rebuilt, persisted summary of aggregate statistics.
///
/// Rebuilt wholesale on each aggregation tick; never patched field-by-field
/// from outside the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(default)]
    pub total_events: u64,
    #[serde(default)]
    pub unique_ips: u64,
    #[serde(default)]
    pub by_category: HashMap<String, u64>,
    #[serde(default)]
    pub by_port: HashMap<String, u64>,
    #[serde(default)]
    pub by_country: HashMap<String, u64>,
    #[serde(default)]
    pub by_asn: HashMap<String, u64>,
    #[serde(default)]
    pub top_ips: Vec<TopIp>,
    #[serde(default)]
    pub top_user_agents: Vec<TopUserAgent>,
    #[serde(default)]
    pub canary_alerts: Vec<CanaryAlert>,
    #[serde(default)]
    pub last_24h: WindowCounts,
}
