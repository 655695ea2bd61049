//! Connection and frame-rate protection
//!
//! Three independent advisory guards protecting the ingestion surfaces from
//! the same hostile traffic they observe: per-(IP, second) HTTP admission,
//! per-IP concurrent stream connections, and per-(session, minute) frame
//! throughput. Counters are bounded by periodic purging of stale buckets and
//! never persist across restarts.

use std::net::IpAddr;

use chrono::Utc;
use dashmap::DashMap;

use crate::config::LimitsConfig;

// Stale buckets survive this many periods past their window before purge.
const HTTP_BUCKET_AGE_SECS: i64 = 5;
const FRAME_BUCKET_AGE_MINS: i64 = 2;

pub struct RateLimiter {
    limits: LimitsConfig,
    /// (source IP, unix second) -> requests admitted that second
    http: DashMap<(IpAddr, i64), u32>,
    /// source IP -> live stream connections
    streams: DashMap<IpAddr, u32>,
    /// (session id, unix minute) -> frames admitted that minute
    frames: DashMap<(String, i64), u32>,
}

impl RateLimiter {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            http: DashMap::new(),
            streams: DashMap::new(),
            frames: DashMap::new(),
        }
    }

    /// Admit or reject one HTTP request from `ip` in the current second
    pub fn http_admit(&self, ip: IpAddr) -> bool {
        let second = Utc::now().timestamp();
        let mut count = self.http.entry((ip, second)).or_insert(0);
        *count += 1;
        *count <= self.limits.http_per_second
    }

    /// Admit a new stream (WS/CDP) connection for `ip`, counting it if
    /// admitted
    pub fn stream_connect(&self, ip: IpAddr) -> bool {
        let mut count = self.streams.entry(ip).or_insert(0);
        if *count >= self.limits.stream_concurrent {
            return false;
        }
        *count += 1;
        true
    }

    /// Release one stream connection for `ip`; floor at zero, entry removed
    /// once idle
    pub fn stream_disconnect(&self, ip: IpAddr) {
        let empty = match self.streams.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if empty {
            self.streams.remove_if(&ip, |_, count| *count == 0);
        }
    }

    /// Admit or silently drop one inbound frame for `session` in the current
    /// minute
    pub fn frame_admit(&self, session: &str) -> bool {
        let minute = Utc::now().timestamp() / 60;
        let mut count = self
            .frames
            .entry((session.to_string(), minute))
            .or_insert(0);
        *count += 1;
        *count <= self.limits.frames_per_minute
    }

    /// Purge stale buckets; driven by a periodic task
    pub fn cleanup(&self) {
        let now = Utc::now().timestamp();
        self.http
            .retain(|(_, second), _| now - second <= HTTP_BUCKET_AGE_SECS);

        let now_minute = now / 60;
        self.frames
            .retain(|(_, minute), _| now_minute - minute <= FRAME_BUCKET_AGE_MINS);
    }

    /// Live stream connections currently counted for `ip`
    pub fn stream_count(&self, ip: IpAddr) -> u32 {
        self.streams.get(&ip).map(|count| *count).unwrap_or(0)
    }
}
