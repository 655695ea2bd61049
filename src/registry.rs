//! Attacker registry
//!
//! In-memory map of source IP to sighting history, the substrate for
//! returning-attacker detection. Entries are created on first sighting and
//! live for the process lifetime; the canary-exfiltrated flag only ever goes
//! from false to true.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::models::Category;

/// One tracked source IP
#[derive(Debug, Clone, Serialize)]
pub struct AttackerEntry {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub categories: BTreeSet<Category>,
    pub canary_exfiltrated: bool,
}

#[derive(Default)]
pub struct AttackerRegistry {
    entries: DashMap<IpAddr, AttackerEntry>,
}

impl AttackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert: create on first sighting, otherwise update
    /// last-seen and add the category to the observed set.
    pub fn track(&self, ip: IpAddr, category: Category) {
        let now = Utc::now();
        self.entries
            .entry(ip)
            .and_modify(|entry| {
                entry.last_seen = now;
                entry.categories.insert(category);
            })
            .or_insert_with(|| AttackerEntry {
                first_seen: now,
                last_seen: now,
                categories: BTreeSet::from([category]),
                canary_exfiltrated: false,
            });
    }

    /// Reflects only the canary-exfiltrated flag, not mere repeat visits
    pub fn is_returning(&self, ip: IpAddr) -> bool {
        self.entries
            .get(&ip)
            .map(|entry| entry.canary_exfiltrated)
            .unwrap_or(false)
    }

    /// Irreversibly flag an IP as having exfiltrated a canary key.
    ///
    /// A no-op for IPs never seen through the event path; exfiltration can
    /// only be marked for an attacker that has already been observed.
    pub fn mark_exfiltrated(&self, ip: IpAddr) {
        if let Some(mut entry) = self.entries.get_mut(&ip) {
            entry.canary_exfiltrated = true;
        }
    }

    /// Categories ever observed for an IP, in stable order
    pub fn categories_of(&self, ip: IpAddr) -> Vec<Category> {
        self.entries
            .get(&ip)
            .map(|entry| entry.categories.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, ip: IpAddr) -> Option<AttackerEntry> {
        self.entries.get(&ip).map(|entry| entry.clone())
    }

    /// Number of distinct IPs ever sighted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
