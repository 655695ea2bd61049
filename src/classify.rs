//! Event classification
//!
//! Maps a normalized event to exactly one category via an ordered rule list;
//! the first matching rule wins, so order encodes priority. Substring and
//! pattern checks run case-insensitively over a single concatenation of
//! method, path and serialized body. Always returns a category.

use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use crate::models::{AttackEvent, Category, Protocol};
use crate::registry::AttackerRegistry;

const RCE_PATTERN: &str = r"[;|`]|&&|\$\(|bash\s|curl\s|wget\s|/bin/";
const LFI_PATTERN: &str = r"\.\./|/etc/passwd|\.env";
const JAILBREAK_PATTERN: &str =
    r"ignore previous|system prompt|forget|instead|pretend you are|jailbreak|dan mode|disregard";
const PERSISTENCE_PATTERN: &str = r"hook|extension|cron";
const EXFIL_PATTERN: &str = r"\.env|creds\.json|api.?key|auth-profiles";
const RECON_PATTERN: &str =
    r"/v1/models|config\.get|agents\.list|models\.list|tools\.list|skills\.list";

pub struct Classifier {
    registry: Arc<AttackerRegistry>,
    cdp_port: u16,
    rce: Regex,
    lfi: Regex,
    jailbreak: Regex,
    persistence: Regex,
    exfil: Regex,
    recon: Regex,
}

impl Classifier {
    pub fn new(registry: Arc<AttackerRegistry>, cdp_port: u16) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).with_context(|| format!("Invalid classifier pattern: {pattern}"))
        };

        Ok(Self {
            registry,
            cdp_port,
            rce: compile(RCE_PATTERN)?,
            lfi: compile(LFI_PATTERN)?,
            jailbreak: compile(JAILBREAK_PATTERN)?,
            persistence: compile(PERSISTENCE_PATTERN)?,
            exfil: compile(EXFIL_PATTERN)?,
            recon: compile(RECON_PATTERN)?,
        })
    }

    /// Assign exactly one category to an event. Total: every event gets a
    /// category, the fallback being `scan`.
    pub fn classify(&self, event: &AttackEvent) -> Category {
        let method = event.method.as_str();
        let path = event.path.as_str();
        let content = match &event.body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let full_text = format!("{} {} {}", method, path, content).to_lowercase();

        // A previously-flagged attacker is never reclassified by whatever
        // else the payload happens to match.
        if let Some(ip) = event.source_ip {
            if self.registry.is_returning(ip) {
                return Category::ReturningAttacker;
            }
        }

        if self.rce.is_match(&full_text) {
            return Category::RceAttempt;
        }

        if self.lfi.is_match(&full_text) && !path.starts_with("/hooks") {
            return Category::LfiAttempt;
        }

        if (method == "chat.send" || path == "/v1/chat/completions")
            && self.jailbreak.is_match(&full_text)
        {
            return Category::PromptInjection;
        }

        if path.starts_with("/hooks") && (method == "POST" || event.protocol == Protocol::Http) {
            return Category::WebhookInjection;
        }

        if method == "skills.install" {
            return Category::SkillPoisoning;
        }

        if method == "cron.create"
            || (method == "config.set" && self.persistence.is_match(&full_text))
        {
            return Category::Persistence;
        }

        if method == "send" || method == "web.login.qr" {
            return Category::Impersonation;
        }

        if event.port == Some(self.cdp_port) || event.protocol == Protocol::Cdp {
            return Category::CdpExploit;
        }

        if path == "/v1/chat/completions" || path == "/v1/responses" {
            return Category::ProxyAbuse;
        }

        if method == "node.invoke" || path == "/tools/invoke" || method == "chat.inject" {
            return Category::Exploit;
        }

        if matches!(event.auth_token.as_deref(), Some("undefined") | Some("")) {
            return Category::TokenBypass;
        }

        if self.exfil.is_match(&full_text) {
            return Category::DataExfil;
        }

        let endpoint = format!("{} {}", path, method).to_lowercase();
        if self.recon.is_match(&endpoint) {
            return Category::Recon;
        }

        if (method == "GET" || method == "HEAD")
            && (path == "/" || path == "/health" || path == "/favicon.ico")
        {
            return Category::Scan;
        }

        Category::Scan
    }
}
