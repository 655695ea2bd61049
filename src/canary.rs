//! Canary key generation
//!
//! A fixed set of fake high-value credentials, each embedding the configured
//! prefix so the key is recognizable if it reappears in attacker-controlled
//! traffic. Generated once per process lifetime and shared read-only by every
//! surface that emits decoy content.

use rand::Rng;
use serde::Serialize;

const HEX_CHARS: &[u8] = b"0123456789abcdef";

fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX_CHARS[rng.gen_range(0..HEX_CHARS.len())] as char)
        .collect()
}

/// The decoy credential set, one entry per simulated credential type
#[derive(Debug, Clone, Serialize)]
pub struct CanaryKeys {
    pub anthropic_api: String,
    pub openai_api: String,
    pub openrouter_api: String,
    pub gateway_token: String,
    pub telegram_bot: String,
    pub discord_bot: String,
    pub hooks_token: String,
    pub aws_access_key: String,
    pub aws_secret_key: String,
    pub google_oauth: String,
}

impl CanaryKeys {
    /// Generate a fresh key set with `prefix` embedded in each value
    pub fn generate(prefix: &str) -> Self {
        Self {
            anthropic_api: format!("sk-ant-api03-{}-{}", prefix, random_hex(64)),
            openai_api: format!("sk-proj-{}-{}", prefix, random_hex(48)),
            openrouter_api: format!("sk-or-{}-{}", prefix, random_hex(32)),
            gateway_token: format!("{}-GW-{}", prefix, random_hex(12)),
            telegram_bot: format!("{}-TG:AAF_{}", prefix, random_hex(32)),
            discord_bot: format!("{}-DC.{}", prefix, random_hex(32)),
            hooks_token: format!("{}-HK-{}", prefix, random_hex(12)),
            aws_access_key: format!("AKIA{}{}", prefix, random_hex(16).to_uppercase()),
            aws_secret_key: random_hex(40),
            google_oauth: format!("ya29.{}-{}", prefix, random_hex(24)),
        }
    }

    /// All keys as (credential type, value) pairs
    pub fn all(&self) -> [(&'static str, &str); 10] {
        [
            ("anthropic_api", &self.anthropic_api),
            ("openai_api", &self.openai_api),
            ("openrouter_api", &self.openrouter_api),
            ("gateway_token", &self.gateway_token),
            ("telegram_bot", &self.telegram_bot),
            ("discord_bot", &self.discord_bot),
            ("hooks_token", &self.hooks_token),
            ("aws_access_key", &self.aws_access_key),
            ("aws_secret_key", &self.aws_secret_key),
            ("google_oauth", &self.google_oauth),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_embedded() {
        let keys = CanaryKeys::generate("HONEYPOT");
        assert!(keys.anthropic_api.starts_with("sk-ant-api03-HONEYPOT-"));
        assert!(keys.openai_api.starts_with("sk-proj-HONEYPOT-"));
        assert!(keys.openrouter_api.starts_with("sk-or-HONEYPOT-"));
        assert!(keys.gateway_token.starts_with("HONEYPOT-GW-"));
        assert!(keys.telegram_bot.starts_with("HONEYPOT-TG:AAF_"));
        assert!(keys.discord_bot.starts_with("HONEYPOT-DC."));
        assert!(keys.hooks_token.starts_with("HONEYPOT-HK-"));
        assert!(keys.aws_access_key.starts_with("AKIAHONEYPOT"));
        assert!(keys.google_oauth.starts_with("ya29.HONEYPOT-"));
    }

    #[test]
    fn test_key_lengths() {
        let keys = CanaryKeys::generate("X");
        assert_eq!(keys.aws_secret_key.len(), 40);
        // 64 hex chars after the prefix
        let tail = keys.anthropic_api.rsplit('-').next().unwrap();
        assert_eq!(tail.len(), 64);
    }

    #[test]
    fn test_regeneration_changes_material() {
        let a = CanaryKeys::generate("P");
        let b = CanaryKeys::generate("P");
        assert_ne!(a.anthropic_api, b.anthropic_api);
        assert_ne!(a.aws_secret_key, b.aws_secret_key);
    }

    #[test]
    fn test_all_returns_every_key() {
        let keys = CanaryKeys::generate("P");
        let all = keys.all();
        assert_eq!(all.len(), 10);
        assert!(all.iter().all(|(_, v)| !v.is_empty()));
    }
}
