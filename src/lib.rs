//! clawtrap — telemetry core for an AI-agent gateway deception endpoint.
//!
//! The deception surfaces (fake HTTP control plane, WS gateway mock, CDP
//! mock) construct normalized [`models::AttackEvent`]s and hand them to the
//! [`pipeline::Pipeline`], which classifies, tracks, persists, aggregates
//! and fans them out to live subscribers. Per-session WS/CDP frame
//! transcripts travel through a side channel that bypasses classification.

pub mod broadcast;
pub mod canary;
pub mod classify;
pub mod config;
pub mod geo;
pub mod journal;
pub mod models;
pub mod pipeline;
pub mod ratelimit;
pub mod registry;
pub mod state;
pub mod stats;

pub use broadcast::{EventBroadcast, SubscriberId};
pub use canary::CanaryKeys;
pub use classify::Classifier;
pub use config::Config;
pub use geo::GeoResolver;
pub use journal::{Journal, Stream};
pub use models::{AttackEvent, Category, GeoInfo, Protocol, StatsSnapshot};
pub use pipeline::{Pipeline, SessionKind};
pub use ratelimit::RateLimiter;
pub use registry::AttackerRegistry;
pub use state::RuntimeState;
pub use stats::StatsAggregator;
