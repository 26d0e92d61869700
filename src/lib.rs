#![forbid(unsafe_code)]

pub mod cache;
pub mod catalog;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod pipeline;
pub mod reconcile;
pub mod schedule;

pub use cache::CacheIndex;
pub use catalog::{AnimationGroup, Catalog, ElementKind, OverlayElement};
pub use config::Profile;
pub use engine::{FfmpegEngine, MediaEngine};
pub use error::{LoopmuxError, LoopmuxResult};
pub use fingerprint::{CacheDecision, Fingerprint};
pub use pipeline::{RenderOptions, RunSummary};
pub use reconcile::DurationPlan;
pub use schedule::Timeline;
