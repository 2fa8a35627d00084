//! An embeddable feature toggle evaluation engine.
//!
//! # Overview
//!
//! The engine revolves around an [`Engine`] that holds the current toggle definitions and
//! evaluates them against a request [`Context`]. Definitions are loaded wholesale from a JSON
//! features document with [`Engine::load_state`]; every later reload replaces them atomically,
//! so concurrent evaluations never observe a partially loaded state.
//!
//! A toggle is enabled for a context when its kill switch is on, its dependencies are satisfied,
//! and at least one of its strategies matches. Enabled toggles may additionally resolve to one of
//! several weighted [variants](VariantResult), chosen by stable hashing of a stickiness field so
//! that every user keeps the same variant across calls, processes and engine instances.
//!
//! # Error Handling
//!
//! Only loading can fail; errors are represented by the [`Error`] enum and a failed load keeps
//! the previous definitions active. Evaluation is total: unknown toggles, absent context fields
//! and malformed operands resolve to disabled or non-matching results.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `toggle_engine` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into load failures and dropped configuration.
//!
//! # Examples
//!
//! ```
//! # use toggle_engine::{Context, EngineConfig};
//! let mut config = EngineConfig::new();
//! config.app_name("checkout");
//! let engine = config.to_engine();
//!
//! engine.load_state(r#"
//!   {"version": 2, "features": [{
//!     "name": "new-cart",
//!     "enabled": true,
//!     "strategies": [{"name": "flexibleRollout", "parameters": {"rollout": "100"}}],
//!     "variants": [{"name": "blue", "weight": 1000}]
//!   }]}
//! "#)?;
//!
//! let context = Context::new().user_id("7");
//! assert!(engine.is_enabled("new-cart", &context));
//! assert_eq!(engine.get_variant("new-cart", &context).name, "blue");
//! # Ok::<(), toggle_engine::Error>(())
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod config;
mod constraints;
mod context;
mod dependencies;
mod engine;
mod error;
mod lenient;
mod metrics;
mod sharder;
mod snapshot;
pub mod state;
mod store;
mod strategy;
mod variants;

pub use config::EngineConfig;
pub use constraints::Constraint;
pub use context::Context;
pub use dependencies::resolve_with_dependencies;
pub use engine::{Engine, ResolvedToggle, ToggleMetadata};
pub use error::{Error, Result};
pub use metrics::{MetricBucket, MetricsAggregator, ToggleStats};
pub use sharder::{Murmur3Sharder, Sharder, ROLLOUT_SEED, VARIANT_SEED};
pub use snapshot::Snapshot;
pub use store::ToggleStore;
pub use variants::{VariantResult, DISABLED_VARIANT, TOTAL_WEIGHT};

/// Names of the strategies the engine evaluates natively. Any other strategy name never matches.
pub fn built_in_strategies() -> &'static [&'static str] {
    &strategy::BUILT_IN_STRATEGIES
}

/// Version of this crate.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
