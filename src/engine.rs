use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    context::{StaticContext, Subject},
    metrics::{MetricBucket, MetricsAggregator},
    snapshot::Snapshot,
    store::ToggleStore,
    variants::VariantResult,
    Context, EngineConfig, Result,
};

/// Full evaluation result of one toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedToggle {
    #[allow(missing_docs)]
    pub enabled: bool,
    /// Whether the host should emit an impression event for this evaluation.
    pub impression_data: bool,
    #[allow(missing_docs)]
    pub project: String,
    #[allow(missing_docs)]
    pub variant: VariantResult,
}

/// Toggle metadata without evaluation internals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleMetadata {
    #[allow(missing_docs)]
    pub name: String,
    #[serde(rename = "type")]
    #[allow(missing_docs)]
    pub toggle_type: Option<String>,
    #[allow(missing_docs)]
    pub project: String,
    /// The kill switch state, not an evaluation result.
    pub enabled: bool,
}

/// The toggle evaluation engine.
///
/// An `Engine` owns the current toggle [`Snapshot`] and the metrics counters. It is `Send + Sync`
/// and meant to be shared between request threads, typically behind an `Arc`.
///
/// # Examples
/// ```
/// # use toggle_engine::{Context, Engine};
/// let engine = Engine::new();
/// engine
///     .load_state(r#"{"version": 2, "features": [{"name": "checkout", "enabled": true}]}"#)
///     .unwrap();
/// assert!(engine.is_enabled("checkout", &Context::new().user_id("7")));
/// assert!(!engine.is_enabled("unknown", &Context::new()));
/// ```
#[derive(Debug)]
pub struct Engine {
    store: ToggleStore,
    metrics: MetricsAggregator,
    defaults: StaticContext,
    record_metrics: bool,
}

impl Engine {
    /// Create an engine with the default [`EngineConfig`] and no toggles.
    pub fn new() -> Self {
        EngineConfig::default().to_engine()
    }

    pub(crate) fn with_config(config: EngineConfig) -> Self {
        Engine {
            store: ToggleStore::new(),
            metrics: MetricsAggregator::new(),
            defaults: config.static_context(),
            record_metrics: config.record_metrics,
        }
    }

    /// Replace the toggle state with the definitions in `payload`.
    ///
    /// On error the previously loaded toggles stay active.
    pub fn load_state(&self, payload: &str) -> Result<()> {
        self.store.load(payload)
    }

    /// The snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.current_snapshot()
    }

    /// Whether `toggle_name` is enabled for `context`. Unknown toggles are disabled.
    pub fn is_enabled(&self, toggle_name: &str, context: &Context) -> bool {
        let snapshot = self.store.current_snapshot();
        let subject = Subject::new(context, &self.defaults, Utc::now());

        let enabled = snapshot
            .get(toggle_name)
            .is_some_and(|toggle| snapshot.evaluate(toggle, &subject).enabled);

        log::trace!(target: "toggle_engine", toggle = toggle_name, enabled; "evaluated toggle");

        if self.record_metrics {
            self.metrics.count_toggle(toggle_name, enabled);
        }
        enabled
    }

    /// Variant of `toggle_name` for `context`, or the `"disabled"` sentinel.
    pub fn get_variant(&self, toggle_name: &str, context: &Context) -> VariantResult {
        let snapshot = self.store.current_snapshot();
        let subject = Subject::new(context, &self.defaults, Utc::now());

        let variant = match snapshot.get(toggle_name) {
            Some(toggle) => snapshot.evaluate(toggle, &subject).variant(&subject),
            None => VariantResult::disabled(false),
        };

        log::trace!(target: "toggle_engine",
                    toggle = toggle_name,
                    variant = variant.name.as_str(),
                    enabled = variant.feature_enabled;
                    "resolved variant");

        if self.record_metrics {
            self.metrics
                .count_toggle(toggle_name, variant.feature_enabled);
            self.metrics.count_variant(toggle_name, &variant.name);
        }
        variant
    }

    /// Resolve one toggle fully. Returns `None` for an unknown toggle. Not counted in metrics.
    pub fn resolve(&self, toggle_name: &str, context: &Context) -> Option<ResolvedToggle> {
        let snapshot = self.store.current_snapshot();
        let subject = Subject::new(context, &self.defaults, Utc::now());
        resolve_in(&snapshot, toggle_name, &subject)
    }

    /// Resolve every toggle of the current snapshot against one context. Not counted in metrics.
    pub fn resolve_all(&self, context: &Context) -> HashMap<String, ResolvedToggle> {
        let snapshot = self.store.current_snapshot();
        let subject = Subject::new(context, &self.defaults, Utc::now());
        snapshot
            .toggle_names()
            .filter_map(|name| {
                resolve_in(&snapshot, name, &subject).map(|resolved| (name.to_owned(), resolved))
            })
            .collect()
    }

    /// Echoes the toggle's `impressionData` flag; `false` for unknown toggles.
    pub fn should_emit_impression_event(&self, toggle_name: &str) -> bool {
        self.store
            .current_snapshot()
            .get(toggle_name)
            .is_some_and(|toggle| toggle.impression_data)
    }

    /// Metadata of every loaded toggle, sorted by name.
    pub fn list_known_toggles(&self) -> Vec<ToggleMetadata> {
        let snapshot = self.store.current_snapshot();
        let mut toggles: Vec<ToggleMetadata> = snapshot
            .toggles
            .values()
            .map(|toggle| ToggleMetadata {
                name: toggle.name.clone(),
                toggle_type: toggle.toggle_type.clone(),
                project: toggle.project.clone(),
                enabled: toggle.enabled,
            })
            .collect();
        toggles.sort_by(|a, b| a.name.cmp(&b.name));
        toggles
    }

    /// Record an evaluation performed outside [`Engine::is_enabled`], e.g. after [`Engine::resolve`].
    pub fn count_toggle(&self, toggle_name: &str, enabled: bool) {
        self.metrics.count_toggle(toggle_name, enabled);
    }

    /// Record a variant selection performed outside [`Engine::get_variant`].
    pub fn count_variant(&self, toggle_name: &str, variant_name: &str) {
        self.metrics.count_variant(toggle_name, variant_name);
    }

    /// Take the metrics recorded since the previous drain. `None` if nothing was recorded.
    pub fn drain_metrics(&self) -> Option<MetricBucket> {
        self.metrics.drain()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_in(snapshot: &Snapshot, toggle_name: &str, subject: &Subject) -> Option<ResolvedToggle> {
    let toggle = snapshot.get(toggle_name)?;
    let evaluation = snapshot.evaluate(toggle, subject);
    Some(ResolvedToggle {
        enabled: evaluation.enabled,
        impression_data: toggle.impression_data,
        project: toggle.project.clone(),
        variant: evaluation.variant(subject),
    })
}
