//! Compiled, immutable toggle state.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    state::{ClientFeatures, ConstraintDefinition, DependencyDefinition, ToggleDefinition},
    strategy::Strategy,
    variants::VariantSet,
    Error, Result,
};

/// An immutable set of toggles produced by one state load.
///
/// Snapshots are never mutated after construction. A reload builds a new snapshot and swaps it in
/// wholesale, so an evaluation holding an `Arc<Snapshot>` keeps seeing consistent definitions.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) toggles: HashMap<String, Toggle>,
    version: u32,
    loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct Toggle {
    pub name: String,
    pub enabled: bool,
    pub toggle_type: Option<String>,
    pub project: String,
    pub strategies: Box<[Strategy]>,
    pub variants: Option<VariantSet>,
    pub dependencies: Box<[Dependency]>,
    /// Set when the dependency graph reachable from this toggle has a cycle or a dangling name.
    pub broken_dependencies: bool,
    pub impression_data: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Dependency {
    pub feature: String,
    pub enabled: bool,
    /// `None` means any variant of an enabled parent satisfies the dependency.
    pub variants: Option<HashSet<String>>,
}

const DEFAULT_PROJECT: &str = "default";

impl Snapshot {
    /// A snapshot with no toggles. Every toggle evaluates as unknown.
    pub fn empty() -> Snapshot {
        Snapshot {
            toggles: HashMap::new(),
            version: 0,
            loaded_at: Utc::now(),
        }
    }

    /// Parse and compile a state payload.
    ///
    /// Accepts a features document (`{"version": 2, "features": [...], "segments": [...]}`) or a
    /// bare array of toggle definitions.
    pub fn from_json(payload: &str) -> Result<Snapshot> {
        let value: Value =
            serde_json::from_str(payload).map_err(|err| Error::InvalidJson(Arc::new(err)))?;

        let features = if value.is_array() {
            ClientFeatures {
                features: serde_json::from_value(value)
                    .map_err(|err| Error::InvalidDefinition(Arc::new(err)))?,
                ..ClientFeatures::default()
            }
        } else {
            serde_json::from_value(value).map_err(|err| Error::InvalidDefinition(Arc::new(err)))?
        };

        Snapshot::from_features(features)
    }

    /// Compile an already parsed features document.
    pub fn from_features(features: ClientFeatures) -> Result<Snapshot> {
        let segments: HashMap<i64, Vec<ConstraintDefinition>> = features
            .segments
            .into_iter()
            .map(|segment| (segment.id, segment.constraints))
            .collect();

        let mut toggles = HashMap::with_capacity(features.features.len());
        for definition in features.features {
            if toggles.contains_key(&definition.name) {
                return Err(Error::DuplicateToggle(definition.name));
            }
            let toggle = Toggle::compile(definition, &segments)?;
            toggles.insert(toggle.name.clone(), toggle);
        }

        for name in crate::dependencies::find_broken_dependencies(&toggles) {
            if let Some(toggle) = toggles.get_mut(&name) {
                log::warn!(target: "toggle_engine",
                           toggle = name.as_str();
                           "toggle has a dependency cycle or an unknown parent, it will evaluate to disabled");
                toggle.broken_dependencies = true;
            }
        }

        log::debug!(target: "toggle_engine",
                    version = features.version,
                    toggles = toggles.len(),
                    segments = segments.len();
                    "compiled toggle state");

        Ok(Snapshot {
            toggles,
            version: features.version,
            loaded_at: Utc::now(),
        })
    }

    /// Number of toggles.
    pub fn len(&self) -> usize {
        self.toggles.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.toggles.is_empty()
    }

    /// Whether a toggle with this name is defined.
    pub fn contains(&self, toggle_name: &str) -> bool {
        self.toggles.contains_key(toggle_name)
    }

    /// Names of all toggles, in no particular order.
    pub fn toggle_names(&self) -> impl Iterator<Item = &str> {
        self.toggles.keys().map(String::as_str)
    }

    /// Format version reported by the payload.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Instant this snapshot was compiled.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub(crate) fn get(&self, toggle_name: &str) -> Option<&Toggle> {
        self.toggles.get(toggle_name)
    }
}

impl Default for Snapshot {
    fn default() -> Snapshot {
        Snapshot::empty()
    }
}

impl Toggle {
    fn compile(
        definition: ToggleDefinition,
        segments: &HashMap<i64, Vec<ConstraintDefinition>>,
    ) -> Result<Toggle> {
        let name = definition.name;

        let strategies = definition
            .strategies
            .iter()
            .filter(|strategy| !strategy.disabled)
            .map(|strategy| Strategy::compile(&name, strategy, segments))
            .collect::<Result<Box<[_]>>>()?;

        let variants = VariantSet::compile(&name, &name, None, &definition.variants)?;

        let dependencies = definition
            .dependencies
            .into_iter()
            .map(Dependency::from)
            .collect();

        Ok(Toggle {
            enabled: definition.enabled,
            toggle_type: definition.toggle_type,
            project: definition
                .project
                .filter(|project| !project.is_empty())
                .unwrap_or_else(|| DEFAULT_PROJECT.to_owned()),
            strategies,
            variants,
            dependencies,
            broken_dependencies: false,
            impression_data: definition.impression_data,
            name,
        })
    }
}

impl From<DependencyDefinition> for Dependency {
    fn from(definition: DependencyDefinition) -> Dependency {
        Dependency {
            feature: definition.feature,
            enabled: definition.enabled,
            variants: definition
                .variants
                .filter(|variants| !variants.is_empty())
                .map(|variants| variants.into_iter().collect()),
        }
    }
}
