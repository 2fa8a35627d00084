//! Wire format of the state payload: the client features document delivered by the poller.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::lenient;

/// A features document. This is the payload accepted by
/// [`Engine::load_state`](crate::Engine::load_state).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFeatures {
    /// Format version reported by the server. Informational only.
    #[serde(default)]
    pub version: u32,
    /// Toggle definitions. Names must be unique.
    pub features: Vec<ToggleDefinition>,
    /// Reusable constraint groups referenced by id from strategies.
    #[serde(default)]
    pub segments: Vec<SegmentDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ToggleDefinition {
    pub name: String,
    pub enabled: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub toggle_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub strategies: Vec<StrategyDefinition>,
    #[serde(default)]
    pub variants: Vec<VariantDefinition>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDefinition>,
    #[serde(default)]
    pub impression_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct StrategyDefinition {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDefinition>,
    /// Ids of segments whose constraints apply to this strategy as well.
    #[serde(default)]
    pub segments: Vec<i64>,
    /// Strategy-level variants, used instead of the toggle's when this strategy matches.
    #[serde(default)]
    pub variants: Vec<VariantDefinition>,
    /// Disabled strategies are skipped.
    #[serde(default)]
    pub disabled: bool,
}

/// `ConstraintDefinition` checks that a context attribute matches `values` under `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ConstraintDefinition {
    pub context_name: String,
    pub operator: Operator,
    #[serde(default, deserialize_with = "lenient::string_vec")]
    pub values: Vec<String>,
    /// Single operand. Used when `values` is empty.
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub inverted: bool,
}

/// Constraint operators.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    /// Attribute is one of the values.
    In,
    /// Attribute is none of the values. An absent attribute still fails.
    NotIn,
    /// Attribute contains any of the values.
    StrContains,
    /// Attribute starts with any of the values.
    StrStartsWith,
    /// Attribute ends with any of the values.
    StrEndsWith,
    #[allow(missing_docs)]
    NumEq,
    #[allow(missing_docs)]
    NumGt,
    #[allow(missing_docs)]
    NumGte,
    #[allow(missing_docs)]
    NumLt,
    #[allow(missing_docs)]
    NumLte,
    /// Attribute is an RFC 3339 timestamp strictly after the operand.
    DateAfter,
    /// Attribute is an RFC 3339 timestamp strictly before the operand.
    DateBefore,
    #[allow(missing_docs)]
    SemverEq,
    #[allow(missing_docs)]
    SemverGt,
    #[allow(missing_docs)]
    SemverLt,
    /// Operator introduced by a newer server. Never matches.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VariantDefinition {
    pub name: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub weight_type: WeightType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<String>,
    #[serde(default)]
    pub overrides: Vec<OverrideDefinition>,
    /// Opaque payload, echoed verbatim in variant results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// How a variant's weight takes part in the per-mille split.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "camelCase")]
pub enum WeightType {
    /// Weight is taken literally.
    #[serde(alias = "fix")]
    Fixed,
    /// Shares what the fixed variants leave of 1000 evenly with the other variable variants.
    #[default]
    Variable,
}

/// Forces a variant for contexts whose `context_name` attribute is one of `values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct OverrideDefinition {
    pub context_name: String,
    #[serde(default, deserialize_with = "lenient::string_vec")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct DependencyDefinition {
    /// Name of the parent toggle.
    #[serde(alias = "toggleName")]
    pub feature: String,
    /// Required state of the parent. `false` requires the parent to be disabled.
    #[serde(default = "default_dependency_enabled")]
    pub enabled: bool,
    /// When present and non-empty, the parent must resolve to one of these variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<String>>,
}

fn default_dependency_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct SegmentDefinition {
    pub id: i64,
    #[serde(default)]
    pub constraints: Vec<ConstraintDefinition>,
}
