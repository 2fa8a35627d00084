use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

use crate::{
    context::{ContextField, Stickiness, Subject},
    sharder::VARIANTS,
    state::{VariantDefinition, WeightType},
    Error, Result,
};

/// Per-mille weight budget shared by the variants of one toggle.
pub const TOTAL_WEIGHT: u32 = 1000;

/// Name of the sentinel variant returned when no variant applies.
pub const DISABLED_VARIANT: &str = "disabled";

/// Outcome of variant resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantResult {
    /// Selected variant name, or `"disabled"`.
    pub name: String,
    /// Payload of the selected variant, echoed verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// `true` iff a real variant was selected.
    pub enabled: bool,
    /// Whether the toggle itself is enabled for the context.
    pub feature_enabled: bool,
}

impl VariantResult {
    /// The empty sentinel.
    pub fn disabled(feature_enabled: bool) -> VariantResult {
        VariantResult {
            name: DISABLED_VARIANT.to_owned(),
            payload: None,
            enabled: false,
            feature_enabled,
        }
    }
}

/// Variants of a toggle (or of a strategy) with effective per-mille weights.
#[derive(Debug, Clone)]
pub(crate) struct VariantSet {
    variants: Box<[Variant]>,
    stickiness: Stickiness,
    group_id: String,
    total_weight: u32,
}

#[derive(Debug, Clone)]
struct Variant {
    name: String,
    weight: u32,
    payload: Option<serde_json::Value>,
    overrides: Box<[Override]>,
}

#[derive(Debug, Clone)]
struct Override {
    field: ContextField,
    values: Box<[String]>,
}

impl VariantSet {
    /// Compile variant definitions, returning `None` for an empty list.
    ///
    /// Weights are taken literally when they already add up to 1000. Otherwise fixed weights are
    /// kept and variable variants split what is left evenly, the integer remainder going one unit
    /// each to the first variable variants. `stickiness` overrides the one declared on the first
    /// variant.
    pub fn compile(
        toggle_name: &str,
        group_id: &str,
        stickiness: Option<Stickiness>,
        definitions: &[VariantDefinition],
    ) -> Result<Option<VariantSet>> {
        let Some(first) = definitions.first() else {
            return Ok(None);
        };

        let declared: u64 = definitions.iter().map(|v| u64::from(v.weight)).sum();
        if declared > u64::from(TOTAL_WEIGHT) {
            log::warn!(target: "toggle_engine",
                       toggle = toggle_name,
                       total = declared;
                       "variant weights exceed the per-mille budget");
            return Err(Error::VariantWeightsExceeded {
                toggle: toggle_name.to_owned(),
                total: declared,
            });
        }

        let weights = effective_weights(definitions, declared as u32);
        let total_weight = weights.iter().sum();

        let variants = definitions
            .iter()
            .zip(weights)
            .map(|(def, weight)| Variant {
                name: def.name.clone(),
                weight,
                payload: def.payload.clone(),
                overrides: def
                    .overrides
                    .iter()
                    .map(|o| Override {
                        field: o.context_name.as_str().into(),
                        values: o.values.clone().into_boxed_slice(),
                    })
                    .collect(),
            })
            .collect();

        Ok(Some(VariantSet {
            variants,
            stickiness: stickiness
                .unwrap_or_else(|| Stickiness::parse(first.stickiness.as_deref())),
            group_id: group_id.to_owned(),
            total_weight,
        }))
    }

    /// Select a variant for an enabled toggle.
    pub fn select(&self, subject: &Subject) -> VariantResult {
        if let Some(variant) = self.find_override(subject) {
            return variant.to_result();
        }

        if self.total_weight == 0 {
            return VariantResult::disabled(true);
        }

        let bucket = match self.seed(subject) {
            Some(seed) => VARIANTS.bucket(&self.group_id, &seed, self.total_weight),
            None => thread_rng().gen_range(0..self.total_weight),
        };

        let mut boundary = 0;
        for variant in self.variants.iter() {
            boundary += variant.weight;
            if bucket < boundary {
                return variant.to_result();
            }
        }

        VariantResult::disabled(true)
    }

    fn find_override(&self, subject: &Subject) -> Option<&Variant> {
        self.variants.iter().find(|variant| {
            variant.overrides.iter().any(|o| {
                subject
                    .get(&o.field)
                    .is_some_and(|value| o.values.iter().any(|v| *v == *value))
            })
        })
    }

    /// A named stickiness field missing from the context falls back to the default chain.
    fn seed<'a>(&self, subject: &Subject<'a>) -> Option<std::borrow::Cow<'a, str>> {
        match &self.stickiness {
            Stickiness::Random => None,
            Stickiness::Default => Stickiness::Default.resolve(subject),
            field => field
                .resolve(subject)
                .or_else(|| Stickiness::Default.resolve(subject)),
        }
    }
}

impl Variant {
    fn to_result(&self) -> VariantResult {
        VariantResult {
            name: self.name.clone(),
            payload: self.payload.clone(),
            enabled: true,
            feature_enabled: true,
        }
    }
}

fn effective_weights(definitions: &[VariantDefinition], declared: u32) -> Vec<u32> {
    if declared == TOTAL_WEIGHT {
        return definitions.iter().map(|v| v.weight).collect();
    }

    let fixed: u32 = definitions
        .iter()
        .filter(|v| v.weight_type == WeightType::Fixed)
        .map(|v| v.weight)
        .sum();
    let variable_count = definitions
        .iter()
        .filter(|v| v.weight_type == WeightType::Variable)
        .count() as u32;
    if variable_count == 0 {
        return definitions.iter().map(|v| v.weight).collect();
    }

    let remaining = TOTAL_WEIGHT - fixed;
    let share = remaining / variable_count;
    let mut remainder = remaining % variable_count;

    definitions
        .iter()
        .map(|v| match v.weight_type {
            WeightType::Fixed => v.weight,
            WeightType::Variable if remainder > 0 => {
                remainder -= 1;
                share + 1
            }
            WeightType::Variable => share,
        })
        .collect()
}

/// Resolve the variant of a toggle given its verdict and applicable variants.
pub(crate) fn resolve_variant(
    variants: Option<&VariantSet>,
    subject: &Subject,
    enabled: bool,
) -> VariantResult {
    match variants {
        Some(variants) if enabled => variants.select(subject),
        _ => VariantResult::disabled(enabled),
    }
}
