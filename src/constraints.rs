use chrono::{DateTime, Utc};
use semver::Version;

use crate::{
    context::{parse_timestamp, ContextField, StaticContext, Subject},
    state::{ConstraintDefinition, Operator},
    Context,
};

/// A constraint compiled for evaluation: the context field is resolved to a [`ContextField`] and
/// the operand is parsed once, at load time, for its operator family.
#[derive(Debug, Clone)]
pub struct Constraint {
    field: ContextField,
    operator: Operator,
    operand: Operand,
    inverted: bool,
}

#[derive(Debug, Clone)]
enum Operand {
    /// Candidate set for `IN`/`NOT_IN` and `STR_*`. Lower-cased when case-insensitive.
    Strings {
        values: Box<[String]>,
        case_insensitive: bool,
    },
    /// `None` when the configured operand does not parse.
    Number(Option<f64>),
    Date(Option<DateTime<Utc>>),
    Semver(Option<Version>),
    Unsupported,
}

impl From<&ConstraintDefinition> for Constraint {
    fn from(def: &ConstraintDefinition) -> Constraint {
        let single = def
            .value
            .as_deref()
            .or_else(|| def.values.first().map(String::as_str));

        let operand = match def.operator {
            Operator::In
            | Operator::NotIn
            | Operator::StrContains
            | Operator::StrStartsWith
            | Operator::StrEndsWith => {
                let values = if def.values.is_empty() {
                    def.value.iter().cloned().collect::<Vec<_>>()
                } else {
                    def.values.clone()
                };
                let values = if def.case_insensitive {
                    values.iter().map(|v| v.to_lowercase()).collect()
                } else {
                    values
                };
                Operand::Strings {
                    values: values.into_boxed_slice(),
                    case_insensitive: def.case_insensitive,
                }
            }
            Operator::NumEq
            | Operator::NumGt
            | Operator::NumGte
            | Operator::NumLt
            | Operator::NumLte => Operand::Number(single.and_then(|s| s.trim().parse().ok())),
            Operator::DateAfter | Operator::DateBefore => {
                Operand::Date(single.and_then(parse_timestamp))
            }
            Operator::SemverEq | Operator::SemverGt | Operator::SemverLt => {
                Operand::Semver(single.and_then(|s| Version::parse(s.trim()).ok()))
            }
            Operator::Unknown => Operand::Unsupported,
        };

        Constraint {
            field: def.context_name.as_str().into(),
            operator: def.operator,
            operand,
            inverted: def.inverted,
        }
    }
}

impl From<ConstraintDefinition> for Constraint {
    fn from(def: ConstraintDefinition) -> Constraint {
        Constraint::from(&def)
    }
}

impl Constraint {
    /// Evaluate the constraint against `context` at the current instant.
    pub fn matches(&self, context: &Context) -> bool {
        let defaults = StaticContext::default();
        self.matches_subject(&Subject::new(context, &defaults, Utc::now()))
    }

    pub(crate) fn matches_subject(&self, subject: &Subject) -> bool {
        if matches!(self.operand, Operand::Unsupported) {
            // We don't know what the operator means, so neither polarity is a safe answer.
            return false;
        }
        self.try_eval(subject).unwrap_or(false) != self.inverted
    }

    /// Apply the operator, returning `None` when the attribute is absent or fails to coerce.
    fn try_eval(&self, subject: &Subject) -> Option<bool> {
        if let Operand::Date(operand) = &self.operand {
            let attribute = if self.field == ContextField::CurrentTime {
                subject.current_time()?
            } else {
                parse_timestamp(&subject.get(&self.field)?)?
            };
            let operand = operand.as_ref()?;
            return Some(match self.operator {
                Operator::DateAfter => attribute > *operand,
                Operator::DateBefore => attribute < *operand,
                _ => return None,
            });
        }

        let attribute = subject.get(&self.field)?;

        match &self.operand {
            Operand::Strings {
                values,
                case_insensitive,
            } => {
                let attribute = if *case_insensitive {
                    attribute.to_lowercase()
                } else {
                    attribute.into_owned()
                };
                let mut values = values.iter();
                Some(match self.operator {
                    Operator::In => values.any(|v| *v == attribute),
                    Operator::NotIn => !values.any(|v| *v == attribute),
                    Operator::StrContains => values.any(|v| attribute.contains(v.as_str())),
                    Operator::StrStartsWith => values.any(|v| attribute.starts_with(v.as_str())),
                    Operator::StrEndsWith => values.any(|v| attribute.ends_with(v.as_str())),
                    _ => return None,
                })
            }

            Operand::Number(operand) => {
                let operand = (*operand)?;
                let attribute: f64 = attribute.trim().parse().ok()?;
                Some(match self.operator {
                    Operator::NumEq => attribute == operand,
                    Operator::NumGt => attribute > operand,
                    Operator::NumGte => attribute >= operand,
                    Operator::NumLt => attribute < operand,
                    Operator::NumLte => attribute <= operand,
                    _ => return None,
                })
            }

            Operand::Semver(operand) => {
                let operand = operand.as_ref()?;
                let attribute = Version::parse(attribute.trim()).ok()?;
                Some(match self.operator {
                    Operator::SemverEq => attribute == *operand,
                    Operator::SemverGt => attribute > *operand,
                    Operator::SemverLt => attribute < *operand,
                    _ => return None,
                })
            }

            Operand::Date(_) | Operand::Unsupported => None,
        }
    }
}
