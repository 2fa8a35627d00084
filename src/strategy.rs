//! Built-in activation strategies.
//!
//! The strategy set is closed: every name the engine understands is a [`StrategyKind`] variant
//! and anything else compiles to [`StrategyKind::Unknown`], which never matches. This keeps
//! payloads from newer servers loadable.
use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
};

use chrono::Timelike;
use ipnet::IpNet;
use rand::{thread_rng, Rng};

use crate::{
    constraints::Constraint,
    context::{Stickiness, Subject},
    sharder::ROLLOUT,
    state::{ConstraintDefinition, StrategyDefinition},
    variants::VariantSet,
    Result,
};

/// Names of the strategies the engine evaluates natively.
pub const BUILT_IN_STRATEGIES: [&str; 8] = [
    "default",
    "userWithId",
    "gradualRolloutUserId",
    "gradualRolloutSessionId",
    "gradualRolloutRandom",
    "remoteAddress",
    "applicationHour",
    "flexibleRollout",
];

#[derive(Debug, Clone)]
pub(crate) enum StrategyKind {
    Default,
    UserWithId {
        user_ids: HashSet<String>,
    },
    GradualRolloutUserId {
        percentage: Option<f64>,
        group_id: String,
    },
    GradualRolloutSessionId {
        percentage: Option<f64>,
        group_id: String,
    },
    GradualRolloutRandom {
        percentage: Option<f64>,
    },
    RemoteAddress {
        ranges: Box<[IpNet]>,
    },
    ApplicationHour {
        start: Option<u32>,
        end: Option<u32>,
    },
    FlexibleRollout {
        rollout: Option<f64>,
        stickiness: Stickiness,
        group_id: String,
    },
    Unknown(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Strategy {
    kind: StrategyKind,
    constraints: Box<[Constraint]>,
    /// Set when a referenced segment is missing from the payload; such a strategy never matches.
    missing_segment: Option<i64>,
    variants: Option<VariantSet>,
}

impl Strategy {
    pub fn compile(
        toggle_name: &str,
        def: &StrategyDefinition,
        segments: &HashMap<i64, Vec<ConstraintDefinition>>,
    ) -> Result<Strategy> {
        let params = &def.parameters;
        let param = |name: &str| params.get(name).map(String::as_str);
        let group_id = param("groupId")
            .filter(|g| !g.is_empty())
            .unwrap_or(toggle_name)
            .to_owned();

        let kind = match def.name.as_str() {
            "default" => StrategyKind::Default,
            "userWithId" => StrategyKind::UserWithId {
                user_ids: split_list(param("userIds")).map(str::to_owned).collect(),
            },
            "gradualRolloutUserId" => StrategyKind::GradualRolloutUserId {
                percentage: parse_percentage(param("percentage").or(param("rollout"))),
                group_id: group_id.clone(),
            },
            "gradualRolloutSessionId" => StrategyKind::GradualRolloutSessionId {
                percentage: parse_percentage(param("percentage").or(param("rollout"))),
                group_id: group_id.clone(),
            },
            "gradualRolloutRandom" => StrategyKind::GradualRolloutRandom {
                percentage: parse_percentage(param("percentage").or(param("rollout"))),
            },
            "remoteAddress" => StrategyKind::RemoteAddress {
                ranges: parse_ranges(toggle_name, param("IPs")),
            },
            "applicationHour" => StrategyKind::ApplicationHour {
                start: parse_hour(param("start")),
                end: parse_hour(param("end")),
            },
            "flexibleRollout" => StrategyKind::FlexibleRollout {
                rollout: parse_percentage(param("rollout").or(param("percentage"))),
                stickiness: Stickiness::parse(param("stickiness")),
                group_id: group_id.clone(),
            },
            other => {
                log::debug!(target: "toggle_engine",
                            toggle = toggle_name,
                            strategy = other;
                            "unknown strategy, it will never match");
                StrategyKind::Unknown(other.to_owned())
            }
        };

        let mut constraints: Vec<Constraint> = def.constraints.iter().map(Constraint::from).collect();
        let mut missing_segment = None;
        for id in &def.segments {
            match segments.get(id) {
                Some(segment) => constraints.extend(segment.iter().map(Constraint::from)),
                None => {
                    log::warn!(target: "toggle_engine",
                               toggle = toggle_name,
                               segment = *id;
                               "strategy references an unknown segment, it will never match");
                    missing_segment = Some(*id);
                }
            }
        }

        Ok(Strategy {
            kind,
            constraints: constraints.into_boxed_slice(),
            missing_segment,
            variants: VariantSet::compile(
                toggle_name,
                &group_id,
                Some(Stickiness::parse(param("stickiness"))),
                &def.variants,
            )?,
        })
    }

    /// `true` iff every constraint matches and the strategy's own predicate holds.
    pub fn is_enabled(&self, subject: &Subject) -> bool {
        self.missing_segment.is_none()
            && self.constraints.iter().all(|c| c.matches_subject(subject))
            && self.kind.is_enabled(subject)
    }

    pub fn variants(&self) -> Option<&VariantSet> {
        self.variants.as_ref()
    }
}

impl StrategyKind {
    fn is_enabled(&self, subject: &Subject) -> bool {
        match self {
            StrategyKind::Default => true,

            StrategyKind::UserWithId { user_ids } => subject
                .user_id()
                .is_some_and(|user_id| user_ids.contains(user_id)),

            StrategyKind::GradualRolloutUserId {
                percentage,
                group_id,
            } => subject.user_id().is_some_and(|user_id| {
                in_rollout(*percentage, ROLLOUT.bucket(group_id, user_id, 100))
            }),

            StrategyKind::GradualRolloutSessionId {
                percentage,
                group_id,
            } => subject.session_id().is_some_and(|session_id| {
                in_rollout(*percentage, ROLLOUT.bucket(group_id, session_id, 100))
            }),

            StrategyKind::GradualRolloutRandom { percentage } => {
                in_rollout(*percentage, thread_rng().gen_range(0..100))
            }

            StrategyKind::RemoteAddress { ranges } => subject
                .remote_address()
                .and_then(|address| address.trim().parse::<IpAddr>().ok())
                .is_some_and(|address| ranges.iter().any(|range| range.contains(&address))),

            StrategyKind::ApplicationHour { start, end } => {
                let (Some(start), Some(end)) = (start, end) else {
                    return false;
                };
                let Some(now) = subject.current_time() else {
                    return false;
                };
                let hour = now.hour();
                if start <= end {
                    *start <= hour && hour <= *end
                } else {
                    // The window wraps past midnight.
                    hour >= *start || hour <= *end
                }
            }

            StrategyKind::FlexibleRollout {
                rollout,
                stickiness,
                group_id,
            } => {
                let bucket = match (stickiness, stickiness.resolve(subject)) {
                    (_, Some(value)) => ROLLOUT.bucket(group_id, &value, 100),
                    (Stickiness::Default | Stickiness::Random, None) => {
                        thread_rng().gen_range(0..100)
                    }
                    // A rollout keyed on a field the context doesn't have never includes it.
                    (Stickiness::Field(_), None) => return false,
                };
                in_rollout(*rollout, bucket)
            }

            StrategyKind::Unknown(name) => {
                log::trace!(target: "toggle_engine", strategy = name.as_str(); "unknown strategy");
                false
            }
        }
    }
}

/// Outcome of evaluating a toggle's strategy list.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Verdict<'a> {
    Disabled,
    /// `strategy` is the first matching strategy, `None` when the effective list is empty.
    Enabled { strategy: Option<&'a Strategy> },
}

/// Combine a toggle's strategies: enabled iff at least one matches (or there are none).
pub(crate) fn evaluate_strategies<'a>(strategies: &'a [Strategy], subject: &Subject) -> Verdict<'a> {
    if strategies.is_empty() {
        return Verdict::Enabled { strategy: None };
    }
    match strategies.iter().find(|s| s.is_enabled(subject)) {
        Some(strategy) => Verdict::Enabled {
            strategy: Some(strategy),
        },
        None => Verdict::Disabled,
    }
}

fn in_rollout(percentage: Option<f64>, bucket: u32) -> bool {
    percentage.is_some_and(|p| f64::from(bucket) < p)
}

fn split_list(value: Option<&str>) -> impl Iterator<Item = &str> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_percentage(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|p| p.is_finite())
}

fn parse_hour(value: Option<&str>) -> Option<u32> {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|h| *h < 24)
}

fn parse_ranges(toggle_name: &str, value: Option<&str>) -> Box<[IpNet]> {
    split_list(value)
        .filter_map(|entry| {
            let range = entry
                .parse::<IpNet>()
                .ok()
                .or_else(|| entry.parse::<IpAddr>().ok().map(IpNet::from));
            if range.is_none() {
                log::warn!(target: "toggle_engine",
                           toggle = toggle_name,
                           entry;
                           "ignoring invalid remoteAddress entry");
            }
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use crate::{
        context::{StaticContext, Subject},
        sharder::VARIANTS,
        state::{ConstraintDefinition, Operator, StrategyDefinition},
        Context,
    };

    use super::{evaluate_strategies, Strategy, Verdict};

    fn strategy(name: &str, params: &[(&str, &str)]) -> StrategyDefinition {
        StrategyDefinition {
            name: name.to_owned(),
            parameters: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            constraints: vec![],
            segments: vec![],
            variants: vec![],
            disabled: false,
        }
    }

    fn enabled(def: &StrategyDefinition, context: &Context) -> bool {
        let strategy = Strategy::compile("toggle", def, &HashMap::new()).unwrap();
        let defaults = StaticContext::default();
        strategy.is_enabled(&Subject::new(context, &defaults, Utc::now()))
    }

    #[test]
    fn default_is_always_on() {
        assert!(enabled(&strategy("default", &[]), &Context::new()));
    }

    #[test]
    fn unknown_strategy_is_off() {
        assert!(!enabled(
            &strategy("myCustomStrategy", &[]),
            &Context::new().user_id("1")
        ));
    }

    #[test]
    fn user_with_id() {
        let def = strategy("userWithId", &[("userIds", "alice, bob,carol")]);
        assert!(enabled(&def, &Context::new().user_id("bob")));
        assert!(enabled(&def, &Context::new().user_id("carol")));
        assert!(!enabled(&def, &Context::new().user_id("dave")));
        assert!(!enabled(&def, &Context::new()));
    }

    #[test]
    fn gradual_rollout_bounds() {
        let none = strategy("gradualRolloutUserId", &[("percentage", "0")]);
        let all = strategy("gradualRolloutUserId", &[("percentage", "100")]);
        for i in 0..100 {
            let context = Context::new().user_id(i.to_string());
            assert!(!enabled(&none, &context));
            assert!(enabled(&all, &context));
        }
        assert!(!enabled(&all, &Context::new().session_id("s")));
    }

    #[test]
    fn gradual_rollout_is_sticky() {
        let def = strategy("gradualRolloutSessionId", &[("percentage", "50")]);
        for i in 0..100 {
            let context = Context::new().session_id(format!("session-{i}"));
            let first = enabled(&def, &context);
            for _ in 0..10 {
                assert_eq!(enabled(&def, &context), first);
            }
        }
    }

    #[test]
    fn gradual_rollout_random_bounds() {
        assert!(!enabled(
            &strategy("gradualRolloutRandom", &[("percentage", "0")]),
            &Context::new()
        ));
        assert!(enabled(
            &strategy("gradualRolloutRandom", &[("percentage", "100")]),
            &Context::new()
        ));
    }

    #[test]
    fn unparseable_percentage_is_off() {
        let def = strategy("gradualRolloutUserId", &[("percentage", "half")]);
        assert!(!enabled(&def, &Context::new().user_id("1")));
    }

    #[test]
    fn flexible_rollout_group_id_decorrelates() {
        let a = strategy("flexibleRollout", &[("rollout", "50"), ("groupId", "a")]);
        let b = strategy("flexibleRollout", &[("rollout", "50"), ("groupId", "b")]);
        let same_group = strategy("flexibleRollout", &[("rollout", "50"), ("groupId", "a")]);

        let mut differing = 0;
        for i in 0..500 {
            let context = Context::new().user_id(i.to_string());
            assert_eq!(enabled(&a, &context), enabled(&same_group, &context));
            if enabled(&a, &context) != enabled(&b, &context) {
                differing += 1;
            }
        }
        assert!(differing > 100, "only {differing} differing verdicts");
    }

    #[test]
    fn flexible_rollout_custom_stickiness() {
        let def = strategy(
            "flexibleRollout",
            &[("rollout", "100"), ("stickiness", "tenant")],
        );
        assert!(enabled(&def, &Context::new().property("tenant", "acme")));
        assert!(!enabled(&def, &Context::new().user_id("1")));

        let def = strategy("flexibleRollout", &[("rollout", "100")]);
        assert!(enabled(&def, &Context::new()));
    }

    #[test]
    fn remote_address() {
        let def = strategy(
            "remoteAddress",
            &[("IPs", "10.0.0.0/8, 192.168.1.7, not-an-ip, 2001:db8::/32")],
        );
        assert!(enabled(&def, &Context::new().remote_address("10.20.30.40")));
        assert!(enabled(&def, &Context::new().remote_address("192.168.1.7")));
        assert!(!enabled(&def, &Context::new().remote_address("192.168.1.8")));
        assert!(enabled(&def, &Context::new().remote_address("2001:db8::1")));
        assert!(!enabled(&def, &Context::new().remote_address("garbage")));
        assert!(!enabled(&def, &Context::new()));
    }

    #[test]
    fn application_hour() {
        let def = strategy("applicationHour", &[("start", "9"), ("end", "17")]);
        assert!(enabled(
            &def,
            &Context::new().current_time("2024-01-01T09:00:00Z")
        ));
        assert!(enabled(
            &def,
            &Context::new().current_time("2024-01-01T17:59:00Z")
        ));
        assert!(!enabled(
            &def,
            &Context::new().current_time("2024-01-01T18:00:00Z")
        ));

        let overnight = strategy("applicationHour", &[("start", "22"), ("end", "2")]);
        assert!(enabled(
            &overnight,
            &Context::new().current_time("2024-01-01T23:30:00Z")
        ));
        assert!(enabled(
            &overnight,
            &Context::new().current_time("2024-01-01T01:30:00Z")
        ));
        assert!(!enabled(
            &overnight,
            &Context::new().current_time("2024-01-01T12:00:00Z")
        ));
    }

    #[test]
    fn constraints_are_anded() {
        let mut def = strategy("default", &[]);
        def.constraints = vec![
            ConstraintDefinition {
                context_name: "userId".to_owned(),
                operator: Operator::In,
                values: vec!["1".to_owned()],
                value: None,
                case_insensitive: false,
                inverted: false,
            },
            ConstraintDefinition {
                context_name: "appName".to_owned(),
                operator: Operator::In,
                values: vec!["web".to_owned()],
                value: None,
                case_insensitive: false,
                inverted: false,
            },
        ];
        assert!(enabled(&def, &Context::new().user_id("1").app_name("web")));
        assert!(!enabled(&def, &Context::new().user_id("1").app_name("ios")));
        assert!(!enabled(&def, &Context::new().user_id("1")));
    }

    #[test]
    fn segments_add_constraints() {
        let segments = HashMap::from([(
            7,
            vec![ConstraintDefinition {
                context_name: "region".to_owned(),
                operator: Operator::In,
                values: vec!["eu".to_owned()],
                value: None,
                case_insensitive: false,
                inverted: false,
            }],
        )]);
        let mut def = strategy("default", &[]);
        def.segments = vec![7];
        let strategy_with_segment = Strategy::compile("t", &def, &segments).unwrap();

        let defaults = StaticContext::default();
        let eu = Context::new().property("region", "eu");
        let us = Context::new().property("region", "us");
        assert!(strategy_with_segment.is_enabled(&Subject::new(&eu, &defaults, Utc::now())));
        assert!(!strategy_with_segment.is_enabled(&Subject::new(&us, &defaults, Utc::now())));

        def.segments = vec![8];
        let missing = Strategy::compile("t", &def, &segments).unwrap();
        assert!(!missing.is_enabled(&Subject::new(&eu, &defaults, Utc::now())));
    }

    #[test]
    fn strategies_are_ored() {
        let strategies = [
            Strategy::compile(
                "t",
                &strategy("userWithId", &[("userIds", "1")]),
                &HashMap::new(),
            )
            .unwrap(),
            Strategy::compile(
                "t",
                &strategy("userWithId", &[("userIds", "2")]),
                &HashMap::new(),
            )
            .unwrap(),
        ];
        let defaults = StaticContext::default();
        let check = |user: &str| {
            let context = Context::new().user_id(user);
            matches!(
                evaluate_strategies(&strategies, &Subject::new(&context, &defaults, Utc::now())),
                Verdict::Enabled { strategy: Some(_) }
            )
        };
        assert!(check("1"));
        assert!(check("2"));
        assert!(!check("3"));

        let context = Context::new();
        assert!(matches!(
            evaluate_strategies(&[], &Subject::new(&context, &defaults, Utc::now())),
            Verdict::Enabled { strategy: None }
        ));
    }

    #[test]
    fn strategy_variants_use_the_strategy_stickiness() {
        let def: StrategyDefinition = serde_json::from_value(serde_json::json!({
            "name": "flexibleRollout",
            "parameters": {"rollout": "100", "stickiness": "tenant", "groupId": "layout"},
            "variants": [
                {"name": "a", "weight": 500, "stickiness": "default"},
                {"name": "b", "weight": 500, "stickiness": "default"}
            ]
        }))
        .unwrap();
        let strategy = Strategy::compile("toggle", &def, &HashMap::new()).unwrap();
        let variants = strategy.variants().unwrap();
        let defaults = StaticContext::default();

        for tenant in ["acme", "globex", "initech", "umbrella"] {
            let expected = if VARIANTS.bucket("layout", tenant, 1000) < 500 {
                "a"
            } else {
                "b"
            };
            for user in 0..20 {
                let context = Context::new()
                    .user_id(user.to_string())
                    .property("tenant", tenant);
                let subject = Subject::new(&context, &defaults, Utc::now());
                assert_eq!(variants.select(&subject).name, expected, "tenant {tenant}");
            }
        }
    }
}
