//! Toggle-to-toggle dependencies.
//!
//! The dependency graph is checked once per snapshot: toggles that can reach a cycle or a missing
//! parent are flagged at load time and always evaluate to disabled. Evaluation therefore only
//! ever walks acyclic chains.
use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::{
    context::{StaticContext, Subject},
    snapshot::{Dependency, Snapshot, Toggle},
    strategy::{evaluate_strategies, Strategy, Verdict},
    variants::{resolve_variant, VariantResult, VariantSet},
    Context,
};

/// Verdict of one toggle together with the variants that apply to it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Evaluation<'s> {
    pub enabled: bool,
    /// Variants of the matching strategy if it declares any, otherwise the toggle's own.
    pub variants: Option<&'s VariantSet>,
}

impl<'s> Evaluation<'s> {
    const DISABLED: Evaluation<'static> = Evaluation {
        enabled: false,
        variants: None,
    };

    pub fn variant(&self, subject: &Subject) -> VariantResult {
        resolve_variant(self.variants, subject, self.enabled)
    }
}

impl Snapshot {
    /// Kill switch, then dependencies, then strategies.
    ///
    /// Parents are resolved before their children with an explicit stack, and every toggle is
    /// evaluated at most once per call.
    pub(crate) fn evaluate<'s>(&'s self, toggle: &'s Toggle, subject: &Subject) -> Evaluation<'s> {
        if toggle.dependencies.is_empty() {
            return self.evaluate_one(toggle, subject, &HashMap::new());
        }

        let mut resolved: HashMap<&'s str, Evaluation<'s>> = HashMap::new();
        // `true` once the toggle's parents have been pushed.
        let mut stack: Vec<(&'s Toggle, bool)> = vec![(toggle, false)];

        while let Some((current, expanded)) = stack.pop() {
            if resolved.contains_key(current.name.as_str()) {
                continue;
            }
            // Broken toggles never reach their parents, so the walk only follows acyclic edges.
            let leaf = !current.enabled
                || current.broken_dependencies
                || current.dependencies.is_empty();
            if expanded || leaf {
                let evaluation = self.evaluate_one(current, subject, &resolved);
                resolved.insert(current.name.as_str(), evaluation);
                continue;
            }

            stack.push((current, true));
            for dependency in current.dependencies.iter() {
                if let Some(parent) = self.get(&dependency.feature) {
                    if !resolved.contains_key(parent.name.as_str()) {
                        stack.push((parent, false));
                    }
                }
            }
        }

        resolved
            .get(toggle.name.as_str())
            .copied()
            .unwrap_or(Evaluation::DISABLED)
    }

    /// Evaluate one toggle whose parents are already in `resolved`.
    fn evaluate_one<'s>(
        &'s self,
        toggle: &'s Toggle,
        subject: &Subject,
        resolved: &HashMap<&'s str, Evaluation<'s>>,
    ) -> Evaluation<'s> {
        if !toggle.enabled || toggle.broken_dependencies {
            return Evaluation::DISABLED;
        }

        if !toggle
            .dependencies
            .iter()
            .all(|dependency| is_satisfied(dependency, resolved, subject))
        {
            return Evaluation::DISABLED;
        }

        match evaluate_strategies(&toggle.strategies, subject) {
            Verdict::Disabled => Evaluation::DISABLED,
            Verdict::Enabled { strategy } => Evaluation {
                enabled: true,
                variants: strategy
                    .and_then(Strategy::variants)
                    .or(toggle.variants.as_ref()),
            },
        }
    }
}

fn is_satisfied(
    dependency: &Dependency,
    resolved: &HashMap<&str, Evaluation<'_>>,
    subject: &Subject,
) -> bool {
    let Some(evaluation) = resolved.get(dependency.feature.as_str()) else {
        return false;
    };

    if !dependency.enabled {
        return !evaluation.enabled;
    }
    if !evaluation.enabled {
        return false;
    }
    match &dependency.variants {
        Some(required) => required.contains(&evaluation.variant(subject).name),
        None => true,
    }
}

/// Evaluate `toggle_name` against `context`, resolving its dependencies first.
///
/// Unknown toggles, dependency cycles and references to missing toggles all evaluate to `false`.
pub fn resolve_with_dependencies(snapshot: &Snapshot, toggle_name: &str, context: &Context) -> bool {
    let defaults = StaticContext::default();
    let subject = Subject::new(context, &defaults, Utc::now());
    snapshot
        .get(toggle_name)
        .is_some_and(|toggle| snapshot.evaluate(toggle, &subject).enabled)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Valid,
    Broken,
}

struct Frame<'a> {
    name: &'a str,
    toggle: &'a Toggle,
    next: usize,
    valid: bool,
}

/// Names of toggles whose dependency graph reaches a cycle or an undefined toggle.
///
/// Depth-first with an explicit stack, so arbitrarily long chains cannot exhaust the call stack.
pub(crate) fn find_broken_dependencies(toggles: &HashMap<String, Toggle>) -> HashSet<String> {
    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(toggles.len());
    let mut stack: Vec<Frame> = Vec::new();

    for (root, toggle) in toggles {
        if marks.contains_key(root.as_str()) {
            continue;
        }
        marks.insert(root.as_str(), Mark::InProgress);
        stack.push(Frame {
            name: root.as_str(),
            toggle,
            next: 0,
            valid: true,
        });

        while let Some(frame) = stack.last_mut() {
            let current = frame.toggle;
            let Some(dependency) = current.dependencies.get(frame.next) else {
                let (name, valid) = (frame.name, frame.valid);
                stack.pop();
                marks.insert(name, if valid { Mark::Valid } else { Mark::Broken });
                if let Some(child) = stack.last_mut() {
                    child.valid &= valid;
                }
                continue;
            };
            frame.next += 1;

            let parent = dependency.feature.as_str();
            match marks.get(parent).copied() {
                Some(Mark::Valid) => {}
                // Reaching a toggle that is still on the stack closes a cycle.
                Some(Mark::InProgress | Mark::Broken) => frame.valid = false,
                None => match toggles.get_key_value(parent) {
                    Some((name, toggle)) => {
                        marks.insert(name.as_str(), Mark::InProgress);
                        stack.push(Frame {
                            name: name.as_str(),
                            toggle,
                            next: 0,
                            valid: true,
                        });
                    }
                    None => {
                        marks.insert(parent, Mark::Broken);
                        frame.valid = false;
                    }
                },
            }
        }
    }

    marks
        .into_iter()
        .filter(|(name, mark)| *mark == Mark::Broken && toggles.contains_key(*name))
        .map(|(name, _)| name.to_owned())
        .collect()
}
