use std::collections::{HashMap, HashSet};
use std::fmt;

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::{Classification, Disposition, ResourceDescriptor, ResourceKind, ResourceStatus};

/// The rule set cannot be evaluated as written. Fatal at startup, before any
/// listing happens.
#[derive(Debug)]
pub struct PolicyMisconfigured {
    pub rule_id: String,
    pub detail: String,
}

impl PolicyMisconfigured {
    fn new(rule_id: &str, detail: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for PolicyMisconfigured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy misconfigured: rule `{}`: {}", self.rule_id, self.detail)
    }
}

impl std::error::Error for PolicyMisconfigured {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    Keep,
    Flag,
    Act,
}

impl From<RuleEffect> for Disposition {
    fn from(effect: RuleEffect) -> Self {
        match effect {
            RuleEffect::Keep => Disposition::Keep,
            RuleEffect::Flag => Disposition::Flag,
            RuleEffect::Act => Disposition::Act,
        }
    }
}

/// Declarative predicate over descriptor fields. Serializable so rule sets
/// can live in the config file, e.g.
/// `when = { type = "age_over_days", days = 30 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches when `created` is known and older than `days`.
    AgeOverDays { days: u64 },
    /// Matches when `last_used` is known and older than `days`.
    IdleOverDays { days: u64 },
    TagEquals { key: String, value: String },
    TagMissing { key: String },
    /// Glob match against a tag value (globset syntax).
    TagMatches { key: String, pattern: String },
    /// Numeric comparison against a tag value; non-numeric values never match.
    TagAtLeast { key: String, min: i64 },
    StatusIs { status: ResourceStatus },
    KindIs { kind: ResourceKind },
    AllOf { all: Vec<Predicate> },
    AnyOf { any: Vec<Predicate> },
    Not { not: Box<Predicate> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub when: Predicate,
    pub then: RuleEffect,
    pub reason: String,
}

impl PolicyRule {
    pub fn new(
        id: impl Into<String>,
        when: Predicate,
        then: RuleEffect,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            when,
            then,
            reason: reason.into(),
        }
    }
}

/// Validated, ready-to-evaluate rule set. Rules are checked and tag globs
/// compiled once at construction; classification itself cannot fail.
#[derive(Debug)]
pub struct PolicyEvaluator {
    rules: Vec<PolicyRule>,
    matchers: HashMap<String, GlobMatcher>,
}

impl PolicyEvaluator {
    pub fn new(rules: Vec<PolicyRule>) -> Result<Self, PolicyMisconfigured> {
        let mut seen = HashSet::new();
        let mut matchers = HashMap::new();

        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(PolicyMisconfigured::new(&rule.id, "rule id must not be empty"));
            }
            if !seen.insert(rule.id.clone()) {
                return Err(PolicyMisconfigured::new(&rule.id, "duplicate rule id"));
            }
            validate_predicate(&rule.id, &rule.when, &mut matchers)?;
        }

        Ok(Self { rules, matchers })
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Evaluate rules in declared order; the first matching rule wins and its
    /// effect becomes the classification (an early `keep` rule is an explicit
    /// exemption). No match defaults to KEEP. `now` is the single reference
    /// instant for the whole pass, so age thresholds are deterministic across
    /// resources within one pass.
    pub fn classify(&self, resource: &ResourceDescriptor, now: OffsetDateTime) -> Classification {
        for rule in &self.rules {
            if self.matches(&rule.when, resource, now) {
                return Classification {
                    disposition: rule.then.into(),
                    reason: rule.reason.clone(),
                    rule_id: Some(rule.id.clone()),
                };
            }
        }
        Classification::keep_default()
    }

    fn matches(
        &self,
        predicate: &Predicate,
        resource: &ResourceDescriptor,
        now: OffsetDateTime,
    ) -> bool {
        match predicate {
            Predicate::AgeOverDays { days } => resource
                .age_days(now)
                .is_some_and(|age| age > *days as f64),
            Predicate::IdleOverDays { days } => resource
                .idle_days(now)
                .is_some_and(|idle| idle > *days as f64),
            Predicate::TagEquals { key, value } => resource.tag(key) == Some(value.as_str()),
            Predicate::TagMissing { key } => resource.tag(key).is_none(),
            Predicate::TagMatches { key, pattern } => {
                let Some(value) = resource.tag(key) else {
                    return false;
                };
                self.matchers
                    .get(pattern)
                    .is_some_and(|matcher| matcher.is_match(value))
            }
            Predicate::TagAtLeast { key, min } => resource
                .tag(key)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .is_some_and(|v| v >= *min),
            Predicate::StatusIs { status } => resource.status == *status,
            Predicate::KindIs { kind } => resource.kind == *kind,
            Predicate::AllOf { all } => all.iter().all(|p| self.matches(p, resource, now)),
            Predicate::AnyOf { any } => any.iter().any(|p| self.matches(p, resource, now)),
            Predicate::Not { not } => !self.matches(not, resource, now),
        }
    }
}

fn validate_predicate(
    rule_id: &str,
    predicate: &Predicate,
    matchers: &mut HashMap<String, GlobMatcher>,
) -> Result<(), PolicyMisconfigured> {
    match predicate {
        Predicate::AgeOverDays { days } | Predicate::IdleOverDays { days } => {
            if *days == 0 {
                return Err(PolicyMisconfigured::new(
                    rule_id,
                    "day threshold must be greater than zero",
                ));
            }
        }
        Predicate::TagMatches { pattern, .. } => {
            if !matchers.contains_key(pattern) {
                let glob = Glob::new(pattern).map_err(|err| {
                    PolicyMisconfigured::new(rule_id, format!("invalid glob `{pattern}`: {err}"))
                })?;
                matchers.insert(pattern.clone(), glob.compile_matcher());
            }
        }
        Predicate::AllOf { all } => {
            if all.is_empty() {
                return Err(PolicyMisconfigured::new(rule_id, "all_of must not be empty"));
            }
            for p in all {
                validate_predicate(rule_id, p, matchers)?;
            }
        }
        Predicate::AnyOf { any } => {
            if any.is_empty() {
                return Err(PolicyMisconfigured::new(rule_id, "any_of must not be empty"));
            }
            for p in any {
                validate_predicate(rule_id, p, matchers)?;
            }
        }
        Predicate::Not { not } => validate_predicate(rule_id, not, matchers)?,
        Predicate::TagEquals { .. }
        | Predicate::TagMissing { .. }
        | Predicate::TagAtLeast { .. }
        | Predicate::StatusIs { .. }
        | Predicate::KindIs { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn volume(id: &str, created: OffsetDateTime, tags: &[(&str, &str)]) -> ResourceDescriptor {
        ResourceDescriptor {
            id: id.to_string(),
            kind: ResourceKind::Volume,
            created: Some(created),
            last_used: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            status: ResourceStatus::Stopped,
            details: String::new(),
        }
    }

    #[test]
    fn no_match_defaults_to_keep() {
        let evaluator = PolicyEvaluator::new(vec![PolicyRule::new(
            "old",
            Predicate::AgeOverDays { days: 30 },
            RuleEffect::Act,
            "older than 30 days",
        )])
        .expect("valid rules");

        let now = datetime!(2026-02-01 00:00:00 UTC);
        let fresh = volume("vol-new", datetime!(2026-01-31 00:00:00 UTC), &[]);
        let classification = evaluator.classify(&fresh, now);
        assert_eq!(classification.disposition, Disposition::Keep);
        assert_eq!(classification.rule_id, None);
    }

    #[test]
    fn forty_five_day_old_volume_without_keep_tag_is_acted() {
        let evaluator = PolicyEvaluator::new(vec![
            PolicyRule::new(
                "keep-tagged",
                Predicate::TagEquals {
                    key: "keep".to_string(),
                    value: "true".to_string(),
                },
                RuleEffect::Keep,
                "explicitly kept",
            ),
            PolicyRule::new(
                "old",
                Predicate::AgeOverDays { days: 30 },
                RuleEffect::Act,
                "older than 30 days",
            ),
        ])
        .expect("valid rules");

        let now = datetime!(2026-02-15 00:00:00 UTC);
        let old = volume("vol-old", datetime!(2026-01-01 00:00:00 UTC), &[]);
        let classification = evaluator.classify(&old, now);
        assert_eq!(classification.disposition, Disposition::Act);
        assert_eq!(classification.rule_id.as_deref(), Some("old"));

        let kept = volume(
            "vol-kept",
            datetime!(2026-01-01 00:00:00 UTC),
            &[("keep", "true")],
        );
        let classification = evaluator.classify(&kept, now);
        assert_eq!(classification.disposition, Disposition::Keep);
        assert_eq!(classification.rule_id.as_deref(), Some("keep-tagged"));
    }

    #[test]
    fn first_matching_rule_wins_in_declared_order() {
        let evaluator = PolicyEvaluator::new(vec![
            PolicyRule::new(
                "flag-first",
                Predicate::StatusIs {
                    status: ResourceStatus::Stopped,
                },
                RuleEffect::Flag,
                "stopped",
            ),
            PolicyRule::new(
                "act-later",
                Predicate::StatusIs {
                    status: ResourceStatus::Stopped,
                },
                RuleEffect::Act,
                "also stopped",
            ),
        ])
        .expect("valid rules");

        let now = datetime!(2026-02-01 00:00:00 UTC);
        let resource = volume("vol-1", datetime!(2026-01-01 00:00:00 UTC), &[]);
        let classification = evaluator.classify(&resource, now);
        assert_eq!(classification.disposition, Disposition::Flag);
        assert_eq!(classification.rule_id.as_deref(), Some("flag-first"));
    }

    #[test]
    fn age_predicate_never_matches_without_created_timestamp() {
        let evaluator = PolicyEvaluator::new(vec![PolicyRule::new(
            "old",
            Predicate::AgeOverDays { days: 1 },
            RuleEffect::Act,
            "old",
        )])
        .expect("valid rules");

        let mut resource = volume("eip-1", datetime!(2026-01-01 00:00:00 UTC), &[]);
        resource.created = None;
        let now = datetime!(2026-02-01 00:00:00 UTC);
        assert_eq!(
            evaluator.classify(&resource, now).disposition,
            Disposition::Keep
        );
    }

    #[test]
    fn tag_glob_and_numeric_predicates() {
        let evaluator = PolicyEvaluator::new(vec![
            PolicyRule::new(
                "keep-release-tags",
                Predicate::TagMatches {
                    key: "image/reference".to_string(),
                    pattern: "*latest*".to_string(),
                },
                RuleEffect::Keep,
                "protected tag",
            ),
            PolicyRule::new(
                "restart-storm",
                Predicate::TagAtLeast {
                    key: "pod/restarts".to_string(),
                    min: 5,
                },
                RuleEffect::Flag,
                "high restart count",
            ),
        ])
        .expect("valid rules");

        let now = datetime!(2026-02-01 00:00:00 UTC);
        let image = volume(
            "img-1",
            datetime!(2026-01-01 00:00:00 UTC),
            &[("image/reference", "registry/app:latest")],
        );
        assert_eq!(evaluator.classify(&image, now).disposition, Disposition::Keep);

        let pod = volume(
            "pod-1",
            datetime!(2026-01-01 00:00:00 UTC),
            &[("pod/restarts", "7")],
        );
        assert_eq!(evaluator.classify(&pod, now).disposition, Disposition::Flag);

        let quiet_pod = volume(
            "pod-2",
            datetime!(2026-01-01 00:00:00 UTC),
            &[("pod/restarts", "not-a-number")],
        );
        assert_eq!(
            evaluator.classify(&quiet_pod, now).disposition,
            Disposition::Keep
        );
    }

    #[test]
    fn combinators_nest() {
        let evaluator = PolicyEvaluator::new(vec![PolicyRule::new(
            "stopped-and-untagged",
            Predicate::AllOf {
                all: vec![
                    Predicate::StatusIs {
                        status: ResourceStatus::Stopped,
                    },
                    Predicate::Not {
                        not: Box::new(Predicate::TagEquals {
                            key: "keep".to_string(),
                            value: "true".to_string(),
                        }),
                    },
                ],
            },
            RuleEffect::Act,
            "stopped and not kept",
        )])
        .expect("valid rules");

        let now = datetime!(2026-02-01 00:00:00 UTC);
        let target = volume("vol-1", datetime!(2026-01-01 00:00:00 UTC), &[]);
        assert_eq!(evaluator.classify(&target, now).disposition, Disposition::Act);

        let kept = volume(
            "vol-2",
            datetime!(2026-01-01 00:00:00 UTC),
            &[("keep", "true")],
        );
        assert_eq!(evaluator.classify(&kept, now).disposition, Disposition::Keep);
    }

    #[test]
    fn invalid_rules_fail_at_construction() {
        let err = PolicyEvaluator::new(vec![PolicyRule::new(
            "bad-glob",
            Predicate::TagMatches {
                key: "name".to_string(),
                pattern: "[".to_string(),
            },
            RuleEffect::Act,
            "bad",
        )])
        .expect_err("glob must be rejected");
        assert_eq!(err.rule_id, "bad-glob");

        let err = PolicyEvaluator::new(vec![PolicyRule::new(
            "empty-any",
            Predicate::AnyOf { any: vec![] },
            RuleEffect::Flag,
            "bad",
        )])
        .expect_err("empty any_of must be rejected");
        assert_eq!(err.rule_id, "empty-any");

        let err = PolicyEvaluator::new(vec![PolicyRule::new(
            "zero-days",
            Predicate::AgeOverDays { days: 0 },
            RuleEffect::Act,
            "bad",
        )])
        .expect_err("zero threshold must be rejected");
        assert_eq!(err.rule_id, "zero-days");

        let dup = PolicyRule::new(
            "dup",
            Predicate::TagMissing {
                key: "keep".to_string(),
            },
            RuleEffect::Flag,
            "dup",
        );
        let err =
            PolicyEvaluator::new(vec![dup.clone(), dup]).expect_err("duplicate ids rejected");
        assert_eq!(err.rule_id, "dup");
    }

    #[test]
    fn rules_deserialize_from_toml() {
        let toml_src = r#"
            id = "stale"
            then = "act"
            reason = "older than 30 days"

            [when]
            type = "all_of"
            all = [
                { type = "status_is", status = "STOPPED" },
                { type = "age_over_days", days = 30 },
            ]
        "#;
        let rule: PolicyRule = toml::from_str(toml_src).expect("parse rule");
        assert_eq!(rule.id, "stale");
        assert_eq!(rule.then, RuleEffect::Act);
        let Predicate::AllOf { all } = &rule.when else {
            panic!("expected all_of");
        };
        assert_eq!(all.len(), 2);
    }
}
