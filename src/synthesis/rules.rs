// Copyright 2025 The gmp-operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The generated rule-file bundle.

use crate::config::{RuleFile, RuleFileGroup};
use crate::promql::scope_expression;
use crate::synthesis::{
    Environment, Error, ExpressionSnafu, MissingScopeSnafu, Outcome, SerializeSnafu, Snapshot,
    ValidationSnafu,
};
use crate::types::resource::{Kind, ResourceKey};
use crate::types::v1::rules::{RuleGroup, validate_groups};
use kube::ResourceExt;
use snafu::{ResultExt, ensure};
use std::collections::{BTreeMap, BTreeSet};

pub const CONFIG_MAP_NAME: &str = "rules-generated";
pub const RULES_DIR: &str = "/etc/rules";

/// Status reason for objects whose labels were replaced by scope labels.
pub const REASON_SCOPE_OVERRIDDEN: &str = "ScopeLabelOverridden";

pub fn rule_files_glob() -> String {
    format!("{RULES_DIR}/*.yaml")
}

/// Bundle key of a rules object, e.g. `rules__<namespace>__<name>.yaml`.
pub fn bundle_key(key: &ResourceKey) -> String {
    let kind = key.kind.to_string().to_lowercase();
    match &key.namespace {
        Some(ns) => format!("{kind}__{ns}__{}.yaml", key.name),
        None => format!("{kind}__{}.yaml", key.name),
    }
}

/// Labels every rule of an object of `kind` is pinned to.
pub fn scope_labels(
    kind: Kind,
    env: &Environment,
    namespace: Option<&str>,
) -> Result<BTreeMap<String, String>, Error> {
    let mut labels = BTreeMap::new();
    if kind == Kind::GlobalRules {
        return Ok(labels);
    }
    for (label, value) in [
        ("project_id", env.project_id.as_str()),
        ("location", env.location.as_str()),
        ("cluster", env.cluster.as_str()),
    ] {
        ensure!(!value.is_empty(), MissingScopeSnafu { label });
        labels.insert(label.to_owned(), value.to_owned());
    }
    if kind == Kind::Rules {
        let namespace = namespace.unwrap_or_default();
        ensure!(
            !namespace.is_empty(),
            MissingScopeSnafu { label: "namespace" }
        );
        labels.insert("namespace".to_owned(), namespace.to_owned());
    }
    Ok(labels)
}

/// Rule groups with every expression and label set pinned to `labels`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopedGroups {
    pub file: RuleFile,
    /// Scope labels that replaced user-provided matchers or labels.
    pub overridden: BTreeSet<String>,
}

pub fn scope_groups(
    groups: &[RuleGroup],
    labels: &BTreeMap<String, String>,
) -> Result<ScopedGroups, Error> {
    validate_groups(groups).context(ValidationSnafu)?;

    let mut overridden = BTreeSet::new();
    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let mut rules = Vec::with_capacity(group.rules.len());
        for (index, rule) in group.rules.iter().enumerate() {
            let scoped = scope_expression(&rule.expr, labels).context(ExpressionSnafu {
                group: &group.name,
                index,
            })?;
            overridden.extend(scoped.overridden);

            let mut rule = rule.clone();
            rule.expr = scoped.expr;
            for (name, value) in labels {
                if let Some(previous) = rule.labels.insert(name.clone(), value.clone())
                    && previous != *value
                {
                    overridden.insert(name.clone());
                }
            }
            rules.push(rule);
        }
        out.push(RuleFileGroup {
            name: group.name.clone(),
            interval: group.interval.clone(),
            rules,
        });
    }

    Ok(ScopedGroups {
        file: RuleFile { groups: out },
        overridden,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct RulesBundle {
    /// Bundle key to rule file content.
    pub files: BTreeMap<String, String>,
    pub outcomes: BTreeMap<ResourceKey, Outcome>,
}

/// Builds the bundle from every rules object in the snapshot. An object with
/// any invalid rule contributes nothing and is reported as failed.
pub fn synthesize(env: &Environment, snapshot: &Snapshot) -> RulesBundle {
    let sources = snapshot
        .rules
        .iter()
        .map(|r| (Kind::Rules, r.namespace(), r.name_any(), &r.spec.groups))
        .chain(
            snapshot
                .cluster_rules
                .iter()
                .map(|r| (Kind::ClusterRules, None, r.name_any(), &r.spec.groups)),
        )
        .chain(
            snapshot
                .global_rules
                .iter()
                .map(|r| (Kind::GlobalRules, None, r.name_any(), &r.spec.groups)),
        );

    let mut bundle = RulesBundle {
        files: BTreeMap::new(),
        outcomes: BTreeMap::new(),
    };
    for (kind, namespace, name, groups) in sources {
        let key = ResourceKey {
            kind,
            namespace,
            name,
        };
        let result = scope_labels(kind, env, key.namespace.as_deref())
            .and_then(|labels| scope_groups(groups, &labels))
            .and_then(|scoped| {
                let content = scoped.file.to_yaml().context(SerializeSnafu {
                    what: bundle_key(&key),
                })?;
                Ok((content, scoped.overridden))
            });

        let outcome = match result {
            Ok((content, overridden)) => {
                bundle.files.insert(bundle_key(&key), content);
                if overridden.is_empty() {
                    Outcome::Success
                } else {
                    tracing::warn!(resource = %key, labels = ?overridden, "scope labels overrode user input");
                    Outcome::Adjusted {
                        reason: REASON_SCOPE_OVERRIDDEN.to_owned(),
                        message: format!(
                            "user-provided values for {} were replaced by scope labels",
                            overridden.into_iter().collect::<Vec<_>>().join(", ")
                        ),
                    }
                }
            }
            Err(e) => Outcome::failure(&e),
        };
        bundle.outcomes.insert(key, outcome);
    }
    bundle
}
