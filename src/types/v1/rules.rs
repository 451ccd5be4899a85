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

use crate::types::error::{DuplicateGroupSnafu, Error, InvalidRuleSnafu};
use crate::types::v1::duration::parse_duration;
use crate::types::v1::status::MonitoringStatus;
use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Rules evaluated against the data of the resource's namespace only.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[kube(
    group = "monitoring.googleapis.com",
    version = "v1",
    kind = "Rules",
    namespaced,
    status = "MonitoringStatus",
    plural = "rules",
    singular = "rules",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct RulesSpec {
    pub groups: Vec<RuleGroup>,
}

/// Rules evaluated against the data of the whole cluster.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[kube(
    group = "monitoring.googleapis.com",
    version = "v1",
    kind = "ClusterRules",
    status = "MonitoringStatus",
    plural = "clusterrules",
    singular = "clusterrules",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRulesSpec {
    pub groups: Vec<RuleGroup>,
}

/// Rules evaluated against all data the evaluator can query, unscoped.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[kube(
    group = "monitoring.googleapis.com",
    version = "v1",
    kind = "GlobalRules",
    status = "MonitoringStatus",
    plural = "globalrules",
    singular = "globalrules",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRulesSpec {
    pub groups: Vec<RuleGroup>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    pub rules: Vec<RuleDefinition>,
}

/// A recording or alerting rule. Field order matches the rule file format.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,

    pub expr: String,

    #[serde(default, rename = "for", skip_serializing_if = "Option::is_none")]
    pub for_: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Structural checks on rule groups; expressions are checked when scoped.
pub fn validate_groups(groups: &[RuleGroup]) -> Result<(), Error> {
    let mut names = BTreeSet::new();
    for group in groups {
        if !names.insert(group.name.as_str()) {
            return DuplicateGroupSnafu {
                name: group.name.clone(),
            }
            .fail();
        }
        if let Some(interval) = group.interval.as_deref() {
            parse_duration(interval)?;
        }
        for (index, rule) in group.rules.iter().enumerate() {
            let fail = |message: &str| {
                InvalidRuleSnafu {
                    group: group.name.clone(),
                    index,
                    message,
                }
                .fail()
            };
            match (&rule.record, &rule.alert) {
                (Some(_), Some(_)) => return fail("only one of record and alert may be set"),
                (None, None) => return fail("one of record or alert must be set"),
                (Some(record), None) => {
                    if !is_metric_name(record) {
                        return fail("record is not a valid metric name");
                    }
                    if rule.for_.is_some() || !rule.annotations.is_empty() {
                        return fail("recording rules cannot set for or annotations");
                    }
                }
                (None, Some(alert)) => {
                    if alert.is_empty() {
                        return fail("alert name must not be empty");
                    }
                }
            }
            if let Some(for_) = rule.for_.as_deref() {
                parse_duration(for_)?;
            }
        }
    }
    Ok(())
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(record: &str, expr: &str) -> RuleDefinition {
        RuleDefinition {
            record: Some(record.into()),
            expr: expr.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_groups() {
        let groups = vec![RuleGroup {
            name: "group-1".into(),
            interval: Some("30s".into()),
            rules: vec![recording("job:up:sum", "sum(up)")],
        }];
        assert!(validate_groups(&groups).is_ok());
    }

    #[test]
    fn test_duplicate_group_names() {
        let group = RuleGroup {
            name: "dup".into(),
            interval: None,
            rules: vec![],
        };
        assert!(validate_groups(&[group.clone(), group]).is_err());
    }

    #[test]
    fn test_rule_kind_must_be_exclusive() {
        let mut rule = recording("a", "up");
        rule.alert = Some("A".into());
        let groups = vec![RuleGroup {
            name: "g".into(),
            interval: None,
            rules: vec![rule],
        }];
        assert!(validate_groups(&groups).is_err());
    }

    #[test]
    fn test_recording_rule_rejects_annotations() {
        let mut rule = recording("a", "up");
        rule.annotations.insert("summary".into(), "x".into());
        let groups = vec![RuleGroup {
            name: "g".into(),
            interval: None,
            rules: vec![rule],
        }];
        assert!(validate_groups(&groups).is_err());
    }

    #[test]
    fn test_rules_object_from_json() {
        let object = serde_json::json!({
            "apiVersion": "monitoring.googleapis.com/v1",
            "kind": "Rules",
            "metadata": {"name": "example", "namespace": "ns"},
            "spec": {"groups": [{
                "name": "g",
                "interval": "1m",
                "rules": [
                    {"record": "job:up:sum", "expr": "sum by (job) (up)"},
                    {"alert": "Down", "expr": "up == 0", "for": "5m",
                     "labels": {"severity": "page"}},
                ],
            }]},
        });
        let rules: Rules = serde_json::from_value(object.clone()).unwrap();
        let group = &rules.spec.groups[0];
        assert_eq!(group.rules[0].record.as_deref(), Some("job:up:sum"));
        assert_eq!(group.rules[1].for_.as_deref(), Some("5m"));
        assert_eq!(group.rules[1].labels["severity"], "page");
        assert!(validate_groups(&rules.spec.groups).is_ok());
        assert_eq!(serde_json::to_value(&rules).unwrap(), object);
    }
}
