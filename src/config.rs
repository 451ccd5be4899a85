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

//! Serializable shape of the configuration files read by the collector and the
//! rule-evaluator. Only the fields the operator emits are modelled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PromConfig {
    #[serde(default, skip_serializing_if = "GlobalConfig::is_empty")]
    pub global: GlobalConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_cloud: Option<GoogleCloudConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerting: Option<AlertingConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_files: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scrape_configs: Vec<ScrapeConfig>,
}

impl PromConfig {
    pub fn to_yaml(&self) -> Result<String, serde_yaml_ng::Error> {
        serde_yaml_ng::to_string(self)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_labels: BTreeMap<String, String>,
}

impl GlobalConfig {
    pub fn is_empty(&self) -> bool {
        self.external_labels.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GoogleCloudConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExportConfig {
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub match_: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ScrapeConfig {
    pub job_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationFiles>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsFiles>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_sd_configs: Vec<KubernetesSdConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relabel_configs: Vec<RelabelConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizationFiles {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsFiles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    #[serde(default)]
    pub insecure_skip_verify: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KubernetesSdConfig {
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceDiscovery>,
}

impl KubernetesSdConfig {
    pub fn new(role: &str, namespaces: Option<Vec<String>>) -> Self {
        Self {
            role: role.to_owned(),
            namespaces: namespaces.map(|names| NamespaceDiscovery { names }),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NamespaceDiscovery {
    pub names: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RelabelConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl RelabelConfig {
    pub fn keep(source_labels: &[&str], regex: impl Into<String>) -> Self {
        Self::with_action("keep", source_labels, regex)
    }

    pub fn drop(source_labels: &[&str], regex: impl Into<String>) -> Self {
        Self::with_action("drop", source_labels, regex)
    }

    pub fn label_drop(regex: impl Into<String>) -> Self {
        Self {
            regex: Some(regex.into()),
            action: Some("labeldrop".into()),
            ..Default::default()
        }
    }

    /// Copies the source labels into `target_label`.
    pub fn copy(source_labels: &[&str], target_label: &str) -> Self {
        Self {
            source_labels: labels(source_labels),
            target_label: Some(target_label.into()),
            action: Some("replace".into()),
            ..Default::default()
        }
    }

    /// Sets `target_label` to a fixed value.
    pub fn set(target_label: &str, replacement: impl Into<String>) -> Self {
        Self {
            target_label: Some(target_label.into()),
            replacement: Some(replacement.into()),
            action: Some("replace".into()),
            ..Default::default()
        }
    }

    fn with_action(action: &str, source_labels: &[&str], regex: impl Into<String>) -> Self {
        Self {
            source_labels: labels(source_labels),
            regex: Some(regex.into()),
            action: Some(action.into()),
            ..Default::default()
        }
    }
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AlertingConfig {
    #[serde(default)]
    pub alertmanagers: Vec<AlertmanagerConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AlertmanagerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationFiles>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsFiles>,

    pub scheme: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    pub timeout: String,

    pub api_version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relabel_configs: Vec<RelabelConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_sd_configs: Vec<KubernetesSdConfig>,
}

/// A rule file as loaded by the rule-evaluator.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RuleFile {
    pub groups: Vec<RuleFileGroup>,
}

impl RuleFile {
    pub fn to_yaml(&self) -> Result<String, serde_yaml_ng::Error> {
        serde_yaml_ng::to_string(self)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RuleFileGroup {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    pub rules: Vec<crate::types::v1::rules::RuleDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sections_are_omitted() {
        let cfg = PromConfig {
            rule_files: vec!["/etc/rules/*.yaml".into()],
            ..Default::default()
        };
        let yaml = cfg.to_yaml().unwrap();
        assert!(yaml.starts_with("rule_files:\n"), "{yaml}");
        assert!(!yaml.contains("global"));
        assert!(!yaml.contains("scrape_configs"));
    }

    #[test]
    fn test_relabel_helpers() {
        let keep = RelabelConfig::keep(&["__meta_kubernetes_endpoints_name"], "test-am");
        let yaml = serde_yaml_ng::to_string(&keep).unwrap();
        assert_eq!(
            yaml,
            "source_labels:\n- __meta_kubernetes_endpoints_name\nregex: test-am\naction: keep\n"
        );
    }
}
