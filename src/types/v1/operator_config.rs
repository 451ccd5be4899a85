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

use crate::types::v1::secret::{Authorization, SecretKeySelector, TlsConfig};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cluster-wide operator settings. Exactly one instance, named `config`, is read
/// from the public namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[kube(
    group = "monitoring.googleapis.com",
    version = "v1",
    kind = "OperatorConfig",
    namespaced,
    shortname = "opcfg",
    plural = "operatorconfigs",
    singular = "operatorconfig",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfigSpec {
    #[serde(default)]
    pub collection: CollectionSpec,

    #[serde(default)]
    pub rules: RuleEvaluatorSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_alertmanager: Option<ManagedAlertmanagerSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSpec {
    /// Labels attached to every exported sample.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub filter: ExportFilters,

    /// Scrape the kubelet and cAdvisor endpoints of every node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet_scraping: Option<KubeletScraping>,

    /// GCP service account key used when exporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretKeySelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportFilters {
    /// Series selectors; a sample is exported when it matches any of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_one_of: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeletScraping {
    pub interval: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluatorSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_labels: BTreeMap<String, String>,

    /// Project rule queries are evaluated against.
    #[serde(default, rename = "queryProjectID", skip_serializing_if = "Option::is_none")]
    pub query_project_id: Option<String>,

    #[serde(default)]
    pub alerting: AlertingSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretKeySelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertingSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alertmanagers: Vec<AlertmanagerEndpoints>,
}

/// Alertmanager instances discovered through the endpoints of a Service.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerEndpoints {
    /// Namespace of the Service.
    pub namespace: String,

    /// Name of the Service.
    pub name: String,

    /// Port name or number of the Service endpoints.
    pub port: IntOrString,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl AlertmanagerEndpoints {
    pub fn secret_refs(&self) -> impl Iterator<Item = &SecretKeySelector> {
        self.tls
            .iter()
            .flat_map(TlsConfig::secret_refs)
            .chain(
                self.authorization
                    .iter()
                    .filter_map(|a| a.credentials.as_ref()),
            )
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedAlertmanagerSpec {
    /// Alertmanager configuration file; defaults to key `alertmanager.yaml` of
    /// the `alertmanager` secret in the public namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret: Option<SecretKeySelector>,
}
