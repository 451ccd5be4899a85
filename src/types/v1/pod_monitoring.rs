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

use crate::types::error::{Error, InvalidEndpointSnafu, InvalidSelectorSnafu};
use crate::types::v1::duration::parse_duration;
use crate::types::v1::secret::{Authorization, SecretKeySelector, TlsConfig};
use crate::types::v1::status::MonitoringStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const DEFAULT_INTERVAL: &str = "1m";

/// Scrapes pods matching a selector inside the resource's own namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[kube(
    group = "monitoring.googleapis.com",
    version = "v1",
    kind = "PodMonitoring",
    namespaced,
    status = "MonitoringStatus",
    shortname = "pm",
    plural = "podmonitorings",
    singular = "podmonitoring",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct PodMonitoringSpec {
    pub selector: metav1::LabelSelector,

    #[x_kube(validation = Rule::new("self.size() > 0").message("endpoints must be configured"))]
    pub endpoints: Vec<ScrapeEndpoint>,
}

/// Scrapes pods matching a selector across all namespaces.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[kube(
    group = "monitoring.googleapis.com",
    version = "v1",
    kind = "ClusterPodMonitoring",
    status = "MonitoringStatus",
    shortname = "cpm",
    plural = "clusterpodmonitorings",
    singular = "clusterpodmonitoring",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPodMonitoringSpec {
    pub selector: metav1::LabelSelector,

    #[x_kube(validation = Rule::new("self.size() > 0").message("endpoints must be configured"))]
    pub endpoints: Vec<ScrapeEndpoint>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeEndpoint {
    /// Container port name or number.
    pub port: IntOrString,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// HTTP path, defaults to `/metrics`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Scrape interval, defaults to `1m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Scrape timeout, defaults to the interval and must not exceed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl ScrapeEndpoint {
    pub fn interval(&self) -> &str {
        self.interval.as_deref().unwrap_or(DEFAULT_INTERVAL)
    }

    pub fn timeout(&self) -> &str {
        self.timeout.as_deref().unwrap_or_else(|| self.interval())
    }

    /// Port as it appears in job names and relabeling rules.
    pub fn port_value(&self) -> String {
        match &self.port {
            IntOrString::Int(i) => i.to_string(),
            IntOrString::String(s) => s.clone(),
        }
    }

    pub fn secret_refs(&self) -> impl Iterator<Item = &SecretKeySelector> {
        self.authorization
            .iter()
            .filter_map(|a| a.credentials.as_ref())
            .chain(self.tls.iter().flat_map(TlsConfig::secret_refs))
    }
}

/// Checks the fields the API server schema cannot express.
pub fn validate_endpoints(endpoints: &[ScrapeEndpoint]) -> Result<(), Error> {
    let mut ports = BTreeSet::new();
    for (index, ep) in endpoints.iter().enumerate() {
        let fail = |message: String| InvalidEndpointSnafu { index, message }.fail();

        match &ep.port {
            IntOrString::Int(i) if *i <= 0 || *i > 65535 => {
                return fail(format!("port {i} out of range"));
            }
            IntOrString::String(s) if s.is_empty() => return fail("empty port name".into()),
            _ => {}
        }
        // Job names are derived from the port.
        if !ports.insert(ep.port_value()) {
            return fail(format!("duplicate port '{}'", ep.port_value()));
        }
        if let Some(scheme) = ep.scheme.as_deref()
            && scheme != "http"
            && scheme != "https"
        {
            return fail(format!("unsupported scheme '{scheme}'"));
        }

        let interval = parse_duration(ep.interval())
            .map_err(|e| InvalidEndpointSnafu { index, message: e.to_string() }.build())?;
        let timeout = parse_duration(ep.timeout())
            .map_err(|e| InvalidEndpointSnafu { index, message: e.to_string() }.build())?;
        if timeout > interval {
            return fail(format!(
                "timeout {} exceeds interval {}",
                ep.timeout(),
                ep.interval()
            ));
        }
    }
    Ok(())
}

/// Rejects selector requirements the relabeling translation cannot express.
pub fn validate_selector(selector: &metav1::LabelSelector) -> Result<(), Error> {
    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default();
        match expr.operator.as_str() {
            "In" | "NotIn" if values.is_empty() => {
                return InvalidSelectorSnafu {
                    message: format!("operator {} on '{}' needs values", expr.operator, expr.key),
                }
                .fail();
            }
            "In" | "NotIn" | "Exists" | "DoesNotExist" => {}
            other => {
                return InvalidSelectorSnafu {
                    message: format!("unknown operator '{other}'"),
                }
                .fail();
            }
        }
    }
    Ok(())
}
