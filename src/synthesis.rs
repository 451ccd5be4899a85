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

//! Pure translation of a resource snapshot into configuration artifacts.

pub mod alertmanager;
pub mod collection;
pub mod rule_evaluator;
pub mod rules;

use crate::promql;
use crate::secrets;
use crate::types;
use crate::types::resource::MonitoredResource;
use crate::types::v1::operator_config::OperatorConfigSpec;
use crate::types::v1::pod_monitoring::{ClusterPodMonitoring, PodMonitoring};
use crate::types::v1::rules::{ClusterRules, GlobalRules, Rules};
use snafu::Snafu;

/// Key of the configuration document inside generated ConfigMaps.
pub const CONFIG_KEY: &str = "config.yaml";

/// Where this operator runs and what it is scoped to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    pub operator_namespace: String,
    pub public_namespace: String,
    pub project_id: String,
    pub location: String,
    pub cluster: String,
}

/// State of every input read at the start of a cycle. Controllers only fill in
/// the kinds they consume.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub config: OperatorConfigSpec,
    pub pod_monitorings: Vec<PodMonitoring>,
    pub cluster_pod_monitorings: Vec<ClusterPodMonitoring>,
    pub rules: Vec<Rules>,
    pub cluster_rules: Vec<ClusterRules>,
    pub global_rules: Vec<GlobalRules>,
}

impl Snapshot {
    /// The resources in the snapshot that carry a status.
    pub fn monitored(&self) -> Vec<MonitoredResource> {
        let mut out: Vec<MonitoredResource> = Vec::new();
        out.extend(self.pod_monitorings.iter().cloned().map(Into::into));
        out.extend(self.cluster_pod_monitorings.iter().cloned().map(Into::into));
        out.extend(self.rules.iter().cloned().map(Into::into));
        out.extend(self.cluster_rules.iter().cloned().map(Into::into));
        out.extend(self.global_rules.iter().cloned().map(Into::into));
        out
    }
}

/// Per-resource result of a synthesis pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Contributed, but part of its input was overridden.
    Adjusted { reason: String, message: String },
    Failure { reason: String, message: String },
}

impl Outcome {
    pub fn failure(err: &Error) -> Self {
        Outcome::Failure {
            reason: err.reason().to_owned(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{}", source))]
    Validation { source: types::error::Error },

    #[snafu(display("group '{}' rule {}: invalid expression: {}", group, index, source))]
    Expression {
        group: String,
        index: usize,
        source: promql::Error,
    },

    #[snafu(display("no value configured for scope label '{}'", label))]
    MissingScope { label: String },

    #[snafu(display("{}", source))]
    Secret { source: secrets::Error },

    #[snafu(display("failed to serialize {}: {}", what, source))]
    Serialize {
        what: String,
        source: serde_yaml_ng::Error,
    },
}

impl Error {
    /// Machine-readable reason for status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "InvalidSpec",
            Error::Expression { .. } => "InvalidExpression",
            Error::MissingScope { .. } => "MissingScope",
            Error::Secret { .. } => "SecretResolutionFailed",
            Error::Serialize { .. } => "SerializationFailed",
        }
    }
}

/// Renders a content digest for log lines.
pub fn digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(data)
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}
