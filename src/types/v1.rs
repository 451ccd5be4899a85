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

//! `monitoring.googleapis.com/v1` resources.

pub mod duration;
pub mod operator_config;
pub mod pod_monitoring;
pub mod rules;
pub mod secret;
pub mod status;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub const GROUP: &str = "monitoring.googleapis.com";

/// Name of the singleton OperatorConfig inside the public namespace.
pub const NAME_OPERATOR_CONFIG: &str = "config";

/// All CRDs served by the operator, in a stable order.
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        operator_config::OperatorConfig::crd(),
        pod_monitoring::PodMonitoring::crd(),
        pod_monitoring::ClusterPodMonitoring::crd(),
        rules::Rules::crd(),
        rules::ClusterRules::crd(),
        rules::GlobalRules::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crds() {
        let crds = crds();
        let names: Vec<_> = crds
            .iter()
            .map(|crd| crd.metadata.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec![
                "operatorconfigs.monitoring.googleapis.com",
                "podmonitorings.monitoring.googleapis.com",
                "clusterpodmonitorings.monitoring.googleapis.com",
                "rules.monitoring.googleapis.com",
                "clusterrules.monitoring.googleapis.com",
                "globalrules.monitoring.googleapis.com",
            ]
        );
        for crd in &crds {
            assert_eq!(crd.spec.group, GROUP);
        }

        let scopes: Vec<_> = crds.iter().map(|crd| crd.spec.scope.as_str()).collect();
        assert_eq!(
            scopes,
            vec!["Namespaced", "Namespaced", "Cluster", "Namespaced", "Cluster", "Cluster"]
        );
    }
}
