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


//! Fixtures shared by the unit tests.

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::secrets::{SecretData, SecretSource};
use crate::synthesis::Environment;
use crate::types::v1::pod_monitoring::{
    ClusterPodMonitoring, ClusterPodMonitoringSpec, PodMonitoring, PodMonitoringSpec,
    ScrapeEndpoint,
};
use crate::types::v1::rules::{
    ClusterRules, ClusterRulesSpec, GlobalRules, GlobalRulesSpec, RuleDefinition, RuleGroup,
    Rules, RulesSpec,
};

pub fn environment() -> Environment {
    Environment {
        operator_namespace: "gmp-system".to_string(),
        public_namespace: "gmp-public".to_string(),
        project_id: "p".to_string(),
        location: "l".to_string(),
        cluster: "c".to_string(),
    }
}

fn metadata(namespace: Option<&str>, name: &str) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        uid: Some(format!("uid-{name}")),
        generation: Some(1),
        ..Default::default()
    }
}

/// Endpoint on a numeric port when `port` parses as one, else on a named port.
pub fn scrape_endpoint(port: &str) -> ScrapeEndpoint {
    ScrapeEndpoint {
        port: port
            .parse::<i32>()
            .map_or_else(|_| IntOrString::String(port.to_string()), IntOrString::Int),
        scheme: None,
        path: None,
        interval: None,
        timeout: None,
        authorization: None,
        tls: None,
    }
}

pub fn pod_monitoring(namespace: &str, name: &str, endpoints: Vec<ScrapeEndpoint>) -> PodMonitoring {
    PodMonitoring {
        metadata: metadata(Some(namespace), name),
        spec: PodMonitoringSpec {
            selector: Default::default(),
            endpoints,
        },
        status: None,
    }
}

pub fn cluster_pod_monitoring(name: &str, endpoints: Vec<ScrapeEndpoint>) -> ClusterPodMonitoring {
    ClusterPodMonitoring {
        metadata: metadata(None, name),
        spec: ClusterPodMonitoringSpec {
            selector: Default::default(),
            endpoints,
        },
        status: None,
    }
}

pub fn group(name: &str, rules: Vec<RuleDefinition>) -> RuleGroup {
    RuleGroup {
        name: name.to_string(),
        interval: None,
        rules,
    }
}

pub fn rules(namespace: &str, name: &str, groups: Vec<RuleGroup>) -> Rules {
    Rules {
        metadata: metadata(Some(namespace), name),
        spec: RulesSpec { groups },
        status: None,
    }
}

pub fn cluster_rules(name: &str, groups: Vec<RuleGroup>) -> ClusterRules {
    ClusterRules {
        metadata: metadata(None, name),
        spec: ClusterRulesSpec { groups },
        status: None,
    }
}

pub fn global_rules(name: &str, groups: Vec<RuleGroup>) -> GlobalRules {
    GlobalRules {
        metadata: metadata(None, name),
        spec: GlobalRulesSpec { groups },
        status: None,
    }
}

/// In-memory secret source that counts reads.
#[derive(Debug, Default)]
pub struct MemorySecrets {
    secrets: BTreeMap<(String, String), SecretData>,
    reads: AtomicUsize,
}

impl MemorySecrets {
    pub fn with(mut self, namespace: &str, name: &str, entries: &[(&str, &[u8])]) -> Self {
        let data = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect();
        self.secrets
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SecretSource for MemorySecrets {
    type Error = Infallible;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, Infallible> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
