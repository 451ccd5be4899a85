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

//! Closed set of resources the operator writes status for.

use crate::types::v1::pod_monitoring::{ClusterPodMonitoring, PodMonitoring};
use crate::types::v1::rules::{ClusterRules, GlobalRules, Rules};
use crate::types::v1::status::MonitoringStatus;
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use strum::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Kind {
    PodMonitoring,
    ClusterPodMonitoring,
    Rules,
    ClusterRules,
    GlobalRules,
}

impl Kind {
    pub fn is_namespaced(self) -> bool {
        matches!(self, Kind::PodMonitoring | Kind::Rules)
    }
}

/// Identity of a monitored resource: kind plus namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: Kind,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[derive(Clone, Debug)]
pub enum MonitoredResource {
    PodMonitoring(Arc<PodMonitoring>),
    ClusterPodMonitoring(Arc<ClusterPodMonitoring>),
    Rules(Arc<Rules>),
    ClusterRules(Arc<ClusterRules>),
    GlobalRules(Arc<GlobalRules>),
}

macro_rules! with_resource {
    ($self:expr, $r:ident => $body:expr) => {
        match $self {
            MonitoredResource::PodMonitoring($r) => $body,
            MonitoredResource::ClusterPodMonitoring($r) => $body,
            MonitoredResource::Rules($r) => $body,
            MonitoredResource::ClusterRules($r) => $body,
            MonitoredResource::GlobalRules($r) => $body,
        }
    };
}

impl MonitoredResource {
    pub fn kind(&self) -> Kind {
        match self {
            MonitoredResource::PodMonitoring(_) => Kind::PodMonitoring,
            MonitoredResource::ClusterPodMonitoring(_) => Kind::ClusterPodMonitoring,
            MonitoredResource::Rules(_) => Kind::Rules,
            MonitoredResource::ClusterRules(_) => Kind::ClusterRules,
            MonitoredResource::GlobalRules(_) => Kind::GlobalRules,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind(),
            namespace: with_resource!(self, r => r.namespace()),
            name: with_resource!(self, r => r.name_any()),
        }
    }

    pub fn generation(&self) -> Option<i64> {
        with_resource!(self, r => r.metadata.generation)
    }

    pub fn status(&self) -> Option<&MonitoringStatus> {
        with_resource!(self, r => r.status.as_ref())
    }
}

impl From<PodMonitoring> for MonitoredResource {
    fn from(value: PodMonitoring) -> Self {
        MonitoredResource::PodMonitoring(Arc::new(value))
    }
}

impl From<ClusterPodMonitoring> for MonitoredResource {
    fn from(value: ClusterPodMonitoring) -> Self {
        MonitoredResource::ClusterPodMonitoring(Arc::new(value))
    }
}

impl From<Rules> for MonitoredResource {
    fn from(value: Rules) -> Self {
        MonitoredResource::Rules(Arc::new(value))
    }
}

impl From<ClusterRules> for MonitoredResource {
    fn from(value: ClusterRules) -> Self {
        MonitoredResource::ClusterRules(Arc::new(value))
    }
}

impl From<GlobalRules> for MonitoredResource {
    fn from(value: GlobalRules) -> Self {
        MonitoredResource::GlobalRules(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let rules = crate::tests::rules("n", "rules", vec![]);
        let res = MonitoredResource::from(rules);
        assert_eq!(res.key().to_string(), "Rules/n/rules");

        let global = crate::tests::global_rules("global-rules", vec![]);
        let res = MonitoredResource::from(global);
        assert_eq!(res.key().to_string(), "GlobalRules/global-rules");
        assert!(!res.kind().is_namespaced());
    }
}
