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

//! Scrape configuration for the collector fleet.

use crate::config::{
    AuthorizationFiles, ExportConfig, GlobalConfig, GoogleCloudConfig, KubernetesSdConfig,
    PromConfig, RelabelConfig, ScrapeConfig, TlsFiles,
};
use crate::secrets::{Aggregation, Owner, Scope, SecretRef, SecretRequests};
use crate::synthesis::{Environment, Error, Outcome, SecretSnafu, Snapshot, ValidationSnafu};
use crate::types::resource::{Kind, ResourceKey};
use crate::types::v1::operator_config::{KubeletScraping, OperatorConfigSpec};
use crate::types::v1::pod_monitoring::{ScrapeEndpoint, validate_endpoints, validate_selector};
use crate::types::v1::secret::{Authorization, SecretKeySelector, TlsConfig};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use snafu::ResultExt;
use std::collections::BTreeMap;

pub const CONFIG_MAP_NAME: &str = "collector";
pub const SECRET_NAME: &str = "collection";

/// Field path of the export credentials, blamed when they cannot be resolved.
pub const CREDENTIALS_FIELD: &str = "collection.credentials";

const DEFAULT_METRICS_PATH: &str = "/metrics";
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const POD_LABEL_META: &str = "__meta_kubernetes_pod_label_";
const POD_LABEL_PRESENT_META: &str = "__meta_kubernetes_pod_labelpresent_";

/// A PodMonitoring or ClusterPodMonitoring reduced to what synthesis needs.
struct Target<'a> {
    key: ResourceKey,
    /// Namespace pods are discovered in, `None` for all namespaces.
    namespace: Option<&'a str>,
    selector: &'a metav1::LabelSelector,
    endpoints: &'a [ScrapeEndpoint],
}

impl Target<'_> {
    fn owner(&self) -> Owner {
        Owner::Resource(self.key.clone())
    }

    fn scope(&self) -> Scope<'_> {
        match self.namespace {
            Some(ns) => Scope::Namespace(ns),
            None => Scope::Cluster,
        }
    }

    fn job_name(&self, endpoint: &ScrapeEndpoint) -> String {
        let port = endpoint.port_value();
        match self.namespace {
            Some(ns) => format!("PodMonitoring/{ns}/{}/{port}", self.key.name),
            None => format!("ClusterPodMonitoring/{}/{port}", self.key.name),
        }
    }
}

fn targets(snapshot: &Snapshot) -> Vec<Target<'_>> {
    let namespaced = snapshot.pod_monitorings.iter().filter_map(|pm| {
        let namespace = pm.metadata.namespace.as_deref()?;
        Some(Target {
            key: ResourceKey {
                kind: Kind::PodMonitoring,
                namespace: Some(namespace.to_owned()),
                name: pm.name_any(),
            },
            namespace: Some(namespace),
            selector: &pm.spec.selector,
            endpoints: &pm.spec.endpoints,
        })
    });
    let cluster = snapshot.cluster_pod_monitorings.iter().map(|cpm| Target {
        key: ResourceKey {
            kind: Kind::ClusterPodMonitoring,
            namespace: None,
            name: cpm.name_any(),
        },
        namespace: None,
        selector: &cpm.spec.selector,
        endpoints: &cpm.spec.endpoints,
    });
    let mut all: Vec<_> = namespaced.chain(cluster).collect();
    all.sort_by(|a, b| a.key.cmp(&b.key));
    all
}

/// Secret references of the collection path.
pub fn secret_requests(env: &Environment, snapshot: &Snapshot) -> SecretRequests {
    let mut requests = SecretRequests::default();
    if let Some(credentials) = &snapshot.config.collection.credentials {
        requests.add(
            &Owner::OperatorConfig(CREDENTIALS_FIELD.into()),
            credentials,
            Scope::Namespace(&env.public_namespace),
        );
    }
    for target in targets(snapshot) {
        let owner = target.owner();
        for endpoint in target.endpoints {
            for selector in endpoint.secret_refs() {
                requests.add(&owner, selector, target.scope());
            }
        }
    }
    requests
}

#[derive(Clone, Debug, PartialEq)]
pub struct Collection {
    pub config: PromConfig,
    pub outcomes: BTreeMap<ResourceKey, Outcome>,
}

/// Builds the collector configuration. Resources that fail validation or
/// secret resolution are left out and reported in `outcomes`.
pub fn synthesize(env: &Environment, snapshot: &Snapshot, secrets: &Aggregation) -> Collection {
    let mut scrape_configs = Vec::new();
    let mut outcomes = BTreeMap::new();

    for target in targets(snapshot) {
        match target_configs(&target, secrets) {
            Ok(mut jobs) => {
                scrape_configs.append(&mut jobs);
                outcomes.insert(target.key, Outcome::Success);
            }
            Err(e) => {
                outcomes.insert(target.key, Outcome::failure(&e));
            }
        }
    }

    if let Some(kubelet) = &snapshot.config.collection.kubelet_scraping {
        scrape_configs.extend(kubelet_configs(kubelet));
    }
    scrape_configs.sort_by(|a, b| a.job_name.cmp(&b.job_name));

    let config = PromConfig {
        global: GlobalConfig {
            external_labels: snapshot.config.collection.external_labels.clone(),
        },
        google_cloud: export_config(env, &snapshot.config, secrets),
        scrape_configs,
        ..Default::default()
    };
    Collection { config, outcomes }
}

fn export_config(
    env: &Environment,
    config: &OperatorConfigSpec,
    secrets: &Aggregation,
) -> Option<GoogleCloudConfig> {
    let credentials_file = config
        .collection
        .credentials
        .as_ref()
        .filter(|_| !secrets.failed(&Owner::OperatorConfig(CREDENTIALS_FIELD.into())))
        .and_then(|c| SecretRef::resolve(c, Scope::Namespace(&env.public_namespace)).ok())
        .map(|r| r.file_path());
    let match_ = config.collection.filter.match_one_of.clone();
    if credentials_file.is_none() && match_.is_empty() {
        return None;
    }
    Some(GoogleCloudConfig {
        export: Some(ExportConfig {
            match_,
            credentials_file,
        }),
    })
}

fn target_configs(target: &Target<'_>, secrets: &Aggregation) -> Result<Vec<ScrapeConfig>, Error> {
    validate_selector(target.selector).context(ValidationSnafu)?;
    validate_endpoints(target.endpoints).context(ValidationSnafu)?;
    if let Some(e) = secrets.failures.get(&target.owner()) {
        return Err(Error::Secret { source: e.clone() });
    }

    target
        .endpoints
        .iter()
        .map(|endpoint| -> Result<ScrapeConfig, Error> {
            Ok(ScrapeConfig {
                job_name: target.job_name(endpoint),
                scrape_interval: Some(endpoint.interval().to_owned()),
                scrape_timeout: Some(endpoint.timeout().to_owned()),
                metrics_path: Some(
                    endpoint
                        .path
                        .clone()
                        .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_owned()),
                ),
                scheme: endpoint.scheme.clone(),
                authorization: endpoint
                    .authorization
                    .as_ref()
                    .map(|a| authorization_files(a, target.scope()))
                    .transpose()?,
                tls_config: endpoint
                    .tls
                    .as_ref()
                    .map(|t| tls_files(t, target.scope()))
                    .transpose()?,
                kubernetes_sd_configs: vec![KubernetesSdConfig::new(
                    "pod",
                    target.namespace.map(|ns| vec![ns.to_owned()]),
                )],
                relabel_configs: relabel_configs(target, endpoint),
            })
        })
        .collect()
}

fn secret_file(selector: Option<&SecretKeySelector>, scope: Scope<'_>) -> Result<Option<String>, Error> {
    selector
        .map(|s| SecretRef::resolve(s, scope).map(|r| r.file_path()))
        .transpose()
        .context(SecretSnafu)
}

pub(crate) fn authorization_files(
    auth: &Authorization,
    scope: Scope<'_>,
) -> Result<AuthorizationFiles, Error> {
    Ok(AuthorizationFiles {
        type_: auth.type_.clone(),
        credentials_file: secret_file(auth.credentials.as_ref(), scope)?,
    })
}

pub(crate) fn tls_files(tls: &TlsConfig, scope: Scope<'_>) -> Result<TlsFiles, Error> {
    Ok(TlsFiles {
        ca_file: secret_file(tls.ca.as_ref(), scope)?,
        cert_file: secret_file(tls.cert.as_ref(), scope)?,
        key_file: secret_file(tls.key_secret.as_ref(), scope)?,
        server_name: tls.server_name.clone(),
        insecure_skip_verify: tls.insecure_skip_verify,
    })
}

fn relabel_configs(target: &Target<'_>, endpoint: &ScrapeEndpoint) -> Vec<RelabelConfig> {
    let mut relabel = Vec::new();

    for (key, value) in target.selector.match_labels.iter().flatten() {
        let (label, present) = pod_label_meta(key);
        relabel.push(RelabelConfig::keep(
            &[label.as_str(), present.as_str()],
            format!("{};true", quote_meta(value)),
        ));
    }
    for expr in target.selector.match_expressions.iter().flatten() {
        let (label, present) = pod_label_meta(&expr.key);
        let values = || {
            let alternatives: Vec<String> = expr
                .values
                .iter()
                .flatten()
                .map(|v| quote_meta(v))
                .collect();
            format!("({});true", alternatives.join("|"))
        };
        relabel.push(match expr.operator.as_str() {
            "In" => RelabelConfig::keep(&[label.as_str(), present.as_str()], values()),
            "NotIn" => RelabelConfig::drop(&[label.as_str(), present.as_str()], values()),
            "Exists" => RelabelConfig::keep(&[present.as_str()], "true"),
            // Validation leaves DoesNotExist as the only other operator.
            _ => RelabelConfig::drop(&[present.as_str()], "true"),
        });
    }

    relabel.push(RelabelConfig::drop(
        &["__meta_kubernetes_pod_phase"],
        "(Failed|Succeeded)",
    ));
    relabel.push(match &endpoint.port {
        IntOrString::Int(port) => RelabelConfig::keep(
            &["__meta_kubernetes_pod_container_port_number"],
            port.to_string(),
        ),
        IntOrString::String(name) => {
            RelabelConfig::keep(&["__meta_kubernetes_pod_container_port_name"], quote_meta(name))
        }
    });

    relabel.push(RelabelConfig::copy(
        &["__meta_kubernetes_namespace"],
        "namespace",
    ));
    relabel.push(RelabelConfig::set("job", target.key.name.clone()));
    relabel.push(RelabelConfig::copy(
        &["__meta_kubernetes_pod_container_name"],
        "container",
    ));
    relabel.push(RelabelConfig::copy(&["__meta_kubernetes_pod_name"], "pod"));
    relabel.push(instance_relabel(
        "__meta_kubernetes_pod_node_name",
        &endpoint.port_value(),
    ));
    relabel.push(RelabelConfig::label_drop(
        "__meta_kubernetes_pod_label(present)?_.+",
    ));
    relabel
}

/// `instance` becomes `<node>:<port>`.
fn instance_relabel(node_label: &str, port: &str) -> RelabelConfig {
    RelabelConfig {
        source_labels: vec![node_label.to_owned()],
        regex: Some("(.+)".into()),
        target_label: Some("instance".into()),
        replacement: Some(format!("$1:{port}")),
        action: Some("replace".into()),
        ..Default::default()
    }
}

fn kubelet_configs(kubelet: &KubeletScraping) -> Vec<ScrapeConfig> {
    [("metrics", "/metrics"), ("cadvisor", "/metrics/cadvisor")]
        .into_iter()
        .map(|(port, path)| ScrapeConfig {
            job_name: format!("kubelet/{port}"),
            scrape_interval: Some(kubelet.interval.clone()),
            scrape_timeout: Some(kubelet.interval.clone()),
            metrics_path: Some(path.into()),
            scheme: Some("https".into()),
            authorization: Some(AuthorizationFiles {
                type_: None,
                credentials_file: Some(format!("{SERVICE_ACCOUNT_DIR}/token")),
            }),
            tls_config: Some(TlsFiles {
                ca_file: Some(format!("{SERVICE_ACCOUNT_DIR}/ca.crt")),
                ..Default::default()
            }),
            kubernetes_sd_configs: vec![KubernetesSdConfig::new("node", None)],
            relabel_configs: vec![
                RelabelConfig::set("job", "kubelet"),
                RelabelConfig::copy(&["__meta_kubernetes_node_name"], "node"),
                instance_relabel("__meta_kubernetes_node_name", port),
            ],
        })
        .collect()
}

/// Discovery meta labels for a pod label key.
fn pod_label_meta(key: &str) -> (String, String) {
    let name = sanitize_label_name(key);
    (
        format!("{POD_LABEL_META}{name}"),
        format!("{POD_LABEL_PRESENT_META}{name}"),
    )
}

fn sanitize_label_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Escapes regex metacharacters so `value` matches literally.
pub(crate) fn quote_meta(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{SecretStore, aggregate};
    use crate::tests::{cluster_pod_monitoring, environment, pod_monitoring, scrape_endpoint};

    fn snapshot() -> Snapshot {
        let mut pm = pod_monitoring("ns1", "app", vec![scrape_endpoint("metrics")]);
        pm.spec
            .selector
            .match_labels
            .get_or_insert_default()
            .insert("app.kubernetes.io/name".into(), "web".into());
        pm.spec.selector.match_expressions = Some(vec![metav1::LabelSelectorRequirement {
            key: "tier".into(),
            operator: "In".into(),
            values: Some(vec!["a".into(), "b.c".into()]),
        }]);

        let mut snapshot = Snapshot {
            pod_monitorings: vec![pm],
            cluster_pod_monitorings: vec![cluster_pod_monitoring(
                "all",
                vec![scrape_endpoint("8080")],
            )],
            ..Default::default()
        };
        snapshot.config.collection.external_labels =
            BTreeMap::from([("env".to_owned(), "prod".to_owned())]);
        snapshot
    }

    fn run(snapshot: &Snapshot) -> Collection {
        let env = environment();
        let requests = secret_requests(&env, snapshot);
        let secrets = aggregate(&requests, &SecretStore::default());
        synthesize(&env, snapshot, &secrets)
    }

    #[test]
    fn test_job_per_endpoint() {
        let collection = run(&snapshot());
        let jobs: Vec<_> = collection
            .config
            .scrape_configs
            .iter()
            .map(|c| c.job_name.as_str())
            .collect();
        assert_eq!(
            jobs,
            vec!["ClusterPodMonitoring/all/8080", "PodMonitoring/ns1/app/metrics"]
        );
        assert!(collection.outcomes.values().all(|o| *o == Outcome::Success));

        let job = &collection.config.scrape_configs[1];
        assert_eq!(
            job.kubernetes_sd_configs[0].namespaces.as_ref().unwrap().names,
            vec!["ns1".to_owned()]
        );
        assert_eq!(job.metrics_path.as_deref(), Some("/metrics"));
        assert_eq!(job.scrape_interval.as_deref(), Some("1m"));
        assert_eq!(
            job.relabel_configs[0],
            RelabelConfig::keep(
                &[
                    "__meta_kubernetes_pod_label_app_kubernetes_io_name",
                    "__meta_kubernetes_pod_labelpresent_app_kubernetes_io_name",
                ],
                "web;true",
            )
        );
        assert_eq!(job.relabel_configs[1].regex.as_deref(), Some(r"(a|b\.c);true"));
        assert!(job.relabel_configs.contains(&RelabelConfig::keep(
            &["__meta_kubernetes_pod_container_port_name"],
            "metrics",
        )));
    }

    #[test]
    fn test_numeric_port() {
        let collection = run(&snapshot());
        let job = &collection.config.scrape_configs[0];
        assert!(job.kubernetes_sd_configs[0].namespaces.is_none());
        assert!(job.relabel_configs.contains(&RelabelConfig::keep(
            &["__meta_kubernetes_pod_container_port_number"],
            "8080",
        )));
        let instance = job
            .relabel_configs
            .iter()
            .find(|r| r.target_label.as_deref() == Some("instance"))
            .unwrap();
        assert_eq!(instance.replacement.as_deref(), Some("$1:8080"));
    }

    #[test]
    fn test_deterministic_output() {
        let snapshot = snapshot();
        let first = run(&snapshot).config.to_yaml().unwrap();
        let second = run(&snapshot).config.to_yaml().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("env: prod"));
    }

    #[test]
    fn test_missing_secret_fails_only_owner() {
        let mut snapshot = snapshot();
        let endpoint = &mut snapshot.cluster_pod_monitorings[0].spec.endpoints[0];
        endpoint.authorization = Some(Authorization {
            type_: None,
            credentials: Some(SecretKeySelector::new("token", "t")),
        });

        let collection = run(&snapshot);
        assert_eq!(collection.config.scrape_configs.len(), 1);
        let cluster_key = ResourceKey {
            kind: Kind::ClusterPodMonitoring,
            namespace: None,
            name: "all".into(),
        };
        assert!(matches!(
            collection.outcomes.get(&cluster_key),
            Some(Outcome::Failure { reason, .. }) if reason == "SecretResolutionFailed"
        ));
    }

    #[test]
    fn test_kubelet_jobs() {
        let mut snapshot = Snapshot::default();
        snapshot.config.collection.kubelet_scraping = Some(KubeletScraping {
            interval: "30s".into(),
        });
        let collection = run(&snapshot);
        let jobs: Vec<_> = collection
            .config
            .scrape_configs
            .iter()
            .map(|c| c.job_name.as_str())
            .collect();
        assert_eq!(jobs, vec!["kubelet/cadvisor", "kubelet/metrics"]);
        assert!(collection.config.google_cloud.is_none());
    }

    #[test]
    fn test_export_filter() {
        let mut snapshot = Snapshot::default();
        snapshot.config.collection.filter.match_one_of = vec![r#"{job="prometheus"}"#.into()];
        let collection = run(&snapshot);
        let export = collection.config.google_cloud.unwrap().export.unwrap();
        assert_eq!(export.match_, vec![r#"{job="prometheus"}"#.to_owned()]);
        assert!(export.credentials_file.is_none());
    }
}
