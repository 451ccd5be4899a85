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

//! Configuration of the rule-evaluator: alerting targets and rule files in
//! its document, export labels and the query backend as command line flags.

use crate::config::{
    AlertingConfig, AlertmanagerConfig, GlobalConfig, KubernetesSdConfig, PromConfig,
    RelabelConfig,
};
use crate::secrets::{Aggregation, Owner, Scope, SecretRef, SecretRequests};
use crate::synthesis::collection::{authorization_files, quote_meta, tls_files};
use crate::synthesis::{Environment, Error, Snapshot, rules};
use crate::types::v1::operator_config::AlertmanagerEndpoints;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub const CONFIG_MAP_NAME: &str = "rule-evaluator";
pub const SECRET_NAME: &str = "rules";

pub const CREDENTIALS_FIELD: &str = "rules.credentials";

/// Deployment running the evaluator, and the env variable of its `evaluator`
/// container that carries the per-cluster flags.
pub const DEPLOYMENT_NAME: &str = "rule-evaluator";
pub const CONTAINER_NAME: &str = "evaluator";
pub const EXTRA_ARGS_ENV: &str = "EXTRA_ARGS";

/// Service of the alertmanager deployed next to the operator.
pub const MANAGED_ALERTMANAGER_NAME: &str = "alertmanager";
pub const MANAGED_ALERTMANAGER_PORT: i32 = 9093;

const DEFAULT_SCHEME: &str = "http";
const DEFAULT_TIMEOUT: &str = "10s";
const DEFAULT_API_VERSION: &str = "v2";

/// Field path of an alertmanager entry, used as secret owner.
pub fn alertmanager_field(index: usize) -> String {
    format!("rules.alerting.alertmanagers[{index}]")
}

pub fn secret_requests(env: &Environment, snapshot: &Snapshot) -> SecretRequests {
    let scope = Scope::Namespace(&env.public_namespace);
    let mut requests = SecretRequests::default();
    if let Some(credentials) = &snapshot.config.rules.credentials {
        requests.add(
            &Owner::OperatorConfig(CREDENTIALS_FIELD.into()),
            credentials,
            scope,
        );
    }
    for (index, endpoint) in snapshot.config.rules.alerting.alertmanagers.iter().enumerate() {
        let owner = Owner::OperatorConfig(alertmanager_field(index));
        for selector in endpoint.secret_refs() {
            requests.add(&owner, selector, scope);
        }
    }
    requests
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuleEvaluator {
    pub config: PromConfig,
    /// Flags for the evaluator, in the order they are passed.
    pub args: Vec<String>,
    /// Configuration entries left out of the document, with the reason.
    pub skipped: Vec<(Owner, String)>,
}

pub fn synthesize(env: &Environment, snapshot: &Snapshot, secrets: &Aggregation) -> RuleEvaluator {
    let spec = &snapshot.config.rules;
    let scope = Scope::Namespace(&env.public_namespace);
    let mut skipped = Vec::new();

    let mut alertmanagers = Vec::new();
    for (index, endpoint) in spec.alerting.alertmanagers.iter().enumerate() {
        let owner = Owner::OperatorConfig(alertmanager_field(index));
        if let Some(e) = secrets.failures.get(&owner) {
            skipped.push((owner, e.to_string()));
            continue;
        }
        match alertmanager_config(endpoint, scope) {
            Ok(am) => alertmanagers.push(am),
            Err(e) => skipped.push((owner, e.to_string())),
        }
    }
    let managed = AlertmanagerEndpoints {
        namespace: env.operator_namespace.clone(),
        name: MANAGED_ALERTMANAGER_NAME.into(),
        port: IntOrString::Int(MANAGED_ALERTMANAGER_PORT),
        scheme: None,
        path_prefix: None,
        tls: None,
        authorization: None,
        timeout: None,
        api_version: None,
    };
    // Carries no secrets, so it cannot fail.
    if let Ok(am) = alertmanager_config(&managed, scope) {
        alertmanagers.push(am);
    }

    let credentials_owner = Owner::OperatorConfig(CREDENTIALS_FIELD.into());
    if let Some(e) = secrets.failures.get(&credentials_owner) {
        skipped.push((credentials_owner.clone(), e.to_string()));
    }
    let credentials_file = spec
        .credentials
        .as_ref()
        .filter(|_| !secrets.failed(&credentials_owner))
        .and_then(|c| SecretRef::resolve(c, scope).ok())
        .map(|r| r.file_path());
    let query_project_id = spec
        .query_project_id
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(env.project_id.as_str());
    let mut args = Vec::new();
    for (flag, value) in [
        ("export.label.project-id", env.project_id.as_str()),
        ("export.label.location", env.location.as_str()),
        ("export.label.cluster", env.cluster.as_str()),
        ("query.project-id", query_project_id),
    ] {
        push_flag(&mut args, flag, value);
    }
    if let Some(path) = &credentials_file {
        push_flag(&mut args, "export.credentials-file", path);
        push_flag(&mut args, "query.credentials-file", path);
    }

    let config = PromConfig {
        global: GlobalConfig {
            external_labels: spec.external_labels.clone(),
        },
        google_cloud: None,
        alerting: Some(AlertingConfig { alertmanagers }),
        rule_files: vec![rules::rule_files_glob()],
        scrape_configs: Vec::new(),
    };
    RuleEvaluator {
        config,
        args,
        skipped,
    }
}

/// Appends `--flag="value"`, leaving out flags without a value.
fn push_flag(args: &mut Vec<String>, flag: &str, value: &str) {
    if !value.is_empty() {
        args.push(format!("--{flag}={value:?}"));
    }
}

impl RuleEvaluator {
    /// Value of the evaluator's `EXTRA_ARGS` env variable.
    pub fn extra_args(&self) -> String {
        self.args.join(" ")
    }
}

fn alertmanager_config(
    endpoint: &AlertmanagerEndpoints,
    scope: Scope<'_>,
) -> Result<AlertmanagerConfig, Error> {
    let mut relabel_configs = vec![RelabelConfig::keep(
        &["__meta_kubernetes_endpoints_name"],
        quote_meta(&endpoint.name),
    )];
    relabel_configs.push(match &endpoint.port {
        IntOrString::String(name) => {
            RelabelConfig::keep(&["__meta_kubernetes_endpoint_port_name"], quote_meta(name))
        }
        IntOrString::Int(port) => RelabelConfig {
            source_labels: vec!["__address__".into()],
            regex: Some(r"(.+):\d+".into()),
            target_label: Some("__address__".into()),
            replacement: Some(format!("$1:{port}")),
            action: Some("replace".into()),
            ..Default::default()
        },
    });

    Ok(AlertmanagerConfig {
        authorization: endpoint
            .authorization
            .as_ref()
            .map(|a| authorization_files(a, scope))
            .transpose()?,
        tls_config: endpoint
            .tls
            .as_ref()
            .map(|t| tls_files(t, scope))
            .transpose()?,
        scheme: endpoint
            .scheme
            .clone()
            .unwrap_or_else(|| DEFAULT_SCHEME.into()),
        path_prefix: endpoint.path_prefix.clone(),
        timeout: endpoint
            .timeout
            .clone()
            .unwrap_or_else(|| DEFAULT_TIMEOUT.into()),
        api_version: endpoint
            .api_version
            .clone()
            .unwrap_or_else(|| DEFAULT_API_VERSION.into()),
        relabel_configs,
        kubernetes_sd_configs: vec![KubernetesSdConfig::new(
            "endpoints",
            Some(vec![endpoint.namespace.clone()]),
        )],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{SecretStore, aggregate};
    use crate::tests::{MemorySecrets, environment};
    use crate::types::v1::secret::{Authorization, SecretKeySelector, TlsConfig};
    use std::collections::BTreeMap;

    fn endpoint() -> AlertmanagerEndpoints {
        AlertmanagerEndpoints {
            namespace: "ns1".into(),
            name: "test-am".into(),
            port: IntOrString::Int(19093),
            scheme: Some("https".into()),
            path_prefix: Some("/test".into()),
            tls: Some(TlsConfig {
                cert: Some(SecretKeySelector::new("alertmanager-tls", "cert")),
                key_secret: Some(SecretKeySelector::new("alertmanager-tls", "key")),
                ..Default::default()
            }),
            authorization: Some(Authorization {
                type_: Some("Bearer".into()),
                credentials: Some(SecretKeySelector::new("alertmanager-authorization", "token")),
            }),
            timeout: Some("30s".into()),
            api_version: Some("v2".into()),
        }
    }

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.config.rules.external_labels =
            BTreeMap::from([("external_key".to_owned(), "external_val".to_owned())]);
        snapshot.config.rules.alerting.alertmanagers = vec![endpoint()];
        snapshot
    }

    async fn run(snapshot: &Snapshot, source: &MemorySecrets) -> (RuleEvaluator, Aggregation) {
        let env = environment();
        let requests = secret_requests(&env, snapshot);
        let store = crate::secrets::fetch(source, &requests.referenced()).await.unwrap();
        let secrets = aggregate(&requests, &store);
        (synthesize(&env, snapshot, &secrets), secrets)
    }

    fn source() -> MemorySecrets {
        MemorySecrets::default()
            .with(
                "gmp-public",
                "alertmanager-tls",
                &[("cert", b"CERT".as_slice()), ("key", b"KEY".as_slice())],
            )
            .with(
                "gmp-public",
                "alertmanager-authorization",
                &[("token", b"auth-bearer-password".as_slice())],
            )
    }

    #[tokio::test]
    async fn test_alertmanager_blocks() {
        let (evaluator, secrets) = run(&snapshot(), &source()).await;
        assert!(evaluator.skipped.is_empty());
        assert_eq!(
            secrets.data.keys().collect::<Vec<_>>(),
            vec![
                "secret_gmp-public_alertmanager-authorization_token",
                "secret_gmp-public_alertmanager-tls_cert",
                "secret_gmp-public_alertmanager-tls_key",
            ]
        );

        let alerting = evaluator.config.alerting.as_ref().unwrap();
        assert_eq!(alerting.alertmanagers.len(), 2);

        let custom = &alerting.alertmanagers[0];
        assert_eq!(
            custom.authorization.as_ref().unwrap().credentials_file.as_deref(),
            Some("/etc/secrets/secret_gmp-public_alertmanager-authorization_token")
        );
        assert_eq!(
            custom.tls_config.as_ref().unwrap().key_file.as_deref(),
            Some("/etc/secrets/secret_gmp-public_alertmanager-tls_key")
        );
        assert_eq!(custom.relabel_configs[1].replacement.as_deref(), Some("$1:19093"));
        assert_eq!(
            custom.kubernetes_sd_configs[0].namespaces.as_ref().unwrap().names,
            vec!["ns1".to_owned()]
        );

        let managed = &alerting.alertmanagers[1];
        assert_eq!(managed.scheme, "http");
        assert_eq!(managed.timeout, "10s");
        assert_eq!(managed.relabel_configs[0].regex.as_deref(), Some("alertmanager"));
        assert_eq!(managed.relabel_configs[1].replacement.as_deref(), Some("$1:9093"));
        assert_eq!(
            managed.kubernetes_sd_configs[0].namespaces.as_ref().unwrap().names,
            vec!["gmp-system".to_owned()]
        );

        assert_eq!(evaluator.config.rule_files, vec!["/etc/rules/*.yaml".to_owned()]);
        assert!(evaluator.config.google_cloud.is_none());
        assert_eq!(
            evaluator.extra_args(),
            r#"--export.label.project-id="p" --export.label.location="l" --export.label.cluster="c" --query.project-id="p""#
        );
    }

    #[tokio::test]
    async fn test_query_flags() {
        let mut snapshot = snapshot();
        snapshot.config.rules.query_project_id = Some("other".into());
        snapshot.config.rules.credentials =
            Some(SecretKeySelector::new("user-gcp-service-account", "key.json"));
        let source = source().with(
            "gmp-public",
            "user-gcp-service-account",
            &[("key.json", b"{}".as_slice())],
        );
        let (evaluator, _) = run(&snapshot, &source).await;
        let path = "/etc/secrets/secret_gmp-public_user-gcp-service-account_key.json";
        assert_eq!(
            evaluator.args,
            vec![
                r#"--export.label.project-id="p""#.to_owned(),
                r#"--export.label.location="l""#.to_owned(),
                r#"--export.label.cluster="c""#.to_owned(),
                r#"--query.project-id="other""#.to_owned(),
                format!("--export.credentials-file={path:?}"),
                format!("--query.credentials-file={path:?}"),
            ]
        );

        let document = evaluator.config.to_yaml().unwrap();
        assert!(!document.contains("google_cloud"));
        assert!(!document.contains("other"));
    }

    #[tokio::test]
    async fn test_unresolvable_endpoint_is_skipped() {
        let (evaluator, secrets) = run(&snapshot(), &MemorySecrets::default()).await;
        assert_eq!(evaluator.skipped.len(), 1);
        assert_eq!(
            evaluator.skipped[0].0,
            Owner::OperatorConfig(alertmanager_field(0))
        );
        assert!(secrets.data.is_empty());
        assert_eq!(evaluator.config.alerting.unwrap().alertmanagers.len(), 1);
    }

    #[test]
    fn test_named_port() {
        let mut ep = endpoint();
        ep.port = IntOrString::String("web".into());
        let am = alertmanager_config(&ep, Scope::Namespace("gmp-public")).unwrap();
        assert_eq!(
            am.relabel_configs[1],
            RelabelConfig::keep(&["__meta_kubernetes_endpoint_port_name"], "web")
        );
    }

    #[test]
    fn test_deterministic_document() {
        let env = environment();
        let snapshot = snapshot();
        let secrets = aggregate(&secret_requests(&env, &snapshot), &SecretStore::default());
        let first = synthesize(&env, &snapshot, &secrets).config.to_yaml().unwrap();
        let second = synthesize(&env, &snapshot, &secrets).config.to_yaml().unwrap();
        assert_eq!(first, second);
    }
}
