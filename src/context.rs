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


use crate::retry::{Backoff, RetryPolicy, retry_with_backoff};
use crate::secrets::{SecretData, SecretSource};
use crate::status;
use crate::synthesis::{Environment, Outcome};
use crate::types::resource::MonitoredResource;
use crate::types::v1::NAME_OPERATOR_CONFIG;
use crate::types::v1::operator_config::{OperatorConfig, OperatorConfigSpec};
use crate::types::v1::pod_monitoring::{ClusterPodMonitoring, PodMonitoring};
use crate::types::v1::rules::{ClusterRules, GlobalRules, Rules};
use chrono::{SecondsFormat, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt, api::Api};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::futures::TryFutureExt;
use snafu::{ResultExt, Snafu, ensure};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Field manager and event reporter name.
pub const FIELD_MANAGER: &str = "gmp-operator";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(display("serialization error: {}", source))]
    Serde { source: serde_json::Error },

    #[snafu(display("shutting down, write abandoned"))]
    Cancelled,
}

impl Error {
    /// Errors worth retrying: conflicts, races with not-yet-visible objects,
    /// throttling and server side failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube { source } | Error::Record { source } => match source {
                kube::Error::Api(e) => matches!(e.code, 404 | 409 | 429) || e.code >= 500,
                kube::Error::Service(_) => true,
                _ => false,
            },
            Error::Serde { .. } | Error::Cancelled => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(e) } if e.code == 409)
    }
}

/// Timing knobs shared by the controllers.
#[derive(Clone, Debug)]
pub struct Settings {
    pub resync_interval: Duration,
    pub cycle_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            cycle_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// State of one controller. Each controller owns its context so the secret
/// index and the failure counter are not shared.
pub struct Context {
    pub(crate) client: kube::Client,
    pub(crate) recorder: Recorder,
    pub(crate) name: &'static str,
    pub(crate) env: Environment,
    pub(crate) settings: Settings,
    pub(crate) cancel: CancellationToken,
    pub(crate) backoff: Backoff,
    referenced: RwLock<BTreeSet<(String, String)>>,
}

impl Context {
    pub fn new(
        client: kube::Client,
        name: &'static str,
        env: Environment,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            recorder,
            name,
            env,
            settings,
            cancel,
            backoff: Backoff::default(),
            referenced: RwLock::default(),
        }
    }

    /// Replaces the set of secrets the last cycle read.
    pub fn set_referenced(&self, referenced: BTreeSet<(String, String)>) {
        *self
            .referenced
            .write()
            .unwrap_or_else(PoisonError::into_inner) = referenced;
    }

    pub fn is_referenced(&self, namespace: &str, name: &str) -> bool {
        self.referenced
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(namespace.to_owned(), name.to_owned()))
    }

    /// send event
    #[inline]
    pub async fn record<K>(
        &self,
        resource: &K,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error>
    where
        K: Resource<DynamicType = ()>,
    {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.to_owned(),
                    note: Some(message.into()),
                    action: "Synthesize".into(),
                    secondary: None,
                },
                &resource.object_ref(&()),
            )
            .context(RecordSnafu)
            .await
    }

    /// Lists objects of `K` in every namespace.
    pub async fn list<K>(&self) -> Result<Vec<K>, Error>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).context(KubeSnafu).await?;
        Ok(list.items)
    }

    pub async fn operator_config(&self) -> Result<Option<OperatorConfig>, Error> {
        let api: Api<OperatorConfig> =
            Api::namespaced(self.client.clone(), &self.env.public_namespace);
        api.get_opt(NAME_OPERATOR_CONFIG).context(KubeSnafu).await
    }

    /// Creates the OperatorConfig singleton with an empty spec unless it exists.
    pub async fn ensure_operator_config(&self) -> Result<(), Error> {
        if self.operator_config().await?.is_some() {
            return Ok(());
        }
        let api: Api<OperatorConfig> =
            Api::namespaced(self.client.clone(), &self.env.public_namespace);
        let config = OperatorConfig::new(NAME_OPERATOR_CONFIG, OperatorConfigSpec::default());
        match api.create(&PostParams::default(), &config).await {
            Ok(_) => {
                info!(
                    namespace = %self.env.public_namespace,
                    name = NAME_OPERATOR_CONFIG,
                    "created default OperatorConfig"
                );
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(source) => Err(Error::Kube { source }),
        }
    }

    /// Writes a ConfigMap in the operator namespace unless it already holds
    /// `data`. Returns whether a write happened.
    pub async fn publish_config_map(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<bool, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.env.operator_namespace);
        if let Some(existing) = api.get_opt(name).context(KubeSnafu).await?
            && existing.data.unwrap_or_default() == data
        {
            debug!(configmap = name, "configmap up to date");
            return Ok(false);
        }

        let config_map = ConfigMap {
            metadata: self.metadata(name),
            data: Some(data),
            ..Default::default()
        };
        self.apply(&api, name, &config_map).await?;
        Ok(true)
    }

    /// Secret counterpart of [`Context::publish_config_map`].
    pub async fn publish_secret(&self, name: &str, data: SecretData) -> Result<bool, Error> {
        let data: BTreeMap<String, ByteString> = data
            .into_iter()
            .map(|(k, v)| (k, ByteString(v)))
            .collect();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.env.operator_namespace);
        if let Some(existing) = api.get_opt(name).context(KubeSnafu).await?
            && existing.data.unwrap_or_default() == data
        {
            debug!(secret = name, "secret up to date");
            return Ok(false);
        }

        let secret = Secret {
            metadata: self.metadata(name),
            data: Some(data),
            ..Default::default()
        };
        self.apply(&api, name, &secret).await?;
        Ok(true)
    }

    fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(self.env.operator_namespace.clone()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_owned(),
                FIELD_MANAGER.to_owned(),
            )])),
            ..Default::default()
        }
    }

    async fn apply<T>(&self, api: &Api<T>, name: &str, resource: &T) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug,
    {
        ensure!(!self.cancel.is_cancelled(), CancelledSnafu);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(resource),
        )
        .context(KubeSnafu)
        .await
    }

    /// Reads the object `name` through `api`, applies `mutate` and writes it
    /// back with its resourceVersion when `mutate` reports a change. Absent
    /// objects are skipped.
    pub async fn replace_if_changed<K, F>(
        &self,
        api: Api<K>,
        name: &str,
        mutate: F,
    ) -> Result<bool, Error>
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
        F: Fn(&mut K) -> bool + Sync,
    {
        let (api, mutate) = (&api, &mutate);
        retry_with_backoff(
            &self.settings.retry,
            "replace",
            Error::is_conflict,
            move || async move {
                let Some(mut current) = api.get_opt(name).context(KubeSnafu).await? else {
                    debug!(kind = %K::kind(&()), name, "object not found, skipping");
                    return Ok(false);
                };
                if !mutate(&mut current) {
                    return Ok(false);
                }
                ensure!(!self.cancel.is_cancelled(), CancelledSnafu);
                api.replace(name, &PostParams::default(), &current)
                    .context(KubeSnafu)
                    .await?;
                Ok(true)
            },
        )
        .await
    }

    /// Writes the condition derived from `outcome` to the resource's status.
    /// Nothing is written when the stored status already matches.
    pub async fn update_status(
        &self,
        resource: &MonitoredResource,
        outcome: &Outcome,
    ) -> Result<bool, Error> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        if status::next_status(resource.status(), resource.generation(), outcome, &now).is_none() {
            return Ok(false);
        }

        let namespace = resource.key().namespace.unwrap_or_default();
        let client = self.client.clone();
        match resource {
            MonitoredResource::PodMonitoring(_) => {
                let api: Api<PodMonitoring> = Api::namespaced(client, &namespace);
                self.write_status(api, resource, outcome, &now).await
            }
            MonitoredResource::ClusterPodMonitoring(_) => {
                let api: Api<ClusterPodMonitoring> = Api::all(client);
                self.write_status(api, resource, outcome, &now).await
            }
            MonitoredResource::Rules(_) => {
                let api: Api<Rules> = Api::namespaced(client, &namespace);
                self.write_status(api, resource, outcome, &now).await
            }
            MonitoredResource::ClusterRules(_) => {
                let api: Api<ClusterRules> = Api::all(client);
                self.write_status(api, resource, outcome, &now).await
            }
            MonitoredResource::GlobalRules(_) => {
                let api: Api<GlobalRules> = Api::all(client);
                self.write_status(api, resource, outcome, &now).await
            }
        }
    }

    /// Re-reads the object on every attempt so a conflict retries against the
    /// latest resourceVersion.
    async fn write_status<K>(
        &self,
        api: Api<K>,
        resource: &MonitoredResource,
        outcome: &Outcome,
        now: &str,
    ) -> Result<bool, Error>
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
        K: Into<MonitoredResource>,
    {
        let key = resource.key();
        let (api, key) = (&api, &key);
        retry_with_backoff(
            &self.settings.retry,
            "status update",
            Error::is_conflict,
            move || async move {
                ensure!(!self.cancel.is_cancelled(), CancelledSnafu);
                let Some(latest) = api.get_opt(&key.name).context(KubeSnafu).await? else {
                    debug!(resource = %key, "resource gone before status update");
                    return Ok(false);
                };
                let current: MonitoredResource = latest.clone().into();
                let Some(next) =
                    status::next_status(current.status(), current.generation(), outcome, now)
                else {
                    return Ok(false);
                };

                let body = with_status(&latest, &next).context(SerdeSnafu)?;
                api.replace_status(&latest.name_any(), &PostParams::default(), &body)
                    .context(KubeSnafu)
                    .await?;
                debug!(resource = %key, "status updated");
                Ok(true)
            },
        )
        .await
    }
}

/// Copy of `object` carrying `status`, keeping its resourceVersion so the
/// write is rejected when the object changed in between.
fn with_status<K, S>(object: &K, status: &S) -> Result<K, serde_json::Error>
where
    K: Serialize + DeserializeOwned,
    S: Serialize,
{
    let mut body = serde_json::to_value(object)?;
    body["status"] = serde_json::to_value(status)?;
    serde_json::from_value(body)
}

impl SecretSource for Context {
    type Error = Error;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get_opt(name).context(KubeSnafu).await?;
        Ok(secret.map(|s| {
            s.data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{pod_monitoring, scrape_endpoint};

    #[test]
    fn test_status_body_keeps_resource_version() {
        let mut pm = pod_monitoring("ns", "pm", vec![scrape_endpoint("web")]);
        pm.metadata.resource_version = Some("42".into());
        pm.metadata.generation = Some(3);
        let next = status::next_status(None, Some(3), &Outcome::Success, "t1").unwrap();

        let body = with_status(&pm, &next).unwrap();
        assert_eq!(body.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(body.status.as_ref(), Some(&next));
        assert_eq!(body.spec, pm.spec);
    }
}
