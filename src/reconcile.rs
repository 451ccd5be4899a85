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


//! Controllers driving synthesis cycles and the webhook CA injector.
//!
//! Every synthesis controller reconciles a single key, the OperatorConfig
//! singleton, and maps events of all the kinds it reads onto it. The
//! controller scheduler then guarantees one cycle in flight and folds
//! triggers that arrive mid-cycle into one follow-up cycle.

pub mod collection;
pub mod rule_evaluator;
pub mod rules;
pub mod webhook;

use crate::context::Context;
use crate::secrets::{Owner, SecretData};
use crate::synthesis::{self, Outcome};
use crate::types::resource::{MonitoredResource, ResourceKey};
use crate::types::v1::NAME_OPERATOR_CONFIG;
use crate::types::v1::operator_config::OperatorConfig;
use crate::{context, utils};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher};
use kube::{Api, ResourceExt};
use snafu::Snafu;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(display("failed to render {}: {}", what, source))]
    Render {
        what: String,
        source: serde_yaml_ng::Error,
    },

    #[snafu(display("cycle did not finish within {:?}", timeout))]
    Timeout { timeout: Duration },

    #[snafu(transparent)]
    Tls { source: utils::tls::Error },
}

impl Error {
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Context { source } => source.is_transient(),
            Error::Timeout { .. } => true,
            Error::Render { .. } | Error::Tls { .. } => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Display)]
pub(crate) enum Phase {
    Collecting,
    Synthesizing,
    Publishing,
}

pub(crate) fn enter(ctx: &Context, phase: Phase) {
    debug!(controller = ctx.name, %phase, "cycle phase");
}

pub fn error_policy<K>(_object: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.backoff.next_delay(&ctx.settings.retry);
    if error.is_transient() {
        warn!(controller = ctx.name, error = %error, delay_ms = delay.as_millis() as u64, "cycle failed, requeueing");
    } else {
        error!(controller = ctx.name, error = %error, delay_ms = delay.as_millis() as u64, "cycle failed, requeueing");
    }
    Action::requeue(delay)
}

/// Runs one cycle under the cycle deadline. On shutdown the cycle is dropped
/// at its next await point, before any further write.
pub(crate) async fn run_cycle<F>(ctx: &Context, cycle: F) -> Result<Action, Error>
where
    F: Future<Output = Result<(), Error>>,
{
    if ctx.cancel.is_cancelled() {
        return Ok(Action::await_change());
    }

    let started = Instant::now();
    let timeout = ctx.settings.cycle_timeout;
    let result = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            info!(controller = ctx.name, "shutdown requested, cycle abandoned");
            return Ok(Action::await_change());
        }
        result = tokio::time::timeout(timeout, cycle) => result,
    };

    match result {
        Ok(Ok(())) => {
            ctx.backoff.reset();
            info!(
                controller = ctx.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "cycle complete"
            );
            Ok(Action::requeue(ctx.settings.resync_interval))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => TimeoutSnafu { timeout }.fail(),
    }
}

/// Controller over the OperatorConfig singleton.
pub(crate) fn controller(ctx: &Context) -> Controller<OperatorConfig> {
    let api: Api<OperatorConfig> = Api::namespaced(ctx.client.clone(), &ctx.env.public_namespace);
    Controller::new(api, by_name(NAME_OPERATOR_CONFIG))
}

pub(crate) fn by_name(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

fn config_ref(ctx: &Context) -> ObjectRef<OperatorConfig> {
    ObjectRef::new(NAME_OPERATOR_CONFIG).within(&ctx.env.public_namespace)
}

/// Maps any event onto the singleton.
pub(crate) fn trigger<T>(
    ctx: &Context,
) -> impl Fn(T) -> Option<ObjectRef<OperatorConfig>> + Send + Sync + use<T> {
    let target = config_ref(ctx);
    move |_| Some(target.clone())
}

/// Maps events of secrets the last cycle read onto the singleton.
pub(crate) fn secret_trigger(
    ctx: Arc<Context>,
) -> impl Fn(Secret) -> Option<ObjectRef<OperatorConfig>> + Send + Sync + 'static {
    let target = config_ref(&ctx);
    move |secret| {
        let namespace = secret.namespace()?;
        ctx.is_referenced(&namespace, &secret.name_any())
            .then(|| target.clone())
    }
}

pub(crate) fn log_result<E: std::fmt::Display>(
    controller: &str,
    result: Result<(ObjectRef<OperatorConfig>, Action), E>,
) {
    match result {
        Ok((object, _)) => debug!(controller, object = %object.name, "reconciled"),
        Err(e) => warn!(controller, error = %e, "reconcile failed"),
    }
}

/// Writes a generated ConfigMap, logging a digest of what was published.
pub(crate) async fn publish_config_map(
    ctx: &Context,
    name: &str,
    data: BTreeMap<String, String>,
) -> Result<(), Error> {
    let mut content = Vec::new();
    for (key, value) in &data {
        content.extend_from_slice(key.as_bytes());
        content.extend_from_slice(value.as_bytes());
    }
    let digest = synthesis::digest(&content);
    if ctx.publish_config_map(name, data).await? {
        info!(controller = ctx.name, configmap = name, %digest, "configmap published");
    } else {
        debug!(controller = ctx.name, configmap = name, %digest, "configmap unchanged");
    }
    Ok(())
}

pub(crate) async fn publish_secret(
    ctx: &Context,
    name: &str,
    data: SecretData,
) -> Result<(), Error> {
    let keys = data.len();
    if ctx.publish_secret(name, data).await? {
        info!(controller = ctx.name, secret = name, keys, "secret published");
    } else {
        debug!(controller = ctx.name, secret = name, keys, "secret unchanged");
    }
    Ok(())
}

/// Writes status for every resource with an outcome. All resources are
/// attempted; the first error is returned afterwards.
pub(crate) async fn write_statuses(
    ctx: &Context,
    resources: &[MonitoredResource],
    outcomes: &BTreeMap<ResourceKey, Outcome>,
) -> Result<(), Error> {
    let mut first_error = None;
    let mut written = 0usize;
    for resource in resources {
        let key = resource.key();
        let Some(outcome) = outcomes.get(&key) else {
            continue;
        };
        if let Outcome::Failure { reason, message } = outcome {
            debug!(resource = %key, %reason, %message, "resource excluded");
        }
        match ctx.update_status(resource, outcome).await {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(resource = %key, error = %e, "status update failed");
                first_error.get_or_insert(e);
            }
        }
    }
    debug!(controller = ctx.name, written, "statuses reconciled");
    first_error.map_or(Ok(()), |e| Err(e.into()))
}

/// Publishes a warning event on the OperatorConfig for every configuration
/// entry that was left out. Event failures are logged only.
pub(crate) async fn report_skipped(ctx: &Context, config: &OperatorConfig, skipped: &[(Owner, String)]) {
    for (owner, reason) in skipped {
        warn!(controller = ctx.name, %owner, %reason, "configuration entry skipped");
        let message = format!("{owner}: {reason}");
        if let Err(e) = ctx
            .record(config, EventType::Warning, "ConfigurationSkipped", &message)
            .await
        {
            warn!(error = %e, "failed to record event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let timeout = Error::Timeout {
            timeout: Duration::from_secs(60),
        };
        assert!(timeout.is_transient());

        let cancelled = Error::from(context::Error::Cancelled);
        assert!(!cancelled.is_transient());

        let tls = Error::from(utils::tls::Error::NonCertificate);
        assert!(!tls.is_transient());
    }

    #[test]
    fn test_phase_names() {
        let phases = [Phase::Collecting, Phase::Synthesizing, Phase::Publishing];
        let names: Vec<_> = phases.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["Collecting", "Synthesizing", "Publishing"]);
    }
}
