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


use super::{
    Error, Phase, RenderSnafu, controller, enter, log_result, publish_config_map, publish_secret,
    report_skipped, run_cycle, secret_trigger, trigger,
};
use crate::context::Context;
use crate::secrets;
use crate::synthesis::rule_evaluator::{
    CONFIG_MAP_NAME, CONTAINER_NAME, DEPLOYMENT_NAME, EXTRA_ARGS_ENV, SECRET_NAME,
    secret_requests, synthesize,
};
use crate::synthesis::{CONFIG_KEY, Snapshot, alertmanager};
use crate::types::v1::operator_config::OperatorConfig;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar, Secret};
use kube::Api;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "rule-evaluator";

pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    controller(&ctx)
        .watches(
            Api::<Secret>::namespaced(client.clone(), &ctx.env.public_namespace),
            watcher::Config::default(),
            secret_trigger(ctx.clone()),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client.clone(), &ctx.env.operator_namespace),
            super::by_name(CONFIG_MAP_NAME),
            trigger(&ctx),
        )
        .watches(
            Api::<Deployment>::namespaced(client, &ctx.env.operator_namespace),
            super::by_name(DEPLOYMENT_NAME),
            trigger(&ctx),
        )
        .shutdown_on_signal()
        .run(reconcile, super::error_policy, ctx)
        .for_each(|res| async move { log_result(NAME, res) })
        .await;
}

pub async fn reconcile(config: Arc<OperatorConfig>, ctx: Arc<Context>) -> Result<Action, Error> {
    run_cycle(&ctx, cycle(&config, &ctx)).await
}

/// Publishes the rule-evaluator configuration with its `rules` secret and the
/// managed alertmanager secret.
async fn cycle(config: &OperatorConfig, ctx: &Context) -> Result<(), Error> {
    enter(ctx, Phase::Collecting);
    let snapshot = Snapshot {
        config: config.spec.clone(),
        ..Default::default()
    };
    let requests = secret_requests(&ctx.env, &snapshot);
    let alertmanager_source = alertmanager::config_source(&ctx.env, &snapshot);
    let mut referenced = requests.referenced();
    if let Some(source) = &alertmanager_source {
        referenced.insert((source.namespace.clone(), source.name.clone()));
    }
    ctx.set_referenced(referenced.clone());
    let store = secrets::fetch(ctx, &referenced).await?;

    enter(ctx, Phase::Synthesizing);
    let aggregation = secrets::aggregate(&requests, &store);
    let evaluator = synthesize(&ctx.env, &snapshot, &aggregation);
    let rendered = evaluator
        .config
        .to_yaml()
        .context(RenderSnafu { what: CONFIG_MAP_NAME })?;
    let (alertmanager_data, found) = alertmanager::secret_data(alertmanager_source.as_ref(), &store);
    if !found {
        info!(
            controller = ctx.name,
            "no alertmanager configuration found, using a no-op configuration"
        );
    }

    enter(ctx, Phase::Publishing);
    publish_config_map(
        ctx,
        CONFIG_MAP_NAME,
        BTreeMap::from([(CONFIG_KEY.to_owned(), rendered)]),
    )
    .await?;
    publish_secret(ctx, SECRET_NAME, aggregation.data).await?;
    publish_secret(ctx, alertmanager::SECRET_NAME, alertmanager_data).await?;
    let extra_args = evaluator.extra_args();
    let updated = ctx
        .replace_if_changed(
            Api::namespaced(ctx.client.clone(), &ctx.env.operator_namespace),
            DEPLOYMENT_NAME,
            |d: &mut Deployment| set_extra_args(d, &extra_args),
        )
        .await?;
    if updated {
        info!(
            controller = ctx.name,
            deployment = DEPLOYMENT_NAME,
            args = %extra_args,
            "evaluator flags updated"
        );
    } else {
        debug!(
            controller = ctx.name,
            deployment = DEPLOYMENT_NAME,
            "evaluator flags unchanged"
        );
    }
    report_skipped(ctx, config, &evaluator.skipped).await;
    Ok(())
}

/// Sets `EXTRA_ARGS` on the evaluator container. Returns whether anything
/// changed.
pub fn set_extra_args(deployment: &mut Deployment, value: &str) -> bool {
    let Some(container) = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|s| s.containers.iter_mut().find(|c| c.name == CONTAINER_NAME))
    else {
        return false;
    };
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|e| e.name == EXTRA_ARGS_ENV) {
        Some(var) if var.value.as_deref() == Some(value) && var.value_from.is_none() => false,
        Some(var) => {
            var.value = Some(value.to_owned());
            var.value_from = None;
            true
        }
        None => {
            env.push(EnvVar {
                name: EXTRA_ARGS_ENV.to_owned(),
                value: Some(value.to_owned()),
                ..Default::default()
            });
            true
        }
    }
}
