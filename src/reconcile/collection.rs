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
    report_skipped, run_cycle, secret_trigger, trigger, write_statuses,
};
use crate::context::Context;
use crate::secrets::{self, Owner};
use crate::synthesis::collection::{CONFIG_MAP_NAME, SECRET_NAME, secret_requests, synthesize};
use crate::synthesis::{CONFIG_KEY, Snapshot};
use crate::types::v1::operator_config::OperatorConfig;
use crate::types::v1::pod_monitoring::{ClusterPodMonitoring, PodMonitoring};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Api;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NAME: &str = "collection";

pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    controller(&ctx)
        .watches(
            Api::<PodMonitoring>::all(client.clone()),
            watcher::Config::default(),
            trigger(&ctx),
        )
        .watches(
            Api::<ClusterPodMonitoring>::all(client.clone()),
            watcher::Config::default(),
            trigger(&ctx),
        )
        .watches(
            Api::<Secret>::all(client.clone()),
            watcher::Config::default(),
            secret_trigger(ctx.clone()),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client, &ctx.env.operator_namespace),
            super::by_name(CONFIG_MAP_NAME),
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

async fn cycle(config: &OperatorConfig, ctx: &Context) -> Result<(), Error> {
    enter(ctx, Phase::Collecting);
    let (pod_monitorings, cluster_pod_monitorings) = futures::try_join!(
        ctx.list::<PodMonitoring>(),
        ctx.list::<ClusterPodMonitoring>()
    )?;
    let snapshot = Snapshot {
        config: config.spec.clone(),
        pod_monitorings,
        cluster_pod_monitorings,
        ..Default::default()
    };
    let requests = secret_requests(&ctx.env, &snapshot);
    let referenced = requests.referenced();
    ctx.set_referenced(referenced.clone());
    let store = secrets::fetch(ctx, &referenced).await?;

    enter(ctx, Phase::Synthesizing);
    let aggregation = secrets::aggregate(&requests, &store);
    let collection = synthesize(&ctx.env, &snapshot, &aggregation);
    let rendered = collection
        .config
        .to_yaml()
        .context(RenderSnafu { what: CONFIG_MAP_NAME })?;

    enter(ctx, Phase::Publishing);
    publish_config_map(
        ctx,
        CONFIG_MAP_NAME,
        BTreeMap::from([(CONFIG_KEY.to_owned(), rendered)]),
    )
    .await?;
    publish_secret(ctx, SECRET_NAME, aggregation.data).await?;

    let skipped: Vec<_> = aggregation
        .failures
        .iter()
        .filter(|(owner, _)| matches!(owner, Owner::OperatorConfig(_)))
        .map(|(owner, e)| (owner.clone(), e.to_string()))
        .collect();
    report_skipped(ctx, config, &skipped).await;

    write_statuses(ctx, &snapshot.monitored(), &collection.outcomes).await
}
