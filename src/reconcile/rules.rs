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


use super::{Error, Phase, controller, enter, log_result, publish_config_map, run_cycle, trigger, write_statuses};
use crate::context::Context;
use crate::synthesis::Snapshot;
use crate::synthesis::rules::{CONFIG_MAP_NAME, synthesize};
use crate::types::v1::operator_config::OperatorConfig;
use crate::types::v1::rules::{ClusterRules, GlobalRules, Rules};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use std::sync::Arc;

pub const NAME: &str = "rules";

pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    controller(&ctx)
        .watches(
            Api::<Rules>::all(client.clone()),
            watcher::Config::default(),
            trigger(&ctx),
        )
        .watches(
            Api::<ClusterRules>::all(client.clone()),
            watcher::Config::default(),
            trigger(&ctx),
        )
        .watches(
            Api::<GlobalRules>::all(client.clone()),
            watcher::Config::default(),
            trigger(&ctx),
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
    let (rules, cluster_rules, global_rules) = futures::try_join!(
        ctx.list::<Rules>(),
        ctx.list::<ClusterRules>(),
        ctx.list::<GlobalRules>()
    )?;
    let snapshot = Snapshot {
        config: config.spec.clone(),
        rules,
        cluster_rules,
        global_rules,
        ..Default::default()
    };

    enter(ctx, Phase::Synthesizing);
    let bundle = synthesize(&ctx.env, &snapshot);

    // The ConfigMap is applied whole, so files of deleted objects drop out.
    enter(ctx, Phase::Publishing);
    publish_config_map(ctx, CONFIG_MAP_NAME, bundle.files).await?;
    write_statuses(ctx, &snapshot.monitored(), &bundle.outcomes).await
}
