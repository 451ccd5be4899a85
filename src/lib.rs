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


use crate::context::{Context, Settings};
use crate::reconcile::{collection, rule_evaluator, rules, webhook};
use crate::retry::{PollPolicy, poll_until};
use crate::server::Readiness;
use crate::synthesis::Environment;
use kube::Client;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod context;
pub mod promql;
pub mod reconcile;
pub mod retry;
pub mod secrets;
pub mod server;
pub mod status;
pub mod synthesis;
pub mod types;
pub mod utils;

#[cfg(test)]
mod tests;

/// Process configuration of the `server` command.
#[derive(Clone, Debug)]
pub struct Options {
    pub env: Environment,
    /// Secret in the operator namespace holding the webhook serving
    /// certificate. CA injection is off without it.
    pub tls_secret: Option<String>,
    pub probe_port: u16,
    pub settings: Settings,
}

pub async fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    info!(
        operator_namespace = %options.env.operator_namespace,
        public_namespace = %options.env.public_namespace,
        project_id = %options.env.project_id,
        location = %options.env.location,
        cluster = %options.env.cluster,
        "starting operator"
    );

    let client = Client::try_default().await?;
    let cancel = CancellationToken::new();
    let readiness = Readiness::default();
    let context = |name: &'static str| {
        Arc::new(Context::new(
            client.clone(),
            name,
            options.env.clone(),
            options.settings.clone(),
            cancel.clone(),
        ))
    };

    let probes = tokio::spawn(server::run(
        options.probe_port,
        readiness.clone(),
        cancel.clone(),
    ));

    let bootstrap = context("bootstrap");
    bootstrap.ensure_operator_config().await?;
    let bootstrap = &bootstrap;
    poll_until(&PollPolicy::default(), "OperatorConfig", move || async move {
        bootstrap.operator_config().await.map(|c| c.is_some())
    })
    .await?;

    let signals = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            cancel.cancel();
        }
    });

    let tls_secret = options.tls_secret.clone();
    let webhook_ctx = context(webhook::NAME);
    let webhook = async move {
        match tls_secret {
            Some(secret) => webhook::run(webhook_ctx, secret).await,
            None => info!("no TLS secret configured, webhook CA injection disabled"),
        }
    };

    readiness.mark_ready();
    tokio::join!(
        collection::run(context(collection::NAME)),
        rules::run(context(rules::NAME)),
        rule_evaluator::run(context(rule_evaluator::NAME)),
        webhook,
    );

    cancel.cancel();
    signals.abort();
    probes.await??;
    info!("operator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Writes every CRD as one multi-document YAML stream.
pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    let mut out = String::new();
    for crd in types::v1::crds() {
        out.push_str("---\n");
        out.push_str(&serde_yaml_ng::to_string(&crd)?);
    }
    writer.write_all(out.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
