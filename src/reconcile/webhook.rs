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


//! Keeps the CA bundle of the operator's admission webhooks in sync with its
//! serving certificate.

use super::{Error, by_name};
use crate::context::Context;
use crate::utils::tls;
use futures::StreamExt;
use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::Controller;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NAME: &str = "webhook";

const CA_KEY: &str = "ca.crt";
const CERT_KEY: &str = "tls.crt";
const PRIVATE_KEY_KEY: &str = "tls.key";

/// Name shared by the validating and the mutating webhook configuration.
pub fn webhook_config_name(operator_namespace: &str) -> String {
    format!("gmp-operator.{operator_namespace}.monitoring.googleapis.com")
}

/// Points every client config at `ca`. Returns whether anything changed.
pub fn inject_ca_bundle<'a>(
    configs: impl IntoIterator<Item = &'a mut WebhookClientConfig>,
    ca: &[u8],
) -> bool {
    let mut changed = false;
    for config in configs {
        if config.ca_bundle.as_ref().map(|b| b.0.as_slice()) != Some(ca) {
            config.ca_bundle = Some(ByteString(ca.to_vec()));
            changed = true;
        }
    }
    changed
}

pub fn inject_validating(config: &mut ValidatingWebhookConfiguration, ca: &[u8]) -> bool {
    inject_ca_bundle(
        config.webhooks.iter_mut().flatten().map(|w| &mut w.client_config),
        ca,
    )
}

pub fn inject_mutating(config: &mut MutatingWebhookConfiguration, ca: &[u8]) -> bool {
    inject_ca_bundle(
        config.webhooks.iter_mut().flatten().map(|w| &mut w.client_config),
        ca,
    )
}

/// CA bytes to inject, `ca.crt` preferred over `tls.crt`.
pub fn ca_from_secret(secret: &Secret) -> Option<&[u8]> {
    let data = secret.data.as_ref()?;
    data.get(CA_KEY)
        .or_else(|| data.get(CERT_KEY))
        .map(|b| b.0.as_slice())
        .filter(|b| !b.is_empty())
}

pub async fn run(ctx: Arc<Context>, tls_secret: String) {
    let client = ctx.client.clone();
    let name = webhook_config_name(&ctx.env.operator_namespace);
    let target = ObjectRef::<Secret>::new(&tls_secret).within(&ctx.env.operator_namespace);
    let validating_target = target.clone();

    Controller::new(
        Api::<Secret>::namespaced(client.clone(), &ctx.env.operator_namespace),
        by_name(&tls_secret),
    )
    .watches(
        Api::<ValidatingWebhookConfiguration>::all(client.clone()),
        by_name(&name),
        move |_| Some(validating_target.clone()),
    )
    .watches(
        Api::<MutatingWebhookConfiguration>::all(client),
        by_name(&name),
        move |_| Some(target.clone()),
    )
    .shutdown_on_signal()
    .run(reconcile, super::error_policy, ctx)
    .for_each(|res| async move {
        match res {
            Ok((object, _)) => debug!(controller = NAME, object = %object.name, "reconciled"),
            Err(e) => warn!(controller = NAME, error = %e, "reconcile failed"),
        }
    })
    .await;
}

pub async fn reconcile(secret: Arc<Secret>, ctx: Arc<Context>) -> Result<Action, Error> {
    if ctx.cancel.is_cancelled() {
        return Ok(Action::await_change());
    }
    let Some(ca) = ca_from_secret(&secret) else {
        warn!(secret = %secret.name_any(), "serving certificate secret has no CA data");
        return Ok(Action::await_change());
    };
    let certs = tls::ca_bundle(ca)?;
    if let Some(data) = &secret.data
        && let (Some(cert), Some(key)) = (data.get(CERT_KEY), data.get(PRIVATE_KEY_KEY))
        && let Err(e) = tls::x509_key_pair(&cert.0, &key.0)
    {
        warn!(secret = %secret.name_any(), error = %e, "serving certificate does not match its key");
    }

    let name = webhook_config_name(&ctx.env.operator_namespace);
    let validating = ctx
        .replace_if_changed(
            Api::all(ctx.client.clone()),
            &name,
            |c: &mut ValidatingWebhookConfiguration| inject_validating(c, ca),
        )
        .await?;
    let mutating = ctx
        .replace_if_changed(
            Api::all(ctx.client.clone()),
            &name,
            |c: &mut MutatingWebhookConfiguration| inject_mutating(c, ca),
        )
        .await?;
    if validating || mutating {
        info!(
            webhook = %name,
            certificates = certs.len(),
            validating,
            mutating,
            "CA bundle injected"
        );
    } else {
        debug!(webhook = %name, "CA bundle up to date");
    }

    ctx.backoff.reset();
    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::admissionregistration::v1::{MutatingWebhook, ValidatingWebhook};
    use std::collections::BTreeMap;

    fn validating(bundles: &[Option<&[u8]>]) -> ValidatingWebhookConfiguration {
        ValidatingWebhookConfiguration {
            webhooks: Some(
                bundles
                    .iter()
                    .enumerate()
                    .map(|(i, ca)| ValidatingWebhook {
                        name: format!("w{i}.monitoring.googleapis.com"),
                        client_config: WebhookClientConfig {
                            ca_bundle: ca.map(|c| ByteString(c.to_vec())),
                            ..Default::default()
                        },
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_webhook_config_name() {
        assert_eq!(
            webhook_config_name("gmp-system"),
            "gmp-operator.gmp-system.monitoring.googleapis.com"
        );
    }

    #[test]
    fn test_inject_patches_every_entry() {
        let mut config = validating(&[None, Some(b"old".as_slice()), Some(b"new".as_slice())]);
        assert!(inject_validating(&mut config, b"new"));
        for webhook in config.webhooks.unwrap() {
            assert_eq!(webhook.client_config.ca_bundle, Some(ByteString(b"new".to_vec())));
        }
    }

    #[test]
    fn test_inject_is_idempotent() {
        let mut config = validating(&[Some(b"ca".as_slice()), Some(b"ca".as_slice())]);
        let before = config.clone();
        assert!(!inject_validating(&mut config, b"ca"));
        assert_eq!(config, before);

        let mut stale = validating(&[Some(b"old".as_slice())]);
        assert!(inject_validating(&mut stale, b"ca"));
        assert!(!inject_validating(&mut stale, b"ca"));
    }

    #[test]
    fn test_inject_without_webhooks() {
        let mut config = MutatingWebhookConfiguration::default();
        assert!(!inject_mutating(&mut config, b"ca"));

        let mut config = MutatingWebhookConfiguration {
            webhooks: Some(vec![MutatingWebhook::default()]),
            ..Default::default()
        };
        assert!(inject_mutating(&mut config, b"ca"));
    }

    #[test]
    fn test_ca_from_secret() {
        let secret = |entries: &[(&str, &[u8])]| Secret {
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        };

        let both = secret(&[("ca.crt", b"ca".as_slice()), ("tls.crt", b"leaf".as_slice())]);
        assert_eq!(ca_from_secret(&both), Some(&b"ca"[..]));

        let leaf_only = secret(&[("tls.crt", b"leaf".as_slice())]);
        assert_eq!(ca_from_secret(&leaf_only), Some(&b"leaf"[..]));

        let empty_ca = secret(&[("ca.crt", b"".as_slice())]);
        assert_eq!(ca_from_secret(&empty_ca), None);
        assert_eq!(ca_from_secret(&Secret::default()), None);
    }
}
