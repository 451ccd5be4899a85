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

//! Resolution of scattered secret references into canonical secrets.
//!
//! Every reference is flattened into a key of the form
//! `secret_<namespace>_<name>_<key>` inside the canonical secret of the
//! consuming workload, which mounts it under [`SECRETS_DIR`].

use crate::types::resource::ResourceKey;
use crate::types::v1::secret::SecretKeySelector;
use futures::future::try_join_all;
use snafu::Snafu;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;

pub const SECRETS_DIR: &str = "/etc/secrets";

pub type SecretData = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "secret '{}' must be in namespace '{}', got '{}'",
        name,
        expected,
        namespace
    ))]
    CrossNamespace {
        name: String,
        namespace: String,
        expected: String,
    },

    #[snafu(display("secret '{}' needs an explicit namespace", name))]
    MissingNamespace { name: String },

    #[snafu(display("secret {}/{} not found", namespace, name))]
    SecretNotFound { namespace: String, name: String },

    #[snafu(display("key '{}' not found in secret {}/{}", key, namespace, name))]
    KeyNotFound {
        namespace: String,
        name: String,
        key: String,
    },
}

/// Namespace a reference is resolved against.
#[derive(Clone, Copy, Debug)]
pub enum Scope<'a> {
    /// References default to, and must stay in, this namespace.
    Namespace(&'a str),
    /// References must name their namespace.
    Cluster,
}

/// A fully qualified secret key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl SecretRef {
    pub fn resolve(selector: &SecretKeySelector, scope: Scope<'_>) -> Result<Self, Error> {
        let namespace = match (scope, selector.namespace.as_deref()) {
            (Scope::Namespace(expected), Some(ns)) if ns != expected => {
                return CrossNamespaceSnafu {
                    name: &selector.name,
                    namespace: ns,
                    expected,
                }
                .fail();
            }
            (Scope::Namespace(ns), _) => ns,
            (Scope::Cluster, Some(ns)) if !ns.is_empty() => ns,
            (Scope::Cluster, _) => {
                return MissingNamespaceSnafu {
                    name: &selector.name,
                }
                .fail();
            }
        };
        Ok(Self {
            namespace: namespace.to_owned(),
            name: selector.name.clone(),
            key: selector.key.clone(),
        })
    }

    /// Key inside the canonical secret.
    pub fn canonical_key(&self) -> String {
        format!("secret_{}_{}_{}", self.namespace, self.name, self.key)
    }

    /// Path of the key once the canonical secret is mounted.
    pub fn file_path(&self) -> String {
        format!("{SECRETS_DIR}/{}", self.canonical_key())
    }
}

/// Whatever a failed reference is blamed on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Owner {
    Resource(ResourceKey),
    /// A field of the OperatorConfig, e.g. `rules.alerting.alertmanagers[0]`.
    OperatorConfig(String),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Resource(key) => write!(f, "{key}"),
            Owner::OperatorConfig(field) => write!(f, "OperatorConfig {field}"),
        }
    }
}

/// References collected for one canonical secret.
#[derive(Clone, Debug, Default)]
pub struct SecretRequests {
    requests: Vec<(Owner, SecretRef)>,
    failures: BTreeMap<Owner, Error>,
}

impl SecretRequests {
    /// Records a reference, or a failure for `owner` when it cannot be resolved.
    pub fn add(&mut self, owner: &Owner, selector: &SecretKeySelector, scope: Scope<'_>) {
        match SecretRef::resolve(selector, scope) {
            Ok(reference) => self.requests.push((owner.clone(), reference)),
            Err(e) => {
                self.failures.entry(owner.clone()).or_insert(e);
            }
        }
    }

    /// Secrets whose changes affect the outcome, including missing ones.
    pub fn referenced(&self) -> BTreeSet<(String, String)> {
        self.requests
            .iter()
            .map(|(_, r)| (r.namespace.clone(), r.name.clone()))
            .collect()
    }
}

/// Read access to source secrets.
pub trait SecretSource {
    type Error;

    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<SecretData>, Self::Error>> + Send;
}

/// Source secrets read for one cycle; absent secrets are kept as `None`.
#[derive(Clone, Debug, Default)]
pub struct SecretStore {
    secrets: BTreeMap<(String, String), Option<SecretData>>,
}

impl SecretStore {
    pub fn insert(&mut self, namespace: &str, name: &str, data: Option<SecretData>) {
        self.secrets
            .insert((namespace.to_owned(), name.to_owned()), data);
    }

    pub fn get(&self, reference: &SecretRef) -> Result<&[u8], Error> {
        let data = self
            .secrets
            .get(&(reference.namespace.clone(), reference.name.clone()))
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                SecretNotFoundSnafu {
                    namespace: &reference.namespace,
                    name: &reference.name,
                }
                .build()
            })?;
        data.get(&reference.key).map(Vec::as_slice).ok_or_else(|| {
            KeyNotFoundSnafu {
                namespace: &reference.namespace,
                name: &reference.name,
                key: &reference.key,
            }
            .build()
        })
    }
}

/// Reads every referenced secret exactly once.
pub async fn fetch<S: SecretSource + Sync>(
    source: &S,
    referenced: &BTreeSet<(String, String)>,
) -> Result<SecretStore, S::Error> {
    let fetched = try_join_all(referenced.iter().map(|(namespace, name)| async move {
        let data = source.get(namespace, name).await?;
        Ok::<_, S::Error>((namespace, name, data))
    }))
    .await?;

    let mut store = SecretStore::default();
    for (namespace, name, data) in fetched {
        store.insert(namespace, name, data);
    }
    Ok(store)
}

/// Content of one canonical secret plus the owners whose references failed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub data: SecretData,
    pub failures: BTreeMap<Owner, Error>,
}

impl Aggregation {
    pub fn failed(&self, owner: &Owner) -> bool {
        self.failures.contains_key(owner)
    }
}

/// Builds the canonical secret from fetched sources.
///
/// An owner with any unresolvable reference contributes no keys at all, other
/// owners are unaffected. The result depends only on the inputs.
pub fn aggregate(requests: &SecretRequests, store: &SecretStore) -> Aggregation {
    let mut failures = requests.failures.clone();
    let mut resolved = Vec::with_capacity(requests.requests.len());
    for (owner, reference) in &requests.requests {
        match store.get(reference) {
            Ok(bytes) => resolved.push((owner, reference, bytes)),
            Err(e) => {
                failures.entry(owner.clone()).or_insert(e);
            }
        }
    }

    let data = resolved
        .into_iter()
        .filter(|(owner, _, _)| !failures.contains_key(*owner))
        .map(|(_, reference, bytes)| (reference.canonical_key(), bytes.to_vec()))
        .collect();

    Aggregation { data, failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MemorySecrets;

    fn selector(name: &str, key: &str) -> SecretKeySelector {
        SecretKeySelector::new(name, key)
    }

    fn source() -> MemorySecrets {
        MemorySecrets::default()
            .with(
                "pub",
                "alertmanager-tls",
                &[("cert", b"CERT".as_slice()), ("key", b"KEY".as_slice())],
            )
            .with("pub", "token", &[("token", b"secret-token".as_slice())])
    }

    #[tokio::test]
    async fn test_canonical_keys() {
        let owner = Owner::OperatorConfig("rules.alerting.alertmanagers[0]".into());
        let mut requests = SecretRequests::default();
        requests.add(&owner, &selector("alertmanager-tls", "cert"), Scope::Namespace("pub"));
        requests.add(&owner, &selector("alertmanager-tls", "key"), Scope::Namespace("pub"));

        let src = source();
        let store = fetch(&src, &requests.referenced()).await.unwrap();
        let agg = aggregate(&requests, &store);

        assert!(agg.failures.is_empty());
        assert_eq!(
            agg.data,
            BTreeMap::from([
                ("secret_pub_alertmanager-tls_cert".to_owned(), b"CERT".to_vec()),
                ("secret_pub_alertmanager-tls_key".to_owned(), b"KEY".to_vec()),
            ])
        );
        assert_eq!(src.reads(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_scoped_to_owner() {
        let good = Owner::OperatorConfig("collection.credentials".into());
        let bad = Owner::OperatorConfig("rules.credentials".into());
        let mut requests = SecretRequests::default();
        requests.add(&good, &selector("token", "token"), Scope::Namespace("pub"));
        requests.add(&bad, &selector("token", "token"), Scope::Namespace("pub"));
        requests.add(&bad, &selector("token", "missing"), Scope::Namespace("pub"));
        requests.add(&bad, &selector("gone", "x"), Scope::Namespace("pub"));

        let store = fetch(&source(), &requests.referenced()).await.unwrap();
        let agg = aggregate(&requests, &store);

        assert!(!agg.failed(&good));
        assert_eq!(
            agg.failures.get(&bad),
            Some(&Error::KeyNotFound {
                namespace: "pub".into(),
                name: "token".into(),
                key: "missing".into(),
            })
        );
        assert_eq!(agg.data.len(), 1);
        assert!(agg.data.contains_key("secret_pub_token_token"));
        assert!(requests.referenced().contains(&("pub".into(), "gone".into())));
    }

    #[test]
    fn test_resolve_scopes() {
        let mut sel = selector("s", "k");
        assert_eq!(
            SecretRef::resolve(&sel, Scope::Namespace("a")).unwrap().file_path(),
            "/etc/secrets/secret_a_s_k"
        );
        assert!(SecretRef::resolve(&sel, Scope::Cluster).is_err());

        sel.namespace = Some("b".into());
        assert!(SecretRef::resolve(&sel, Scope::Namespace("a")).is_err());
        assert_eq!(
            SecretRef::resolve(&sel, Scope::Cluster).unwrap().canonical_key(),
            "secret_b_s_k"
        );
    }
}
