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

//! Configuration handed to the managed alertmanager.

use crate::secrets::{Scope, SecretData, SecretRef, SecretStore};
use crate::synthesis::{CONFIG_KEY, Environment, Snapshot};
use crate::types::v1::secret::SecretKeySelector;

pub const SECRET_NAME: &str = "alertmanager";

const DEFAULT_SOURCE_NAME: &str = "alertmanager";
const DEFAULT_SOURCE_KEY: &str = "alertmanager.yaml";

/// Used while no configuration is provided, so alertmanager can still start.
pub const NOOP_CONFIG: &str = "receivers:\n  - name: \"noop\"\nroute:\n  receiver: \"noop\"\n";

/// Secret key the user-provided configuration is read from.
pub fn config_source(env: &Environment, snapshot: &Snapshot) -> Option<SecretRef> {
    let selector = snapshot
        .config
        .managed_alertmanager
        .as_ref()
        .and_then(|m| m.config_secret.clone())
        .unwrap_or_else(|| SecretKeySelector::new(DEFAULT_SOURCE_NAME, DEFAULT_SOURCE_KEY));
    SecretRef::resolve(&selector, Scope::Namespace(&env.public_namespace)).ok()
}

/// Content of the alertmanager secret. Falls back to [`NOOP_CONFIG`] when the
/// source is missing.
pub fn secret_data(source: Option<&SecretRef>, store: &SecretStore) -> (SecretData, bool) {
    let found = source.and_then(|r| store.get(r).ok());
    let config = found.map_or_else(|| NOOP_CONFIG.as_bytes().to_vec(), <[u8]>::to_vec);
    (
        SecretData::from([(CONFIG_KEY.to_owned(), config)]),
        found.is_some(),
    )
}
