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

use kube::KubeSchema;
use serde::{Deserialize, Serialize};

/// Reference to a single key of a Secret.
///
/// When `namespace` is omitted the namespace of the referencing object is used;
/// for the OperatorConfig that is the public namespace.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,

    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretKeySelector {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            namespace: None,
        }
    }
}

/// HTTP authorization header settings, e.g. a bearer token.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Authorization scheme, defaults to `Bearer`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretKeySelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Secret references in a fixed order.
    pub fn secret_refs(&self) -> impl Iterator<Item = &SecretKeySelector> {
        [&self.ca, &self.cert, &self.key_secret]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}
