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

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid duration '{}'", value))]
    InvalidDuration { value: String },

    #[snafu(display("endpoint {}: {}", index, message))]
    InvalidEndpoint { index: usize, message: String },

    #[snafu(display("group '{}' rule {}: {}", group, index, message))]
    InvalidRule {
        group: String,
        index: usize,
        message: String,
    },

    #[snafu(display("duplicate rule group name '{}'", name))]
    DuplicateGroup { name: String },

    #[snafu(display("invalid label selector: {}", message))]
    InvalidSelector { message: String },
}
