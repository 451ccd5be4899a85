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

//! Just enough PromQL to rewrite the label matchers of rule expressions.
//!
//! Expressions are parsed into an [`ast::Expr`] tree, vector selectors are
//! rewritten in place and the tree is printed back in a canonical form that
//! follows the upstream Prometheus formatting rules.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod scope;

use snafu::Snafu;

pub use ast::Expr;
pub use parser::parse;
pub use scope::{ScopedExpression, inject_matchers, scope_expression};

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{}: unexpected character '{}'", pos, ch))]
    UnexpectedCharacter { pos: usize, ch: char },

    #[snafu(display("{}: unterminated string literal", pos))]
    UnterminatedString { pos: usize },

    #[snafu(display("{}: invalid escape sequence in string", pos))]
    InvalidEscape { pos: usize },

    #[snafu(display("{}: unexpected {}, expected {}", pos, found, expected))]
    UnexpectedToken {
        pos: usize,
        found: String,
        expected: String,
    },

    #[snafu(display("{}: invalid number '{}'", pos, text))]
    InvalidNumber { pos: usize, text: String },

    #[snafu(display("{}: invalid duration '{}'", pos, text))]
    InvalidDuration { pos: usize, text: String },

    #[snafu(display("{}: unknown function '{}'", pos, name))]
    UnknownFunction { pos: usize, name: String },

    #[snafu(display("{}: vector selector must contain at least one non-empty matcher", pos))]
    EmptySelector { pos: usize },

    #[snafu(display("{}: {}", pos, message))]
    Invalid { pos: usize, message: String },

    #[snafu(display("{}: expression nested too deeply", pos))]
    TooDeep { pos: usize },
}
