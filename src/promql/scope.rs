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

use crate::promql::Error;
use crate::promql::ast::{Expr, MatchOp, Matcher};
use crate::promql::parser::parse;
use std::collections::{BTreeMap, BTreeSet};

/// Result of pinning an expression to a set of scope labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopedExpression {
    pub expr: String,
    /// Scope labels that replaced a conflicting matcher written by the user.
    pub overridden: BTreeSet<String>,
}

/// Adds an equality matcher for every scope label to every vector selector.
///
/// Matchers on other labels are kept. A matcher on a scope label is kept only
/// when it already is the exact equality being injected, any other matcher on
/// that label is replaced. Matchers are sorted afterwards, so applying the same
/// labels twice is a no-op.
pub fn inject_matchers(expr: &mut Expr, labels: &BTreeMap<String, String>) -> BTreeSet<String> {
    let mut overridden = BTreeSet::new();
    expr.for_each_selector_mut(&mut |selector| {
        for (name, value) in labels {
            let before = selector.matchers.len();
            selector
                .matchers
                .retain(|m| m.name != *name || (m.op == MatchOp::Equal && m.value == *value));
            if selector.matchers.len() != before {
                overridden.insert(name.clone());
            }
            if !selector.matchers.iter().any(|m| m.name == *name) {
                selector.matchers.push(Matcher::equal(name, value));
            }
        }
        selector.matchers.sort();
    });
    overridden
}

/// Parses `input` and scopes it to `labels`.
///
/// With no labels the expression is validated and returned verbatim.
pub fn scope_expression(
    input: &str,
    labels: &BTreeMap<String, String>,
) -> Result<ScopedExpression, Error> {
    let mut expr = parse(input)?;
    if labels.is_empty() {
        return Ok(ScopedExpression {
            expr: input.to_owned(),
            overridden: BTreeSet::new(),
        });
    }
    let overridden = inject_matchers(&mut expr, labels);
    Ok(ScopedExpression {
        expr: expr.to_string(),
        overridden,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_scope() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("cluster".to_owned(), "c".to_owned()),
            ("location".to_owned(), "l".to_owned()),
            ("project_id".to_owned(), "p".to_owned()),
        ])
    }

    fn namespace_scope() -> BTreeMap<String, String> {
        let mut labels = cluster_scope();
        labels.insert("namespace".to_owned(), "n".to_owned());
        labels
    }

    #[test]
    fn test_cluster_scope() {
        let scoped = scope_expression("sum(up)", &cluster_scope()).unwrap();
        assert_eq!(scoped.expr, r#"sum(up{cluster="c",location="l",project_id="p"})"#);
        assert!(scoped.overridden.is_empty());
    }

    #[test]
    fn test_namespace_scope() {
        let scoped = scope_expression("avg(down) > 1", &namespace_scope()).unwrap();
        assert_eq!(
            scoped.expr,
            r#"avg(down{cluster="c",location="l",namespace="n",project_id="p"}) > 1"#
        );
    }

    #[test]
    fn test_global_scope_is_verbatim() {
        let scoped = scope_expression("avg( up )", &BTreeMap::new()).unwrap();
        assert_eq!(scoped.expr, "avg( up )");
        assert!(scope_expression("avg(", &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_injection_is_idempotent() {
        let labels = namespace_scope();
        let once = scope_expression(
            r#"sum(rate(http_errors{job="api"}[5m])) / sum(rate(http_total[5m]))"#,
            &labels,
        )
        .unwrap();
        let twice = scope_expression(&once.expr, &labels).unwrap();
        assert_eq!(once.expr, twice.expr);
        assert!(twice.overridden.is_empty());
        assert_eq!(once.expr.matches("namespace=").count(), 2);
    }

    #[test]
    fn test_conflicting_matcher_is_replaced() {
        let scoped =
            scope_expression(r#"up{namespace=~"kube-.*",job="x"}"#, &namespace_scope()).unwrap();
        assert_eq!(
            scoped.expr,
            r#"up{cluster="c",job="x",location="l",namespace="n",project_id="p"}"#
        );
        assert_eq!(scoped.overridden, BTreeSet::from(["namespace".to_owned()]));
    }

    #[test]
    fn test_expression_without_selectors() {
        let scoped = scope_expression("vector(1)", &cluster_scope()).unwrap();
        assert_eq!(scoped.expr, "vector(1)");
    }

    #[test]
    fn test_scopes_every_selector() {
        let scoped = scope_expression(
            "max_over_time(x[5m:1m]) + on(job) group_left y offset 1h",
            &BTreeMap::from([("cluster".to_owned(), "c".to_owned())]),
        )
        .unwrap();
        assert_eq!(
            scoped.expr,
            r#"max_over_time(x{cluster="c"}[5m:1m]) + on (job) group_left () y{cluster="c"} offset 1h"#
        );
    }
}
