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

use crate::promql::ast::{
    AggregateExpr, AtModifier, BinaryExpr, BinaryOp, Call, Cardinality, Expr, Grouping, MatchOp,
    Matcher, MatrixSelector, Modifiers, Subquery, UnaryOp, VectorMatching, VectorSelector,
};
use crate::promql::lexer::{Token, TokenKind, tokenize};
use crate::promql::{
    EmptySelectorSnafu, Error, InvalidDurationSnafu, InvalidNumberSnafu, InvalidSnafu,
    TooDeepSnafu, UnexpectedTokenSnafu, UnknownFunctionSnafu,
};
use crate::types::v1::duration::parse_duration;
use snafu::ensure;

/// Bound on expression nesting, counting parentheses, calls, unary operators
/// and binary operator chains alike. Keeps parsing and every later walk of the
/// tree within a small stack.
const MAX_DEPTH: usize = 128;

const AGGREGATORS: &[&str] = &[
    "avg",
    "bottomk",
    "count",
    "count_values",
    "group",
    "limit_ratio",
    "limitk",
    "max",
    "min",
    "quantile",
    "stddev",
    "stdvar",
    "sum",
    "topk",
];

const PARAM_AGGREGATORS: &[&str] = &[
    "bottomk",
    "count_values",
    "limit_ratio",
    "limitk",
    "quantile",
    "topk",
];

const FUNCTIONS: &[&str] = &[
    "abs",
    "absent",
    "absent_over_time",
    "acos",
    "acosh",
    "asin",
    "asinh",
    "atan",
    "atanh",
    "avg_over_time",
    "ceil",
    "changes",
    "clamp",
    "clamp_max",
    "clamp_min",
    "cos",
    "cosh",
    "count_over_time",
    "day_of_month",
    "day_of_week",
    "day_of_year",
    "days_in_month",
    "deg",
    "delta",
    "deriv",
    "double_exponential_smoothing",
    "exp",
    "floor",
    "histogram_avg",
    "histogram_count",
    "histogram_fraction",
    "histogram_quantile",
    "histogram_stddev",
    "histogram_stdvar",
    "histogram_sum",
    "holt_winters",
    "hour",
    "idelta",
    "increase",
    "irate",
    "label_join",
    "label_replace",
    "last_over_time",
    "ln",
    "log10",
    "log2",
    "mad_over_time",
    "max_over_time",
    "min_over_time",
    "minute",
    "month",
    "pi",
    "predict_linear",
    "present_over_time",
    "quantile_over_time",
    "rad",
    "rate",
    "resets",
    "round",
    "scalar",
    "sgn",
    "sin",
    "sinh",
    "sort",
    "sort_by_label",
    "sort_by_label_desc",
    "sort_desc",
    "sqrt",
    "stddev_over_time",
    "stdvar_over_time",
    "sum_over_time",
    "tan",
    "tanh",
    "time",
    "timestamp",
    "vector",
    "year",
];

/// Parses a PromQL expression.
pub fn parse(input: &str) -> Result<Expr, Error> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expr(0)?;
    parser.expect(TokenKind::Eof)?;
    Ok(expr)
}

struct Parser {
    /// Always terminated by an `Eof` token, which `advance` never moves past.
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(s) if s == keyword)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Error> {
        if *self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            self.unexpected(&kind.to_string())
        }
    }

    fn unexpected<T>(&self, expected: &str) -> Result<T, Error> {
        let token = self.peek();
        UnexpectedTokenSnafu {
            pos: token.pos,
            found: token.kind.to_string(),
            expected,
        }
        .fail()
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek_kind() {
            TokenKind::Add => BinaryOp::Add,
            TokenKind::Sub => BinaryOp::Sub,
            TokenKind::Mul => BinaryOp::Mul,
            TokenKind::Div => BinaryOp::Div,
            TokenKind::Mod => BinaryOp::Mod,
            TokenKind::Eql => BinaryOp::Eql,
            TokenKind::Neq => BinaryOp::Neq,
            TokenKind::Lte => BinaryOp::Lte,
            TokenKind::Lss => BinaryOp::Lss,
            TokenKind::Gte => BinaryOp::Gte,
            TokenKind::Gtr => BinaryOp::Gtr,
            TokenKind::Ident(s) => match s.as_str() {
                "and" => BinaryOp::And,
                "or" => BinaryOp::Or,
                "unless" => BinaryOp::Unless,
                "atan2" => BinaryOp::Atan2,
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing over the left-associative binary operators. `^` is
    /// handled in [`Parser::parse_unary`] since it binds tighter than unary minus.
    fn parse_expr(&mut self, min_precedence: u8) -> Result<Expr, Error> {
        let depth = self.depth;
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binary_op() {
            if op.precedence() < min_precedence {
                break;
            }
            // Each operator wraps the tree built so far one level deeper.
            self.descend()?;
            let pos = self.advance().pos;
            let (return_bool, matching) = self.parse_binary_modifiers(op, pos)?;
            let rhs = self.parse_expr(op.precedence() + 1)?;
            lhs = binary(op, lhs, rhs, return_bool, matching);
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn descend(&mut self) -> Result<(), Error> {
        self.depth += 1;
        ensure!(
            self.depth <= MAX_DEPTH,
            TooDeepSnafu {
                pos: self.peek().pos
            }
        );
        Ok(())
    }

    /// Every nested operand passes through here.
    fn parse_unary(&mut self) -> Result<Expr, Error> {
        self.descend()?;
        let expr = self.parse_operand();
        self.depth -= 1;
        expr
    }

    fn parse_operand(&mut self) -> Result<Expr, Error> {
        let op = match self.peek_kind() {
            TokenKind::Sub => Some(UnaryOp::Neg),
            TokenKind::Add => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }

        let base = self.parse_postfix()?;
        if *self.peek_kind() == TokenKind::Pow {
            let pos = self.advance().pos;
            let (return_bool, matching) = self.parse_binary_modifiers(BinaryOp::Pow, pos)?;
            let exponent = self.parse_unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent, return_bool, matching));
        }
        Ok(base)
    }

    fn parse_binary_modifiers(
        &mut self,
        op: BinaryOp,
        pos: usize,
    ) -> Result<(bool, Option<VectorMatching>), Error> {
        let return_bool = self.eat_keyword("bool");
        ensure!(
            !return_bool || op.is_comparison(),
            InvalidSnafu {
                pos,
                message: "bool modifier can only be used on comparison operators",
            }
        );

        let on = if self.eat_keyword("on") {
            true
        } else if self.eat_keyword("ignoring") {
            false
        } else {
            return Ok((return_bool, None));
        };
        let labels = self.parse_label_list()?;

        let card = if self.eat_keyword("group_left") {
            Cardinality::ManyToOne
        } else if self.eat_keyword("group_right") {
            Cardinality::OneToMany
        } else {
            Cardinality::OneToOne
        };
        let mut include = Vec::new();
        if card != Cardinality::OneToOne {
            ensure!(
                !op.is_set_operator(),
                InvalidSnafu {
                    pos,
                    message: format!("no grouping allowed for \"{op}\" operation"),
                }
            );
            if *self.peek_kind() == TokenKind::LParen {
                include = self.parse_label_list()?;
            }
        }

        Ok((
            return_bool,
            Some(VectorMatching {
                card,
                on,
                labels,
                include,
            }),
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_primary()?;
        loop {
            if *self.peek_kind() == TokenKind::LBracket {
                expr = self.parse_range(expr)?;
            } else if *self.peek_kind() == TokenKind::At {
                self.parse_at(&mut expr)?;
            } else if self.at_keyword("offset") {
                self.parse_offset(&mut expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(_) => Ok(Expr::Number(self.number()?)),
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::String(value))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::LBrace => self.parse_selector(None, token.pos),
            TokenKind::Ident(name) => {
                self.advance();
                let opens_aggregate = *self.peek_kind() == TokenKind::LParen
                    || self.at_keyword("by")
                    || self.at_keyword("without");
                if AGGREGATORS.contains(&name.as_str()) && opens_aggregate {
                    self.parse_aggregate(name, token.pos)
                } else if *self.peek_kind() == TokenKind::LParen {
                    self.parse_call(name, token.pos)
                } else {
                    self.parse_selector(Some(name), token.pos)
                }
            }
            _ => self.unexpected("expression"),
        }
    }

    fn parse_selector(&mut self, name: Option<String>, pos: usize) -> Result<Expr, Error> {
        let mut matchers = Vec::new();
        if self.eat(&TokenKind::LBrace) {
            loop {
                if self.eat(&TokenKind::RBrace) {
                    break;
                }
                matchers.push(self.parse_matcher()?);
                if !self.eat(&TokenKind::Comma) {
                    self.expect(TokenKind::RBrace)?;
                    break;
                }
            }
        }

        if let Some(name) = &name {
            ensure!(
                !matchers.iter().any(|m| m.name == "__name__"),
                InvalidSnafu {
                    pos,
                    message: format!("metric name must not be set twice: \"{name}\""),
                }
            );
        }
        ensure!(
            name.is_some() || matchers.iter().any(|m| !m.matches_empty()),
            EmptySelectorSnafu { pos }
        );

        Ok(Expr::VectorSelector(VectorSelector {
            name,
            matchers,
            modifiers: Modifiers::default(),
        }))
    }

    fn parse_matcher(&mut self) -> Result<Matcher, Error> {
        let name = self.label_name()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => MatchOp::Equal,
            TokenKind::Neq => MatchOp::NotEqual,
            TokenKind::EqlRegex => MatchOp::Regex,
            TokenKind::NeqRegex => MatchOp::NotRegex,
            _ => return self.unexpected("label matching operator"),
        };
        self.advance();
        let value = match self.peek_kind() {
            TokenKind::Str(value) => value.clone(),
            _ => return self.unexpected("string"),
        };
        self.advance();
        Ok(Matcher { name, op, value })
    }

    fn label_name(&mut self) -> Result<String, Error> {
        let name = match self.peek_kind() {
            TokenKind::Ident(name) if !name.contains(':') => name.clone(),
            // `inf` and `nan` lex as numbers but are valid label names.
            TokenKind::Number(name) if name.starts_with(|c: char| c.is_ascii_alphabetic()) => {
                name.clone()
            }
            _ => return self.unexpected("label name"),
        };
        self.advance();
        Ok(name)
    }

    fn parse_label_list(&mut self) -> Result<Vec<String>, Error> {
        self.expect(TokenKind::LParen)?;
        let mut labels = Vec::new();
        loop {
            if self.eat(&TokenKind::RParen) {
                return Ok(labels);
            }
            labels.push(self.label_name()?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RParen)?;
                return Ok(labels);
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, Error> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        loop {
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            args.push(self.parse_expr(0)?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RParen)?;
                return Ok(args);
            }
        }
    }

    fn parse_call(&mut self, func: String, pos: usize) -> Result<Expr, Error> {
        ensure!(
            FUNCTIONS.contains(&func.as_str()),
            UnknownFunctionSnafu {
                pos,
                name: func.clone(),
            }
        );
        let args = self.parse_args()?;
        Ok(Expr::Call(Call { func, args }))
    }

    fn parse_grouping(&mut self) -> Result<Option<Grouping>, Error> {
        let without = if self.eat_keyword("by") {
            false
        } else if self.eat_keyword("without") {
            true
        } else {
            return Ok(None);
        };
        let labels = self.parse_label_list()?;
        Ok(Some(Grouping { without, labels }))
    }

    fn parse_aggregate(&mut self, op: String, pos: usize) -> Result<Expr, Error> {
        let mut grouping = self.parse_grouping()?;
        let args = self.parse_args()?;
        if grouping.is_none() {
            grouping = self.parse_grouping()?;
        }

        let takes_param = PARAM_AGGREGATORS.contains(&op.as_str());
        let expected = if takes_param { 2 } else { 1 };
        let got = args.len();
        let mut args = args.into_iter();
        let (param, expr) = match (takes_param, args.next(), args.next(), args.next()) {
            (false, Some(expr), None, None) => (None, expr),
            (true, Some(param), Some(expr), None) => (Some(Box::new(param)), expr),
            _ => {
                return InvalidSnafu {
                    pos,
                    message: format!(
                        "wrong number of arguments for aggregate expression provided, expected {expected}, got {got}"
                    ),
                }
                .fail();
            }
        };

        Ok(Expr::Aggregate(AggregateExpr {
            op,
            grouping,
            param,
            expr: Box::new(expr),
        }))
    }

    fn parse_range(&mut self, expr: Expr) -> Result<Expr, Error> {
        let pos = self.advance().pos;
        let range = self.duration()?;

        if self.eat(&TokenKind::Colon) {
            let step = if *self.peek_kind() == TokenKind::RBracket {
                None
            } else {
                Some(self.duration()?)
            };
            self.expect(TokenKind::RBracket)?;
            ensure!(
                !matches!(expr, Expr::MatrixSelector(_) | Expr::Subquery(_)),
                InvalidSnafu {
                    pos,
                    message: "subquery is only allowed on instant vector",
                }
            );
            return Ok(Expr::Subquery(Subquery {
                expr: Box::new(expr),
                range,
                step,
                modifiers: Modifiers::default(),
            }));
        }

        self.expect(TokenKind::RBracket)?;
        match expr {
            Expr::VectorSelector(selector) if selector.modifiers.is_empty() => {
                Ok(Expr::MatrixSelector(MatrixSelector { selector, range }))
            }
            Expr::VectorSelector(_) => InvalidSnafu {
                pos,
                message: "no offset or @ modifiers allowed before range",
            }
            .fail(),
            _ => InvalidSnafu {
                pos,
                message: "ranges only allowed for vector selectors",
            }
            .fail(),
        }
    }

    fn parse_offset(&mut self, expr: &mut Expr) -> Result<(), Error> {
        let pos = self.advance().pos;
        let negative = self.eat(&TokenKind::Sub);
        let duration = self.duration()?;
        let modifiers = modifiers_mut(expr, pos, "offset")?;
        ensure!(
            modifiers.offset.is_none(),
            InvalidSnafu {
                pos,
                message: "offset may not be set multiple times",
            }
        );
        modifiers.offset = Some(if negative {
            format!("-{duration}")
        } else {
            duration
        });
        Ok(())
    }

    fn parse_at(&mut self, expr: &mut Expr) -> Result<(), Error> {
        let pos = self.advance().pos;
        let at = if self.at_keyword("start") || self.at_keyword("end") {
            let start = self.at_keyword("start");
            self.advance();
            self.expect(TokenKind::LParen)?;
            self.expect(TokenKind::RParen)?;
            if start {
                AtModifier::Start
            } else {
                AtModifier::End
            }
        } else {
            let negative = self.eat(&TokenKind::Sub);
            let timestamp = self.number()?;
            AtModifier::Timestamp(if negative {
                format!("-{timestamp}")
            } else {
                timestamp
            })
        };

        let modifiers = modifiers_mut(expr, pos, "@")?;
        ensure!(
            modifiers.at.is_none(),
            InvalidSnafu {
                pos,
                message: "@ <timestamp> may not be set multiple times",
            }
        );
        modifiers.at = Some(at);
        Ok(())
    }

    fn number(&mut self) -> Result<String, Error> {
        let token = self.peek().clone();
        let TokenKind::Number(text) = token.kind else {
            return self.unexpected("number");
        };
        ensure!(
            valid_number(&text),
            InvalidNumberSnafu {
                pos: token.pos,
                text,
            }
        );
        self.advance();
        Ok(text)
    }

    fn duration(&mut self) -> Result<String, Error> {
        let token = self.peek().clone();
        let TokenKind::Number(text) = token.kind else {
            return self.unexpected("duration");
        };
        if parse_duration(&text).is_err() {
            return InvalidDurationSnafu {
                pos: token.pos,
                text,
            }
            .fail();
        }
        self.advance();
        Ok(text)
    }
}

fn binary(
    op: BinaryOp,
    lhs: Expr,
    rhs: Expr,
    return_bool: bool,
    matching: Option<VectorMatching>,
) -> Expr {
    Expr::Binary(BinaryExpr {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        return_bool,
        matching,
    })
}

fn modifiers_mut<'a>(
    expr: &'a mut Expr,
    pos: usize,
    modifier: &str,
) -> Result<&'a mut Modifiers, Error> {
    match expr {
        Expr::VectorSelector(vs) => Ok(&mut vs.modifiers),
        Expr::MatrixSelector(ms) => Ok(&mut ms.selector.modifiers),
        Expr::Subquery(sq) => Ok(&mut sq.modifiers),
        _ => InvalidSnafu {
            pos,
            message: format!(
                "{modifier} modifier must be preceded by an instant vector selector or range vector selector or a subquery"
            ),
        }
        .fail(),
    }
}

fn valid_number(text: &str) -> bool {
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).is_ok();
    }
    text.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(input: &str) -> String {
        parse(input).unwrap().to_string()
    }

    #[test]
    fn test_prints_canonical_form() {
        let cases = [
            ("up", "up"),
            ("up{job = 'api' , }", r#"up{job="api"}"#),
            (
                "sum(rate(http_requests_total{code=~\"5..\"}[5m])) by (job)",
                "sum by (job) (rate(http_requests_total{code=~\"5..\"}[5m]))",
            ),
            ("topk(5, x)", "topk(5, x)"),
            ("count without(instance)(x)", "count without (instance) (x)"),
            (
                "a + on(b) group_left(c) d",
                "a + on (b) group_left (c) d",
            ),
            ("a == bool 1", "a == bool 1"),
            ("a and ignoring(x) b", "a and ignoring (x) b"),
            ("x offset 5m @ 100", "x offset 5m @ 100"),
            ("rate(x[5m] offset -1h)", "rate(x[5m] offset -1h)"),
            (
                "max_over_time(rate(x[1m])[30m:1m])",
                "max_over_time(rate(x[1m])[30m:1m])",
            ),
            ("x[1h:] @ end()", "x[1h:] @ end()"),
            ("-(1 + 2)", "-(1 + 2)"),
            (
                r#"label_replace(up, "dst", "$1", "src", "(.*)")"#,
                r#"label_replace(up, "dst", "$1", "src", "(.*)")"#,
            ),
            (r#"{__name__="up"}"#, r#"{__name__="up"}"#),
            ("job:up:sum > 0.5 # comment", "job:up:sum > 0.5"),
        ];
        for (input, want) in cases {
            assert_eq!(canonical(input), want, "input: {input}");
        }
    }

    #[test]
    fn test_operator_precedence() {
        let Expr::Binary(add) = parse("1 + 2 * 3").unwrap() else {
            panic!("expected binary expression");
        };
        assert_eq!(add.op, BinaryOp::Add);
        assert!(matches!(*add.rhs, Expr::Binary(BinaryExpr { op: BinaryOp::Mul, .. })));

        let Expr::Binary(or) = parse("a or b and c").unwrap() else {
            panic!("expected binary expression");
        };
        assert_eq!(or.op, BinaryOp::Or);

        let Expr::Binary(sub) = parse("a - b - c").unwrap() else {
            panic!("expected binary expression");
        };
        assert!(matches!(*sub.lhs, Expr::Binary(BinaryExpr { op: BinaryOp::Sub, .. })));
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let Expr::Unary(UnaryOp::Neg, inner) = parse("-1 ^ 2").unwrap() else {
            panic!("expected unary expression");
        };
        assert!(matches!(*inner, Expr::Binary(BinaryExpr { op: BinaryOp::Pow, .. })));

        let Expr::Binary(pow) = parse("2 ^ 3 ^ 2").unwrap() else {
            panic!("expected binary expression");
        };
        assert!(matches!(*pow.rhs, Expr::Binary(BinaryExpr { op: BinaryOp::Pow, .. })));
    }

    #[test]
    fn test_rejects_invalid_expressions() {
        assert_eq!(parse("{}"), Err(Error::EmptySelector { pos: 0 }));
        assert_eq!(parse(r#"{a=""}"#), Err(Error::EmptySelector { pos: 0 }));
        assert_eq!(parse(r#"{a=~".*"}"#), Err(Error::EmptySelector { pos: 0 }));
        assert!(parse(r#"{a=~".+"}"#).is_ok());
        assert_eq!(
            parse("foo(x)"),
            Err(Error::UnknownFunction {
                pos: 0,
                name: "foo".into()
            })
        );
        assert_eq!(
            parse("x[5x]"),
            Err(Error::InvalidDuration {
                pos: 2,
                text: "5x".into()
            })
        );
        assert!(matches!(parse("sum("), Err(Error::UnexpectedToken { .. })));
        assert!(matches!(parse("a and bool b"), Err(Error::Invalid { .. })));
        assert!(matches!(parse(r#"foo{__name__="bar"}"#), Err(Error::Invalid { .. })));
        assert!(matches!(parse("rate(x)[5m]"), Err(Error::Invalid { .. })));
        assert!(matches!(parse("x offset 1m [5m]"), Err(Error::Invalid { .. })));
        assert!(matches!(parse("topk(x)"), Err(Error::Invalid { .. })));
        assert!(matches!(parse("1 offset 5m"), Err(Error::Invalid { .. })));
        assert!(matches!(parse("up up"), Err(Error::UnexpectedToken { .. })));
    }

    fn nested_parens(depth: usize) -> String {
        format!("{}up{}", "(".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn test_accepts_moderate_nesting() {
        assert!(parse(&nested_parens(100)).is_ok());
        assert!(parse(&format!("{}up", "-".repeat(100))).is_ok());
        let sum = vec!["up"; 100].join(" + ");
        assert_eq!(canonical(&sum), sum);
    }

    #[test]
    fn test_rejects_deep_nesting_on_small_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let parens = parse(&nested_parens(10_000));
                let calls = parse(&format!("{}up{}", "abs(".repeat(10_000), ")".repeat(10_000)));
                let chain = parse(&vec!["up"; 10_000].join(" + "));
                let powers = parse(&vec!["2"; 10_000].join(" ^ "));
                (parens, calls, chain, powers)
            })
            .unwrap();
        let (parens, calls, chain, powers) = handle.join().unwrap();
        assert!(matches!(parens, Err(Error::TooDeep { .. })));
        assert!(matches!(calls, Err(Error::TooDeep { .. })));
        assert!(matches!(chain, Err(Error::TooDeep { .. })));
        assert!(matches!(powers, Err(Error::TooDeep { .. })));
    }
}
