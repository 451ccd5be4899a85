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

use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Numeric literal, kept in its source spelling.
    Number(String),
    String(String),
    VectorSelector(VectorSelector),
    MatrixSelector(MatrixSelector),
    Subquery(Subquery),
    Paren(Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryExpr),
    Aggregate(AggregateExpr),
    Call(Call),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::Regex => "=~",
            MatchOp::NotRegex => "!~",
        })
    }
}

/// Field order gives the canonical matcher ordering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Matcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl Matcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            value: value.into(),
        }
    }

    /// Whether the matcher accepts a series that lacks the label.
    pub fn matches_empty(&self) -> bool {
        match self.op {
            MatchOp::Equal => self.value.is_empty(),
            MatchOp::NotEqual => !self.value.is_empty(),
            // Regexes are not evaluated; only the trivially empty-matching ones
            // are recognised.
            MatchOp::Regex => matches!(self.value.as_str(), "" | ".*"),
            MatchOp::NotRegex => !matches!(self.value.as_str(), "" | ".*"),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.op, Quoted(&self.value))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AtModifier {
    Timestamp(String),
    Start,
    End,
}

/// `offset` and `@` modifiers shared by selectors and subqueries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Modifiers {
    /// Duration text including a leading `-` for negative offsets.
    pub offset: Option<String>,
    pub at: Option<AtModifier>,
}

impl Modifiers {
    pub fn is_empty(&self) -> bool {
        self.offset.is_none() && self.at.is_none()
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(offset) = &self.offset {
            write!(f, " offset {offset}")?;
        }
        match &self.at {
            Some(AtModifier::Timestamp(ts)) => write!(f, " @ {ts}"),
            Some(AtModifier::Start) => f.write_str(" @ start()"),
            Some(AtModifier::End) => f.write_str(" @ end()"),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorSelector {
    pub name: Option<String>,
    pub matchers: Vec<Matcher>,
    pub modifiers: Modifiers,
}

impl VectorSelector {
    fn fmt_selector(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            f.write_str(name)?;
        }
        if !self.matchers.is_empty() || self.name.is_none() {
            f.write_str("{")?;
            for (i, m) in self.matchers.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{m}")?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_selector(f)?;
        write!(f, "{}", self.modifiers)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatrixSelector {
    /// The modifiers of the inner selector print after the range.
    pub selector: VectorSelector,
    pub range: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Subquery {
    pub expr: Box<Expr>,
    pub range: String,
    pub step: Option<String>,
    pub modifiers: Modifiers,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Unless,
    Eql,
    Neq,
    Lte,
    Lss,
    Gte,
    Gtr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Atan2,
    Pow,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And | BinaryOp::Unless => 2,
            BinaryOp::Eql
            | BinaryOp::Neq
            | BinaryOp::Lte
            | BinaryOp::Lss
            | BinaryOp::Gte
            | BinaryOp::Gtr => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Atan2 => 5,
            BinaryOp::Pow => 6,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 3
    }

    pub fn is_set_operator(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Unless)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Unless => "unless",
            BinaryOp::Eql => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lte => "<=",
            BinaryOp::Lss => "<",
            BinaryOp::Gte => ">=",
            BinaryOp::Gtr => ">",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Atan2 => "atan2",
            BinaryOp::Pow => "^",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorMatching {
    pub card: Cardinality,
    /// `on` when true, `ignoring` otherwise.
    pub on: bool,
    pub labels: Vec<String>,
    /// Extra labels of `group_left`/`group_right`.
    pub include: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub return_bool: bool,
    pub matching: Option<VectorMatching>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grouping {
    pub without: bool,
    pub labels: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateExpr {
    pub op: String,
    pub grouping: Option<Grouping>,
    pub param: Option<Box<Expr>>,
    pub expr: Box<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub func: String,
    pub args: Vec<Expr>,
}

impl Expr {
    /// Visits every vector selector, including those inside range selectors.
    pub fn for_each_selector_mut(&mut self, f: &mut impl FnMut(&mut VectorSelector)) {
        match self {
            Expr::Number(_) | Expr::String(_) => {}
            Expr::VectorSelector(vs) => f(vs),
            Expr::MatrixSelector(ms) => f(&mut ms.selector),
            Expr::Subquery(sq) => sq.expr.for_each_selector_mut(f),
            Expr::Paren(inner) | Expr::Unary(_, inner) => inner.for_each_selector_mut(f),
            Expr::Binary(b) => {
                b.lhs.for_each_selector_mut(f);
                b.rhs.for_each_selector_mut(f);
            }
            Expr::Aggregate(agg) => {
                if let Some(param) = agg.param.as_mut() {
                    param.for_each_selector_mut(f);
                }
                agg.expr.for_each_selector_mut(f);
            }
            Expr::Call(call) => {
                for arg in &mut call.args {
                    arg.for_each_selector_mut(f);
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => f.write_str(n),
            Expr::String(s) => write!(f, "{}", Quoted(s)),
            Expr::VectorSelector(vs) => write!(f, "{vs}"),
            Expr::MatrixSelector(ms) => {
                ms.selector.fmt_selector(f)?;
                write!(f, "[{}]{}", ms.range, ms.selector.modifiers)
            }
            Expr::Subquery(sq) => write!(
                f,
                "{}[{}:{}]{}",
                sq.expr,
                sq.range,
                sq.step.as_deref().unwrap_or_default(),
                sq.modifiers
            ),
            Expr::Paren(inner) => write!(f, "({inner})"),
            Expr::Unary(UnaryOp::Neg, inner) => write!(f, "-{inner}"),
            Expr::Unary(UnaryOp::Pos, inner) => write!(f, "+{inner}"),
            Expr::Binary(b) => {
                write!(f, "{} {}", b.lhs, b.op)?;
                if b.return_bool {
                    f.write_str(" bool")?;
                }
                if let Some(vm) = &b.matching
                    && (vm.on || !vm.labels.is_empty())
                {
                    let tag = if vm.on { "on" } else { "ignoring" };
                    write!(f, " {tag} ({})", vm.labels.join(", "))?;
                    match vm.card {
                        Cardinality::ManyToOne => {
                            write!(f, " group_left ({})", vm.include.join(", "))?
                        }
                        Cardinality::OneToMany => {
                            write!(f, " group_right ({})", vm.include.join(", "))?
                        }
                        Cardinality::OneToOne => {}
                    }
                }
                write!(f, " {}", b.rhs)
            }
            Expr::Aggregate(agg) => {
                f.write_str(&agg.op)?;
                match &agg.grouping {
                    Some(g) if g.without => write!(f, " without ({}) ", g.labels.join(", "))?,
                    Some(g) if !g.labels.is_empty() => {
                        write!(f, " by ({}) ", g.labels.join(", "))?
                    }
                    _ => {}
                }
                f.write_str("(")?;
                if let Some(param) = &agg.param {
                    write!(f, "{param}, ")?;
                }
                write!(f, "{})", agg.expr)
            }
            Expr::Call(call) => {
                write!(f, "{}(", call.func)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Double-quoted string literal with escapes the lexer understands.
struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for c in self.0.chars() {
            match c {
                '"' => f.write_str("\\\"")?,
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\r' => f.write_str("\\r")?,
                '\t' => f.write_str("\\t")?,
                c if (c as u32) < 0x20 || c as u32 == 0x7f => write!(f, "\\x{:02x}", c as u32)?,
                c => write!(f, "{c}")?,
            }
        }
        f.write_str("\"")
    }
}
