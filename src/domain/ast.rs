//! Trigger AST data structures.
//!
//! This module defines the abstract syntax tree for trigger rules:
//! - `CmpOp`: comparison operators usable in a term
//! - `BandState`: categorical zone an indicator occupies relative to bounds
//! - `Expression`: the four term forms (indicator, slope, band, gap)
//! - `Condition`: AND/OR tree over expressions
//! - `Action` / `Options` / `TriggerAst`: the full parsed rule
//!
//! The AST is immutable after parse. `Display` re-serializes to DSL text and
//! `canonical` produces the stable structural form used for fingerprinting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Eq => (left - right).abs() < EPSILON,
            CmpOp::Ne => (left - right).abs() >= EPSILON,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandState {
    Below,
    InBand,
    Above,
}

impl BandState {
    pub fn as_str(self) -> &'static str {
        match self {
            BandState::Below => "below",
            BandState::InBand => "in_band",
            BandState::Above => "above",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "below" => Some(BandState::Below),
            "in_band" => Some(BandState::InBand),
            "above" => Some(BandState::Above),
            _ => None,
        }
    }
}

/// One term of a condition. Closed set: adding a new expression form is a
/// compile-time-checked change in every match over this enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Point-in-time indicator reading compared against a constant.
    Indicator {
        name: String,
        region: Option<String>,
        cohort: Option<String>,
        op: CmpOp,
        value: f64,
    },
    /// Linear-regression slope of the indicator over a trailing window.
    Slope {
        name: String,
        window_days: u32,
        op: CmpOp,
        value: f64,
    },
    /// Categorical band membership.
    Band { name: String, expected: BandState },
    /// Absolute difference between two indicators.
    Gap {
        left: String,
        right: String,
        op: CmpOp,
        value: f64,
    },
}

impl Expression {
    /// Key under which this term's evidence is recorded.
    pub fn evidence_key(&self) -> String {
        match self {
            Expression::Indicator { name, .. }
            | Expression::Slope { name, .. }
            | Expression::Band { name, .. } => name.clone(),
            Expression::Gap { left, right, .. } => format!("{}_{}", left, right),
        }
    }

    fn canonical(&self) -> String {
        match self {
            Expression::Indicator {
                name,
                region,
                cohort,
                op,
                value,
            } => {
                let mut scope = String::new();
                if let Some(r) = region {
                    scope.push_str(&format!(",region={}", r));
                }
                if let Some(c) = cohort {
                    scope.push_str(&format!(",cohort={}", c));
                }
                format!("ind({}{},{},{})", name, scope, op.symbol(), value)
            }
            Expression::Slope {
                name,
                window_days,
                op,
                value,
            } => format!("slope({},{}d,{},{})", name, window_days, op.symbol(), value),
            Expression::Band { name, expected } => {
                format!("band({},{})", name, expected.as_str())
            }
            Expression::Gap {
                left,
                right,
                op,
                value,
            } => format!("gap({},{},{},{})", left, right, op.symbol(), value),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Indicator {
                name,
                region,
                cohort,
                op,
                value,
            } => {
                write!(f, "IND({}", name)?;
                if let Some(r) = region {
                    write!(f, ", region={}", r)?;
                }
                if let Some(c) = cohort {
                    write!(f, ", cohort={}", c)?;
                }
                write!(f, ") {} {}", op.symbol(), value)
            }
            Expression::Slope {
                name,
                window_days,
                op,
                value,
            } => write!(f, "SLOPE({}, {}d) {} {}", name, window_days, op.symbol(), value),
            Expression::Band { name, expected } => {
                write!(f, "BAND({}) IS {}", name, expected.as_str())
            }
            Expression::Gap {
                left,
                right,
                op,
                value,
            } => write!(f, "GAP({}, {}) {} {}", left, right, op.symbol(), value),
        }
    }
}

/// Condition tree. Binary nodes always have both children; AND binds tighter
/// than OR, so parser output never places an `Or` under an `And`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Expr(Expression),
}

impl Condition {
    /// Every indicator name referenced anywhere in the tree, including the
    /// second operand of `GAP`. Sorted and deduplicated.
    pub fn indicator_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, out: &mut BTreeSet<String>) {
        match self {
            Condition::And(left, right) | Condition::Or(left, right) => {
                left.collect_names(out);
                right.collect_names(out);
            }
            Condition::Expr(expr) => match expr {
                Expression::Indicator { name, .. }
                | Expression::Slope { name, .. }
                | Expression::Band { name, .. } => {
                    out.insert(name.clone());
                }
                Expression::Gap { left, right, .. } => {
                    out.insert(left.clone());
                    out.insert(right.clone());
                }
            },
        }
    }

    /// Stable structural serialization used in the fingerprint recipe.
    /// Two ASTs produce the same canonical form iff their structure is equal.
    pub fn canonical(&self) -> String {
        match self {
            Condition::And(left, right) => {
                format!("and({},{})", left.canonical(), right.canonical())
            }
            Condition::Or(left, right) => {
                format!("or({},{})", left.canonical(), right.canonical())
            }
            Condition::Expr(expr) => expr.canonical(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::And(left, right) => write!(f, "{} AND {}", left, right),
            Condition::Or(left, right) => write!(f, "{} OR {}", left, right),
            Condition::Expr(expr) => write!(f, "{}", expr),
        }
    }
}

/// The action clause: start a response package at an operating capacity tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub template_key: String,
    pub capacity: String,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "START {} IN {}", self.template_key, self.capacity)
    }
}

/// Optional tuning overrides from the `WITH` clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    pub cooldown_days: Option<u32>,
    pub persistence_days: Option<u32>,
    pub window_days: Option<u32>,
}

impl Options {
    pub fn is_empty(&self) -> bool {
        self.cooldown_days.is_none()
            && self.persistence_days.is_none()
            && self.window_days.is_none()
    }
}

/// A fully parsed trigger rule. Owned by whoever compiles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerAst {
    pub condition: Condition,
    pub persistence_days: u32,
    pub action: Action,
    pub options: Options,
}

impl fmt::Display for TriggerAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IF {} FOR {}d THEN {}",
            self.condition, self.persistence_days, self.action
        )?;
        if !self.options.is_empty() {
            write!(f, " WITH")?;
            if let Some(days) = self.options.cooldown_days {
                write!(f, " COOLDOWN={}d", days)?;
            }
            if let Some(days) = self.options.persistence_days {
                write!(f, " PERSISTENCE={}d", days)?;
            }
            if let Some(days) = self.options.window_days {
                write!(f, " WINDOW={}d", days)?;
            }
        }
        Ok(())
    }
}
