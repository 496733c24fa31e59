//! Single-value aggregates
//!
//! Each range computes a partial result over its own documents; the
//! coordinator folds the partials into the final value. Partials are JSON:
//!
//! | Operator | Partial                          |
//! |----------|----------------------------------|
//! | Count    | `n`                              |
//! | Sum      | number                           |
//! | Min, Max | `{"item": v}`, or `{}` when none |
//! | Average  | `{"sum": s, "count": n}`         |

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ordering::compare_values;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateOperator {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateOperator {
    /// Parse an operator name as reported by the plan provider
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateOperator::Count),
            "sum" => Some(AggregateOperator::Sum),
            "min" => Some(AggregateOperator::Min),
            "max" => Some(AggregateOperator::Max),
            "avg" | "average" => Some(AggregateOperator::Average),
            _ => None,
        }
    }
}

/// Running sum that stays integral until a fractional value shows up
#[derive(Debug, Clone, Default, PartialEq)]
struct Sum {
    int: i64,
    float: Option<f64>,
}

impl Sum {
    fn add(&mut self, value: &Value) -> bool {
        let Value::Number(n) = value else {
            return false;
        };
        match (self.float, n.as_i64()) {
            (None, Some(i)) => match self.int.checked_add(i) {
                Some(total) => self.int = total,
                None => self.float = Some(self.int as f64 + i as f64),
            },
            (float, _) => {
                let f = n.as_f64().unwrap_or(0.0);
                self.float = Some(float.unwrap_or(self.int as f64) + f);
            }
        }
        true
    }

    fn value(&self) -> Value {
        match self.float {
            Some(f) => json!(f),
            None => json!(self.int),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Count(u64),
    Sum(Sum),
    Extreme(Option<Value>),
    Average { sum: f64, count: u64 },
}

/// Accumulator for one aggregate operator
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregator {
    operator: AggregateOperator,
    state: State,
}

impl Aggregator {
    pub fn new(operator: AggregateOperator) -> Self {
        let state = match operator {
            AggregateOperator::Count => State::Count(0),
            AggregateOperator::Sum => State::Sum(Sum::default()),
            AggregateOperator::Min | AggregateOperator::Max => State::Extreme(None),
            AggregateOperator::Average => State::Average { sum: 0.0, count: 0 },
        };
        Self { operator, state }
    }

    pub fn operator(&self) -> AggregateOperator {
        self.operator
    }

    fn keep_extreme(&mut self, candidate: &Value) {
        let wanted = if self.operator == AggregateOperator::Min {
            Ordering::Less
        } else {
            Ordering::Greater
        };
        if let State::Extreme(best) = &mut self.state {
            let replace = best
                .as_ref()
                .map_or(true, |b| compare_values(candidate, b) == wanted);
            if replace {
                *best = Some(candidate.clone());
            }
        }
    }

    /// Fold in one document value; `None` means the value is undefined
    pub fn add_value(&mut self, value: Option<&Value>) {
        let Some(value) = value else {
            return;
        };
        if matches!(self.state, State::Extreme(_)) {
            self.keep_extreme(value);
            return;
        }
        match &mut self.state {
            State::Count(n) => *n += 1,
            State::Sum(sum) => {
                sum.add(value);
            }
            State::Extreme(_) => {}
            State::Average { sum, count } => {
                if let Some(f) = value.as_f64() {
                    *sum += f;
                    *count += 1;
                }
            }
        }
    }

    /// This accumulator's state in partial form
    pub fn partial(&self) -> Value {
        match &self.state {
            State::Count(n) => json!(n),
            State::Sum(sum) => sum.value(),
            State::Extreme(Some(v)) => json!({ "item": v }),
            State::Extreme(None) => json!({}),
            State::Average { sum, count } => json!({ "sum": sum, "count": count }),
        }
    }

    /// Fold in a partial computed by one range
    ///
    /// Returns `false` if the partial does not have this operator's shape.
    pub fn add_partial(&mut self, partial: &Value) -> bool {
        if matches!(self.state, State::Extreme(_)) {
            let Some(fields) = partial.as_object() else {
                return false;
            };
            if let Some(item) = fields.get("item") {
                self.keep_extreme(item);
            }
            return true;
        }
        match &mut self.state {
            State::Count(n) => match partial.as_u64() {
                Some(c) => {
                    *n += c;
                    true
                }
                None => false,
            },
            State::Sum(sum) => sum.add(partial),
            State::Extreme(_) => true,
            State::Average { sum, count } => {
                match (
                    partial.get("sum").and_then(Value::as_f64),
                    partial.get("count").and_then(Value::as_u64),
                ) {
                    (Some(s), Some(c)) => {
                        *sum += s;
                        *count += c;
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Final value; `None` when it is undefined (MIN, MAX or AVG over nothing)
    pub fn result(&self) -> Option<Value> {
        match &self.state {
            State::Count(n) => Some(json!(n)),
            State::Sum(sum) => Some(sum.value()),
            State::Extreme(best) => best.clone(),
            State::Average { count: 0, .. } => None,
            State::Average { sum, count } => Some(json!(sum / *count as f64)),
        }
    }
}
