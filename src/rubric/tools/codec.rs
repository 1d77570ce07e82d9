//! The remote store keeps point values with the opposite sign of what callers
//! see: a deduction of 2 is stored as `-2`, a category limit of 10 as `-10`.
//! Everything above the accessor layer works with caller-facing values.

use serde_json::{Map, Number, Value};

/// Fields whose sign is inverted on the wire.
pub const SIGNED_FIELDS: [&str; 2] = ["pointLimit", "pointDelta"];

/// Converts caller-facing point values to their stored form.
pub fn encode(record: &mut Map<String, Value>) {
    flip_signs(record);
}

/// Converts stored point values back to their caller-facing form.
pub fn decode(record: &mut Map<String, Value>) {
    flip_signs(record);
}

fn flip_signs(record: &mut Map<String, Value>) {
    for field in SIGNED_FIELDS {
        if let Some(value) = record.get_mut(field) {
            if let Some(negated) = negate(value) {
                *value = negated;
            }
        }
    }
}

fn negate(value: &Value) -> Option<Value> {
    let number = value.as_number()?;
    if let Some(integer) = number.as_i64() {
        return integer.checked_neg().map(Value::from);
    }
    let float = number.as_f64()?;
    Number::from_f64(-float).map(Value::Number)
}
