//! Result normalization.
//!
//! # Purpose
//! Computed results arrive in a handful of shapes; [`ComputedValue`] tags the
//! shape once at the boundary and [`normalize`] turns it into plain JSON.
//!
//! | input | output |
//! |---|---|
//! | sequence | sequence, each element normalized |
//! | mapping | unchanged |
//! | numeric array | `[nested list]` |
//! | scalar | unchanged |
//!
//! A numeric array inside a sequence becomes a nested list in place; only a
//! bare top-level array is wrapped in an extra sequence.
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ComputedValue {
    Sequence(Vec<ComputedValue>),
    Mapping(Map<String, Value>),
    NumericArray(NumericArray),
    Scalar(Value),
}

impl From<Value> for ComputedValue {
    /// Plain JSON never carries a numeric array tag; arrays are sequences.
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => {
                ComputedValue::Sequence(items.into_iter().map(ComputedValue::from).collect())
            }
            Value::Object(map) => ComputedValue::Mapping(map),
            other => ComputedValue::Scalar(other),
        }
    }
}

impl From<NumericArray> for ComputedValue {
    fn from(array: NumericArray) -> Self {
        ComputedValue::NumericArray(array)
    }
}

/// Upper bound on the list entries plus values a shaped array expands into.
pub const MAX_ARRAY_NODES: usize = 1 << 26;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("shape {shape:?} needs {expected} values, got {actual}")]
    Mismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("shape {shape:?} exceeds the array size limit")]
    Oversized { shape: Vec<usize> },
}

/// Dense row-major numeric array with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    shape: Vec<usize>,
    values: Vec<Value>,
}

impl NumericArray {
    /// One-dimensional array.
    pub fn from_values<N: Into<Number>>(values: impl IntoIterator<Item = N>) -> Self {
        let values: Vec<Value> = values
            .into_iter()
            .map(|n| Value::Number(n.into()))
            .collect();
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    /// One-dimensional float array; NaN and infinities become `null`.
    pub fn from_f64s(values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<Value> = values
            .into_iter()
            .map(|v| Number::from_f64(v).map_or(Value::Null, Value::Number))
            .collect();
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    /// Reshape; the element count must match the product of `shape`.
    /// An empty shape is a zero-dimensional array holding one value.
    ///
    /// Shapes whose nested form would exceed [`MAX_ARRAY_NODES`] are
    /// rejected, including empty fan-outs such as `[usize::MAX, 0]`.
    pub fn with_shape(self, shape: Vec<usize>) -> Result<Self, ShapeError> {
        let Some(expected) = element_count(&shape) else {
            return Err(ShapeError::Oversized { shape });
        };
        if expected != self.values.len() {
            return Err(ShapeError::Mismatch {
                shape,
                expected,
                actual: self.values.len(),
            });
        }
        Ok(Self {
            shape,
            values: self.values,
        })
    }

    /// Nested JSON lists following the shape; a 0-d array is its bare value.
    pub fn to_json(&self) -> Value {
        nest(&self.shape, &self.values)
    }
}

/// Product of `shape`, or `None` when the nested form would overflow or pass
/// [`MAX_ARRAY_NODES`].
fn element_count(shape: &[usize]) -> Option<usize> {
    let mut level = 1usize;
    let mut nodes = 0usize;
    for &dim in shape {
        level = level.checked_mul(dim)?;
        nodes = nodes.checked_add(level)?;
    }
    (nodes <= MAX_ARRAY_NODES).then_some(level)
}

// Shapes are validated on construction, so strides cannot overflow here.
fn nest(shape: &[usize], values: &[Value]) -> Value {
    match shape.split_first() {
        None => values.first().cloned().unwrap_or(Value::Null),
        Some((&len, rest)) => {
            let stride: usize = rest.iter().product();
            Value::Array(
                (0..len)
                    .map(|i| nest(rest, &values[i * stride..(i + 1) * stride]))
                    .collect(),
            )
        }
    }
}

pub fn normalize(value: ComputedValue) -> Value {
    match value {
        ComputedValue::NumericArray(array) => Value::Array(vec![array.to_json()]),
        other => normalize_nested(other),
    }
}

fn normalize_nested(value: ComputedValue) -> Value {
    match value {
        ComputedValue::Sequence(items) => {
            Value::Array(items.into_iter().map(normalize_nested).collect())
        }
        ComputedValue::Mapping(map) => Value::Object(map),
        ComputedValue::NumericArray(array) => array.to_json(),
        ComputedValue::Scalar(value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_array_is_wrapped() {
        let value = normalize(NumericArray::from_values([1, 2, 3]).into());
        assert_eq!(value, json!([[1, 2, 3]]));
    }

    #[test]
    fn mapping_passes_through() {
        assert_eq!(normalize(json!({"a": 1}).into()), json!({"a": 1}));
    }

    #[test]
    fn arrays_inside_sequences_become_lists() {
        let value = normalize(ComputedValue::Sequence(vec![
            json!({"a": 1}).into(),
            NumericArray::from_values([4, 5]).into(),
            json!("tail").into(),
        ]));
        assert_eq!(value, json!([{"a": 1}, [4, 5], "tail"]));
    }

    #[test]
    fn nested_sequences_recurse() {
        let value = normalize(ComputedValue::Sequence(vec![ComputedValue::Sequence(vec![
            NumericArray::from_values([1u8]).into(),
        ])]));
        assert_eq!(value, json!([[[1]]]));
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(normalize(json!(3.5).into()), json!(3.5));
        assert_eq!(normalize(json!(null).into()), Value::Null);
    }

    #[test]
    fn shaped_arrays_nest_row_major() {
        let matrix = NumericArray::from_values([1, 2, 3, 4, 5, 6])
            .with_shape(vec![2, 3])
            .expect("shape");
        assert_eq!(matrix.to_json(), json!([[1, 2, 3], [4, 5, 6]]));

        let scalar = NumericArray::from_values([9])
            .with_shape(vec![])
            .expect("shape");
        assert_eq!(scalar.to_json(), json!(9));

        let empty = NumericArray::from_values(Vec::<i64>::new())
            .with_shape(vec![0, 4])
            .expect("shape");
        assert_eq!(empty.to_json(), json!([]));
    }

    #[test]
    fn reshape_rejects_wrong_count() {
        let err = NumericArray::from_values([1, 2, 3])
            .with_shape(vec![2, 2])
            .expect_err("mismatch");
        assert_eq!(
            err,
            ShapeError::Mismatch {
                shape: vec![2, 2],
                expected: 4,
                actual: 3,
            }
        );
    }

    #[test]
    fn reshape_rejects_overflowing_shapes() {
        for shape in [
            vec![usize::MAX, 2, 0],
            vec![usize::MAX, 0],
            vec![1 << 40, 1 << 40],
            vec![MAX_ARRAY_NODES, 2, 0],
        ] {
            let err = NumericArray::from_values(Vec::<i64>::new())
                .with_shape(shape.clone())
                .expect_err("oversized");
            assert_eq!(err, ShapeError::Oversized { shape });
        }
    }

    #[test]
    fn empty_fan_out_within_limit_still_nests() {
        let array = NumericArray::from_values(Vec::<i64>::new())
            .with_shape(vec![3, 0])
            .expect("shape");
        assert_eq!(array.to_json(), json!([[], [], []]));
    }

    #[test]
    fn non_finite_floats_become_null() {
        let array = NumericArray::from_f64s([1.5, f64::NAN]);
        assert_eq!(array.to_json(), json!([1.5, null]));
    }
}
