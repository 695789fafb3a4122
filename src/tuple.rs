//! Tuple schema and value boundary.
//!
//! The sort engine does not interpret rows beyond what ordering requires: a
//! row is a list of attribute values, each of which encodes to a framed field
//! (see [`crate::vtuple`]) and decodes back. The comparator captures the
//! order-by column list and decodes only the keyed fields of a record.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{SortError, SortResult};
use crate::vtuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    Int,
    Double,
    Text,
    Bytes,
}

/// Row schema: an ordered list of attribute types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleType {
    attrs: Vec<AttrType>,
}

impl TupleType {
    pub fn new(attrs: Vec<AttrType>) -> Self {
        Self { attrs }
    }

    pub fn attr_count(&self) -> usize {
        self.attrs.len()
    }

    pub fn attr_type(&self, i: usize) -> AttrType {
        self.attrs[i]
    }
}

const TAG_NULL: u8 = 0x00;
const TAG_INT: u8 = 0x01;
const TAG_DOUBLE: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    fn tag(&self) -> u8 {
        match self {
            Value::Null => TAG_NULL,
            Value::Int(_) => TAG_INT,
            Value::Double(_) => TAG_DOUBLE,
            Value::Text(_) => TAG_TEXT,
            Value::Bytes(_) => TAG_BYTES,
        }
    }

    /// Appends this value's framed field encoding to `out`.
    pub fn encode_field(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::with_capacity(9);
        payload.push(self.tag());
        match self {
            Value::Null => {}
            Value::Int(v) => payload.extend_from_slice(&v.to_be_bytes()),
            Value::Double(v) => payload.extend_from_slice(&v.to_bits().to_be_bytes()),
            Value::Text(s) => payload.extend_from_slice(s.as_bytes()),
            Value::Bytes(b) => payload.extend_from_slice(b),
        }
        vtuple::write_field(out, &payload);
    }

    /// Decodes a value from one field payload.
    pub fn decode_field(payload: &[u8]) -> SortResult<Value> {
        let (&tag, rest) = payload.split_first().ok_or(SortError::Corrupt(0))?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_INT => {
                let raw: [u8; 8] = rest.try_into().map_err(|_| SortError::Corrupt(0))?;
                Ok(Value::Int(i64::from_be_bytes(raw)))
            }
            TAG_DOUBLE => {
                let raw: [u8; 8] = rest.try_into().map_err(|_| SortError::Corrupt(0))?;
                Ok(Value::Double(f64::from_bits(u64::from_be_bytes(raw))))
            }
            TAG_TEXT => {
                let s = std::str::from_utf8(rest).map_err(|_| SortError::Corrupt(0))?;
                Ok(Value::Text(s.to_string()))
            }
            TAG_BYTES => Ok(Value::Bytes(rest.to_vec())),
            _ => Err(SortError::Corrupt(0)),
        }
    }

    /// Total order used by the sort key: null first, then by value; mixed-type
    /// fields fall back to tag order so the comparison is always defined.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (a, b) => a.tag().cmp(&b.tag()),
        }
    }
}

/// One row of attribute values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, i: usize) -> &Value {
        &self.values[i]
    }

    /// Serializes the row into a record body: the concatenation of its framed
    /// fields. The body is never empty because every field carries at least a
    /// header byte.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.clear();
        for v in &self.values {
            v.encode_field(out);
        }
    }

    pub fn decode(body: &[u8], schema: &TupleType) -> SortResult<Row> {
        let mut values = Vec::with_capacity(schema.attr_count());
        for field in vtuple::fields(body) {
            values.push(Value::decode_field(field?)?);
        }
        if values.len() != schema.attr_count() {
            return Err(SortError::Corrupt(0));
        }
        Ok(Row { values })
    }
}

/// One order-by column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub column: usize,
    pub descending: bool,
}

impl OrderSpec {
    pub fn asc(column: usize) -> Self {
        Self { column, descending: false }
    }

    pub fn desc(column: usize) -> Self {
        Self { column, descending: true }
    }
}

/// Compares two encoded record bodies by the captured order-by columns.
///
/// Owns its ordering context instead of threading a raw context pointer
/// through a function-pointer seam; cloning is cheap and every presort and
/// merge site gets its own copy.
#[derive(Debug, Clone)]
pub struct RecordComparator {
    order: Vec<OrderSpec>,
}

impl RecordComparator {
    pub fn new(order: Vec<OrderSpec>) -> Self {
        Self { order }
    }

    pub fn is_trivial(&self) -> bool {
        self.order.is_empty()
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> SortResult<Ordering> {
        for spec in &self.order {
            let fa = Value::decode_field(vtuple::nth_field(a, spec.column)?)?;
            let fb = Value::decode_field(vtuple::nth_field(b, spec.column)?)?;
            let ord = fa.compare(&fb);
            let ord = if spec.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(row: &Row) -> Vec<u8> {
        let mut out = Vec::new();
        row.encode_into(&mut out);
        out
    }

    #[test]
    fn row_roundtrip() {
        let schema = TupleType::new(vec![
            AttrType::Int,
            AttrType::Text,
            AttrType::Double,
            AttrType::Bytes,
        ]);
        let row = Row::new(vec![
            Value::Int(-42),
            Value::Text("kalevala".into()),
            Value::Double(2.5),
            Value::Bytes(vec![0, 1, 2]),
        ]);
        let body = encode(&row);
        let back = Row::decode(&body, &schema).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn null_roundtrip() {
        let schema = TupleType::new(vec![AttrType::Int, AttrType::Text]);
        let row = Row::new(vec![Value::Null, Value::Null]);
        let back = Row::decode(&encode(&row), &schema).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn comparator_single_column() {
        let cmp = RecordComparator::new(vec![OrderSpec::asc(0)]);
        let a = encode(&Row::new(vec![Value::Int(1)]));
        let b = encode(&Row::new(vec![Value::Int(2)]));
        assert_eq!(cmp.compare(&a, &b).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a).unwrap(), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn comparator_descending_and_tiebreak() {
        let cmp = RecordComparator::new(vec![OrderSpec::desc(0), OrderSpec::asc(1)]);
        let a = encode(&Row::new(vec![Value::Int(1), Value::Text("a".into())]));
        let b = encode(&Row::new(vec![Value::Int(1), Value::Text("b".into())]));
        let c = encode(&Row::new(vec![Value::Int(2), Value::Text("a".into())]));
        // Descending first column: 2 sorts before 1.
        assert_eq!(cmp.compare(&c, &a).unwrap(), Ordering::Less);
        // Equal first column: ascending second column decides.
        assert_eq!(cmp.compare(&a, &b).unwrap(), Ordering::Less);
    }

    #[test]
    fn null_sorts_first() {
        let cmp = RecordComparator::new(vec![OrderSpec::asc(0)]);
        let n = encode(&Row::new(vec![Value::Null]));
        let v = encode(&Row::new(vec![Value::Int(i64::MIN)]));
        assert_eq!(cmp.compare(&n, &v).unwrap(), Ordering::Less);
    }
}
