//! Result rows.

use citydb_proto::Value;

/// One row of a result cursor. Cells are in column-set order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// The cell at `index`, or `Null` when out of range.
    pub fn get(&self, index: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(index).unwrap_or(&NULL)
    }

    /// Whether the cell at `index` is null.
    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).is_null()
    }

    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).as_i64()
    }

    pub fn get_i32(&self, index: usize) -> Option<i32> {
        self.get(index).as_i32()
    }

    pub fn get_str(&self, index: usize) -> Option<&str> {
        self.get(index).as_str()
    }

    pub fn get_bool(&self, index: usize) -> Option<bool> {
        self.get(index).as_bool()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
