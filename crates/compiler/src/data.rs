//! DATA-statement preprocessor interface
//!
//! An external preprocessor strips DATA lines from the source before the
//! parser runs and hands us the flattened value list plus restore points.
//! The emitter materializes the values into the module data section; READ
//! and RESTORE compile to runtime calls against that table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Int(i64),
    Double(f64),
    Str(String),
}

impl DataValue {
    /// Tag byte stored in the parallel type array, matched by the runtime's
    /// `fb_read_*` family.
    pub fn type_tag(&self) -> u8 {
        match self {
            DataValue::Int(_) => 0,
            DataValue::Double(_) => 1,
            DataValue::Str(_) => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DataValues {
    pub values: Vec<DataValue>,
    /// `RESTORE 100` -> index into `values`
    pub line_restore_points: HashMap<u32, usize>,
    /// `RESTORE table_start` -> index into `values`
    pub label_restore_points: HashMap<String, usize>,
}

impl DataValues {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(DataValue::Int(1).type_tag(), 0);
        assert_eq!(DataValue::Double(1.5).type_tag(), 1);
        assert_eq!(DataValue::Str("x".to_string()).type_tag(), 2);
    }

    #[test]
    fn test_restore_points_round_trip() {
        let mut d = DataValues::default();
        d.values.push(DataValue::Int(10));
        d.values.push(DataValue::Str("name".to_string()));
        d.line_restore_points.insert(100, 1);
        d.label_restore_points.insert("names".to_string(), 1);
        let json = serde_json::to_string(&d).unwrap();
        let back: DataValues = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
