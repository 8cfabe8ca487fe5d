use serde::ser::{Serialize, SerializeMap, Serializer};

use super::payload::flag_is_set;
use super::schema::{TableSchema, ID_COLUMN};

/// Per-dataset rendering options for records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordView {
    /// Column rendered as a JSON boolean
    pub bool_column: Option<String>,
    /// Column whose text is upper-cased
    pub upper_column: Option<String>,
    /// Emit `rowIndex` alongside the columns
    pub expose_row_index: bool,
}

/// One data row projected through the schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// 1-based sheet row; data rows start at 2
    pub row_index: usize,
    fields: Vec<(String, String)>,
    view: RecordView,
}

impl Record {
    pub fn from_row(schema: &TableSchema, row_index: usize, row: &[String], view: &RecordView) -> Self {
        let fields = schema
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), row.get(i).cloned().unwrap_or_default()))
            .collect();
        Self { row_index, fields, view: view.clone() }
    }

    pub fn id(&self) -> &str { self.get(ID_COLUMN).unwrap_or_default() }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(self.view.expose_row_index);
        let mut map = serializer.serialize_map(Some(self.fields.len() + extra))?;
        for (column, value) in &self.fields {
            if self.view.bool_column.as_deref() == Some(column.as_str()) {
                map.serialize_entry(column, &flag_is_set(value))?;
            } else if self.view.upper_column.as_deref() == Some(column.as_str()) {
                map.serialize_entry(column, &value.to_uppercase())?;
            } else {
                map.serialize_entry(column, value)?;
            }
        }
        if self.view.expose_row_index {
            map.serialize_entry("rowIndex", &self.row_index)?;
        }
        map.end()
    }
}
