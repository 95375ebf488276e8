//! Declared layout of columnar outputs

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use std::sync::Arc;

/// Declared type of an output column
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ColumnType {
    /// Non-null text
    #[default]
    Text,
}
//
impl ColumnType {
    /// Arrow representation of this column type
    pub fn data_type(self) -> DataType {
        match self {
            Self::Text => DataType::Utf8,
        }
    }
}

/// Ordered list of named, typed columns
///
/// Once a dataset's output is created, its schema never changes.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Schema(Box<[(Box<str>, ColumnType)]>);
//
impl Schema {
    /// Schema where every named column holds text
    pub fn text(columns: &[Box<str>]) -> Self {
        Self(
            columns
                .iter()
                .map(|name| (name.clone(), ColumnType::Text))
                .collect(),
        )
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.0.len()
    }

    /// Arrow representation of this schema
    ///
    /// Columns are never nullable, missing values are represented with a
    /// sentinel text instead.
    pub fn to_arrow(&self) -> SchemaRef {
        Arc::new(ArrowSchema::new(
            self.0
                .iter()
                .map(|(name, ty)| Field::new(&**name, ty.data_type(), false))
                .collect::<Vec<_>>(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_schema() {
        let columns: [Box<str>; 2] = ["codigo".into(), "descricao".into()];
        let schema = Schema::text(&columns);
        assert_eq!(schema.width(), 2);
        assert_eq!(ColumnType::default(), ColumnType::Text);
        let arrow = schema.to_arrow();
        assert_eq!(arrow.field(0).name(), "codigo");
        assert_eq!(arrow.field(1).data_type(), &DataType::Utf8);
        assert!(!arrow.field(1).is_nullable());
    }
}
