//! Open-type descriptors and the composite/tabular values shaped by them.
//!
//! Composite types carry an ordered set of named, typed, described fields;
//! tabular types carry a composite row type plus an ordered list of index
//! field names. Data values are always written type-descriptor first, so a
//! decoder can reconstruct them without out-of-band schema.

use std::fmt;

use crate::error::{BeanwireError, Result};
use crate::wire::WireValue;

/// One named field of a composite type.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeField {
    /// Field name (unique within its composite type).
    pub name: String,
    /// Field open type.
    pub ty: OpenType,
    /// Human-readable description.
    pub description: String,
}

/// Open-type descriptor for a wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenType {
    /// A simple named type, e.g. `"string"`, `"i64"`.
    Simple(String),
    /// Array of an element type.
    Array {
        /// Element type.
        element: Box<OpenType>,
        /// Number of dimensions (>= 1).
        dims: u8,
    },
    /// Ordered, named, typed, described fields.
    Composite {
        /// Type name.
        type_name: String,
        /// Description.
        description: String,
        /// Ordered field descriptors.
        fields: Vec<CompositeField>,
    },
    /// A table of composite rows indexed by a subset of the row fields.
    Tabular {
        /// Type name.
        type_name: String,
        /// Description.
        description: String,
        /// Row type; must be `OpenType::Composite`.
        row_type: Box<OpenType>,
        /// Ordered index field names (each must name a row field).
        index_names: Vec<String>,
    },
}

impl OpenType {
    /// Shorthand for a simple type.
    pub fn simple(name: impl Into<String>) -> Self {
        OpenType::Simple(name.into())
    }

    /// The field descriptors, if this is a composite type.
    pub fn composite_fields(&self) -> Option<&[CompositeField]> {
        match self {
            OpenType::Composite { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

impl fmt::Display for OpenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenType::Simple(name) => f.write_str(name),
            OpenType::Array { element, dims } => write!(f, "{element}{}", "[]".repeat(*dims as usize)),
            OpenType::Composite { type_name, .. } => write!(f, "composite:{type_name}"),
            OpenType::Tabular { type_name, .. } => write!(f, "tabular:{type_name}"),
        }
    }
}

/// A composite data value: one value per field of its composite type,
/// in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeData {
    /// The composite type (`OpenType::Composite`).
    pub ty: OpenType,
    /// Values in the type's field order.
    pub values: Vec<WireValue>,
}

impl CompositeData {
    /// Create composite data, checking value count against the type.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `ty` is not composite or the value count does
    /// not match the field count.
    pub fn new(ty: OpenType, values: Vec<WireValue>) -> Result<Self> {
        let fields = ty
            .composite_fields()
            .ok_or_else(|| BeanwireError::Config("composite data requires a composite type".into()))?;
        if fields.len() != values.len() {
            return Err(BeanwireError::Config(format!(
                "composite data has {} values for {} fields",
                values.len(),
                fields.len()
            )));
        }
        Ok(Self { ty, values })
    }

    /// Look up a value by field name.
    pub fn get(&self, field: &str) -> Option<&WireValue> {
        let fields = self.ty.composite_fields()?;
        let idx = fields.iter().position(|f| f.name == field)?;
        self.values.get(idx)
    }

    /// Values for this row's index fields, in index order.
    pub fn index_key(&self, index_names: &[String]) -> Vec<WireValue> {
        index_names
            .iter()
            .map(|n| self.get(n).cloned().unwrap_or(WireValue::Null))
            .collect()
    }
}

/// One keyed entry of a tabular value.
#[derive(Debug, Clone, PartialEq)]
pub struct TabularEntry {
    /// Index-field values identifying the row.
    pub key: Vec<WireValue>,
    /// The row itself.
    pub row: CompositeData,
}

/// A tabular data value: typed rows keyed by their index fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TabularData {
    /// The tabular type (`OpenType::Tabular`).
    pub ty: OpenType,
    /// Entries in insertion order.
    pub entries: Vec<TabularEntry>,
}

impl TabularData {
    /// Create an empty table of the given tabular type.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `ty` is not tabular.
    pub fn new(ty: OpenType) -> Result<Self> {
        if !matches!(ty, OpenType::Tabular { .. }) {
            return Err(BeanwireError::Config("tabular data requires a tabular type".into()));
        }
        Ok(Self {
            ty,
            entries: Vec::new(),
        })
    }

    /// Insert a row, deriving its key from the index fields.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the row type does not match the table's row type.
    pub fn put(&mut self, row: CompositeData) -> Result<()> {
        let (row_type, index_names) = match &self.ty {
            OpenType::Tabular {
                row_type,
                index_names,
                ..
            } => (row_type.as_ref(), index_names),
            _ => unreachable!("checked in new()"),
        };
        if row.ty != *row_type {
            return Err(BeanwireError::Config("row type mismatch".into()));
        }
        let key = row.index_key(index_names);
        self.entries.push(TabularEntry { key, row });
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
