//! Row records, load batches and the fixed target table.
//!
//! An [`OrderRecord`] is the unit of transfer between the decoder and the
//! loader. A [`LoadBatch`] is every record of one file, in file order, and is
//! persisted all-or-nothing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Native value class a field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Signed 32-bit integer.
    Int32,
    /// UTF-8 text.
    Text,
    /// 64-bit floating point.
    Double,
}

impl FieldKind {
    /// Name used in coercion diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Text => "text",
            Self::Double => "double",
        }
    }
}

/// The six logical fields of an order row, in target column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderField {
    /// Order identifier.
    OrderId,
    /// Customer first name.
    FirstName,
    /// Customer last name.
    LastName,
    /// Customer contact email.
    Email,
    /// Ordered quantity.
    Quantity,
    /// Monetary order total.
    OrderTotal,
}

impl OrderField {
    /// All fields in target column order.
    pub const ALL: [Self; 6] = [
        Self::OrderId,
        Self::FirstName,
        Self::LastName,
        Self::Email,
        Self::Quantity,
        Self::OrderTotal,
    ];

    /// Position of the field within [`OrderField::ALL`].
    #[must_use]
    pub const fn position(self) -> usize {
        match self {
            Self::OrderId => 0,
            Self::FirstName => 1,
            Self::LastName => 2,
            Self::Email => 3,
            Self::Quantity => 4,
            Self::OrderTotal => 5,
        }
    }

    /// Logical field name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderId => "order_id",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Email => "email",
            Self::Quantity => "quantity",
            Self::OrderTotal => "order_total",
        }
    }

    /// Native value class the field is coerced to.
    #[must_use]
    pub const fn kind(self) -> FieldKind {
        match self {
            Self::OrderId | Self::Quantity => FieldKind::Int32,
            Self::FirstName | Self::LastName | Self::Email => FieldKind::Text,
            Self::OrderTotal => FieldKind::Double,
        }
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| Error::config(format!("unknown field '{s}'")))
    }
}

/// One reconstructed order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order identifier.
    pub order_id: i32,
    /// Customer first name.
    pub first_name: String,
    /// Customer last name.
    pub last_name: String,
    /// Customer contact email.
    pub email: String,
    /// Ordered quantity.
    pub quantity: i32,
    /// Monetary order total.
    pub order_total: f64,
}

/// Every record of one file, in original row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBatch {
    records: Vec<OrderRecord>,
}

impl LoadBatch {
    /// Wraps already-assembled records.
    #[must_use]
    pub const fn new(records: Vec<OrderRecord>) -> Self {
        Self { records }
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the file declared zero rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in row order.
    #[must_use]
    pub fn records(&self) -> &[OrderRecord] {
        &self.records
    }

    /// Consumes the batch.
    #[must_use]
    pub fn into_records(self) -> Vec<OrderRecord> {
        self.records
    }
}

impl From<Vec<OrderRecord>> for LoadBatch {
    fn from(records: Vec<OrderRecord>) -> Self {
        Self::new(records)
    }
}

impl<'a> IntoIterator for &'a LoadBatch {
    type Item = &'a OrderRecord;
    type IntoIter = std::slice::Iter<'a, OrderRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Relational table that receives order rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetTable {
    /// Table name.
    pub name: &'static str,
    /// Column names, one per [`OrderField`] in [`OrderField::ALL`] order.
    pub columns: [&'static str; 6],
}

impl TargetTable {
    /// The fixed orders table.
    pub const ORDERS: Self = Self {
        name: "test_orders",
        columns: [
            "orderid",
            "firstname",
            "lastname",
            "email",
            "quantity",
            "ordertotal",
        ],
    };

    /// Column receiving the given field.
    #[must_use]
    pub const fn column(&self, field: OrderField) -> &'static str {
        self.columns[field.position()]
    }

    /// `COPY ... FROM STDIN` statement for this table (text format).
    #[must_use]
    pub fn copy_statement(&self) -> String {
        format!(
            "COPY {} ({}) FROM STDIN",
            self.name,
            self.columns.join(", ")
        )
    }
}

impl Default for TargetTable {
    fn default() -> Self {
        Self::ORDERS
    }
}
