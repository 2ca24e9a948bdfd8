// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::model::{EntityKind, Record, iso_date};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnValue {
    Text,
    Money,
    Number,
    Date,
    /// Foreign key shown through the lookup of this collection.
    Ref(EntityKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Wire field name; doubles as the sort and filter id.
    pub id: &'static str,
    pub label: &'static str,
    pub value: ColumnValue,
}

const fn col(id: &'static str, label: &'static str, value: ColumnValue) -> Column {
    Column { id, label, value }
}

const WAREHOUSE: &[Column] = &[
    col("warehouse_id", "ID", ColumnValue::Number),
    col("name", "Name", ColumnValue::Text),
    col("address", "Address", ColumnValue::Text),
    col("manager_id", "Manager", ColumnValue::Ref(EntityKind::Employee)),
];

const POSITION: &[Column] = &[
    col("position_id", "ID", ColumnValue::Number),
    col("position_name", "Position", ColumnValue::Text),
    col("salary", "Salary", ColumnValue::Money),
];

const EMPLOYEE: &[Column] = &[
    col("employee_id", "ID", ColumnValue::Number),
    col("last_name", "Last name", ColumnValue::Text),
    col("first_name", "First name", ColumnValue::Text),
    col("position_id", "Position", ColumnValue::Ref(EntityKind::Position)),
    col("warehouse_id", "Warehouse", ColumnValue::Ref(EntityKind::Warehouse)),
    col("phone", "Phone", ColumnValue::Text),
];

const PRODUCT: &[Column] = &[
    col("product_id", "ID", ColumnValue::Number),
    col("product_name", "Product", ColumnValue::Text),
    col("article", "Article", ColumnValue::Text),
    col("price", "Price", ColumnValue::Money),
    col("unit", "Unit", ColumnValue::Text),
];

const SUPPLIER: &[Column] = &[
    col("supplier_id", "ID", ColumnValue::Number),
    col("supplier_name", "Supplier", ColumnValue::Text),
    col("inn", "INN", ColumnValue::Text),
    col("phone", "Phone", ColumnValue::Text),
];

const INCOME: &[Column] = &[
    col("income_id", "ID", ColumnValue::Number),
    col("income_date", "Date", ColumnValue::Date),
    col("warehouse_id", "Warehouse", ColumnValue::Ref(EntityKind::Warehouse)),
    col("supplier_id", "Supplier", ColumnValue::Ref(EntityKind::Supplier)),
    col("employee_id", "Employee", ColumnValue::Ref(EntityKind::Employee)),
    col("total", "Total", ColumnValue::Money),
];

const INCOME_ITEM: &[Column] = &[
    col("income_item_id", "ID", ColumnValue::Number),
    col("income_id", "Note", ColumnValue::Ref(EntityKind::Income)),
    col("product_id", "Product", ColumnValue::Ref(EntityKind::Product)),
    col("quantity", "Qty", ColumnValue::Number),
    col("price", "Price", ColumnValue::Money),
];

const OUTCOME: &[Column] = &[
    col("outcome_id", "ID", ColumnValue::Number),
    col("outcome_date", "Date", ColumnValue::Date),
    col("warehouse_id", "Warehouse", ColumnValue::Ref(EntityKind::Warehouse)),
    col("employee_id", "Employee", ColumnValue::Ref(EntityKind::Employee)),
    col("recipient", "Recipient", ColumnValue::Text),
    col("total", "Total", ColumnValue::Money),
];

const OUTCOME_ITEM: &[Column] = &[
    col("outcome_item_id", "ID", ColumnValue::Number),
    col("outcome_id", "Note", ColumnValue::Ref(EntityKind::Outcome)),
    col("product_id", "Product", ColumnValue::Ref(EntityKind::Product)),
    col("quantity", "Qty", ColumnValue::Number),
    col("price", "Price", ColumnValue::Money),
];

pub fn columns(kind: EntityKind) -> &'static [Column] {
    match kind {
        EntityKind::Warehouse => WAREHOUSE,
        EntityKind::Position => POSITION,
        EntityKind::Employee => EMPLOYEE,
        EntityKind::Product => PRODUCT,
        EntityKind::Supplier => SUPPLIER,
        EntityKind::Income => INCOME,
        EntityKind::IncomeItem => INCOME_ITEM,
        EntityKind::Outcome => OUTCOME,
        EntityKind::OutcomeItem => OUTCOME_ITEM,
    }
}

/// Raw cell value of `column` in `record`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Ref(EntityKind, Option<i64>),
}

pub fn cell(record: &Record, column: &Column) -> Cell {
    let json = match record.to_json() {
        Ok(json) => json,
        Err(_) => return Cell::Text(String::new()),
    };
    let value = &json[column.id];
    match column.value {
        ColumnValue::Ref(kind) => Cell::Ref(kind, value.as_i64()),
        ColumnValue::Money => Cell::Text(
            serde_json::from_value::<crate::Money>(value.clone())
                .map(|money| money.display_rub())
                .unwrap_or_default(),
        ),
        ColumnValue::Date => Cell::Text(
            value
                .as_str()
                .and_then(|raw| iso_date::parse(raw).ok())
                .map(iso_date::format)
                .unwrap_or_default(),
        ),
        ColumnValue::Text | ColumnValue::Number => Cell::Text(match value {
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }),
    }
}
