// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::Date;

use crate::ids::*;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Warehouse,
    Position,
    Employee,
    Product,
    Supplier,
    Income,
    IncomeItem,
    Outcome,
    OutcomeItem,
}

impl EntityKind {
    pub const ALL: [Self; 9] = [
        Self::Warehouse,
        Self::Position,
        Self::Employee,
        Self::Product,
        Self::Supplier,
        Self::Income,
        Self::IncomeItem,
        Self::Outcome,
        Self::OutcomeItem,
    ];

    /// Path segment under the API base URL.
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Warehouse => "warehouses",
            Self::Position => "positions",
            Self::Employee => "employees",
            Self::Product => "products",
            Self::Supplier => "suppliers",
            Self::Income => "incomes",
            Self::IncomeItem => "income-items",
            Self::Outcome => "outcomes",
            Self::OutcomeItem => "outcome-items",
        }
    }

    pub const fn id_field(self) -> &'static str {
        match self {
            Self::Warehouse => "warehouse_id",
            Self::Position => "position_id",
            Self::Employee => "employee_id",
            Self::Product => "product_id",
            Self::Supplier => "supplier_id",
            Self::Income => "income_id",
            Self::IncomeItem => "income_item_id",
            Self::Outcome => "outcome_id",
            Self::OutcomeItem => "outcome_item_id",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Warehouse => "warehouse",
            Self::Position => "position",
            Self::Employee => "employee",
            Self::Product => "product",
            Self::Supplier => "supplier",
            Self::Income => "income note",
            Self::IncomeItem => "income line",
            Self::Outcome => "outcome note",
            Self::OutcomeItem => "outcome line",
        }
    }

    /// Collections whose labels this entity's foreign keys display.
    pub const fn lookups(self) -> &'static [Self] {
        match self {
            Self::Warehouse => &[Self::Employee],
            Self::Employee => &[Self::Position, Self::Warehouse],
            Self::Income => &[Self::Warehouse, Self::Supplier, Self::Employee],
            Self::IncomeItem => &[Self::Income, Self::Product],
            Self::Outcome => &[Self::Warehouse, Self::Employee],
            Self::OutcomeItem => &[Self::Outcome, Self::Product],
            Self::Position | Self::Product | Self::Supplier => &[],
        }
    }

    /// Line collection created together with a note header.
    pub const fn line_kind(self) -> Option<Self> {
        match self {
            Self::Income => Some(Self::IncomeItem),
            Self::Outcome => Some(Self::OutcomeItem),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.endpoint() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TabKind {
    Entity(EntityKind),
    Reports,
}

impl TabKind {
    pub const ALL: [Self; 10] = [
        Self::Entity(EntityKind::Warehouse),
        Self::Entity(EntityKind::Employee),
        Self::Entity(EntityKind::Position),
        Self::Entity(EntityKind::Product),
        Self::Entity(EntityKind::Supplier),
        Self::Entity(EntityKind::Income),
        Self::Entity(EntityKind::IncomeItem),
        Self::Entity(EntityKind::Outcome),
        Self::Entity(EntityKind::OutcomeItem),
        Self::Reports,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Entity(EntityKind::Warehouse) => "warehouses",
            Self::Entity(EntityKind::Employee) => "employees",
            Self::Entity(EntityKind::Position) => "positions",
            Self::Entity(EntityKind::Product) => "products",
            Self::Entity(EntityKind::Supplier) => "suppliers",
            Self::Entity(EntityKind::Income) => "incomes",
            Self::Entity(EntityKind::IncomeItem) => "income lines",
            Self::Entity(EntityKind::Outcome) => "outcomes",
            Self::Entity(EntityKind::OutcomeItem) => "outcome lines",
            Self::Reports => "reports",
        }
    }

    /// Stable key for persisted preferences.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entity(kind) => kind.endpoint(),
            Self::Reports => "reports",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tab| tab.as_str() == value)
    }

    pub const fn entity(self) -> Option<EntityKind> {
        match self {
            Self::Entity(kind) => Some(kind),
            Self::Reports => None,
        }
    }
}

impl Default for TabKind {
    fn default() -> Self {
        Self::ALL[0]
    }
}

pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use time::Date;
    use time::macros::format_description;

    pub fn format(date: Date) -> String {
        date.format(&format_description!("[year]-[month]-[day]"))
            .unwrap_or_else(|_| date.to_string())
    }

    pub fn parse(raw: &str) -> Result<Date, time::error::Parse> {
        Date::parse(raw.trim(), &format_description!("[year]-[month]-[day]"))
    }

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        // Servers that store timestamps send `2026-01-05T00:00:00Z`.
        let day = raw.get(..10).unwrap_or(&raw);
        parse(day).map_err(de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;

        pub fn serialize<S: Serializer>(
            date: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => super::serialize(date, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.filter(|value| !value.trim().is_empty())
                .map(|value| {
                    let day = value.get(..10).unwrap_or(&value).to_owned();
                    super::parse(&day).map_err(serde::de::Error::custom)
                })
                .transpose()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseFields {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub manager_id: Option<EmployeeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub warehouse_id: WarehouseId,
    #[serde(flatten)]
    pub fields: WarehouseFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionFields {
    pub position_name: String,
    pub salary: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: PositionId,
    #[serde(flatten)]
    pub fields: PositionFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeFields {
    pub first_name: String,
    pub last_name: String,
    pub position_id: PositionId,
    pub warehouse_id: WarehouseId,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: EmployeeId,
    #[serde(flatten)]
    pub fields: EmployeeFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFields {
    pub product_name: String,
    pub article: String,
    pub price: Money,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    #[serde(flatten)]
    pub fields: ProductFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierFields {
    pub supplier_name: String,
    pub inn: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub supplier_id: SupplierId,
    #[serde(flatten)]
    pub fields: SupplierFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeFields {
    #[serde(with = "iso_date")]
    pub income_date: Date,
    pub warehouse_id: WarehouseId,
    pub supplier_id: SupplierId,
    pub employee_id: EmployeeId,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Income {
    pub income_id: IncomeId,
    #[serde(flatten)]
    pub fields: IncomeFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeItemFields {
    pub income_id: IncomeId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeItem {
    pub income_item_id: IncomeItemId,
    #[serde(flatten)]
    pub fields: IncomeItemFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFields {
    #[serde(with = "iso_date")]
    pub outcome_date: Date,
    pub warehouse_id: WarehouseId,
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub recipient: String,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub outcome_id: OutcomeId,
    #[serde(flatten)]
    pub fields: OutcomeFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeItemFields {
    pub outcome_id: OutcomeId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeItem {
    pub outcome_item_id: OutcomeItemId,
    #[serde(flatten)]
    pub fields: OutcomeItemFields,
}

/// One persisted row of any collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Warehouse(Warehouse),
    Position(Position),
    Employee(Employee),
    Product(Product),
    Supplier(Supplier),
    Income(Income),
    IncomeItem(IncomeItem),
    Outcome(Outcome),
    OutcomeItem(OutcomeItem),
}

/// Field values of a row without its primary key: the body of a create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityFields {
    Warehouse(WarehouseFields),
    Position(PositionFields),
    Employee(EmployeeFields),
    Product(ProductFields),
    Supplier(SupplierFields),
    Income(IncomeFields),
    IncomeItem(IncomeItemFields),
    Outcome(OutcomeFields),
    OutcomeItem(OutcomeItemFields),
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> serde_json::Result<T> {
    serde_json::from_value(value)
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Warehouse(_) => EntityKind::Warehouse,
            Self::Position(_) => EntityKind::Position,
            Self::Employee(_) => EntityKind::Employee,
            Self::Product(_) => EntityKind::Product,
            Self::Supplier(_) => EntityKind::Supplier,
            Self::Income(_) => EntityKind::Income,
            Self::IncomeItem(_) => EntityKind::IncomeItem,
            Self::Outcome(_) => EntityKind::Outcome,
            Self::OutcomeItem(_) => EntityKind::OutcomeItem,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Warehouse(row) => row.warehouse_id.get(),
            Self::Position(row) => row.position_id.get(),
            Self::Employee(row) => row.employee_id.get(),
            Self::Product(row) => row.product_id.get(),
            Self::Supplier(row) => row.supplier_id.get(),
            Self::Income(row) => row.income_id.get(),
            Self::IncomeItem(row) => row.income_item_id.get(),
            Self::Outcome(row) => row.outcome_id.get(),
            Self::OutcomeItem(row) => row.outcome_item_id.get(),
        }
    }

    pub fn decode(kind: EntityKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Warehouse => Self::Warehouse(decode(value)?),
            EntityKind::Position => Self::Position(decode(value)?),
            EntityKind::Employee => Self::Employee(decode(value)?),
            EntityKind::Product => Self::Product(decode(value)?),
            EntityKind::Supplier => Self::Supplier(decode(value)?),
            EntityKind::Income => Self::Income(decode(value)?),
            EntityKind::IncomeItem => Self::IncomeItem(decode(value)?),
            EntityKind::Outcome => Self::Outcome(decode(value)?),
            EntityKind::OutcomeItem => Self::OutcomeItem(decode(value)?),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Warehouse(row) => serde_json::to_value(row),
            Self::Position(row) => serde_json::to_value(row),
            Self::Employee(row) => serde_json::to_value(row),
            Self::Product(row) => serde_json::to_value(row),
            Self::Supplier(row) => serde_json::to_value(row),
            Self::Income(row) => serde_json::to_value(row),
            Self::IncomeItem(row) => serde_json::to_value(row),
            Self::Outcome(row) => serde_json::to_value(row),
            Self::OutcomeItem(row) => serde_json::to_value(row),
        }
    }

    pub fn fields(&self) -> EntityFields {
        match self {
            Self::Warehouse(row) => EntityFields::Warehouse(row.fields.clone()),
            Self::Position(row) => EntityFields::Position(row.fields.clone()),
            Self::Employee(row) => EntityFields::Employee(row.fields.clone()),
            Self::Product(row) => EntityFields::Product(row.fields.clone()),
            Self::Supplier(row) => EntityFields::Supplier(row.fields.clone()),
            Self::Income(row) => EntityFields::Income(row.fields.clone()),
            Self::IncomeItem(row) => EntityFields::IncomeItem(row.fields.clone()),
            Self::Outcome(row) => EntityFields::Outcome(row.fields.clone()),
            Self::OutcomeItem(row) => EntityFields::OutcomeItem(row.fields.clone()),
        }
    }

    /// Text shown wherever another row points at this one.
    pub fn lookup_label(&self) -> String {
        match self {
            Self::Warehouse(row) => row.fields.name.clone(),
            Self::Position(row) => row.fields.position_name.clone(),
            Self::Employee(row) => {
                format!("{} {}", row.fields.last_name, row.fields.first_name)
                    .trim()
                    .to_owned()
            }
            Self::Product(row) => row.fields.product_name.clone(),
            Self::Supplier(row) => row.fields.supplier_name.clone(),
            Self::Income(row) => format!(
                "#{} {}",
                row.income_id,
                iso_date::format(row.fields.income_date)
            ),
            Self::IncomeItem(row) => format!("#{}", row.income_item_id),
            Self::Outcome(row) => format!(
                "#{} {}",
                row.outcome_id,
                iso_date::format(row.fields.outcome_date)
            ),
            Self::OutcomeItem(row) => format!("#{}", row.outcome_item_id),
        }
    }
}

impl EntityFields {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Warehouse(_) => EntityKind::Warehouse,
            Self::Position(_) => EntityKind::Position,
            Self::Employee(_) => EntityKind::Employee,
            Self::Product(_) => EntityKind::Product,
            Self::Supplier(_) => EntityKind::Supplier,
            Self::Income(_) => EntityKind::Income,
            Self::IncomeItem(_) => EntityKind::IncomeItem,
            Self::Outcome(_) => EntityKind::Outcome,
            Self::OutcomeItem(_) => EntityKind::OutcomeItem,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Warehouse(fields) => serde_json::to_value(fields),
            Self::Position(fields) => serde_json::to_value(fields),
            Self::Employee(fields) => serde_json::to_value(fields),
            Self::Product(fields) => serde_json::to_value(fields),
            Self::Supplier(fields) => serde_json::to_value(fields),
            Self::Income(fields) => serde_json::to_value(fields),
            Self::IncomeItem(fields) => serde_json::to_value(fields),
            Self::Outcome(fields) => serde_json::to_value(fields),
            Self::OutcomeItem(fields) => serde_json::to_value(fields),
        }
    }

    pub fn into_record(self, id: i64) -> Record {
        match self {
            Self::Warehouse(fields) => Record::Warehouse(Warehouse {
                warehouse_id: WarehouseId::new(id),
                fields,
            }),
            Self::Position(fields) => Record::Position(Position {
                position_id: PositionId::new(id),
                fields,
            }),
            Self::Employee(fields) => Record::Employee(Employee {
                employee_id: EmployeeId::new(id),
                fields,
            }),
            Self::Product(fields) => Record::Product(Product {
                product_id: ProductId::new(id),
                fields,
            }),
            Self::Supplier(fields) => Record::Supplier(Supplier {
                supplier_id: SupplierId::new(id),
                fields,
            }),
            Self::Income(fields) => Record::Income(Income {
                income_id: IncomeId::new(id),
                fields,
            }),
            Self::IncomeItem(fields) => Record::IncomeItem(IncomeItem {
                income_item_id: IncomeItemId::new(id),
                fields,
            }),
            Self::Outcome(fields) => Record::Outcome(Outcome {
                outcome_id: OutcomeId::new(id),
                fields,
            }),
            Self::OutcomeItem(fields) => Record::OutcomeItem(OutcomeItem {
                outcome_item_id: OutcomeItemId::new(id),
                fields,
            }),
        }
    }
}

/// One server page, or a whole unpaginated collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub rows: Vec<Record>,
    pub total_row_count: u64,
}

impl Page {
    pub fn collection(rows: Vec<Record>) -> Self {
        let total_row_count = rows.len() as u64;
        Self {
            rows,
            total_row_count,
        }
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.rows.iter().any(|row| row.id() == id)
    }
}

pub type SharedPage = Arc<Page>;
