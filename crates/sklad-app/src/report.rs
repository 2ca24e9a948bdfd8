// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use time::Date;

use crate::error::RequestError;
use crate::ids::{ProductId, WarehouseId};
use crate::model::iso_date;
use crate::money::{Money, MoneyError};

pub const REMAINING_LABEL: &str = "Остаток";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    #[default]
    Inventory,
    Revenue,
    Cost,
}

impl ReportKind {
    pub const ALL: [Self; 3] = [Self::Inventory, Self::Revenue, Self::Cost];

    /// Path segment under the API base URL.
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Inventory => "inventory-report",
            Self::Revenue => "revenue-report",
            Self::Cost => "cost-report",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Revenue => "revenue",
            Self::Cost => "cost",
        }
    }

    pub const fn sort_options(self) -> &'static [SortBy] {
        match self {
            Self::Inventory => &[SortBy::ProductName, SortBy::Remaining],
            Self::Revenue | Self::Cost => &[SortBy::Date, SortBy::ProductName, SortBy::Total],
        }
    }

    pub const fn has_date_range(self) -> bool {
        !matches!(self, Self::Inventory)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Warehouse,
    Product,
}

impl GroupBy {
    pub const fn toggle(self) -> Self {
        match self {
            Self::Warehouse => Self::Product,
            Self::Product => Self::Warehouse,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Warehouse => "warehouse",
            Self::Product => "product",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    ProductName,
    Remaining,
    Date,
    Total,
}

impl SortBy {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ProductName => "product",
            Self::Remaining => "remaining",
            Self::Date => "date",
            Self::Total => "total",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<WarehouseId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso_date::option"
    )]
    pub date_from: Option<Date>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso_date::option"
    )]
    pub date_to: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,
    pub sort_by: SortBy,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportParamsError {
    #[error("start date {from} is after end date {to}")]
    InvertedRange { from: String, to: String },
    #[error("{sort} is not a valid sort for the {kind} report")]
    InvalidSort {
        sort: &'static str,
        kind: &'static str,
    },
}

impl ReportParams {
    pub fn for_kind(kind: ReportKind) -> Self {
        Self {
            warehouse_id: None,
            date_from: None,
            date_to: None,
            group_by: (kind == ReportKind::Inventory).then_some(GroupBy::default()),
            sort_by: kind.sort_options()[0],
        }
    }

    /// Rejects combinations the server would misread.
    pub fn validate(&self, kind: ReportKind) -> Result<(), ReportParamsError> {
        if !kind.sort_options().contains(&self.sort_by) {
            return Err(ReportParamsError::InvalidSort {
                sort: self.sort_by.label(),
                kind: kind.label(),
            });
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to)
            && from > to
        {
            return Err(ReportParamsError::InvertedRange {
                from: iso_date::format(from),
                to: iso_date::format(to),
            });
        }
        Ok(())
    }

    /// Parameters as sent for `kind`: inventory drops the date range,
    /// money reports drop the grouping.
    pub fn for_request(&self, kind: ReportKind) -> Self {
        let mut params = self.clone();
        if kind.has_date_range() {
            params.group_by = None;
        } else {
            params.date_from = None;
            params.date_to = None;
            params.group_by = Some(self.group_by.unwrap_or_default());
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRow {
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub warehouse_name: Option<String>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub product_name: Option<String>,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyRow {
    #[serde(default, with = "iso_date::option")]
    pub date: Option<Date>,
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub warehouse_name: Option<String>,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportRows {
    Inventory(Vec<InventoryRow>),
    Money(Vec<MoneyRow>),
}

impl ReportRows {
    pub fn decode(kind: ReportKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            ReportKind::Inventory => Self::Inventory(serde_json::from_value(value)?),
            ReportKind::Revenue | ReportKind::Cost => Self::Money(serde_json::from_value(value)?),
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Inventory(rows) => rows.len(),
            Self::Money(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of `total`; inventory has none.
    pub fn grand_total(&self) -> Option<Result<Money, MoneyError>> {
        match self {
            Self::Inventory(_) => None,
            Self::Money(rows) => Some(
                Money::checked_sum(rows.iter().map(|row| row.total)).ok_or(MoneyError::Overflow),
            ),
        }
    }
}

/// Report tab state: the chosen kind, its parameters, and the last result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportState {
    kind: ReportKind,
    params: ReportParams,
    rows: Option<ReportRows>,
    error: Option<RequestError>,
    request_id: u64,
    loading: bool,
}

impl Default for ReportState {
    fn default() -> Self {
        Self::new(ReportKind::default())
    }
}

impl ReportState {
    pub fn new(kind: ReportKind) -> Self {
        Self {
            kind,
            params: ReportParams::for_kind(kind),
            rows: None,
            error: None,
            request_id: 0,
            loading: false,
        }
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    pub fn params(&self) -> &ReportParams {
        &self.params
    }

    pub fn rows(&self) -> Option<&ReportRows> {
        self.rows.as_ref()
    }

    pub fn error(&self) -> Option<&RequestError> {
        self.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Switches kind, dropping stale rows and keeping `sort_by` valid.
    pub fn set_kind(&mut self, kind: ReportKind) -> bool {
        if kind == self.kind {
            return false;
        }
        self.kind = kind;
        self.rows = None;
        self.error = None;
        self.loading = false;
        self.request_id += 1;
        if !kind.sort_options().contains(&self.params.sort_by) {
            self.params.sort_by = kind.sort_options()[0];
        }
        if kind.has_date_range() {
            self.params.group_by = None;
        } else if self.params.group_by.is_none() {
            self.params.group_by = Some(GroupBy::default());
        }
        true
    }

    pub fn set_warehouse(&mut self, warehouse_id: Option<WarehouseId>) {
        self.params.warehouse_id = warehouse_id;
    }

    pub fn set_date_range(&mut self, from: Option<Date>, to: Option<Date>) {
        self.params.date_from = from;
        self.params.date_to = to;
    }

    pub fn cycle_sort(&mut self) {
        let options = self.kind.sort_options();
        let index = options
            .iter()
            .position(|option| *option == self.params.sort_by)
            .map_or(0, |index| (index + 1) % options.len());
        self.params.sort_by = options[index];
    }

    pub fn toggle_group_by(&mut self) -> bool {
        if self.kind.has_date_range() {
            return false;
        }
        self.params.group_by = Some(self.params.group_by.unwrap_or_default().toggle());
        true
    }

    /// Validates and marks a request in flight; returns its id and body.
    pub fn begin(&mut self) -> Result<(u64, ReportParams), ReportParamsError> {
        self.params.validate(self.kind)?;
        self.request_id += 1;
        self.loading = true;
        Ok((self.request_id, self.params.for_request(self.kind)))
    }

    /// Applies a response unless a newer request or kind switch superseded it.
    pub fn finish(&mut self, request_id: u64, result: Result<ReportRows, RequestError>) -> bool {
        if request_id != self.request_id {
            tracing::debug!(request_id, current = self.request_id, "dropping stale report");
            return false;
        }
        self.loading = false;
        match result {
            Ok(rows) => {
                self.rows = Some(rows);
                self.error = None;
            }
            Err(err) => self.error = Some(err),
        }
        true
    }

    pub fn grand_total(&self) -> Option<Result<Money, MoneyError>> {
        self.rows.as_ref().and_then(ReportRows::grand_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    #[test]
    fn inventory_params_omit_the_date_range() -> serde_json::Result<()> {
        let mut params = ReportParams::for_kind(ReportKind::Inventory);
        params.warehouse_id = Some(WarehouseId::new(3));
        params.date_from = Some(date!(2026-01-01));
        let body = serde_json::to_value(params.for_request(ReportKind::Inventory))?;
        assert_eq!(
            body,
            json!({"warehouse_id": 3, "group_by": "warehouse", "sort_by": "product_name"})
        );
        Ok(())
    }

    #[test]
    fn money_params_carry_dates_without_grouping() -> serde_json::Result<()> {
        let mut state = ReportState::new(ReportKind::Revenue);
        state.set_date_range(Some(date!(2026-01-01)), Some(date!(2026-01-31)));
        let (_, params) = state.begin().expect("valid range");
        assert_eq!(
            serde_json::to_value(params)?,
            json!({"date_from": "2026-01-01", "date_to": "2026-01-31", "sort_by": "date"})
        );
        Ok(())
    }

    #[test]
    fn inverted_range_is_rejected_locally() {
        let mut state = ReportState::new(ReportKind::Cost);
        state.set_date_range(Some(date!(2026-02-01)), Some(date!(2026-01-01)));
        assert!(matches!(
            state.begin(),
            Err(ReportParamsError::InvertedRange { .. })
        ));
        assert!(!state.is_loading());
    }

    #[test]
    fn switching_kind_resets_rows_and_fixes_sort() {
        let mut state = ReportState::new(ReportKind::Revenue);
        state.cycle_sort();
        state.cycle_sort();
        assert_eq!(state.params().sort_by, SortBy::Total);
        let (id, _) = state.begin().expect("valid");
        assert!(state.finish(id, Ok(ReportRows::Money(Vec::new()))));
        assert!(state.rows().is_some());

        assert!(state.set_kind(ReportKind::Inventory));
        assert!(state.rows().is_none());
        assert_eq!(state.params().sort_by, SortBy::ProductName);
        assert_eq!(state.params().group_by, Some(GroupBy::Warehouse));

        state.cycle_sort();
        assert_eq!(state.params().sort_by, SortBy::Remaining);
        state.set_kind(ReportKind::Cost);
        assert_eq!(state.params().sort_by, SortBy::Date);
    }

    #[test]
    fn product_name_sort_survives_kind_switch() {
        let mut state = ReportState::new(ReportKind::Inventory);
        state.set_kind(ReportKind::Revenue);
        assert_eq!(state.params().sort_by, SortBy::ProductName);
    }

    #[test]
    fn response_for_previous_kind_is_dropped() {
        let mut state = ReportState::new(ReportKind::Revenue);
        let (id, _) = state.begin().expect("valid");
        state.set_kind(ReportKind::Inventory);
        assert!(!state.finish(id, Ok(ReportRows::Money(Vec::new()))));
        assert!(state.rows().is_none());
    }

    #[test]
    fn grand_total_sums_money_rows_only() -> serde_json::Result<()> {
        let rows = ReportRows::decode(
            ReportKind::Revenue,
            json!([
                {"date": "2026-01-02", "product_id": 1, "product_name": "Bolt", "quantity": 1, "total": 50},
                {"date": "2026-01-03", "product_id": 2, "product_name": "Nut", "quantity": 2, "total": "25.50"},
                {"date": "2026-01-04", "product_id": 3, "product_name": "Pin", "quantity": 3, "total": 74.5}
            ]),
        )?;
        let total = rows.grand_total().expect("money report has a total");
        assert_eq!(total.map(Money::display_rub), Ok("150.00₽".to_owned()));

        let inventory = ReportRows::decode(
            ReportKind::Inventory,
            json!([{"warehouse_id": 3, "warehouse_name": "Central", "remaining": 4}]),
        )?;
        assert_eq!(inventory.grand_total(), None);
        Ok(())
    }

    #[test]
    fn grand_total_that_does_not_fit_is_an_error() {
        let row = |total: Money| MoneyRow {
            date: None,
            warehouse_id: None,
            warehouse_name: None,
            product_id: ProductId::new(1),
            product_name: "Bolt".to_owned(),
            quantity: 1,
            total,
        };
        let huge = Money::from_kopecks(i64::MAX - 10);
        let rows = ReportRows::Money(vec![row(huge), row(Money::from_kopecks(11))]);
        assert_eq!(rows.grand_total(), Some(Err(MoneyError::Overflow)));
    }

    #[test]
    fn group_by_toggles_only_for_inventory() {
        let mut state = ReportState::new(ReportKind::Inventory);
        assert!(state.toggle_group_by());
        assert_eq!(state.params().group_by, Some(GroupBy::Product));
        state.set_kind(ReportKind::Revenue);
        assert!(!state.toggle_group_by());
        assert_eq!(state.params().group_by, None);
    }
}
