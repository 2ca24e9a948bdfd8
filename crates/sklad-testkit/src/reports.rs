// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde_json::{Value, json};
use sklad_app::{EntityKind, GroupBy, Money, ReportKind, ReportParams, SortBy, iso_date};
use std::collections::BTreeMap;
use time::Date;

type Collections = BTreeMap<EntityKind, Vec<Value>>;

/// One stock movement: a line joined with its note header.
struct Movement {
    date: Option<Date>,
    warehouse_id: i64,
    product_id: i64,
    quantity: i64,
    price: Money,
}

fn rows(collections: &Collections, kind: EntityKind) -> &[Value] {
    collections.get(&kind).map_or(&[], Vec::as_slice)
}

fn name_of(collections: &Collections, kind: EntityKind, field: &str, id: i64) -> Value {
    rows(collections, kind)
        .iter()
        .find(|row| row[kind.id_field()].as_i64() == Some(id))
        .map(|row| row[field].clone())
        .unwrap_or(Value::Null)
}

fn movements(collections: &Collections, header: EntityKind, date_field: &str) -> Vec<Movement> {
    let Some(line) = header.line_kind() else {
        return Vec::new();
    };
    let headers: BTreeMap<i64, &Value> = rows(collections, header)
        .iter()
        .filter_map(|row| row[header.id_field()].as_i64().map(|id| (id, row)))
        .collect();
    rows(collections, line)
        .iter()
        .filter_map(|row| {
            let note = headers.get(&row[header.id_field()].as_i64()?)?;
            Some(Movement {
                date: note[date_field].as_str().and_then(|raw| iso_date::parse(raw).ok()),
                warehouse_id: note["warehouse_id"].as_i64()?,
                product_id: row["product_id"].as_i64()?,
                quantity: row["quantity"].as_i64()?,
                price: serde_json::from_value(row["price"].clone()).ok()?,
            })
        })
        .collect()
}

pub(crate) fn build(
    collections: &Collections,
    kind: ReportKind,
    params: &ReportParams,
) -> Result<Vec<Value>, String> {
    params.validate(kind).map_err(|error| error.to_string())?;
    let warehouse = params.warehouse_id.map(|id| id.get());
    Ok(match kind {
        ReportKind::Inventory => inventory(collections, warehouse, params),
        ReportKind::Revenue => money(collections, EntityKind::Outcome, "outcome_date", params),
        ReportKind::Cost => money(collections, EntityKind::Income, "income_date", params),
    })
}

fn inventory(collections: &Collections, warehouse: Option<i64>, params: &ReportParams) -> Vec<Value> {
    let by_product = params.group_by == Some(GroupBy::Product);
    let mut remaining: BTreeMap<(Option<i64>, i64), i64> = BTreeMap::new();
    let incoming = movements(collections, EntityKind::Income, "income_date")
        .into_iter()
        .map(|movement| (movement, 1));
    let outgoing = movements(collections, EntityKind::Outcome, "outcome_date")
        .into_iter()
        .map(|movement| (movement, -1));
    for (movement, sign) in incoming.chain(outgoing) {
        if warehouse.is_some_and(|id| id != movement.warehouse_id) {
            continue;
        }
        let group = if by_product && warehouse.is_none() {
            None
        } else {
            Some(movement.warehouse_id)
        };
        *remaining.entry((group, movement.product_id)).or_default() += sign * movement.quantity;
    }

    let mut out: Vec<(String, i64, Value)> = remaining
        .into_iter()
        .map(|((warehouse_id, product_id), remaining)| {
            let product_name = name_of(collections, EntityKind::Product, "product_name", product_id);
            let warehouse_name = warehouse_id
                .map(|id| name_of(collections, EntityKind::Warehouse, "name", id))
                .unwrap_or(Value::Null);
            let sort_name = product_name.as_str().unwrap_or_default().to_owned();
            (
                sort_name,
                remaining,
                json!({
                    "warehouse_id": warehouse_id,
                    "warehouse_name": warehouse_name,
                    "product_id": product_id,
                    "product_name": product_name,
                    "remaining": remaining,
                }),
            )
        })
        .collect();
    match params.sort_by {
        SortBy::Remaining => out.sort_by(|left, right| right.1.cmp(&left.1)),
        _ => out.sort_by(|left, right| left.0.cmp(&right.0)),
    }
    out.into_iter().map(|(_, _, row)| row).collect()
}

fn money(
    collections: &Collections,
    header: EntityKind,
    date_field: &str,
    params: &ReportParams,
) -> Vec<Value> {
    let warehouse = params.warehouse_id.map(|id| id.get());
    let mut groups: BTreeMap<(Option<Date>, i64, i64), (i64, Money)> = BTreeMap::new();
    for movement in movements(collections, header, date_field) {
        if warehouse.is_some_and(|id| id != movement.warehouse_id) {
            continue;
        }
        if let (Some(from), Some(date)) = (params.date_from, movement.date)
            && date < from
        {
            continue;
        }
        if let (Some(to), Some(date)) = (params.date_to, movement.date)
            && date > to
        {
            continue;
        }
        let entry = groups
            .entry((movement.date, movement.warehouse_id, movement.product_id))
            .or_insert((0, Money::ZERO));
        entry.0 += movement.quantity;
        let subtotal = movement.price.times(movement.quantity).unwrap_or(Money::ZERO);
        entry.1 = entry.1.checked_add(subtotal).unwrap_or(entry.1);
    }

    let mut out: Vec<(Option<Date>, String, Money, Value)> = groups
        .into_iter()
        .map(|((date, warehouse_id, product_id), (quantity, total))| {
            let product_name = name_of(collections, EntityKind::Product, "product_name", product_id);
            let sort_name = product_name.as_str().unwrap_or_default().to_owned();
            (
                date,
                sort_name,
                total,
                json!({
                    "date": date.map(iso_date::format),
                    "warehouse_id": warehouse_id,
                    "warehouse_name": name_of(collections, EntityKind::Warehouse, "name", warehouse_id),
                    "product_id": product_id,
                    "product_name": product_name,
                    "quantity": quantity,
                    "total": total,
                }),
            )
        })
        .collect();
    match params.sort_by {
        SortBy::Total => out.sort_by(|left, right| right.2.cmp(&left.2)),
        SortBy::ProductName => out.sort_by(|left, right| left.1.cmp(&right.1)),
        _ => out.sort_by(|left, right| left.0.cmp(&right.0)),
    }
    out.into_iter().map(|(_, _, _, row)| row).collect()
}

#[cfg(test)]
mod tests {
    use super::build;
    use serde_json::{Value, json};
    use sklad_app::{EntityKind, GroupBy, ReportKind, ReportParams, SortBy, WarehouseId};
    use std::collections::BTreeMap;

    fn collections() -> BTreeMap<EntityKind, Vec<Value>> {
        let mut collections = BTreeMap::new();
        collections.insert(
            EntityKind::Warehouse,
            vec![
                json!({"warehouse_id": 1, "name": "North"}),
                json!({"warehouse_id": 2, "name": "South"}),
            ],
        );
        collections.insert(
            EntityKind::Product,
            vec![json!({"product_id": 1, "product_name": "Bolt"})],
        );
        collections.insert(
            EntityKind::Income,
            vec![
                json!({"income_id": 1, "income_date": "2026-01-05", "warehouse_id": 1}),
                json!({"income_id": 2, "income_date": "2026-01-06", "warehouse_id": 2}),
            ],
        );
        collections.insert(
            EntityKind::IncomeItem,
            vec![
                json!({"income_item_id": 1, "income_id": 1, "product_id": 1, "quantity": 10, "price": 2.5}),
                json!({"income_item_id": 2, "income_id": 2, "product_id": 1, "quantity": 4, "price": 2.5}),
            ],
        );
        collections.insert(
            EntityKind::Outcome,
            vec![json!({"outcome_id": 1, "outcome_date": "2026-01-07", "warehouse_id": 1})],
        );
        collections.insert(
            EntityKind::OutcomeItem,
            vec![json!({"outcome_item_id": 1, "outcome_id": 1, "product_id": 1, "quantity": 3, "price": 5})],
        );
        collections
    }

    #[test]
    fn inventory_subtracts_outgoing_per_warehouse() {
        let params = ReportParams {
            warehouse_id: Some(WarehouseId::new(1)),
            ..ReportParams::for_kind(ReportKind::Inventory)
        };
        let rows = build(&collections(), ReportKind::Inventory, &params).expect("report");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["warehouse_id"], json!(1));
        assert_eq!(rows[0]["remaining"], json!(7));
    }

    #[test]
    fn inventory_by_product_sums_warehouses() {
        let params = ReportParams {
            group_by: Some(GroupBy::Product),
            ..ReportParams::for_kind(ReportKind::Inventory)
        };
        let rows = build(&collections(), ReportKind::Inventory, &params).expect("report");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["warehouse_id"], Value::Null);
        assert_eq!(rows[0]["remaining"], json!(11));
    }

    #[test]
    fn cost_report_filters_by_date() {
        let mut params = ReportParams::for_kind(ReportKind::Cost);
        params.sort_by = SortBy::Date;
        params.date_from = Some(time::macros::date!(2026 - 01 - 06));
        let rows = build(&collections(), ReportKind::Cost, &params).expect("report");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["total"], json!(10.0));
    }

    #[test]
    fn invalid_sort_is_rejected() {
        let mut params = ReportParams::for_kind(ReportKind::Inventory);
        params.sort_by = SortBy::Total;
        assert!(build(&collections(), ReportKind::Inventory, &params).is_err());
    }
}
