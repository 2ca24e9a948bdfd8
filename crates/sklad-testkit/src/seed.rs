// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde_json::{Value, json};
use sklad_app::{EntityKind, Money, iso_date};
use time::{Date, Duration, Month};

const CITIES: [&str; 10] = [
    "Moscow",
    "Kazan",
    "Samara",
    "Tver",
    "Perm",
    "Omsk",
    "Tula",
    "Kursk",
    "Ryazan",
    "Vologda",
];

const STREETS: [&str; 10] = [
    "Lenina",
    "Sadovaya",
    "Mira",
    "Gagarina",
    "Pushkina",
    "Zavodskaya",
    "Lesnaya",
    "Sovetskaya",
    "Polevaya",
    "Rechnaya",
];

const FIRST_NAMES: [&str; 12] = [
    "Anna", "Ivan", "Olga", "Pavel", "Elena", "Sergey", "Maria", "Dmitry", "Irina", "Nikolai",
    "Tatiana", "Alexei",
];

const LAST_NAMES: [&str; 12] = [
    "Petrov", "Ivanov", "Smirnov", "Kuznetsov", "Popov", "Sokolov", "Lebedev", "Kozlov",
    "Novikov", "Morozov", "Volkov", "Orlov",
];

const POSITIONS: [(&str, i64); 5] = [
    ("Warehouse manager", 9_000_000),
    ("Storekeeper", 5_500_000),
    ("Loader", 4_200_000),
    ("Forklift driver", 5_000_000),
    ("Inventory clerk", 4_800_000),
];

const PRODUCTS: [(&str, &str); 12] = [
    ("Hex bolt M8", "pcs"),
    ("Wood screw 4x40", "pcs"),
    ("Cement M500", "bag"),
    ("Copper wire 2.5mm", "m"),
    ("Paint white", "l"),
    ("Plywood sheet", "pcs"),
    ("Sealant", "tube"),
    ("Gloves", "pair"),
    ("Nails 100mm", "kg"),
    ("Tile adhesive", "bag"),
    ("PVC pipe 50mm", "m"),
    ("Drywall sheet", "pcs"),
];

const SUPPLIER_WORDS: [&str; 8] = [
    "Stroy", "Metiz", "Torg", "Snab", "Prom", "Servis", "Opt", "Komplekt",
];

const RECIPIENTS: [&str; 6] = [
    "Retail shop #1",
    "Retail shop #2",
    "Site Yuzhny",
    "Site Severny",
    "Online orders",
    "Service team",
];

/// Small xorshift generator so seeded data is identical across runs.
#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }
}

/// Generates a coherent warehouse dataset: every foreign key points at a seeded row.
#[derive(Debug, Clone)]
pub struct InventoryFaker {
    rng: DeterministicRng,
}

/// Rows ready to load into the fake API, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub rows: Vec<(EntityKind, Value)>,
}

impl Dataset {
    pub fn count(&self, kind: EntityKind) -> usize {
        self.rows.iter().filter(|(row_kind, _)| *row_kind == kind).count()
    }
}

impl InventoryFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
        }
    }

    pub fn dataset(&mut self) -> Dataset {
        let mut rows = Vec::new();

        let warehouses = 3;
        for id in 1..=warehouses {
            rows.push((
                EntityKind::Warehouse,
                json!({
                    "warehouse_id": id,
                    "name": format!("{} warehouse", self.pick(&CITIES)),
                    "address": format!("{} st. {}", self.pick(&STREETS), self.range(1, 120)),
                    // Managers are filled in below, once employees exist.
                    "manager_id": null,
                }),
            ));
        }

        for (index, (name, salary)) in POSITIONS.iter().enumerate() {
            rows.push((
                EntityKind::Position,
                json!({
                    "position_id": index + 1,
                    "position_name": name,
                    "salary": Money::from_kopecks(*salary),
                }),
            ));
        }

        let employees = 8;
        for id in 1..=employees {
            let warehouse_id = (id - 1) % warehouses + 1;
            let position_id = if id <= warehouses { 1 } else { self.range(2, 5) };
            rows.push((
                EntityKind::Employee,
                json!({
                    "employee_id": id,
                    "first_name": self.pick(&FIRST_NAMES),
                    "last_name": self.pick(&LAST_NAMES),
                    "position_id": position_id,
                    "warehouse_id": warehouse_id,
                    "phone": self.phone(),
                }),
            ));
        }
        for (kind, row) in &mut rows {
            if *kind == EntityKind::Warehouse
                && let Some(id) = row.get("warehouse_id").and_then(Value::as_i64)
            {
                row["manager_id"] = json!(id);
            }
        }

        for (index, (name, unit)) in PRODUCTS.iter().enumerate() {
            rows.push((
                EntityKind::Product,
                json!({
                    "product_id": index + 1,
                    "product_name": name,
                    "article": format!("{:08}", 10_000_000 + self.range(0, 89_999_999)),
                    "price": Money::from_kopecks(self.range(50, 5_000) * 10),
                    "unit": unit,
                }),
            ));
        }

        let suppliers = 4;
        for id in 1..=suppliers {
            rows.push((
                EntityKind::Supplier,
                json!({
                    "supplier_id": id,
                    "supplier_name": format!(
                        "OOO {}{}",
                        self.pick(&SUPPLIER_WORDS),
                        self.pick(&SUPPLIER_WORDS).to_ascii_lowercase()
                    ),
                    "inn": format!("77{:08}", self.range(0, 99_999_999)),
                    "phone": self.phone(),
                }),
            ));
        }

        let start = Date::from_calendar_date(2026, Month::January, 5).unwrap_or(Date::MIN);
        let mut item_id = 1;
        for id in 1..=6 {
            let warehouse_id = (id - 1) % warehouses + 1;
            let date = start + Duration::days(self.range(0, 40));
            let (lines, total) = self.lines(&mut item_id, "income_id", id, 20, 60);
            rows.push((
                EntityKind::Income,
                json!({
                    "income_id": id,
                    "income_date": iso_date::format(date),
                    "warehouse_id": warehouse_id,
                    "supplier_id": self.range(1, suppliers),
                    "employee_id": warehouse_id,
                    "total": total,
                }),
            ));
            rows.extend(
                lines
                    .into_iter()
                    .map(|line| (EntityKind::IncomeItem, line)),
            );
        }

        let mut item_id = 1;
        for id in 1..=5 {
            let warehouse_id = (id - 1) % warehouses + 1;
            let date = start + Duration::days(self.range(10, 50));
            let (lines, total) = self.lines(&mut item_id, "outcome_id", id, 1, 15);
            rows.push((
                EntityKind::Outcome,
                json!({
                    "outcome_id": id,
                    "outcome_date": iso_date::format(date),
                    "warehouse_id": warehouse_id,
                    "employee_id": warehouse_id,
                    "recipient": self.pick(&RECIPIENTS),
                    "total": total,
                }),
            ));
            rows.extend(
                lines
                    .into_iter()
                    .map(|line| (EntityKind::OutcomeItem, line)),
            );
        }

        Dataset { rows }
    }

    fn lines(
        &mut self,
        next_id: &mut i64,
        header_field: &str,
        header_id: i64,
        min_qty: i64,
        max_qty: i64,
    ) -> (Vec<Value>, Money) {
        let (id_field, count) = if header_field == "income_id" {
            ("income_item_id", self.range(2, 4))
        } else {
            ("outcome_item_id", self.range(1, 3))
        };
        let mut total = Money::ZERO;
        let mut lines = Vec::new();
        for _ in 0..count {
            let quantity = self.range(min_qty, max_qty);
            let price = Money::from_kopecks(self.range(50, 5_000) * 10);
            total = total
                .checked_add(price.times(quantity).unwrap_or(Money::ZERO))
                .unwrap_or(total);
            lines.push(json!({
                id_field: *next_id,
                header_field: header_id,
                "product_id": self.range(1, PRODUCTS.len() as i64),
                "quantity": quantity,
                "price": price,
            }));
            *next_id += 1;
        }
        (lines, total)
    }

    fn phone(&mut self) -> String {
        format!(
            "+7 9{:02} {:03}-{:02}-{:02}",
            self.range(0, 99),
            self.range(0, 999),
            self.range(0, 99),
            self.range(0, 99)
        )
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }

    fn range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = max - min + 1;
        min + (self.rng.next_u64() % (span as u64)) as i64
    }
}
