// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;
use std::fmt;
use time::{Date, OffsetDateTime};

use crate::model::{
    EmployeeFields, EntityFields, EntityKind, IncomeFields, IncomeItemFields, OutcomeFields,
    OutcomeItemFields, PositionFields, ProductFields, Record, SupplierFields, WarehouseFields,
    iso_date,
};
use crate::money::{Money, MoneyError};
use crate::mutation::{NoteDraft, NoteHeader, NoteLine};

pub const ARTICLE_DIGITS: usize = 8;
pub const INN_DIGITS: usize = 10;
const TOTAL_TOO_LARGE: &str = "note total is too large";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldInput {
    Text,
    /// Optional; digits and separators only.
    Phone,
    Money,
    Digits(usize),
    Date,
    Quantity,
    Lookup(EntityKind),
    OptionalLookup(EntityKind),
}

impl FieldInput {
    pub const fn lookup(self) -> Option<EntityKind> {
        match self {
            Self::Lookup(kind) | Self::OptionalLookup(kind) => Some(kind),
            _ => None,
        }
    }
}

pub trait FormField: Copy + Ord + fmt::Debug + 'static {
    const ALL: &'static [Self];

    fn label(self) -> &'static str;
    fn input(self) -> FieldInput;
}

/// Validation messages keyed by the field they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldErrors<F: Ord>(BTreeMap<F, String>);

impl<F: Ord> Default for FieldErrors<F> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<F: Ord + Copy> FieldErrors<F> {
    pub fn set(&mut self, field: F, message: impl Into<String>) {
        self.0.insert(field, message.into());
    }

    pub fn clear(&mut self, field: F) -> bool {
        self.0.remove(&field).is_some()
    }

    pub fn get(&self, field: F) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> Option<F> {
        self.0.keys().next().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (F, &str)> {
        self.0.iter().map(|(field, message)| (*field, message.as_str()))
    }
}

/// Raw text the user has typed, one entry per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft<F: Ord>(BTreeMap<F, String>);

impl<F: Ord> Default for Draft<F> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<F: Ord + Copy> Draft<F> {
    pub fn get(&self, field: F) -> &str {
        self.0.get(&field).map_or("", String::as_str)
    }

    pub fn set(&mut self, field: F, value: impl Into<String>) {
        self.0.insert(field, value.into());
    }

    pub fn with(mut self, field: F, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }
}

/// A field set that validates into a typed value.
pub trait FormSchema: FormField {
    type Output;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>>;
    fn draft_of(value: &Self::Output) -> Draft<Self>;

    fn blank() -> Draft<Self> {
        Draft::default()
    }
}

struct Check<'a, F: FormField> {
    draft: &'a Draft<F>,
    errors: FieldErrors<F>,
}

impl<'a, F: FormField> Check<'a, F> {
    fn new(draft: &'a Draft<F>) -> Self {
        Self {
            draft,
            errors: FieldErrors::default(),
        }
    }

    fn raw(&self, field: F) -> &'a str {
        self.draft.get(field).trim()
    }

    fn text(&mut self, field: F) -> String {
        let raw = self.raw(field);
        if raw.is_empty() {
            self.errors.set(field, format!("{} is required", field.label()));
        }
        raw.to_owned()
    }

    fn phone(&mut self, field: F) -> String {
        let raw = self.raw(field);
        let allowed = |c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')');
        if !raw.chars().all(allowed) {
            self.errors
                .set(field, "use digits, spaces, and + - ( ) only");
        }
        raw.to_owned()
    }

    fn digits(&mut self, field: F, len: usize) -> String {
        let raw = self.raw(field);
        if raw.is_empty() {
            self.errors.set(field, format!("{} is required", field.label()));
        } else if raw.len() != len || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
            self.errors
                .set(field, format!("{} must be exactly {len} digits", field.label()));
        }
        raw.to_owned()
    }

    fn money(&mut self, field: F) -> Money {
        Money::parse(self.raw(field)).unwrap_or_else(|err| {
            self.errors.set(field, format!("{}: {err}", field.label()));
            Money::ZERO
        })
    }

    fn quantity(&mut self, field: F) -> i64 {
        let raw = self.raw(field);
        match raw.parse::<i64>() {
            Ok(quantity) if quantity > 0 => quantity,
            Ok(_) => {
                self.errors.set(field, "quantity must be positive");
                0
            }
            Err(_) if raw.is_empty() => {
                self.errors.set(field, "quantity is required");
                0
            }
            Err(_) => {
                self.errors.set(field, "quantity must be a whole number");
                0
            }
        }
    }

    fn date(&mut self, field: F) -> Date {
        let raw = self.raw(field);
        if raw.is_empty() {
            self.errors.set(field, format!("{} is required", field.label()));
            return Date::MIN;
        }
        iso_date::parse(raw).unwrap_or_else(|_| {
            self.errors.set(field, "use YYYY-MM-DD");
            Date::MIN
        })
    }

    fn optional_id<T: From<i64>>(&mut self, field: F) -> Option<T> {
        let raw = self.raw(field);
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Some(T::from(id)),
            _ => {
                self.errors.set(field, format!("choose a {}", field.label()));
                None
            }
        }
    }

    fn id<T: From<i64>>(&mut self, field: F) -> T {
        if self.raw(field).is_empty() {
            self.errors.set(field, format!("{} is required", field.label()));
            return T::from(0);
        }
        self.optional_id(field).unwrap_or_else(|| T::from(0))
    }

    fn finish<T>(self, value: T) -> Result<T, FieldErrors<F>> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }
}

macro_rules! form_fields {
    ($name:ident { $($variant:ident => ($label:literal, $input:expr)),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl FormField for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            fn input(self) -> FieldInput {
                match self {
                    $(Self::$variant => $input),+
                }
            }
        }
    };
}

form_fields!(WarehouseField {
    Name => ("name", FieldInput::Text),
    Address => ("address", FieldInput::Text),
    Manager => ("manager", FieldInput::OptionalLookup(EntityKind::Employee)),
});

form_fields!(PositionField {
    PositionName => ("position", FieldInput::Text),
    Salary => ("salary", FieldInput::Money),
});

form_fields!(EmployeeField {
    FirstName => ("first name", FieldInput::Text),
    LastName => ("last name", FieldInput::Text),
    Position => ("position", FieldInput::Lookup(EntityKind::Position)),
    Warehouse => ("warehouse", FieldInput::Lookup(EntityKind::Warehouse)),
    Phone => ("phone", FieldInput::Phone),
});

form_fields!(ProductField {
    ProductName => ("product name", FieldInput::Text),
    Article => ("article", FieldInput::Digits(ARTICLE_DIGITS)),
    Price => ("price", FieldInput::Money),
    Unit => ("unit", FieldInput::Text),
});

form_fields!(SupplierField {
    SupplierName => ("supplier name", FieldInput::Text),
    Inn => ("INN", FieldInput::Digits(INN_DIGITS)),
    Phone => ("phone", FieldInput::Phone),
});

form_fields!(IncomeField {
    Date => ("date", FieldInput::Date),
    Warehouse => ("warehouse", FieldInput::Lookup(EntityKind::Warehouse)),
    Supplier => ("supplier", FieldInput::Lookup(EntityKind::Supplier)),
    Employee => ("employee", FieldInput::Lookup(EntityKind::Employee)),
    Total => ("total", FieldInput::Money),
});

form_fields!(IncomeItemField {
    Income => ("income note", FieldInput::Lookup(EntityKind::Income)),
    Product => ("product", FieldInput::Lookup(EntityKind::Product)),
    Quantity => ("quantity", FieldInput::Quantity),
    Price => ("price", FieldInput::Money),
});

form_fields!(OutcomeField {
    Date => ("date", FieldInput::Date),
    Warehouse => ("warehouse", FieldInput::Lookup(EntityKind::Warehouse)),
    Employee => ("employee", FieldInput::Lookup(EntityKind::Employee)),
    Recipient => ("recipient", FieldInput::Text),
    Total => ("total", FieldInput::Money),
});

form_fields!(OutcomeItemField {
    Outcome => ("outcome note", FieldInput::Lookup(EntityKind::Outcome)),
    Product => ("product", FieldInput::Lookup(EntityKind::Product)),
    Quantity => ("quantity", FieldInput::Quantity),
    Price => ("price", FieldInput::Money),
});

form_fields!(IncomeNoteField {
    Date => ("date", FieldInput::Date),
    Warehouse => ("warehouse", FieldInput::Lookup(EntityKind::Warehouse)),
    Supplier => ("supplier", FieldInput::Lookup(EntityKind::Supplier)),
    Employee => ("employee", FieldInput::Lookup(EntityKind::Employee)),
});

form_fields!(OutcomeNoteField {
    Date => ("date", FieldInput::Date),
    Warehouse => ("warehouse", FieldInput::Lookup(EntityKind::Warehouse)),
    Employee => ("employee", FieldInput::Lookup(EntityKind::Employee)),
    Recipient => ("recipient", FieldInput::Text),
});

form_fields!(NoteLineField {
    Product => ("product", FieldInput::Lookup(EntityKind::Product)),
    Quantity => ("quantity", FieldInput::Quantity),
    Price => ("price", FieldInput::Money),
});

fn id_text(id: i64) -> String {
    id.to_string()
}

impl FormSchema for WarehouseField {
    type Output = WarehouseFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = WarehouseFields {
            name: check.text(Self::Name),
            address: check.text(Self::Address),
            manager_id: check.optional_id(Self::Manager),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::Name, &value.name)
            .with(Self::Address, &value.address)
            .with(
                Self::Manager,
                value.manager_id.map(|id| id_text(id.get())).unwrap_or_default(),
            )
    }
}

impl FormSchema for PositionField {
    type Output = PositionFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = PositionFields {
            position_name: check.text(Self::PositionName),
            salary: check.money(Self::Salary),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::PositionName, &value.position_name)
            .with(Self::Salary, value.salary.amount())
    }
}

impl FormSchema for EmployeeField {
    type Output = EmployeeFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = EmployeeFields {
            first_name: check.text(Self::FirstName),
            last_name: check.text(Self::LastName),
            position_id: check.id(Self::Position),
            warehouse_id: check.id(Self::Warehouse),
            phone: check.phone(Self::Phone),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::FirstName, &value.first_name)
            .with(Self::LastName, &value.last_name)
            .with(Self::Position, id_text(value.position_id.get()))
            .with(Self::Warehouse, id_text(value.warehouse_id.get()))
            .with(Self::Phone, &value.phone)
    }
}

impl FormSchema for ProductField {
    type Output = ProductFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = ProductFields {
            product_name: check.text(Self::ProductName),
            article: check.digits(Self::Article, ARTICLE_DIGITS),
            price: check.money(Self::Price),
            unit: check.text(Self::Unit),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::ProductName, &value.product_name)
            .with(Self::Article, &value.article)
            .with(Self::Price, value.price.amount())
            .with(Self::Unit, &value.unit)
    }
}

impl FormSchema for SupplierField {
    type Output = SupplierFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = SupplierFields {
            supplier_name: check.text(Self::SupplierName),
            inn: check.digits(Self::Inn, INN_DIGITS),
            phone: check.phone(Self::Phone),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::SupplierName, &value.supplier_name)
            .with(Self::Inn, &value.inn)
            .with(Self::Phone, &value.phone)
    }
}

impl FormSchema for IncomeField {
    type Output = IncomeFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = IncomeFields {
            income_date: check.date(Self::Date),
            warehouse_id: check.id(Self::Warehouse),
            supplier_id: check.id(Self::Supplier),
            employee_id: check.id(Self::Employee),
            total: check.money(Self::Total),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::Date, iso_date::format(value.income_date))
            .with(Self::Warehouse, id_text(value.warehouse_id.get()))
            .with(Self::Supplier, id_text(value.supplier_id.get()))
            .with(Self::Employee, id_text(value.employee_id.get()))
            .with(Self::Total, value.total.amount())
    }
}

impl FormSchema for IncomeItemField {
    type Output = IncomeItemFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = IncomeItemFields {
            income_id: check.id(Self::Income),
            product_id: check.id(Self::Product),
            quantity: check.quantity(Self::Quantity),
            price: check.money(Self::Price),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::Income, id_text(value.income_id.get()))
            .with(Self::Product, id_text(value.product_id.get()))
            .with(Self::Quantity, value.quantity.to_string())
            .with(Self::Price, value.price.amount())
    }
}

impl FormSchema for OutcomeField {
    type Output = OutcomeFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = OutcomeFields {
            outcome_date: check.date(Self::Date),
            warehouse_id: check.id(Self::Warehouse),
            employee_id: check.id(Self::Employee),
            recipient: check.text(Self::Recipient),
            total: check.money(Self::Total),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::Date, iso_date::format(value.outcome_date))
            .with(Self::Warehouse, id_text(value.warehouse_id.get()))
            .with(Self::Employee, id_text(value.employee_id.get()))
            .with(Self::Recipient, &value.recipient)
            .with(Self::Total, value.total.amount())
    }
}

impl FormSchema for OutcomeItemField {
    type Output = OutcomeItemFields;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = OutcomeItemFields {
            outcome_id: check.id(Self::Outcome),
            product_id: check.id(Self::Product),
            quantity: check.quantity(Self::Quantity),
            price: check.money(Self::Price),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::Outcome, id_text(value.outcome_id.get()))
            .with(Self::Product, id_text(value.product_id.get()))
            .with(Self::Quantity, value.quantity.to_string())
            .with(Self::Price, value.price.amount())
    }
}

impl FormSchema for NoteLineField {
    type Output = NoteLine;

    fn validate(draft: &Draft<Self>) -> Result<Self::Output, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = NoteLine {
            product_id: check.id(Self::Product),
            quantity: check.quantity(Self::Quantity),
            price: check.money(Self::Price),
        };
        check.finish(value)
    }

    fn draft_of(value: &Self::Output) -> Draft<Self> {
        Draft::default()
            .with(Self::Product, id_text(value.product_id.get()))
            .with(Self::Quantity, value.quantity.to_string())
            .with(Self::Price, value.price.amount())
    }
}

fn today() -> String {
    iso_date::format(OffsetDateTime::now_utc().date())
}

/// Header fields of a compound note; the total comes from its lines.
pub trait NoteHeaderSchema: FormField {
    const KIND: EntityKind;

    fn header(draft: &Draft<Self>, total: Money) -> Result<NoteHeader, FieldErrors<Self>>;
    fn date_field() -> Self;
}

impl NoteHeaderSchema for IncomeNoteField {
    const KIND: EntityKind = EntityKind::Income;

    fn header(draft: &Draft<Self>, total: Money) -> Result<NoteHeader, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = IncomeFields {
            income_date: check.date(Self::Date),
            warehouse_id: check.id(Self::Warehouse),
            supplier_id: check.id(Self::Supplier),
            employee_id: check.id(Self::Employee),
            total,
        };
        check.finish(NoteHeader::Income(value))
    }

    fn date_field() -> Self {
        Self::Date
    }
}

impl NoteHeaderSchema for OutcomeNoteField {
    const KIND: EntityKind = EntityKind::Outcome;

    fn header(draft: &Draft<Self>, total: Money) -> Result<NoteHeader, FieldErrors<Self>> {
        let mut check = Check::new(draft);
        let value = OutcomeFields {
            outcome_date: check.date(Self::Date),
            warehouse_id: check.id(Self::Warehouse),
            employee_id: check.id(Self::Employee),
            recipient: check.text(Self::Recipient),
            total,
        };
        check.finish(NoteHeader::Outcome(value))
    }

    fn date_field() -> Self {
        Self::Date
    }
}

/// Rendering-facing description of one input slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldView {
    pub label: String,
    pub value: String,
    pub error: Option<String>,
    pub input: FieldInput,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form<F: FormField> {
    draft: Draft<F>,
    errors: FieldErrors<F>,
    focus: usize,
}

impl<F: FormField> Form<F> {
    pub fn new(draft: Draft<F>) -> Self {
        Self {
            draft,
            errors: FieldErrors::default(),
            focus: 0,
        }
    }

    pub fn draft(&self) -> &Draft<F> {
        &self.draft
    }

    pub fn errors(&self) -> &FieldErrors<F> {
        &self.errors
    }

    pub fn value(&self, field: F) -> &str {
        self.draft.get(field)
    }

    pub fn set(&mut self, field: F, value: impl Into<String>) {
        self.draft.set(field, value);
    }

    pub fn focused_field(&self) -> F {
        F::ALL[self.focus.min(F::ALL.len() - 1)]
    }

    /// Moves focus to `field`, dropping any error it carried.
    pub fn focus(&mut self, field: F) {
        if let Some(index) = F::ALL.iter().position(|candidate| *candidate == field) {
            self.focus = index;
        }
        self.errors.clear(field);
    }

    fn move_focus(&mut self, index: usize) {
        if let Some(field) = F::ALL.get(index).copied() {
            self.focus(field);
        }
    }

    fn views(&self, line: Option<usize>) -> Vec<FieldView> {
        F::ALL
            .iter()
            .map(|field| FieldView {
                label: match line {
                    Some(line) => format!("line {} {}", line + 1, field.label()),
                    None => field.label().to_owned(),
                },
                value: self.draft.get(*field).to_owned(),
                error: self.errors.get(*field).map(str::to_owned),
                input: field.input(),
                line,
            })
            .collect()
    }

    fn set_errors(&mut self, errors: FieldErrors<F>) {
        self.errors = errors;
    }
}

impl<F: FormSchema> Form<F> {
    pub fn blank() -> Self {
        Self::new(F::blank())
    }

    pub fn from_value(value: &F::Output) -> Self {
        Self::new(F::draft_of(value))
    }

    /// Validates the draft; on failure the errors stay on the form.
    pub fn submit(&mut self) -> Option<F::Output> {
        match F::validate(&self.draft) {
            Ok(value) => {
                self.errors = FieldErrors::default();
                Some(value)
            }
            Err(errors) => {
                self.errors = errors;
                None
            }
        }
    }
}

/// Header plus one or more line forms, created together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteForm<H: FormField> {
    header: Form<H>,
    lines: Vec<Form<NoteLineField>>,
    focus: usize,
}

impl<H: NoteHeaderSchema> NoteForm<H> {
    pub fn blank() -> Self {
        Self {
            header: Form::new(Draft::default().with(H::date_field(), today())),
            lines: vec![Form::blank()],
            focus: 0,
        }
    }

    pub fn header(&self) -> &Form<H> {
        &self.header
    }

    pub fn lines(&self) -> &[Form<NoteLineField>] {
        &self.lines
    }

    pub fn header_mut(&mut self) -> &mut Form<H> {
        &mut self.header
    }

    pub fn line_mut(&mut self, index: usize) -> Option<&mut Form<NoteLineField>> {
        self.lines.get_mut(index)
    }

    pub fn add_line(&mut self) {
        self.lines.push(Form::blank());
        self.focus = H::ALL.len() + (self.lines.len() - 1) * NoteLineField::ALL.len();
    }

    /// Removes the focused line; the last remaining line stays.
    pub fn remove_line(&mut self) -> bool {
        if self.lines.len() <= 1 {
            return false;
        }
        let Some((line, _)) = self.slot(self.focus) else {
            return false;
        };
        let Some(line) = line else {
            return false;
        };
        self.lines.remove(line);
        self.focus = self.focus.min(self.slot_count() - 1);
        true
    }

    /// Sum of quantity times price over lines that parse.
    pub fn running_total(&self) -> Result<Money, MoneyError> {
        self.lines
            .iter()
            .filter_map(|line| NoteLineField::validate(line.draft()).ok())
            .try_fold(Money::ZERO, |total, line| total.checked_add(line.subtotal()?))
            .ok_or(MoneyError::Overflow)
    }

    pub fn submit(&mut self) -> Option<NoteDraft> {
        let lines: Vec<Option<NoteLine>> =
            self.lines.iter_mut().map(Form::submit).collect();
        let lines: Option<Vec<NoteLine>> = lines.into_iter().collect();
        let mut total = lines.as_ref().map(|_| Money::ZERO);
        if let Some(valid) = &lines {
            for (index, line) in valid.iter().enumerate() {
                total = total.and_then(|sum| sum.checked_add(line.subtotal()?));
                if total.is_none() {
                    let mut errors = FieldErrors::default();
                    errors.set(NoteLineField::Quantity, TOTAL_TOO_LARGE);
                    self.lines[index].set_errors(errors);
                    break;
                }
            }
        }

        match H::header(&self.header.draft, total.unwrap_or(Money::ZERO)) {
            Ok(header) => {
                self.header.set_errors(FieldErrors::default());
                let lines = lines?;
                total.map(|_| NoteDraft { header, lines })
            }
            Err(errors) => {
                self.header.set_errors(errors);
                None
            }
        }
    }

    fn slot_count(&self) -> usize {
        H::ALL.len() + self.lines.len() * NoteLineField::ALL.len()
    }

    /// Maps a flat focus index to (line, field index within that form).
    fn slot(&self, index: usize) -> Option<(Option<usize>, usize)> {
        if index >= self.slot_count() {
            return None;
        }
        if index < H::ALL.len() {
            return Some((None, index));
        }
        let offset = index - H::ALL.len();
        Some((
            Some(offset / NoteLineField::ALL.len()),
            offset % NoteLineField::ALL.len(),
        ))
    }
}

/// Operations a renderer needs from any form.
pub trait FormView {
    fn fields(&self) -> Vec<FieldView>;
    fn focused(&self) -> usize;
    fn focus_index(&mut self, index: usize);
    fn set_value(&mut self, index: usize, value: String);
}

impl<F: FormField> FormView for Form<F> {
    fn fields(&self) -> Vec<FieldView> {
        self.views(None)
    }

    fn focused(&self) -> usize {
        self.focus
    }

    fn focus_index(&mut self, index: usize) {
        self.move_focus(index);
    }

    fn set_value(&mut self, index: usize, value: String) {
        if let Some(field) = F::ALL.get(index).copied() {
            self.draft.set(field, value);
        }
    }
}

impl<H: NoteHeaderSchema> FormView for NoteForm<H> {
    fn fields(&self) -> Vec<FieldView> {
        let mut fields = self.header.views(None);
        for (index, line) in self.lines.iter().enumerate() {
            fields.extend(line.views(Some(index)));
        }
        fields
    }

    fn focused(&self) -> usize {
        self.focus
    }

    fn focus_index(&mut self, index: usize) {
        match self.slot(index) {
            Some((None, field)) => self.header.move_focus(field),
            Some((Some(line), field)) => self.lines[line].move_focus(field),
            None => return,
        }
        self.focus = index;
    }

    fn set_value(&mut self, index: usize, value: String) {
        match self.slot(index) {
            Some((None, field)) => self.header.set_value(field, value),
            Some((Some(line), field)) => self.lines[line].set_value(field, value),
            None => {}
        }
    }
}

/// What a submitted form turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormOutput {
    Fields(EntityFields),
    Note(NoteDraft),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyForm {
    Warehouse(Form<WarehouseField>),
    Position(Form<PositionField>),
    Employee(Form<EmployeeField>),
    Product(Form<ProductField>),
    Supplier(Form<SupplierField>),
    Income(Form<IncomeField>),
    IncomeItem(Form<IncomeItemField>),
    Outcome(Form<OutcomeField>),
    OutcomeItem(Form<OutcomeItemField>),
    IncomeNote(NoteForm<IncomeNoteField>),
    OutcomeNote(NoteForm<OutcomeNoteField>),
}

impl AnyForm {
    /// Create form for a table; note tables create header and lines together.
    pub fn create(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Warehouse => Self::Warehouse(Form::blank()),
            EntityKind::Position => Self::Position(Form::blank()),
            EntityKind::Employee => Self::Employee(Form::blank()),
            EntityKind::Product => Self::Product(Form::blank()),
            EntityKind::Supplier => Self::Supplier(Form::blank()),
            EntityKind::Income => Self::IncomeNote(NoteForm::blank()),
            EntityKind::IncomeItem => Self::IncomeItem(Form::blank()),
            EntityKind::Outcome => Self::OutcomeNote(NoteForm::blank()),
            EntityKind::OutcomeItem => Self::OutcomeItem(Form::blank()),
        }
    }

    pub fn edit(record: &Record) -> Self {
        match record {
            Record::Warehouse(row) => Self::Warehouse(Form::from_value(&row.fields)),
            Record::Position(row) => Self::Position(Form::from_value(&row.fields)),
            Record::Employee(row) => Self::Employee(Form::from_value(&row.fields)),
            Record::Product(row) => Self::Product(Form::from_value(&row.fields)),
            Record::Supplier(row) => Self::Supplier(Form::from_value(&row.fields)),
            Record::Income(row) => Self::Income(Form::from_value(&row.fields)),
            Record::IncomeItem(row) => Self::IncomeItem(Form::from_value(&row.fields)),
            Record::Outcome(row) => Self::Outcome(Form::from_value(&row.fields)),
            Record::OutcomeItem(row) => Self::OutcomeItem(Form::from_value(&row.fields)),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Warehouse(_) => EntityKind::Warehouse,
            Self::Position(_) => EntityKind::Position,
            Self::Employee(_) => EntityKind::Employee,
            Self::Product(_) => EntityKind::Product,
            Self::Supplier(_) => EntityKind::Supplier,
            Self::Income(_) | Self::IncomeNote(_) => EntityKind::Income,
            Self::IncomeItem(_) => EntityKind::IncomeItem,
            Self::Outcome(_) | Self::OutcomeNote(_) => EntityKind::Outcome,
            Self::OutcomeItem(_) => EntityKind::OutcomeItem,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, Self::IncomeNote(_) | Self::OutcomeNote(_))
    }

    fn view(&self) -> &dyn FormView {
        match self {
            Self::Warehouse(form) => form,
            Self::Position(form) => form,
            Self::Employee(form) => form,
            Self::Product(form) => form,
            Self::Supplier(form) => form,
            Self::Income(form) => form,
            Self::IncomeItem(form) => form,
            Self::Outcome(form) => form,
            Self::OutcomeItem(form) => form,
            Self::IncomeNote(form) => form,
            Self::OutcomeNote(form) => form,
        }
    }

    fn view_mut(&mut self) -> &mut dyn FormView {
        match self {
            Self::Warehouse(form) => form,
            Self::Position(form) => form,
            Self::Employee(form) => form,
            Self::Product(form) => form,
            Self::Supplier(form) => form,
            Self::Income(form) => form,
            Self::IncomeItem(form) => form,
            Self::Outcome(form) => form,
            Self::OutcomeItem(form) => form,
            Self::IncomeNote(form) => form,
            Self::OutcomeNote(form) => form,
        }
    }

    pub fn fields(&self) -> Vec<FieldView> {
        self.view().fields()
    }

    pub fn focused(&self) -> usize {
        self.view().focused()
    }

    pub fn focused_field(&self) -> Option<FieldView> {
        self.fields().into_iter().nth(self.focused())
    }

    pub fn focus_next(&mut self) {
        let count = self.fields().len();
        let next = (self.focused() + 1) % count.max(1);
        self.view_mut().focus_index(next);
    }

    pub fn focus_prev(&mut self) {
        let count = self.fields().len().max(1);
        let prev = (self.focused() + count - 1) % count;
        self.view_mut().focus_index(prev);
    }

    pub fn set_focused_value(&mut self, value: String) {
        let index = self.focused();
        self.view_mut().set_value(index, value);
    }

    pub fn push_char(&mut self, ch: char) {
        if let Some(field) = self.focused_field() {
            let mut value = field.value;
            value.push(ch);
            self.set_focused_value(value);
        }
    }

    pub fn pop_char(&mut self) {
        if let Some(field) = self.focused_field() {
            let mut value = field.value;
            value.pop();
            self.set_focused_value(value);
        }
    }

    pub fn add_line(&mut self) -> bool {
        match self {
            Self::IncomeNote(form) => form.add_line(),
            Self::OutcomeNote(form) => form.add_line(),
            _ => return false,
        }
        true
    }

    pub fn remove_line(&mut self) -> bool {
        match self {
            Self::IncomeNote(form) => form.remove_line(),
            Self::OutcomeNote(form) => form.remove_line(),
            _ => false,
        }
    }

    /// The note total so far; `None` for forms without lines.
    pub fn running_total(&self) -> Option<Result<Money, MoneyError>> {
        match self {
            Self::IncomeNote(form) => Some(form.running_total()),
            Self::OutcomeNote(form) => Some(form.running_total()),
            _ => None,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.fields().iter().any(|field| field.error.is_some())
    }

    pub fn submit(&mut self) -> Option<FormOutput> {
        let fields = match self {
            Self::Warehouse(form) => EntityFields::Warehouse(form.submit()?),
            Self::Position(form) => EntityFields::Position(form.submit()?),
            Self::Employee(form) => EntityFields::Employee(form.submit()?),
            Self::Product(form) => EntityFields::Product(form.submit()?),
            Self::Supplier(form) => EntityFields::Supplier(form.submit()?),
            Self::Income(form) => EntityFields::Income(form.submit()?),
            Self::IncomeItem(form) => EntityFields::IncomeItem(form.submit()?),
            Self::Outcome(form) => EntityFields::Outcome(form.submit()?),
            Self::OutcomeItem(form) => EntityFields::OutcomeItem(form.submit()?),
            Self::IncomeNote(form) => return form.submit().map(FormOutput::Note),
            Self::OutcomeNote(form) => return form.submit().map(FormOutput::Note),
        };
        Some(FormOutput::Fields(fields))
    }
}
