//! Consistency checks and previews
//!
//! Hard checks guard the load: any failure aborts the run before the
//! warehouse is touched, and every failure is reported at once. Advisory
//! counts and previews are logged for the operator and never fail a run.

use crate::dims::date::collect_order_dates;
use crate::error::{EtlError, EtlResult};
use crate::extract::{Entity, SourceTables};
use crate::facts::FactRow;
use crate::pipeline::{DateOverrides, StarSchema};
use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::Hash;
use tracing::{info, warn};

const PREVIEW_LIMIT: usize = 10;
const OVERLAP_SAMPLE: usize = 5;

/// Delivered / total order counts for one preview bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRow {
    pub label: String,
    pub delivered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advisories {
    pub unresolved_customer: usize,
    pub unresolved_employee: usize,
    /// Fact rows whose DateKey has no DimDate row (narrowed calendar)
    pub date_key_outside_calendar: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub failures: Vec<String>,
    pub advisories: Advisories,
    pub top_customers: Vec<PreviewRow>,
    pub top_employees: Vec<PreviewRow>,
    /// Chronological, labelled `MM/YYYY`
    pub monthly: Vec<PreviewRow>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn hard failures into the fatal invariant error
    pub fn into_result(self) -> EtlResult<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(EtlError::InvariantViolation {
                failures: self.failures,
            })
        }
    }

    pub fn log(&self) {
        info!(
            unresolved_customer = self.advisories.unresolved_customer,
            unresolved_employee = self.advisories.unresolved_employee,
            date_key_outside_calendar = self.advisories.date_key_outside_calendar,
            "advisory foreign key counts"
        );
        for (title, rows) in [
            ("top customers by delivered orders", &self.top_customers),
            ("top employees by delivered orders", &self.top_employees),
            ("orders per month", &self.monthly),
        ] {
            for row in rows {
                info!(bucket = %row.label, delivered = row.delivered, total = row.total, "{}", title);
            }
        }
        for failure in &self.failures {
            warn!(%failure, "consistency check failed");
        }
    }
}

// =============================================================================
// HARD CHECKS
// =============================================================================

fn duplicates<'a, K, I>(keys: I) -> Vec<K>
where
    K: Eq + Hash + Ord + Clone + 'a,
    I: IntoIterator<Item = &'a K>,
{
    let mut seen = HashSet::new();
    let mut dup = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            dup.insert(key.clone());
        }
    }
    dup.into_iter().collect()
}

fn sample<T: ToString>(items: &[T]) -> String {
    let shown: Vec<String> = items.iter().take(OVERLAP_SAMPLE).map(T::to_string).collect();
    shown.join(", ")
}

fn check_calendar(
    schema: &StarSchema,
    sql: &SourceTables,
    xls: &SourceTables,
    dates: DateOverrides,
    failures: &mut Vec<String>,
) {
    let Some(first) = schema.dim_date.first() else {
        failures.push("DimDate is empty".to_string());
        return;
    };
    let last = schema.dim_date.last().unwrap_or(first);

    let pool = collect_order_dates(&[sql.rows(Entity::Orders), xls.rows(Entity::Orders)]);
    let expected_start = dates.start.or_else(|| pool.iter().min().copied());
    let expected_end = dates.end.or_else(|| pool.iter().max().copied());
    if let Some(start) = expected_start {
        if first.date > start {
            failures.push(format!("DimDate starts at {} but dates begin at {}", first.date, start));
        }
    }
    if let Some(end) = expected_end {
        if last.date < end {
            failures.push(format!("DimDate ends at {} but dates run until {}", last.date, end));
        }
    }

    let dup = duplicates(schema.dim_date.iter().map(|d| &d.date_key));
    if !dup.is_empty() {
        failures.push(format!("DimDate has {} duplicate DateKeys ({})", dup.len(), sample(&dup)));
    }

    let gaps = schema
        .dim_date
        .windows(2)
        .filter(|w| w[1].date != w[0].date + Duration::days(1))
        .count();
    if gaps > 0 {
        failures.push(format!("DimDate is not contiguous ({gaps} gaps)"));
    }
}

fn check_unique_keys(schema: &StarSchema, failures: &mut Vec<String>) {
    let customers = duplicates(schema.dim_customer.iter().map(|c| &c.customer_code));
    if !customers.is_empty() {
        failures.push(format!(
            "DimCustomer has {} duplicate CustomerCodes ({})",
            customers.len(),
            sample(&customers)
        ));
    }
    let employees = duplicates(schema.dim_employee.iter().map(|e| &e.employee_code));
    if !employees.is_empty() {
        failures.push(format!(
            "DimEmployee has {} duplicate EmployeeCodes ({})",
            employees.len(),
            sample(&employees)
        ));
    }
    let orders = duplicates(schema.dim_order.iter().map(|o| &o.order_id));
    if !orders.is_empty() {
        failures.push(format!(
            "DimOrder has {} duplicate OrderIDs ({})",
            orders.len(),
            sample(&orders)
        ));
    }
}

fn check_facts(schema: &StarSchema, failures: &mut Vec<String>) {
    let fact_orders: HashSet<i64> = schema.facts.rows.iter().map(|r| r.order_id).collect();
    if fact_orders.len() != schema.dim_order.len() {
        failures.push(format!(
            "Fact table covers {} distinct orders but DimOrder has {}",
            fact_orders.len(),
            schema.dim_order.len()
        ));
    }

    let bad_kpi = schema
        .facts
        .rows
        .iter()
        .filter(|r| r.orders_delivered + r.orders_not_delivered != 1)
        .count();
    if bad_kpi > 0 {
        failures.push(format!("{bad_kpi} fact rows where delivered + not delivered != 1"));
    }
}

// =============================================================================
// PREVIEWS
// =============================================================================

const UNKNOWN: &str = "(unknown)";

/// Delivered/total per bucket, counting each order once whatever its fan-out
fn tally<F>(schema: &StarSchema, bucket: F) -> BTreeMap<String, (usize, usize)>
where
    F: Fn(&FactRow) -> Option<String>,
{
    let mut seen = HashSet::new();
    let mut tallies: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for row in &schema.facts.rows {
        if !seen.insert(row.order_id) {
            continue;
        }
        let Some(label) = bucket(row) else { continue };
        let entry = tallies.entry(label).or_default();
        entry.0 += row.orders_delivered as usize;
        entry.1 += 1;
    }
    tallies
}

/// Highest delivered count first, then total, then label
fn top(tallies: BTreeMap<String, (usize, usize)>) -> Vec<PreviewRow> {
    let mut rows: Vec<PreviewRow> = tallies
        .into_iter()
        .map(|(label, (delivered, total))| PreviewRow { label, delivered, total })
        .collect();
    rows.sort_by(|a, b| {
        b.delivered
            .cmp(&a.delivered)
            .then(b.total.cmp(&a.total))
            .then(a.label.cmp(&b.label))
    });
    rows.truncate(PREVIEW_LIMIT);
    rows
}

fn monthly(schema: &StarSchema) -> Vec<PreviewRow> {
    // YYYYMM sorts chronologically; relabel afterwards
    let tallies = tally(schema, |r| r.date_key.map(|k| format!("{:06}", k / 100)));
    tallies
        .into_iter()
        .map(|(yyyymm, (delivered, total))| PreviewRow {
            label: format!("{}/{}", &yyyymm[4..], &yyyymm[..4]),
            delivered,
            total,
        })
        .collect()
}

/// Run every check against a freshly transformed schema
pub fn run_checks(
    schema: &StarSchema,
    sql: &SourceTables,
    xls: &SourceTables,
    dates: DateOverrides,
) -> CheckReport {
    let mut failures = Vec::new();
    check_calendar(schema, sql, xls, dates, &mut failures);
    check_unique_keys(schema, &mut failures);
    check_facts(schema, &mut failures);

    let calendar: HashSet<i32> = schema.dim_date.iter().map(|d| d.date_key).collect();
    let advisories = Advisories {
        unresolved_customer: schema.facts.diagnostics.unresolved_customer,
        unresolved_employee: schema.facts.diagnostics.unresolved_employee,
        date_key_outside_calendar: schema
            .facts
            .rows
            .iter()
            .filter(|r| r.date_key.is_some_and(|k| !calendar.contains(&k)))
            .count(),
    };

    let report = CheckReport {
        failures,
        advisories,
        top_customers: top(tally(schema, |r| {
            Some(r.customer_code.clone().unwrap_or_else(|| UNKNOWN.to_string()))
        })),
        top_employees: top(tally(schema, |r| {
            Some(r.employee_code.clone().unwrap_or_else(|| UNKNOWN.to_string()))
        })),
        monthly: monthly(schema),
    };
    info!(failures = report.failures.len(), "consistency checks finished");
    report
}

// =============================================================================
// SOURCE OVERLAP
// =============================================================================

/// Key overlap between the two sources for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub entity: Entity,
    pub key_column: &'static str,
    pub shared: usize,
    pub only_relational: Vec<String>,
    pub only_spreadsheet: Vec<String>,
}

fn raw_keys(source: &SourceTables, entity: Entity, column: &str) -> BTreeSet<String> {
    source
        .rows(entity)
        .column_values(column)
        .into_iter()
        .filter_map(|v| v.as_text())
        .map(|k| k.trim().to_string())
        .collect()
}

/// Compare the raw key columns of both sources, before any prefixing
pub fn source_overlap(sql: &SourceTables, xls: &SourceTables) -> Vec<Overlap> {
    [
        (Entity::Orders, "OrderID"),
        (Entity::Customers, "CustomerID"),
        (Entity::Employees, "EmployeeID"),
    ]
    .into_iter()
    .map(|(entity, key_column)| {
        let left = raw_keys(sql, entity, key_column);
        let right = raw_keys(xls, entity, key_column);
        let overlap = Overlap {
            entity,
            key_column,
            shared: left.intersection(&right).count(),
            only_relational: left.difference(&right).cloned().collect(),
            only_spreadsheet: right.difference(&left).cloned().collect(),
        };
        info!(
            entity = entity.as_str(),
            key = key_column,
            shared = overlap.shared,
            only_relational = overlap.only_relational.len(),
            only_spreadsheet = overlap.only_spreadsheet.len(),
            sample_relational = %sample(&overlap.only_relational),
            sample_spreadsheet = %sample(&overlap.only_spreadsheet),
            "source key overlap"
        );
        overlap
    })
    .collect()
}
