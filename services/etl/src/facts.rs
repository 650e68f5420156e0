//! Fact assembler
//!
//! One fact row per (order x territory assignment of the order's employee).
//! Foreign keys are left-joined: anything unresolved stays null and is
//! counted, never fatal.
//!
//! Join path: order -> employee (by EmployeeCode) -> employee_territories
//! (by the employee's source id) -> territories (by TerritoryID) -> region.

use crate::dims::{date_key, region_code, CustomerRow, EmployeeRow, OrderRow};
use crate::rows::{RowSet, Value};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRow {
    pub order_id: i64,
    pub customer_code: Option<String>,
    pub employee_code: Option<String>,
    /// Provisional DimCustomer surrogate
    pub customer_id: Option<i64>,
    /// Provisional DimEmployee surrogate
    pub employee_id: Option<i64>,
    pub orders_delivered: i32,
    pub orders_not_delivered: i32,
    pub date_key: Option<i32>,
    /// DimTerritory natural key; the surrogate is resolved at load
    pub territory_code: Option<String>,
    /// DimRegion natural key; the surrogate is resolved at load
    pub region_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactDiagnostics {
    pub rows: usize,
    pub unresolved_customer: usize,
    pub unresolved_employee: usize,
    pub unresolved_territory: usize,
    pub unresolved_region: usize,
    /// Extra rows produced by employees holding several territories
    pub fan_out_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FactTable {
    pub rows: Vec<FactRow>,
    pub diagnostics: FactDiagnostics,
}

/// Territory ids are matched numerically when they are integers
/// (`"01581"` == `1581`), by trimmed text otherwise.
fn territory_key(value: &Value) -> Option<String> {
    let text = value.as_text()?;
    let trimmed = text.trim();
    Some(match trimmed.parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => trimmed.to_string(),
    })
}

struct TerritoryLink {
    code: String,
    region_code: Option<String>,
}

/// TerritoryID -> (verbatim code, region code), first occurrence wins
fn territory_index(territories: &RowSet) -> HashMap<String, TerritoryLink> {
    let mut index = HashMap::new();
    for r in territories.iter() {
        let Some(value) = r.get("TerritoryID") else { continue };
        let (Some(key), Some(code)) = (territory_key(value), value.as_text()) else {
            continue;
        };
        index.entry(key).or_insert_with(|| TerritoryLink {
            code: code.trim().to_string(),
            region_code: r.int("RegionID").map(region_code),
        });
    }
    index
}

/// Source employee id -> assigned territory ids (key, verbatim), in link order
fn employee_territory_index(links: &RowSet) -> HashMap<i64, Vec<(String, String)>> {
    let mut index: HashMap<i64, Vec<(String, String)>> = HashMap::new();
    for r in links.iter() {
        let Some(employee) = r.int("EmployeeID") else { continue };
        let Some(value) = r.get("TerritoryID") else { continue };
        let (Some(key), Some(code)) = (territory_key(value), value.as_text()) else {
            continue;
        };
        index
            .entry(employee)
            .or_default()
            .push((key, code.trim().to_string()));
    }
    index
}

/// Build the fact rows from the unified dimensions and the relational
/// link tables.
pub fn assemble_facts(
    orders: &[OrderRow],
    customers: &[CustomerRow],
    employees: &[EmployeeRow],
    employee_territories: &RowSet,
    territories: &RowSet,
) -> FactTable {
    let customer_ids: HashMap<&str, i64> = customers
        .iter()
        .map(|c| (c.customer_code.as_str(), c.customer_id))
        .collect();
    let employee_by_code: HashMap<&str, &EmployeeRow> = employees
        .iter()
        .map(|e| (e.employee_code.as_str(), e))
        .collect();
    let territory_index = territory_index(territories);
    let assignments = employee_territory_index(employee_territories);

    let mut rows = Vec::with_capacity(orders.len());
    let mut diagnostics = FactDiagnostics::default();

    for order in orders {
        let customer_id = order
            .customer_code
            .as_deref()
            .and_then(|code| customer_ids.get(code).copied());
        let employee = order
            .employee_code
            .as_deref()
            .and_then(|code| employee_by_code.get(code).copied());

        let delivered = i32::from(order.shipped_date.is_some());
        let base = FactRow {
            order_id: order.order_id,
            customer_code: order.customer_code.clone(),
            employee_code: order.employee_code.clone(),
            customer_id,
            employee_id: employee.map(|e| e.employee_id),
            orders_delivered: delivered,
            orders_not_delivered: 1 - delivered,
            date_key: order.order_date.map(|d| date_key(d.date())),
            territory_code: None,
            region_code: None,
        };

        let links = employee
            .and_then(|e| assignments.get(&e.employee_orig))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        if links.is_empty() {
            rows.push(base);
            continue;
        }

        diagnostics.fan_out_rows += links.len() - 1;
        for (key, verbatim) in links {
            let mut row = base.clone();
            match territory_index.get(key) {
                Some(link) => {
                    row.territory_code = Some(link.code.clone());
                    row.region_code = link.region_code.clone();
                }
                None => row.territory_code = Some(verbatim.clone()),
            }
            rows.push(row);
        }
    }

    diagnostics.rows = rows.len();
    diagnostics.unresolved_customer = rows.iter().filter(|r| r.customer_id.is_none()).count();
    diagnostics.unresolved_employee = rows.iter().filter(|r| r.employee_id.is_none()).count();
    diagnostics.unresolved_territory = rows.iter().filter(|r| r.territory_code.is_none()).count();
    diagnostics.unresolved_region = rows.iter().filter(|r| r.region_code.is_none()).count();

    info!(
        orders = orders.len(),
        rows = diagnostics.rows,
        fan_out_rows = diagnostics.fan_out_rows,
        unresolved_customer = diagnostics.unresolved_customer,
        unresolved_employee = diagnostics.unresolved_employee,
        unresolved_territory = diagnostics.unresolved_territory,
        unresolved_region = diagnostics.unresolved_region,
        "assembled fact rows"
    );

    FactTable { rows, diagnostics }
}
