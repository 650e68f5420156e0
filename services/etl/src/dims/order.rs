//! DimOrder
//!
//! OrderID is the exposed key for both sources. Spreadsheet ids are not
//! prefixed, so a numeric id present in both sources for two different
//! orders collapses into the relational one. Those collisions are counted
//! and logged for a domain owner to review.

use super::customer::spreadsheet_customer_code;
use super::dedup_first;
use super::employee::employee_code;
use crate::rows::{Row, RowSet};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow {
    pub order_id: i64,
    pub customer_code: Option<String>,
    pub employee_code: Option<String>,
    pub order_date: Option<NaiveDateTime>,
    pub shipped_date: Option<NaiveDateTime>,
    pub status_id: Option<i64>,
}

fn relational_order(r: &Row<'_>, order_id: i64) -> OrderRow {
    OrderRow {
        order_id,
        customer_code: r.text("CustomerID").map(|c| c.trim().to_string()),
        employee_code: r.int("EmployeeID").map(employee_code),
        order_date: r.datetime("OrderDate"),
        shipped_date: r.datetime("ShippedDate"),
        status_id: r.int("StatusID"),
    }
}

fn spreadsheet_order(r: &Row<'_>, order_id: i64) -> OrderRow {
    OrderRow {
        order_id,
        customer_code: spreadsheet_customer_code(r),
        employee_code: r.int("EmployeeID").map(employee_code),
        order_date: r.datetime("OrderDate"),
        shipped_date: r.first_datetime(&["ShippedDate", "Shipped Date"]),
        status_id: r.first_int(&["StatusID", "Status ID"]),
    }
}

/// Unify relational and spreadsheet orders, relational rows first
pub fn build_dim_order(sql_orders: &RowSet, excel_orders: &RowSet) -> Vec<OrderRow> {
    let mut rows = Vec::with_capacity(sql_orders.len() + excel_orders.len());
    let mut unreadable = 0usize;

    for r in sql_orders.iter() {
        match r.int("OrderID") {
            Some(id) => rows.push(relational_order(&r, id)),
            None => unreadable += 1,
        }
    }
    let relational_ids: HashSet<i64> = rows.iter().map(|o: &OrderRow| o.order_id).collect();

    let mut collisions = 0usize;
    for r in excel_orders.iter() {
        match r.int("OrderID") {
            Some(id) => {
                if relational_ids.contains(&id) {
                    collisions += 1;
                }
                rows.push(spreadsheet_order(&r, id));
            }
            None => unreadable += 1,
        }
    }

    if unreadable > 0 {
        warn!(rows = unreadable, "order rows without an integer OrderID dropped");
    }
    if collisions > 0 {
        warn!(
            collisions,
            "spreadsheet OrderIDs also present in the relational source; spreadsheet rows dropped as duplicates"
        );
    }

    let (dim, duplicates) = dedup_first(rows, |o| o.order_id);
    let undated = dim.iter().filter(|o| o.order_date.is_none()).count();

    info!(
        relational = sql_orders.len(),
        spreadsheet = excel_orders.len(),
        duplicates,
        undated,
        rows = dim.len(),
        "built DimOrder"
    );
    dim
}
