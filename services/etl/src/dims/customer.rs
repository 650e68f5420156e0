//! DimCustomer
//!
//! Natural key rules:
//! - relational `CustomerID` kept verbatim (`ALFKI`)
//! - spreadsheet ids prefixed with `EX_` (`7` -> `EX_7`) so numeric ids
//!   never collide with relational codes

use super::{dedup_first, surrogate};
use crate::rows::{Row, RowSet};
use tracing::{info, warn};

pub const SPREADSHEET_PREFIX: &str = "EX_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRow {
    /// Provisional surrogate key
    pub customer_id: i64,
    pub customer_code: String,
    pub company: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub city: Option<String>,
    pub state_province: Option<String>,
    pub country_region: Option<String>,
}

/// A person's name split into its parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonName {
    pub last: Option<String>,
    pub first: Option<String>,
}

/// Strategy for splitting a combined contact name
pub trait NameSplitter {
    fn split(&self, full_name: &str) -> PersonName;
}

/// First token is the given name, the remaining tokens the family name.
/// A single token is treated as the family name.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstTokenGivenName;

impl NameSplitter for FirstTokenGivenName {
    fn split(&self, full_name: &str) -> PersonName {
        let mut parts = full_name.split_whitespace();
        match parts.next() {
            None => PersonName::default(),
            Some(first) => {
                let rest: Vec<&str> = parts.collect();
                if rest.is_empty() {
                    PersonName {
                        last: Some(first.to_string()),
                        first: None,
                    }
                } else {
                    PersonName {
                        last: Some(rest.join(" ")),
                        first: Some(first.to_string()),
                    }
                }
            }
        }
    }
}

/// Natural key for a row; index-based when the key column is absent,
/// `None` when the column exists but this row's cell is blank.
fn customer_code(
    rows: &RowSet,
    row: &Row<'_>,
    index: usize,
    index_prefix: &str,
    key: fn(&Row<'_>) -> Option<String>,
) -> Option<String> {
    if !rows.has_column("CustomerID") {
        return Some(format!("{index_prefix}{index}"));
    }
    key(row)
}

fn relational_customer_code(row: &Row<'_>) -> Option<String> {
    row.text("CustomerID").map(|id| id.trim().to_string())
}

/// `EX_` code of a spreadsheet CustomerID, shared by DimCustomer and DimOrder.
/// Integral ids are read as integers (`7`, `7.0` and `"7.0"` all give `EX_7`).
pub fn spreadsheet_customer_code(row: &Row<'_>) -> Option<String> {
    let id = match row.int("CustomerID") {
        Some(id) => id.to_string(),
        None => row.text("CustomerID")?.trim().to_string(),
    };
    Some(format!("{SPREADSHEET_PREFIX}{id}"))
}

fn company(row: &Row<'_>) -> Option<String> {
    row.first_text(&["CompanyName", "Company"])
}

/// Unify relational and spreadsheet customers, relational rows first
pub fn build_dim_customer(
    sql_customers: &RowSet,
    excel_customers: &RowSet,
    splitter: &dyn NameSplitter,
) -> Vec<CustomerRow> {
    let mut rows: Vec<CustomerRow> = Vec::with_capacity(sql_customers.len() + excel_customers.len());
    let mut missing_key = 0usize;

    for (idx, r) in sql_customers.iter().enumerate() {
        let Some(code) = customer_code(sql_customers, &r, idx, "SQL_", relational_customer_code) else {
            missing_key += 1;
            continue;
        };
        let name = r
            .text("ContactName")
            .map(|n| splitter.split(&n))
            .unwrap_or_default();
        rows.push(CustomerRow {
            customer_id: 0,
            customer_code: code,
            company: company(&r),
            last_name: name.last,
            first_name: name.first,
            city: r.text("City"),
            state_province: r.first_text(&["Region", "StateProvince"]),
            country_region: r.text("Country"),
        });
    }

    for (idx, r) in excel_customers.iter().enumerate() {
        let Some(code) = customer_code(excel_customers, &r, idx, SPREADSHEET_PREFIX, spreadsheet_customer_code)
        else {
            missing_key += 1;
            continue;
        };
        rows.push(CustomerRow {
            customer_id: 0,
            customer_code: code,
            company: company(&r),
            last_name: r.text("LastName"),
            first_name: r.text("FirstName"),
            city: r.text("City"),
            state_province: r.text("StateProvince"),
            country_region: r.first_text(&["CountryRegion", "Country/Region", "Country"]),
        });
    }

    if missing_key > 0 {
        warn!(rows = missing_key, "customer rows without CustomerID dropped");
    }

    let (mut dim, duplicates) = dedup_first(rows, |c| c.customer_code.clone());
    for (idx, row) in dim.iter_mut().enumerate() {
        row.customer_id = surrogate(idx);
    }

    info!(
        relational = sql_customers.len(),
        spreadsheet = excel_customers.len(),
        duplicates,
        rows = dim.len(),
        "built DimCustomer"
    );
    dim
}
