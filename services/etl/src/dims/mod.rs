//! Dimension builders
//!
//! Each builder unifies the relational and spreadsheet rows of one entity
//! into a deduplicated table. Relational rows always come first, so on a
//! natural-key tie the relational row wins. Surrogate keys assigned here
//! are provisional; the loader replaces them with what the warehouse
//! actually committed.

pub mod customer;
pub mod date;
pub mod employee;
pub mod geo;
pub mod order;

pub use customer::{build_dim_customer, CustomerRow, FirstTokenGivenName, NameSplitter};
pub use date::{build_dim_date, date_key, DateRow};
pub use employee::{build_dim_employee, EmployeeRow};
pub use geo::{build_dim_region, build_dim_territory, region_code, RegionRow, TerritoryRow};
pub use order::{build_dim_order, OrderRow};

use std::collections::HashSet;
use std::hash::Hash;

/// Keep the first row per natural key, preserving input order.
/// Returns the surviving rows and how many were dropped.
pub(crate) fn dedup_first<T, K, F>(rows: Vec<T>, key: F) -> (Vec<T>, usize)
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let before = rows.len();
    let mut seen = HashSet::with_capacity(before);
    let kept: Vec<T> = rows.into_iter().filter(|row| seen.insert(key(row))).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Provisional surrogate for the row at `index` after dedup (1-based)
pub(crate) fn surrogate(index: usize) -> i64 {
    index as i64 + 1
}
