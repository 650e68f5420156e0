//! DimEmployee
//!
//! Both sources share the employee id space, so the natural key is the
//! same `EMP_<id>` for either source and no prefixing is needed.

use super::{dedup_first, surrogate};
use crate::rows::{Row, RowSet};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeRow {
    /// Provisional surrogate key
    pub employee_id: i64,
    /// Source employee id, used to join the territory link table
    pub employee_orig: i64,
    pub employee_code: String,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub job_title: Option<String>,
    pub city: Option<String>,
    pub country_region: Option<String>,
}

pub fn employee_code(id: i64) -> String {
    format!("EMP_{id}")
}

fn project(r: &Row<'_>, id: i64, country_columns: &[&str]) -> EmployeeRow {
    EmployeeRow {
        employee_id: 0,
        employee_orig: id,
        employee_code: employee_code(id),
        last_name: r.text("LastName"),
        first_name: r.text("FirstName"),
        job_title: r.first_text(&["Title", "JobTitle"]),
        city: r.text("City"),
        country_region: r.first_text(country_columns),
    }
}

/// Unify relational and spreadsheet employees, relational rows first
pub fn build_dim_employee(sql_employees: &RowSet, excel_employees: &RowSet) -> Vec<EmployeeRow> {
    let mut rows = Vec::with_capacity(sql_employees.len() + excel_employees.len());
    let mut unreadable = 0usize;

    let sources: [(&RowSet, &[&str]); 2] = [
        (sql_employees, &["Country"]),
        (excel_employees, &["CountryRegion", "Country"]),
    ];
    for (set, country_columns) in sources {
        for r in set.iter() {
            match r.int("EmployeeID") {
                Some(id) => rows.push(project(&r, id, country_columns)),
                None => unreadable += 1,
            }
        }
    }

    if unreadable > 0 {
        warn!(rows = unreadable, "employee rows without an integer EmployeeID dropped");
    }

    let (mut dim, duplicates) = dedup_first(rows, |e| e.employee_code.clone());
    for (idx, row) in dim.iter_mut().enumerate() {
        row.employee_id = surrogate(idx);
    }

    info!(
        relational = sql_employees.len(),
        spreadsheet = excel_employees.len(),
        duplicates,
        rows = dim.len(),
        "built DimEmployee"
    );
    dim
}
