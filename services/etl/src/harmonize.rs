//! Column harmonizer
//!
//! Renames source-specific column names onto the canonical names every
//! builder reads. The tables below are explicit, not inferred: a column
//! that is not listed passes through untouched, and a canonical column
//! that no source provides simply reads as null downstream.

use crate::extract::{Entity, SourceKind};
use crate::rows::RowSet;
use std::collections::HashMap;
use tracing::debug;

type RenameTable = &'static [(&'static str, &'static str)];

const SPREADSHEET_ORDERS: RenameTable = &[
    ("Order ID", "OrderID"),
    ("Customer ID", "CustomerID"),
    ("Employee ID", "EmployeeID"),
    ("Order Date", "OrderDate"),
    ("Shipped Date", "ShippedDate"),
    ("Required Date", "RequiredDate"),
    ("Status ID", "StatusID"),
];

const SPREADSHEET_CUSTOMERS: RenameTable = &[
    ("ID", "CustomerID"),
    ("Company", "CompanyName"),
    ("Last Name", "LastName"),
    ("First Name", "FirstName"),
    ("State/Province", "StateProvince"),
    ("Country/Region", "CountryRegion"),
];

const SPREADSHEET_EMPLOYEES: RenameTable = &[
    ("ID", "EmployeeID"),
    ("First Name", "FirstName"),
    ("Last Name", "LastName"),
    ("Job Title", "JobTitle"),
    ("Country/Region", "CountryRegion"),
];

// Northwind hosted on Postgres uses snake_case columns
const RELATIONAL_ORDERS: RenameTable = &[
    ("order_id", "OrderID"),
    ("customer_id", "CustomerID"),
    ("employee_id", "EmployeeID"),
    ("order_date", "OrderDate"),
    ("required_date", "RequiredDate"),
    ("shipped_date", "ShippedDate"),
    ("status_id", "StatusID"),
];

const RELATIONAL_CUSTOMERS: RenameTable = &[
    ("customer_id", "CustomerID"),
    ("company_name", "CompanyName"),
    ("contact_name", "ContactName"),
    ("city", "City"),
    ("region", "Region"),
    ("country", "Country"),
];

const RELATIONAL_EMPLOYEES: RenameTable = &[
    ("employee_id", "EmployeeID"),
    ("last_name", "LastName"),
    ("first_name", "FirstName"),
    ("title", "Title"),
    ("city", "City"),
    ("country", "Country"),
];

const RELATIONAL_REGION: RenameTable = &[
    ("region_id", "RegionID"),
    ("region_description", "RegionDescription"),
];

const RELATIONAL_TERRITORIES: RenameTable = &[
    ("territory_id", "TerritoryID"),
    ("territory_description", "TerritoryDescription"),
    ("region_id", "RegionID"),
];

const RELATIONAL_EMPLOYEE_TERRITORIES: RenameTable = &[
    ("employee_id", "EmployeeID"),
    ("territory_id", "TerritoryID"),
];

/// Fixed lookup table for one (source, entity) pair
pub fn rename_table(source: SourceKind, entity: Entity) -> RenameTable {
    match (source, entity) {
        (SourceKind::Spreadsheet, Entity::Orders) => SPREADSHEET_ORDERS,
        (SourceKind::Spreadsheet, Entity::Customers) => SPREADSHEET_CUSTOMERS,
        (SourceKind::Spreadsheet, Entity::Employees) => SPREADSHEET_EMPLOYEES,
        (SourceKind::Relational, Entity::Orders) => RELATIONAL_ORDERS,
        (SourceKind::Relational, Entity::Customers) => RELATIONAL_CUSTOMERS,
        (SourceKind::Relational, Entity::Employees) => RELATIONAL_EMPLOYEES,
        (SourceKind::Relational, Entity::Region) => RELATIONAL_REGION,
        (SourceKind::Relational, Entity::Territories) => RELATIONAL_TERRITORIES,
        (SourceKind::Relational, Entity::EmployeeTerritories) => RELATIONAL_EMPLOYEE_TERRITORIES,
        _ => &[],
    }
}

/// Rename one row set in place to canonical column names
pub fn harmonize(source: SourceKind, entity: Entity, rows: &mut RowSet) {
    let table = rename_table(source, entity);
    if table.is_empty() {
        return;
    }
    let renames: HashMap<&str, &str> = table.iter().copied().collect();
    let before = rows.columns.clone();
    rows.rename_columns(&renames);

    let renamed = before
        .iter()
        .zip(rows.columns.iter())
        .filter(|(old, new)| old != new)
        .count();
    debug!(
        source = ?source,
        entity = entity.as_str(),
        renamed,
        columns = rows.columns.len(),
        "harmonized columns"
    );
}
