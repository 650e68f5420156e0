//! Transform pipeline: harmonized sources in, star schema out

use crate::dims::{
    build_dim_customer, build_dim_date, build_dim_employee, build_dim_order, build_dim_region,
    build_dim_territory, CustomerRow, DateRow, EmployeeRow, NameSplitter, OrderRow, RegionRow,
    TerritoryRow,
};
use crate::error::EtlResult;
use crate::extract::{Entity, SourceTables};
use crate::facts::{assemble_facts, FactTable};
use chrono::NaiveDate;
use tracing::info;

/// Operator overrides for the calendar bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateOverrides {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Every table produced by one run, ready for checking and loading
#[derive(Debug, Clone)]
pub struct StarSchema {
    pub dim_date: Vec<DateRow>,
    pub dim_region: Vec<RegionRow>,
    pub dim_territory: Vec<TerritoryRow>,
    pub dim_customer: Vec<CustomerRow>,
    pub dim_employee: Vec<EmployeeRow>,
    pub dim_order: Vec<OrderRow>,
    pub facts: FactTable,
}

impl StarSchema {
    /// Row count per table, in load order
    pub fn table_counts(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("dim_date", self.dim_date.len()),
            ("dim_region", self.dim_region.len()),
            ("dim_territory", self.dim_territory.len()),
            ("dim_customer", self.dim_customer.len()),
            ("dim_employee", self.dim_employee.len()),
            ("dim_order", self.dim_order.len()),
            ("fact_orders", self.facts.rows.len()),
        ]
    }
}

/// Build the six dimensions and the fact table from harmonized sources.
///
/// Region, territory and the employee/territory link table only exist in
/// the relational source.
pub fn transform(
    sql: &SourceTables,
    xls: &SourceTables,
    dates: DateOverrides,
    splitter: &dyn NameSplitter,
) -> EtlResult<StarSchema> {
    let dim_date = build_dim_date(
        sql.rows(Entity::Orders),
        xls.rows(Entity::Orders),
        dates.start,
        dates.end,
    )?;
    let dim_region = build_dim_region(sql.rows(Entity::Region));
    let dim_territory = build_dim_territory(sql.rows(Entity::Territories));
    let dim_customer = build_dim_customer(
        sql.rows(Entity::Customers),
        xls.rows(Entity::Customers),
        splitter,
    );
    let dim_employee = build_dim_employee(sql.rows(Entity::Employees), xls.rows(Entity::Employees));
    let dim_order = build_dim_order(sql.rows(Entity::Orders), xls.rows(Entity::Orders));

    let facts = assemble_facts(
        &dim_order,
        &dim_customer,
        &dim_employee,
        sql.rows(Entity::EmployeeTerritories),
        sql.rows(Entity::Territories),
    );

    let schema = StarSchema {
        dim_date,
        dim_region,
        dim_territory,
        dim_customer,
        dim_employee,
        dim_order,
        facts,
    };
    for (table, rows) in schema.table_counts() {
        info!(table, rows, "transformed");
    }
    Ok(schema)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dims::FirstTokenGivenName;
    use crate::error::EtlError;
    use crate::extract::SourceKind;
    use crate::rows::{rowset, text, Value};
    use std::collections::HashSet;

    /// Small two-source fixture, already harmonized
    pub(crate) fn sources() -> (SourceTables, SourceTables) {
        let mut sql = SourceTables::new(SourceKind::Relational);
        sql.insert(
            Entity::Orders,
            rowset(
                "orders",
                &["OrderID", "CustomerID", "EmployeeID", "OrderDate", "ShippedDate", "RequiredDate"],
                vec![
                    vec![
                        Value::Int(10248),
                        text("VINET"),
                        Value::Int(5),
                        text("2023-01-10"),
                        text("2023-01-15"),
                        text("2023-02-01"),
                    ],
                    vec![
                        Value::Int(10249),
                        text("TOMSP"),
                        Value::Int(6),
                        text("2023-01-11"),
                        Value::Null,
                        text("2023-02-05"),
                    ],
                ],
            ),
        );
        sql.insert(
            Entity::Customers,
            rowset(
                "customers",
                &["CustomerID", "CompanyName", "ContactName"],
                vec![
                    vec![text("VINET"), text("Vins et alcools Chevalier"), text("Paul Henriot")],
                    vec![text("TOMSP"), text("Toms Spezialitaten"), text("Karin Josephs")],
                ],
            ),
        );
        sql.insert(
            Entity::Employees,
            rowset(
                "employees",
                &["EmployeeID", "LastName", "FirstName"],
                vec![
                    vec![Value::Int(5), text("Buchanan"), text("Steven")],
                    vec![Value::Int(6), text("Suyama"), text("Michael")],
                ],
            ),
        );
        sql.insert(
            Entity::Region,
            rowset(
                "region",
                &["RegionID", "RegionDescription"],
                vec![vec![Value::Int(1), text("Eastern")], vec![Value::Int(2), text("Western")]],
            ),
        );
        sql.insert(
            Entity::Territories,
            rowset(
                "territories",
                &["TerritoryID", "TerritoryDescription", "RegionID"],
                vec![
                    vec![text("02903"), text("Providence"), Value::Int(1)],
                    vec![text("07960"), text("Morristown"), Value::Int(1)],
                    vec![text("98052"), text("Redmond"), Value::Int(2)],
                ],
            ),
        );
        sql.insert(
            Entity::EmployeeTerritories,
            rowset(
                "employee_territories",
                &["EmployeeID", "TerritoryID"],
                vec![
                    vec![Value::Int(5), text("02903")],
                    vec![Value::Int(5), text("07960")],
                ],
            ),
        );

        let mut xls = SourceTables::new(SourceKind::Spreadsheet);
        xls.insert(
            Entity::Orders,
            rowset(
                "orders",
                &["OrderID", "CustomerID", "EmployeeID", "OrderDate", "ShippedDate"],
                vec![
                    vec![Value::Float(30.0), Value::Float(27.0), Value::Float(9.0), text("2023-03-20"), text("2023-04-01")],
                    vec![Value::Float(31.0), Value::Float(4.0), Value::Float(3.0), text("n/a"), Value::Null],
                ],
            ),
        );
        xls.insert(
            Entity::Customers,
            rowset(
                "customers",
                &["CustomerID", "CompanyName", "LastName", "FirstName"],
                vec![
                    vec![Value::Float(27.0), text("Company AA"), text("Toh"), text("Karen")],
                    vec![Value::Float(4.0), text("Company D"), text("Lee"), text("Christina")],
                ],
            ),
        );
        xls.insert(
            Entity::Employees,
            rowset(
                "employees",
                &["EmployeeID", "LastName", "FirstName"],
                vec![
                    vec![Value::Float(9.0), text("Hellung-Larsen"), text("Anne")],
                    vec![Value::Float(3.0), text("Kotas"), text("Jan")],
                ],
            ),
        );
        (sql, xls)
    }

    #[test]
    fn test_transform_end_to_end() {
        let (sql, xls) = sources();
        let schema = transform(&sql, &xls, DateOverrides::default(), &FirstTokenGivenName).unwrap();

        // 2023-01-10 .. 2023-04-01
        assert_eq!(schema.dim_date.len(), 82);
        assert_eq!(schema.dim_region.len(), 2);
        assert_eq!(schema.dim_territory.len(), 3);
        assert_eq!(schema.dim_customer.len(), 4);
        assert_eq!(schema.dim_employee.len(), 4);
        assert_eq!(schema.dim_order.len(), 4);

        // order 10248 fans out over 2 territories, the rest have none
        assert_eq!(schema.facts.rows.len(), 5);
        let ids: HashSet<i64> = schema.facts.rows.iter().map(|r| r.order_id).collect();
        assert_eq!(ids.len(), schema.dim_order.len());
    }

    #[test]
    fn test_missing_date_order_kept_once() {
        let (sql, xls) = sources();
        let schema = transform(&sql, &xls, DateOverrides::default(), &FirstTokenGivenName).unwrap();
        let facts: Vec<_> = schema.facts.rows.iter().filter(|r| r.order_id == 31).collect();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].date_key, None);
        assert_eq!(facts[0].customer_code.as_deref(), Some("EX_4"));
        assert_eq!(schema.dim_order.iter().filter(|o| o.order_id == 31).count(), 1);
    }

    #[test]
    fn test_spreadsheet_only_run() {
        let (_, xls) = sources();
        let sql = SourceTables::new(SourceKind::Relational);
        let schema = transform(&sql, &xls, DateOverrides::default(), &FirstTokenGivenName).unwrap();
        assert!(schema.dim_region.is_empty());
        assert!(schema.dim_territory.is_empty());
        assert_eq!(schema.facts.rows.len(), 2);
        assert!(schema.facts.rows.iter().all(|r| r.territory_code.is_none()));
    }

    #[test]
    fn test_no_dates_anywhere_is_fatal() {
        let mut sql = SourceTables::new(SourceKind::Relational);
        sql.insert(Entity::Orders, rowset("orders", &["OrderID"], vec![vec![Value::Int(1)]]));
        let xls = SourceTables::new(SourceKind::Spreadsheet);
        let err = transform(&sql, &xls, DateOverrides::default(), &FirstTokenGivenName).unwrap_err();
        assert!(matches!(err, EtlError::NoDateAnchor));
    }

    #[test]
    fn test_timestamptz_order_dates_anchor_the_calendar() {
        let mut sql = SourceTables::new(SourceKind::Relational);
        sql.insert(
            Entity::Orders,
            crate::extract::rowset_from_json(
                "orders",
                vec![serde_json::json!({"OrderID": 1, "OrderDate": "1996-07-04T00:00:00+00:00"})],
            ),
        );
        let xls = SourceTables::new(SourceKind::Spreadsheet);
        let schema = transform(&sql, &xls, DateOverrides::default(), &FirstTokenGivenName).unwrap();
        assert_eq!(schema.dim_date.len(), 1);
        assert_eq!(schema.facts.rows[0].date_key, Some(19960704));
    }

    #[test]
    fn test_csv_float_ids_join_orders_to_customers() {
        use crate::extract::parse_csv;

        let mut xls = SourceTables::new(SourceKind::Spreadsheet);
        xls.insert(
            Entity::Customers,
            parse_csv("customers", "ID,Company\n7.0,Company G\n").unwrap(),
        );
        xls.insert(
            Entity::Orders,
            parse_csv("orders", "Order ID,Customer ID,Order Date\n40,7.0,2023-05-01\n").unwrap(),
        );
        xls.harmonize();

        let sql = SourceTables::new(SourceKind::Relational);
        let schema = transform(&sql, &xls, DateOverrides::default(), &FirstTokenGivenName).unwrap();
        assert_eq!(schema.dim_customer[0].customer_code, "EX_7");
        assert_eq!(schema.facts.rows[0].customer_code.as_deref(), Some("EX_7"));
        assert_eq!(schema.facts.rows[0].customer_id, Some(1));
    }

    #[test]
    fn test_date_overrides_applied() {
        let (sql, xls) = sources();
        let dates = DateOverrides {
            start: NaiveDate::from_ymd_opt(2023, 1, 1),
            end: NaiveDate::from_ymd_opt(2023, 12, 31),
        };
        let schema = transform(&sql, &xls, dates, &FirstTokenGivenName).unwrap();
        assert_eq!(schema.dim_date.len(), 365);
    }

    #[test]
    fn test_table_counts_in_load_order() {
        let (sql, xls) = sources();
        let schema = transform(&sql, &xls, DateOverrides::default(), &FirstTokenGivenName).unwrap();
        let names: Vec<&str> = schema.table_counts().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["dim_date", "dim_region", "dim_territory", "dim_customer", "dim_employee", "dim_order", "fact_orders"]
        );
    }
}
