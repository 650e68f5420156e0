//! Warehouse loader
//!
//! Two stages inside one transaction:
//! 1. Dimensions, each row inserted only if its natural key is not already
//!    present. Afterwards the committed natural key -> surrogate key maps
//!    are read back.
//! 2. Facts, with every foreign key rewritten from those maps. An order
//!    that already existed in the warehouse contributes its committed
//!    customer, employee and order date instead of the in-memory ones.
//!
//! Any error rolls the whole load back.

mod postgres;

pub use postgres::PgWarehouse;

use crate::dims::{
    date_key, region_code, CustomerRow, DateRow, EmployeeRow, OrderRow, RegionRow, TerritoryRow,
};
use crate::facts::FactRow;
use crate::pipeline::StarSchema;
use crate::rows::Value;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Column name -> cell, in insert order
pub type Record = Vec<(&'static str, Value)>;

/// An order as the warehouse already holds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOrder {
    pub customer_code: Option<String>,
    pub employee_code: Option<String>,
    pub order_date: Option<NaiveDateTime>,
}

/// Transactional target of a load
#[async_trait]
pub trait Warehouse: Send + Sized {
    /// Column names of a table; empty when the table does not exist
    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Insert unless a row with equal key values exists (nulls compare
    /// equal). Returns whether the row was inserted.
    async fn insert_if_absent(
        &mut self,
        table: &str,
        key: &[&str],
        record: &[(&'static str, Value)],
    ) -> Result<bool>;

    /// Natural key (as text) -> surrogate key for every committed row
    async fn key_map(&mut self, table: &str, natural: &str, surrogate: &str) -> Result<HashMap<String, i64>>;

    async fn committed_orders(&mut self) -> Result<HashMap<i64, CommittedOrder>>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// A warehouse table and the natural key its rows are deduplicated on
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub key: &'static [&'static str],
}

pub const DIM_DATE: TableSpec = TableSpec { name: "dim_date", key: &["date_key"] };
pub const DIM_REGION: TableSpec = TableSpec { name: "dim_region", key: &["region_code"] };
pub const DIM_TERRITORY: TableSpec = TableSpec { name: "dim_territory", key: &["territory_code"] };
pub const DIM_CUSTOMER: TableSpec = TableSpec { name: "dim_customer", key: &["customer_code"] };
pub const DIM_EMPLOYEE: TableSpec = TableSpec { name: "dim_employee", key: &["employee_code"] };
pub const DIM_ORDER: TableSpec = TableSpec { name: "dim_order", key: &["order_id"] };
/// The territory code is part of the grain so fan-out rows stay distinct,
/// including rows whose territory has no DimTerritory entry.
pub const FACT_ORDERS: TableSpec = TableSpec {
    name: "fact_orders",
    key: &["order_id", "customer_id", "employee_id", "date_key", "territory_code"],
};

// =============================================================================
// SUMMARY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoad {
    pub table: &'static str,
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub tables: Vec<TableLoad>,
}

impl LoadSummary {
    #[cfg(test)]
    pub fn table(&self, name: &str) -> Option<&TableLoad> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn inserted(&self) -> usize {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let tables: serde_json::Map<String, serde_json::Value> = self
            .tables
            .iter()
            .map(|t| {
                (
                    t.table.to_string(),
                    serde_json::json!({ "inserted": t.inserted, "skipped": t.skipped }),
                )
            })
            .collect();
        serde_json::Value::Object(tables)
    }
}

// =============================================================================
// RECORDS
// =============================================================================

fn text(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn int(value: Option<i64>) -> Value {
    value.map(Value::Int).unwrap_or(Value::Null)
}

fn datetime(value: Option<NaiveDateTime>) -> Value {
    value.map(Value::DateTime).unwrap_or(Value::Null)
}

fn date_record(row: &DateRow) -> Record {
    vec![
        ("date_key", Value::Int(row.date_key.into())),
        ("full_date", Value::Date(row.date)),
        ("year", Value::Int(row.year.into())),
        ("quarter", Value::Int(row.quarter.into())),
        ("month", Value::Int(row.month.into())),
        ("month_name", Value::Text(row.month_name.clone())),
        ("day", Value::Int(row.day.into())),
        ("day_of_week", Value::Int(row.day_of_week.into())),
        ("is_weekend", Value::Bool(row.is_weekend)),
    ]
}

fn region_record(row: &RegionRow) -> Record {
    vec![
        ("region_code", Value::Text(row.region_code.clone())),
        ("region_name", text(&row.region_name)),
    ]
}

/// The source RegionID is only meaningful through its RegionCode
fn territory_record(row: &TerritoryRow, regions: &HashMap<String, i64>) -> Record {
    let region_id = row
        .source_region_id
        .and_then(|id| regions.get(&region_code(id)).copied());
    vec![
        ("territory_code", Value::Text(row.territory_code.clone())),
        ("territory_name", text(&row.territory_name)),
        ("region_id", int(region_id)),
    ]
}

fn customer_record(row: &CustomerRow) -> Record {
    vec![
        ("customer_code", Value::Text(row.customer_code.clone())),
        ("company", text(&row.company)),
        ("last_name", text(&row.last_name)),
        ("first_name", text(&row.first_name)),
        ("city", text(&row.city)),
        ("state_province", text(&row.state_province)),
        ("country_region", text(&row.country_region)),
    ]
}

fn employee_record(row: &EmployeeRow) -> Record {
    vec![
        ("employee_code", Value::Text(row.employee_code.clone())),
        ("employee_orig", Value::Int(row.employee_orig)),
        ("last_name", text(&row.last_name)),
        ("first_name", text(&row.first_name)),
        ("job_title", text(&row.job_title)),
        ("city", text(&row.city)),
        ("country_region", text(&row.country_region)),
    ]
}

fn order_record(row: &OrderRow) -> Record {
    vec![
        ("order_id", Value::Int(row.order_id)),
        ("customer_code", text(&row.customer_code)),
        ("employee_code", text(&row.employee_code)),
        ("order_date", datetime(row.order_date)),
        ("shipped_date", datetime(row.shipped_date)),
        ("status_id", int(row.status_id)),
    ]
}

// =============================================================================
// STAGES
// =============================================================================

/// Authoritative natural key -> surrogate key maps read after stage 1
#[derive(Debug, Clone, Default)]
pub struct KeyMaps {
    pub dates: HashSet<i64>,
    pub regions: HashMap<String, i64>,
    pub territories: HashMap<String, i64>,
    pub customers: HashMap<String, i64>,
    pub employees: HashMap<String, i64>,
}

/// Insert records into one table, skipping columns the table lacks
async fn write_table<W: Warehouse>(
    warehouse: &mut W,
    spec: TableSpec,
    records: Vec<Record>,
) -> Result<TableLoad> {
    let available: HashSet<String> = warehouse
        .table_columns(spec.name)
        .await
        .with_context(|| format!("Failed to read columns of {}", spec.name))?
        .into_iter()
        .collect();
    if available.is_empty() {
        anyhow::bail!("Warehouse table {} not found", spec.name);
    }
    if let Some(missing) = spec.key.iter().find(|k| !available.contains(**k)) {
        anyhow::bail!("Warehouse table {} lacks key column {}", spec.name, missing);
    }

    if let Some(first) = records.first() {
        let skipped: Vec<&str> = first
            .iter()
            .map(|(c, _)| *c)
            .filter(|c| !available.contains(*c))
            .collect();
        if !skipped.is_empty() {
            debug!(table = spec.name, columns = ?skipped, "columns not in warehouse table skipped");
        }
    }

    let mut load = TableLoad {
        table: spec.name,
        inserted: 0,
        skipped: 0,
    };
    for record in records {
        let filtered: Record = record
            .into_iter()
            .filter(|(c, _)| available.contains(*c))
            .collect();
        let inserted = warehouse
            .insert_if_absent(spec.name, spec.key, &filtered)
            .await
            .with_context(|| format!("Failed to insert into {}", spec.name))?;
        if inserted {
            load.inserted += 1;
        } else {
            load.skipped += 1;
        }
    }

    info!(
        table = spec.name,
        inserted = load.inserted,
        skipped = load.skipped,
        "loaded table"
    );
    Ok(load)
}

async fn read_key_map<W: Warehouse>(
    warehouse: &mut W,
    table: &str,
    natural: &str,
    surrogate: &str,
) -> Result<HashMap<String, i64>> {
    let map = warehouse
        .key_map(table, natural, surrogate)
        .await
        .with_context(|| format!("Failed to read key map of {table}"))?;
    debug!(table, keys = map.len(), "read committed key map");
    Ok(map)
}

/// Stage 1: dimensions, then the committed key maps
pub async fn load_dimensions<W: Warehouse>(
    warehouse: &mut W,
    schema: &StarSchema,
    summary: &mut LoadSummary,
) -> Result<KeyMaps> {
    let dates = schema.dim_date.iter().map(date_record).collect();
    summary.tables.push(write_table(warehouse, DIM_DATE, dates).await?);

    let regions = schema.dim_region.iter().map(region_record).collect();
    summary.tables.push(write_table(warehouse, DIM_REGION, regions).await?);
    let region_map = read_key_map(warehouse, DIM_REGION.name, "region_code", "region_id").await?;

    let territories = schema
        .dim_territory
        .iter()
        .map(|t| territory_record(t, &region_map))
        .collect();
    summary.tables.push(write_table(warehouse, DIM_TERRITORY, territories).await?);

    let customers = schema.dim_customer.iter().map(customer_record).collect();
    summary.tables.push(write_table(warehouse, DIM_CUSTOMER, customers).await?);

    let employees = schema.dim_employee.iter().map(employee_record).collect();
    summary.tables.push(write_table(warehouse, DIM_EMPLOYEE, employees).await?);

    let orders = schema.dim_order.iter().map(order_record).collect();
    summary.tables.push(write_table(warehouse, DIM_ORDER, orders).await?);

    let dates = read_key_map(warehouse, DIM_DATE.name, "date_key", "date_key")
        .await?
        .into_values()
        .collect();

    Ok(KeyMaps {
        dates,
        regions: region_map,
        territories: read_key_map(warehouse, DIM_TERRITORY.name, "territory_code", "territory_id").await?,
        customers: read_key_map(warehouse, DIM_CUSTOMER.name, "customer_code", "customer_id").await?,
        employees: read_key_map(warehouse, DIM_EMPLOYEE.name, "employee_code", "employee_id").await?,
    })
}

#[derive(Debug, Default)]
struct Remap {
    from_committed_order: usize,
    unresolved_customer: usize,
    unresolved_employee: usize,
    unresolved_territory: usize,
    unresolved_region: usize,
    date_outside_calendar: usize,
}

fn fact_record(
    fact: &FactRow,
    committed: Option<&CommittedOrder>,
    maps: &KeyMaps,
    remap: &mut Remap,
) -> Record {
    let (customer_code, employee_code, order_date_key) = match committed {
        Some(order) => {
            let key = order.order_date.map(|d| date_key(d.date()));
            if order.customer_code != fact.customer_code
                || order.employee_code != fact.employee_code
                || key != fact.date_key
            {
                remap.from_committed_order += 1;
            }
            (order.customer_code.as_deref(), order.employee_code.as_deref(), key)
        }
        None => (fact.customer_code.as_deref(), fact.employee_code.as_deref(), fact.date_key),
    };

    let customer_id = customer_code.and_then(|c| maps.customers.get(c).copied());
    let employee_id = employee_code.and_then(|c| maps.employees.get(c).copied());
    let territory_id = fact
        .territory_code
        .as_deref()
        .and_then(|c| maps.territories.get(c).copied());
    let region_id = fact
        .region_code
        .as_deref()
        .and_then(|c| maps.regions.get(c).copied());
    let date_key = order_date_key
        .map(i64::from)
        .filter(|k| maps.dates.contains(k));

    remap.unresolved_customer += usize::from(customer_id.is_none());
    remap.unresolved_employee += usize::from(employee_id.is_none());
    remap.unresolved_territory += usize::from(territory_id.is_none());
    remap.unresolved_region += usize::from(region_id.is_none());
    remap.date_outside_calendar += usize::from(order_date_key.is_some() && date_key.is_none());

    vec![
        ("order_id", Value::Int(fact.order_id)),
        ("customer_id", int(customer_id)),
        ("employee_id", int(employee_id)),
        ("date_key", int(date_key)),
        ("territory_id", int(territory_id)),
        ("territory_code", text(&fact.territory_code)),
        ("region_id", int(region_id)),
        ("orders_delivered", Value::Int(fact.orders_delivered.into())),
        ("orders_not_delivered", Value::Int(fact.orders_not_delivered.into())),
    ]
}

/// Stage 2: facts with foreign keys taken from the committed dimensions
pub async fn load_facts<W: Warehouse>(
    warehouse: &mut W,
    schema: &StarSchema,
    maps: &KeyMaps,
) -> Result<TableLoad> {
    let committed = warehouse
        .committed_orders()
        .await
        .context("Failed to read committed orders")?;

    let mut remap = Remap::default();
    let records: Vec<Record> = schema
        .facts
        .rows
        .iter()
        .map(|f| fact_record(f, committed.get(&f.order_id), maps, &mut remap))
        .collect();

    info!(
        rows = records.len(),
        from_committed_order = remap.from_committed_order,
        unresolved_customer = remap.unresolved_customer,
        unresolved_employee = remap.unresolved_employee,
        unresolved_territory = remap.unresolved_territory,
        unresolved_region = remap.unresolved_region,
        "fact foreign keys remapped"
    );
    if remap.date_outside_calendar > 0 {
        warn!(
            rows = remap.date_outside_calendar,
            "fact DateKeys missing from dim_date loaded as null"
        );
    }

    write_table(warehouse, FACT_ORDERS, records).await
}

/// Run both stages and commit; roll back on any error
pub async fn load<W: Warehouse>(mut warehouse: W, schema: &StarSchema) -> Result<LoadSummary> {
    let result = async {
        let mut summary = LoadSummary::default();
        let maps = load_dimensions(&mut warehouse, schema, &mut summary)
            .await
            .context("Dimension load failed")?;
        let facts = load_facts(&mut warehouse, schema, &maps)
            .await
            .context("Fact load failed")?;
        summary.tables.push(facts);
        Ok::<LoadSummary, anyhow::Error>(summary)
    }
    .await;

    match result {
        Ok(summary) => {
            warehouse.commit().await.context("Failed to commit load")?;
            info!(inserted = summary.inserted(), "load committed");
            Ok(summary)
        }
        Err(e) => {
            match warehouse.rollback().await {
                Ok(()) => warn!("load rolled back"),
                Err(rb) => warn!(error = %rb, "rollback failed"),
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dims::FirstTokenGivenName;
    use crate::pipeline::tests::sources;
    use crate::pipeline::{transform, DateOverrides};
    use std::sync::{Arc, Mutex};

    // -------------------------------------------------------------------------
    // IN-MEMORY WAREHOUSE
    // -------------------------------------------------------------------------

    #[derive(Debug, Clone, Default)]
    struct MemTable {
        columns: Vec<String>,
        serial: Option<String>,
        rows: Vec<HashMap<String, Value>>,
    }

    type Store = Arc<Mutex<HashMap<String, MemTable>>>;

    /// Works on a copy of the store; commit writes it back
    struct MemoryWarehouse {
        store: Store,
        pending: HashMap<String, MemTable>,
        fail_on: Option<&'static str>,
    }

    impl MemoryWarehouse {
        fn begin(store: &Store) -> Self {
            let pending = store.lock().unwrap().clone();
            Self {
                store: Arc::clone(store),
                pending,
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl Warehouse for MemoryWarehouse {
        async fn table_columns(&mut self, table: &str) -> Result<Vec<String>> {
            Ok(self.pending.get(table).map(|t| t.columns.clone()).unwrap_or_default())
        }

        async fn insert_if_absent(
            &mut self,
            table: &str,
            key: &[&str],
            record: &[(&'static str, Value)],
        ) -> Result<bool> {
            if self.fail_on == Some(table) {
                anyhow::bail!("simulated failure on {table}");
            }
            let t = self.pending.get_mut(table).context("no such table")?;
            let values: HashMap<String, Value> = record
                .iter()
                .map(|(c, v)| (c.to_string(), v.clone()))
                .collect();
            let cell = |row: &HashMap<String, Value>, c: &str| row.get(c).cloned().unwrap_or(Value::Null);
            if t.rows.iter().any(|row| key.iter().all(|k| cell(row, k) == cell(&values, k))) {
                return Ok(false);
            }
            let mut row = values;
            if let Some(serial) = &t.serial {
                let next = t
                    .rows
                    .iter()
                    .filter_map(|r| r.get(serial).and_then(Value::as_int))
                    .max()
                    .unwrap_or(0)
                    + 1;
                row.insert(serial.clone(), Value::Int(next));
            }
            t.rows.push(row);
            Ok(true)
        }

        async fn key_map(&mut self, table: &str, natural: &str, surrogate: &str) -> Result<HashMap<String, i64>> {
            let t = self.pending.get(table).context("no such table")?;
            Ok(t.rows
                .iter()
                .filter_map(|r| {
                    let k = r.get(natural).and_then(Value::as_text)?;
                    let v = r.get(surrogate).and_then(Value::as_int)?;
                    Some((k, v))
                })
                .collect())
        }

        async fn committed_orders(&mut self) -> Result<HashMap<i64, CommittedOrder>> {
            let t = self.pending.get("dim_order").context("no such table")?;
            Ok(t.rows
                .iter()
                .filter_map(|r| {
                    let id = r.get("order_id").and_then(Value::as_int)?;
                    Some((
                        id,
                        CommittedOrder {
                            customer_code: r.get("customer_code").and_then(Value::as_text),
                            employee_code: r.get("employee_code").and_then(Value::as_text),
                            order_date: r.get("order_date").and_then(Value::as_datetime),
                        },
                    ))
                })
                .collect())
        }

        async fn commit(self) -> Result<()> {
            *self.store.lock().unwrap() = self.pending;
            Ok(())
        }

        async fn rollback(self) -> Result<()> {
            Ok(())
        }
    }

    fn table(columns: &[&str], serial: Option<&str>) -> MemTable {
        MemTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            serial: serial.map(str::to_string),
            rows: Vec::new(),
        }
    }

    fn empty_store() -> Store {
        let tables = HashMap::from([
            (
                "dim_date".to_string(),
                table(
                    &["date_key", "full_date", "year", "quarter", "month", "month_name", "day", "day_of_week", "is_weekend"],
                    None,
                ),
            ),
            ("dim_region".to_string(), table(&["region_id", "region_code", "region_name"], Some("region_id"))),
            (
                "dim_territory".to_string(),
                table(&["territory_id", "territory_code", "territory_name", "region_id"], Some("territory_id")),
            ),
            (
                "dim_customer".to_string(),
                table(
                    &["customer_id", "customer_code", "company", "last_name", "first_name", "city", "state_province", "country_region"],
                    Some("customer_id"),
                ),
            ),
            (
                "dim_employee".to_string(),
                table(
                    &["employee_id", "employee_code", "employee_orig", "last_name", "first_name", "job_title", "city", "country_region"],
                    Some("employee_id"),
                ),
            ),
            (
                "dim_order".to_string(),
                table(&["order_id", "customer_code", "employee_code", "order_date", "shipped_date", "status_id"], None),
            ),
            (
                "fact_orders".to_string(),
                table(
                    &[
                        "fact_id",
                        "order_id",
                        "customer_id",
                        "employee_id",
                        "date_key",
                        "territory_id",
                        "territory_code",
                        "region_id",
                        "orders_delivered",
                        "orders_not_delivered",
                    ],
                    Some("fact_id"),
                ),
            ),
        ]);
        Arc::new(Mutex::new(tables))
    }

    fn schema() -> StarSchema {
        let (sql, xls) = sources();
        transform(&sql, &xls, DateOverrides::default(), &FirstTokenGivenName).unwrap()
    }

    fn rows(store: &Store, name: &str) -> Vec<HashMap<String, Value>> {
        store.lock().unwrap()[name].rows.clone()
    }

    fn facts_for(store: &Store, order_id: i64) -> Vec<HashMap<String, Value>> {
        rows(store, "fact_orders")
            .into_iter()
            .filter(|r| r["order_id"] == Value::Int(order_id))
            .collect()
    }

    fn seed(store: &Store, name: &str, row: &[(&str, Value)]) {
        let mut tables = store.lock().unwrap();
        let t = tables.get_mut(name).unwrap();
        t.rows.push(row.iter().map(|(c, v)| (c.to_string(), v.clone())).collect());
    }

    // -------------------------------------------------------------------------
    // LOAD
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_load_into_empty_warehouse() {
        let store = empty_store();
        let schema = schema();
        let summary = load(MemoryWarehouse::begin(&store), &schema).await.unwrap();

        for (table, count) in schema.table_counts() {
            let t = summary.table(table).unwrap();
            assert_eq!((t.inserted, t.skipped), (count, 0), "{table}");
        }
        assert_eq!(rows(&store, "fact_orders").len(), 5);
    }

    #[tokio::test]
    async fn test_territory_region_remapped_through_code() {
        let store = empty_store();
        // an unrelated region already holds surrogate 1
        seed(&store, "dim_region", &[("region_id", Value::Int(1)), ("region_code", Value::Text("REG_99".into()))]);
        load(MemoryWarehouse::begin(&store), &schema()).await.unwrap();

        let regions = rows(&store, "dim_region");
        let eastern = regions
            .iter()
            .find(|r| r["region_code"] == Value::Text("REG_1".into()))
            .unwrap();
        assert_eq!(eastern["region_id"], Value::Int(2));

        let territories = rows(&store, "dim_territory");
        let providence = territories
            .iter()
            .find(|r| r["territory_code"] == Value::Text("02903".into()))
            .unwrap();
        assert_eq!(providence["region_id"], Value::Int(2));
    }

    #[tokio::test]
    async fn test_fact_keys_use_committed_surrogates() {
        let store = empty_store();
        seed(
            &store,
            "dim_customer",
            &[("customer_id", Value::Int(1)), ("customer_code", Value::Text("ZZZZ".into()))],
        );
        load(MemoryWarehouse::begin(&store), &schema()).await.unwrap();

        // VINET was provisional 1, committed 2
        let facts = facts_for(&store, 10248);
        assert_eq!(facts.len(), 2);
        for f in &facts {
            assert_eq!(f["customer_id"], Value::Int(2));
            assert_eq!(f["date_key"], Value::Int(20230110));
            assert_eq!(f["region_id"], Value::Int(1));
        }
        let territory_ids: HashSet<i64> = facts.iter().filter_map(|f| f["territory_id"].as_int()).collect();
        assert_eq!(territory_ids, HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_committed_order_wins() {
        let store = empty_store();
        seed(
            &store,
            "dim_order",
            &[
                ("order_id", Value::Int(10249)),
                ("customer_code", Value::Text("VINET".into())),
                ("employee_code", Value::Text("EMP_5".into())),
                ("order_date", Value::Text("2023-01-12 00:00:00".into())),
            ],
        );
        let summary = load(MemoryWarehouse::begin(&store), &schema()).await.unwrap();
        assert_eq!(summary.table("dim_order").unwrap().skipped, 1);

        let facts = facts_for(&store, 10249);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0]["customer_id"], Value::Int(1));
        assert_eq!(facts[0]["employee_id"], Value::Int(1));
        assert_eq!(facts[0]["date_key"], Value::Int(20230112));
    }

    #[tokio::test]
    async fn test_unresolved_territories_stay_distinct() {
        let store = empty_store();
        let mut schema = schema();
        let mut unknown = ["55555", "66666"].into_iter();
        for fact in schema.facts.rows.iter_mut().filter(|f| f.order_id == 10248) {
            fact.territory_code = unknown.next().map(str::to_string);
        }
        load(MemoryWarehouse::begin(&store), &schema).await.unwrap();

        let facts = facts_for(&store, 10248);
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|f| f["territory_id"] == Value::Null));
        let codes: HashSet<String> = facts.iter().filter_map(|f| f["territory_code"].as_text()).collect();
        assert_eq!(codes, HashSet::from(["55555".to_string(), "66666".to_string()]));

        let summary = load(MemoryWarehouse::begin(&store), &schema).await.unwrap();
        assert_eq!(summary.table("fact_orders").unwrap().skipped, 5);
    }

    #[tokio::test]
    async fn test_rerun_skips_everything() {
        let store = empty_store();
        let schema = schema();
        load(MemoryWarehouse::begin(&store), &schema).await.unwrap();
        let summary = load(MemoryWarehouse::begin(&store), &schema).await.unwrap();
        assert_eq!(summary.inserted(), 0);
        assert_eq!(summary.table("fact_orders").unwrap().skipped, 5);
        assert_eq!(rows(&store, "fact_orders").len(), 5);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_everything() {
        let store = empty_store();
        let mut warehouse = MemoryWarehouse::begin(&store);
        warehouse.fail_on = Some("fact_orders");

        let err = load(warehouse, &schema()).await.unwrap_err();
        assert!(format!("{err:#}").contains("simulated failure"));
        assert!(rows(&store, "dim_customer").is_empty());
        assert!(rows(&store, "dim_date").is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_fatal() {
        let store = empty_store();
        store.lock().unwrap().remove("dim_territory");
        let err = load(MemoryWarehouse::begin(&store), &schema()).await.unwrap_err();
        assert!(format!("{err:#}").contains("dim_territory not found"));
        assert!(rows(&store, "dim_region").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_columns_filtered() {
        let store = empty_store();
        store
            .lock()
            .unwrap()
            .get_mut("dim_customer")
            .unwrap()
            .columns
            .retain(|c| c != "state_province");
        load(MemoryWarehouse::begin(&store), &schema()).await.unwrap();
        let customers = rows(&store, "dim_customer");
        assert_eq!(customers.len(), 4);
        assert!(customers.iter().all(|r| !r.contains_key("state_province")));
    }

    #[tokio::test]
    async fn test_date_outside_committed_calendar_loaded_as_null() {
        let store = empty_store();
        let (sql, xls) = sources();
        let dates = DateOverrides {
            start: None,
            end: chrono::NaiveDate::from_ymd_opt(2023, 1, 31),
        };
        let schema = transform(&sql, &xls, dates, &FirstTokenGivenName).unwrap();
        load(MemoryWarehouse::begin(&store), &schema).await.unwrap();
        let facts = facts_for(&store, 30);
        assert_eq!(facts[0]["date_key"], Value::Null);
    }

    #[test]
    fn test_summary_json() {
        let summary = LoadSummary {
            tables: vec![TableLoad {
                table: "dim_date",
                inserted: 3,
                skipped: 1,
            }],
        };
        assert_eq!(
            summary.to_json(),
            serde_json::json!({ "dim_date": { "inserted": 3, "skipped": 1 } })
        );
    }
}
