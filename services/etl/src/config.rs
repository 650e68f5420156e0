//! Runtime configuration
//!
//! Connection strings come from the environment (`.env` supported); table
//! and file names come from an optional JSON file with Northwind defaults.

use crate::error::EtlError;
use crate::extract::Entity;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    pub source_db_url: String,
    pub warehouse_db_url: Option<String>,
    pub spreadsheet_dir: PathBuf,
}

impl Config {
    /// Read connection settings; the warehouse URL is only required when loading.
    pub fn from_env(require_warehouse: bool) -> Result<Self> {
        let source_db_url =
            std::env::var("SOURCE_DB_URL").map_err(|_| EtlError::MissingConfig("SOURCE_DB_URL"))?;
        let warehouse_db_url = std::env::var("WAREHOUSE_DB_URL").ok();
        if require_warehouse && warehouse_db_url.is_none() {
            return Err(EtlError::MissingConfig("WAREHOUSE_DB_URL").into());
        }
        Ok(Self {
            source_db_url,
            warehouse_db_url,
            spreadsheet_dir: PathBuf::from(
                std::env::var("SPREADSHEET_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
        })
    }
}

/// Source layout: relational table names and spreadsheet file names
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub relational: RelationalTables,
    #[serde(default)]
    pub spreadsheets: SpreadsheetFiles,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelationalTables {
    pub orders: String,
    pub customers: String,
    pub employees: String,
    pub region: String,
    pub territories: String,
    pub employee_territories: String,
}

impl Default for RelationalTables {
    fn default() -> Self {
        Self {
            orders: "orders".to_string(),
            customers: "customers".to_string(),
            employees: "employees".to_string(),
            region: "region".to_string(),
            territories: "territories".to_string(),
            employee_territories: "employee_territories".to_string(),
        }
    }
}

impl RelationalTables {
    pub fn table_for(&self, entity: Entity) -> &str {
        match entity {
            Entity::Orders => &self.orders,
            Entity::Customers => &self.customers,
            Entity::Employees => &self.employees,
            Entity::Region => &self.region,
            Entity::Territories => &self.territories,
            Entity::EmployeeTerritories => &self.employee_territories,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpreadsheetFiles {
    pub orders: Option<String>,
    pub customers: Option<String>,
    pub employees: Option<String>,
}

impl Default for SpreadsheetFiles {
    fn default() -> Self {
        Self {
            orders: Some("orders.xlsx".to_string()),
            customers: Some("customers.xlsx".to_string()),
            employees: Some("employees.xlsx".to_string()),
        }
    }
}

impl SpreadsheetFiles {
    /// Logical entity -> full path, relative names resolved against `dir`
    pub fn resolve(&self, dir: &Path) -> Vec<(Entity, PathBuf)> {
        [
            (Entity::Orders, &self.orders),
            (Entity::Customers, &self.customers),
            (Entity::Employees, &self.employees),
        ]
        .into_iter()
        .filter_map(|(entity, file)| file.as_ref().map(|f| (entity, dir.join(f))))
        .collect()
    }
}

/// Load sources configuration from JSON file
pub fn load_sources_config(path: &Path) -> Result<SourcesConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sources config {}", path.display()))?;
    let config: SourcesConfig =
        serde_json::from_str(&content).context("Failed to parse sources config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_northwind_names() {
        let config = SourcesConfig::default();
        assert_eq!(config.relational.table_for(Entity::EmployeeTerritories), "employee_territories");
        let files = config.spreadsheets.resolve(Path::new("data/raw"));
        assert_eq!(files.len(), 3);
        assert_eq!(files[0], (Entity::Orders, PathBuf::from("data/raw/orders.xlsx")));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"relational": {"orders": "\"Orders\""}, "spreadsheets": {"employees": null}}"#;
        let config: SourcesConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.relational.orders, "\"Orders\"");
        assert_eq!(config.relational.customers, "customers");
        let files = config.spreadsheets.resolve(Path::new("raw"));
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|(e, _)| *e != Entity::Employees));
    }
}
