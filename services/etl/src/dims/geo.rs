//! DimRegion and DimTerritory (relational source only)

use super::{dedup_first, surrogate};
use crate::rows::RowSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRow {
    /// Provisional surrogate key
    pub region_id: i64,
    pub region_code: String,
    pub region_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerritoryRow {
    /// Provisional surrogate key
    pub territory_id: i64,
    pub territory_code: String,
    pub territory_name: Option<String>,
    /// RegionID in the source id space; remapped through RegionCode at load
    pub source_region_id: Option<i64>,
}

pub fn region_code(source_region_id: i64) -> String {
    format!("REG_{source_region_id}")
}

pub fn build_dim_region(regions: &RowSet) -> Vec<RegionRow> {
    let mut rows = Vec::with_capacity(regions.len());
    let mut unreadable = 0usize;
    for r in regions.iter() {
        let Some(id) = r.int("RegionID") else {
            unreadable += 1;
            continue;
        };
        rows.push(RegionRow {
            region_id: 0,
            region_code: region_code(id),
            region_name: r
                .first_text(&["RegionDescription", "RegionName"])
                .map(|n| n.trim().to_string()),
        });
    }
    if unreadable > 0 {
        warn!(rows = unreadable, "region rows without an integer RegionID dropped");
    }

    let (mut dim, duplicates) = dedup_first(rows, |r| r.region_code.clone());
    for (idx, row) in dim.iter_mut().enumerate() {
        row.region_id = surrogate(idx);
    }
    info!(duplicates, rows = dim.len(), "built DimRegion");
    dim
}

/// One row per source territory; the code is the source id, trimmed
pub fn build_dim_territory(territories: &RowSet) -> Vec<TerritoryRow> {
    let mut dim = Vec::with_capacity(territories.len());
    let mut unreadable = 0usize;
    for r in territories.iter() {
        let Some(code) = r.text("TerritoryID").map(|c| c.trim().to_string()) else {
            unreadable += 1;
            continue;
        };
        dim.push(TerritoryRow {
            territory_id: surrogate(dim.len()),
            territory_code: code,
            territory_name: r
                .first_text(&["TerritoryDescription", "TerritoryName"])
                .map(|n| n.trim().to_string()),
            source_region_id: r.int("RegionID"),
        });
    }
    if unreadable > 0 {
        warn!(rows = unreadable, "territory rows without a TerritoryID dropped");
    }
    info!(rows = dim.len(), "built DimTerritory");
    dim
}
