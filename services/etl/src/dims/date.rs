//! DimDate: a contiguous calendar spanning every order-related date

use crate::error::{EtlError, EtlResult};
use crate::rows::RowSet;
use chrono::{Datelike, NaiveDate};
use tracing::info;

/// Order columns that anchor the calendar
pub const ORDER_DATE_COLUMNS: [&str; 3] = ["OrderDate", "ShippedDate", "RequiredDate"];

#[derive(Debug, Clone, PartialEq)]
pub struct DateRow {
    pub date_key: i32,
    pub date: NaiveDate,
    pub year: i32,
    pub quarter: u32,
    pub month: u32,
    pub month_name: String,
    pub day: u32,
    /// 1 = Monday .. 7 = Sunday
    pub day_of_week: u32,
    pub is_weekend: bool,
}

/// `YYYYMMDD` as an integer
pub fn date_key(date: NaiveDate) -> i32 {
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

fn date_row(date: NaiveDate) -> DateRow {
    let day_of_week = date.weekday().number_from_monday();
    DateRow {
        date_key: date_key(date),
        date,
        year: date.year(),
        quarter: (date.month() - 1) / 3 + 1,
        month: date.month(),
        month_name: date.format("%B").to_string(),
        day: date.day(),
        day_of_week,
        is_weekend: day_of_week >= 6,
    }
}

/// Every parseable order/ship/required date across the given order tables
pub fn collect_order_dates(order_sets: &[&RowSet]) -> Vec<NaiveDate> {
    order_sets
        .iter()
        .flat_map(|set| {
            ORDER_DATE_COLUMNS
                .iter()
                .flat_map(move |column| set.column_values(column))
        })
        .filter_map(|value| value.as_date())
        .collect()
}

/// Build the calendar. Bounds default to the earliest/latest pooled date;
/// an override replaces the corresponding bound.
pub fn build_dim_date(
    sql_orders: &RowSet,
    excel_orders: &RowSet,
    start_override: Option<NaiveDate>,
    end_override: Option<NaiveDate>,
) -> EtlResult<Vec<DateRow>> {
    let pool = collect_order_dates(&[sql_orders, excel_orders]);

    let start = start_override
        .or_else(|| pool.iter().min().copied())
        .ok_or(EtlError::NoDateAnchor)?;
    let end = end_override
        .or_else(|| pool.iter().max().copied())
        .ok_or(EtlError::NoDateAnchor)?;
    if start > end {
        return Err(EtlError::InvalidDateRange { start, end });
    }

    let dim: Vec<DateRow> = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(date_row)
        .collect();

    info!(
        start = %start,
        end = %end,
        pooled_dates = pool.len(),
        rows = dim.len(),
        "built DimDate"
    );
    Ok(dim)
}
