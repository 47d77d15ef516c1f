//! Request parameter types for the REST API

use crate::db::duckdb::query::DateRange;
use crate::error::{AppError, Result};
use crate::services::series_service::ReturnPeriod;
use chrono::NaiveDate;
use serde::Deserialize;

/// `?symbol=&start=&end=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceQuery {
    pub symbol: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl PriceQuery {
    pub fn symbol(&self) -> Option<&str> {
        non_empty(&self.symbol)
    }

    /// `None` when neither bound is given
    pub fn range(&self) -> Result<Option<DateRange>> {
        let start = parse_date_opt(non_empty(&self.start))?;
        let end = parse_date_opt(non_empty(&self.end))?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(AppError::Validation(format!(
                    "Start date {} is after end date {}",
                    s, e
                )));
            }
        }
        let range = DateRange { start, end };
        Ok((!range.is_open()).then_some(range))
    }
}

/// `?sector=&industry=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesQuery {
    pub sector: Option<String>,
    pub industry: Option<String>,
}

impl SeriesQuery {
    pub fn sector(&self) -> Option<&str> {
        non_empty(&self.sector)
    }

    pub fn industry(&self) -> Option<&str> {
        non_empty(&self.industry)
    }
}

/// `?period=1y`, or `?start=&end=` for a custom window
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl PeriodQuery {
    /// Custom window when both dates are given, else `period` (default `1y`)
    pub fn period(&self) -> Result<ReturnPeriod> {
        match (non_empty(&self.start), non_empty(&self.end)) {
            (Some(start), Some(end)) => ReturnPeriod::custom(parse_date(start)?, parse_date(end)?),
            _ => ReturnPeriod::parse(non_empty(&self.period).unwrap_or("1y")),
        }
    }
}

/// `?indices=sp500,ftse100&period=1y`, or `?start=&end=` for a custom window
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossIndexQuery {
    pub indices: Option<String>,
    pub period: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl CrossIndexQuery {
    /// Requested index keys; empty means every loaded index
    pub fn indices(&self) -> Vec<String> {
        non_empty(&self.indices)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn period(&self) -> Result<ReturnPeriod> {
        PeriodQuery {
            period: self.period.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
        }
        .period()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("Invalid date: {}", raw)))
}

fn parse_date_opt(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(parse_date).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_query_range() {
        let query = PriceQuery::default();
        assert_eq!(query.range().unwrap(), None);

        let query = PriceQuery {
            symbol: Some("  ".to_string()),
            start: Some("2024-01-01".to_string()),
            end: None,
        };
        assert_eq!(query.symbol(), None);
        let range = query.range().unwrap().unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert!(range.end.is_none());

        let bad = PriceQuery {
            start: Some("2024-02-01".to_string()),
            end: Some("2024-01-01".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.range(), Err(AppError::Validation(_))));

        let garbage = PriceQuery {
            start: Some("yesterday".to_string()),
            ..Default::default()
        };
        assert!(garbage.range().is_err());
    }

    #[test]
    fn test_period_query() {
        assert_eq!(PeriodQuery::default().period().unwrap(), ReturnPeriod::Year);

        let query = PeriodQuery {
            period: Some("max".to_string()),
            ..Default::default()
        };
        assert_eq!(query.period().unwrap(), ReturnPeriod::Max);

        // Dates win over the period name
        let query = PeriodQuery {
            period: Some("1w".to_string()),
            start: Some("2024-01-01".to_string()),
            end: Some("2024-03-31".to_string()),
        };
        assert!(matches!(query.period().unwrap(), ReturnPeriod::Custom(_)));

        let query = PeriodQuery {
            period: Some("2w".to_string()),
            ..Default::default()
        };
        assert!(query.period().is_err());
    }

    #[test]
    fn test_cross_index_query() {
        assert!(CrossIndexQuery::default().indices().is_empty());

        let query = CrossIndexQuery {
            indices: Some(" sp500, ,ftse100 ".to_string()),
            period: Some("max".to_string()),
            ..Default::default()
        };
        assert_eq!(query.indices(), vec!["sp500", "ftse100"]);
        assert_eq!(query.period().unwrap(), ReturnPeriod::Max);
    }
}
