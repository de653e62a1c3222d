//! `YYYY-MM` accounting periods and the financial-year arithmetic built on them.

use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::CoreError;

const MONTH_NAMES: [&str; 12] = [
    "JANUARY",
    "FEBRUARY",
    "MARCH",
    "APRIL",
    "MAY",
    "JUNE",
    "JULY",
    "AUGUST",
    "SEPTEMBER",
    "OCTOBER",
    "NOVEMBER",
    "DECEMBER",
];

/// The first month of an Indian financial year (April).
const FINANCIAL_YEAR_START_MONTH: u32 = 4;

/// A calendar month, written as `YYYY-MM`.
///
/// Used both for the period a bill belongs to and for the period it was
/// submitted in. Years are limited to four digits so every value has exactly
/// one folder-name spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillMonth {
    year: i32,
    month: u32,
}

impl BillMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, CoreError> {
        if !(1..=12).contains(&month) || !(1000..=9999).contains(&year) {
            return Err(CoreError::InvalidMonth(format!("{year}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Upper-case English month name, as used in submission folder names.
    pub fn name(&self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }

    /// Builds a month from an English month name (any case) and a year.
    pub fn from_name(name: &str, year: i32) -> Option<Self> {
        let index = MONTH_NAMES
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))?;
        Self::new(year, index as u32 + 1).ok()
    }

    /// The calendar year in which the April–March financial year containing
    /// this month starts.
    pub fn financial_year_start(&self) -> i32 {
        if self.month >= FINANCIAL_YEAR_START_MONTH {
            self.year
        } else {
            self.year - 1
        }
    }

    /// The month a timestamp falls in, seen from the timestamp's own zone.
    pub fn from_datetime<Tz: TimeZone>(moment: &DateTime<Tz>) -> Self {
        Self {
            year: moment.year().clamp(1000, 9999),
            month: moment.month(),
        }
    }

    /// The current month in the local time zone.
    pub fn current() -> Self {
        Self::from_datetime(&Local::now())
    }
}

/// Infers the accounting period of a bill from its file dates.
///
/// The earliest known timestamp wins: a copied file keeps its original
/// modification time while its creation time is the copy time. Falls back to
/// the current month when the file system reports no dates at all.
pub fn bill_month_from_dates(
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
) -> BillMonth {
    let earliest = match (created, modified) {
        (Some(c), Some(m)) => Some(c.min(m)),
        (c, m) => c.or(m),
    };
    earliest
        .map(|moment| BillMonth::from_datetime(&moment.with_timezone(&Local)))
        .unwrap_or_else(BillMonth::current)
}

impl fmt::Display for BillMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillMonth {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4
            || month.len() != 2
            || !year.chars().all(|c| c.is_ascii_digit())
            || !month.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for BillMonth {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillMonth> for String {
    fn from(value: BillMonth) -> Self {
        value.to_string()
    }
}
