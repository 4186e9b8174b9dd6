//! Statistics aggregation.
//!
//! [`aggregate`] turns a window of movements into totals, a month-by-month series and an expense breakdown by
//! category. It is a pure function: no I/O, no shared state, and the input order never affects the output.
//! Amounts are summed as exact decimals; rounding is left to whoever presents the numbers.

use crate::types::Category;
use crate::types::DateRange;
use crate::types::Movement;
use crate::types::MovementType;
use chrono::Datelike;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::HashMap;

pub const UNCATEGORIZED_NAME: &str = "Sin categoría";
pub const UNCATEGORIZED_COLOR: &str = "#9CA3AF";
/// Used for categories stored without a color of their own.
pub const DEFAULT_CATEGORY_COLOR: &str = "#3B82F6";

const MONTH_LABELS: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sep", "oct", "nov", "dic",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatsPeriod {
    HalfYear,
    Year,
}

impl StatsPeriod {
    pub fn months(&self) -> u32 {
        match self {
            Self::HalfYear => 6,
            Self::Year => 12,
        }
    }

    pub fn from_months(months: u32) -> Option<Self> {
        match months {
            6 => Some(Self::HalfYear),
            12 => Some(Self::Year),
            _ => None,
        }
    }

    /// The date range a caller has to fetch to aggregate this period ending at `reference`'s month.
    pub fn window(&self, reference: NaiveDate) -> DateRange {
        window(self.months(), reference)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedStats {
    pub total_income:    Decimal,
    pub total_expenses:  Decimal,
    pub balance:         Decimal,
    pub average_monthly: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthBucket {
    pub year:     i32,
    /// 1-based calendar month.
    pub month:    u32,
    #[serde(rename = "mes")]
    pub label:    String,
    #[serde(rename = "ingresos")]
    pub income:   Decimal,
    #[serde(rename = "egresos")]
    pub expenses: Decimal,
    #[serde(rename = "saldo")]
    pub balance:  Decimal,
}

impl MonthBucket {
    fn empty(index: i64) -> Self {
        let (year, month) = split_month_index(index);
        Self {
            year,
            month,
            label: format!("{} {year}", MONTH_LABELS[(month - 1) as usize]),
            income: Decimal::ZERO,
            expenses: Decimal::ZERO,
            balance: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBucket {
    /// `None` for the synthetic uncategorized bucket.
    pub category_id: Option<String>,
    #[serde(rename = "nombre")]
    pub name:        String,
    #[serde(rename = "valor")]
    pub value:       Decimal,
    pub color:       String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResult {
    pub detailed_stats:     DetailedStats,
    pub monthly_comparison: Vec<MonthBucket>,
    pub category_stats:     Vec<CategoryBucket>,
}

#[inline]
fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}

#[inline]
fn split_month_index(index: i64) -> (i32, u32) {
    (index.div_euclid(12) as i32, index.rem_euclid(12) as u32 + 1)
}

fn first_day(index: i64) -> Option<NaiveDate> {
    let (year, month) = split_month_index(index);
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Calendar months `[reference - months + 1, reference]` as an inclusive date range.
pub fn window(months: u32, reference: NaiveDate) -> DateRange {
    let last = month_index(reference);
    let first = last - (months.max(1) as i64 - 1);
    DateRange::new(
        first_day(first).unwrap_or(NaiveDate::MIN),
        first_day(last + 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX),
    )
}

/// Aggregate `movements` into a [`StatisticsResult`] covering `months_count` calendar months that end with the month
/// of `reference`.
///
/// - Totals cover every movement passed in; `average_monthly` is the balance split evenly over the months.
/// - `monthly_comparison` always holds exactly `months_count` buckets, oldest first, empty months included.
/// - `category_stats` covers expenses only. Movements without a category, or whose category is not among
///   `categories`, share one "Sin categoría" bucket. Buckets are sorted by value, largest first; equal values are
///   ordered by name and then id.
///
/// A `months_count` of zero is treated as one.
pub fn aggregate(
    movements: &[Movement],
    categories: &[Category],
    months_count: u32,
    reference: NaiveDate,
) -> StatisticsResult {
    let months = months_count.max(1);
    let last = month_index(reference);
    let first = last - (months as i64 - 1);

    let mut monthly = (first..=last).map(MonthBucket::empty).collect::<Vec<_>>();
    let known = categories
        .iter()
        .map(|c| (c.id.as_str(), c))
        .collect::<HashMap<_, _>>();
    // None collects everything uncategorized.
    let mut by_category: BTreeMap<Option<&str>, Decimal> = BTreeMap::new();
    let mut total_income = Decimal::ZERO;
    let mut total_expenses = Decimal::ZERO;

    for movement in movements {
        let bucket = usize::try_from(month_index(movement.movement_date) - first)
            .ok()
            .and_then(|idx| monthly.get_mut(idx));

        match movement.kind {
            MovementType::Income => {
                total_income += movement.amount;
                if let Some(bucket) = bucket {
                    bucket.income += movement.amount;
                }
            }
            MovementType::Expense => {
                total_expenses += movement.amount;
                if let Some(bucket) = bucket {
                    bucket.expenses += movement.amount;
                }
                let category = movement
                    .category_id
                    .as_deref()
                    .filter(|id| known.contains_key(id));
                *by_category.entry(category).or_default() += movement.amount;
            }
        }
    }

    for bucket in monthly.iter_mut() {
        bucket.balance = bucket.income - bucket.expenses;
    }

    let mut category_stats = by_category
        .into_iter()
        .map(|(id, value)| match id.and_then(|id| known.get(id)) {
            Some(category) => CategoryBucket {
                category_id: Some(category.id.clone()),
                name: category.name.clone(),
                value,
                color: category
                    .color
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CATEGORY_COLOR.to_string()),
            },
            None => CategoryBucket {
                category_id: None,
                name: UNCATEGORIZED_NAME.to_string(),
                value,
                color: UNCATEGORIZED_COLOR.to_string(),
            },
        })
        .collect::<Vec<_>>();
    category_stats.sort_by(compare_buckets);

    let balance = total_income - total_expenses;
    StatisticsResult {
        detailed_stats: DetailedStats {
            total_income,
            total_expenses,
            balance,
            average_monthly: balance / Decimal::from(months),
        },
        monthly_comparison: monthly,
        category_stats,
    }
}

fn compare_buckets(a: &CategoryBucket, b: &CategoryBucket) -> Ordering {
    b.value
        .cmp(&a.value)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.category_id.cmp(&b.category_id))
}
