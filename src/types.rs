use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Income,
    Expense,
}

/// A single income or expense record as returned by the data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id:            String,
    pub amount:        Decimal,
    #[serde(rename = "type")]
    pub kind:          MovementType,
    #[serde(default)]
    pub category_id:   Option<String>,
    pub movement_date: NaiveDate,
    #[serde(default)]
    pub description:   Option<String>,
}

impl Movement {
    pub fn income(id: impl Into<String>, amount: Decimal, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            amount,
            kind: MovementType::Income,
            category_id: None,
            movement_date: date,
            description: None,
        }
    }

    pub fn expense(id: impl Into<String>, amount: Decimal, category_id: Option<&str>, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            amount,
            kind: MovementType::Expense,
            category_id: category_id.map(str::to_string),
            movement_date: date,
            description: None,
        }
    }

    #[inline]
    pub fn is_income(&self) -> bool {
        self.kind == MovementType::Income
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id:    String,
    pub name:  String,
    #[serde(default)]
    pub color: Option<String>,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: Option<&str>) -> Self {
        Self {
            id:    id.into(),
            name:  name.into(),
            color: color.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id:      String,
    pub display_name: Option<String>,
    pub currency:     String,
}

/// Whose data a cache entry belongs to: a user, optionally acting inside a shared household.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub user_id:    String,
    pub context_id: Option<String>,
}

impl Scope {
    pub fn personal(user_id: impl Into<String>) -> Self {
        Self {
            user_id:    user_id.into(),
            context_id: None,
        }
    }

    pub fn shared(user_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            user_id:    user_id.into(),
            context_id: Some(context_id.into()),
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.context_id {
            Some(ref ctx) => write!(f, "{}:{ctx}", self.user_id),
            None => write!(f, "{}", self.user_id),
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// What happened to a record the caches may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Created,
    Updated,
    Deleted,
}
