//! Shared expense ledger records.
//!
//! Records live at `expenses/{id}` in the remote store. The id is the key,
//! not a field of the stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    /// Globally unique id assigned at creation.
    pub id: String,
    /// What was paid for.
    pub title: String,
    /// Whole currency units.
    pub amount: i64,
    /// Member who paid.
    pub payer: String,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

/// Stored form of an expense, without its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpenseRecord {
    title: String,
    amount: i64,
    payer: String,
    created_at: DateTime<Utc>,
}

impl Expense {
    /// Decode a remote record. Returns `None` for anything that does not
    /// have the full expense shape.
    #[must_use]
    pub fn from_remote(id: &str, value: &Value) -> Option<Self> {
        if id.is_empty() {
            return None;
        }
        let record: ExpenseRecord = serde_json::from_value(value.clone()).ok()?;
        Some(Self {
            id: id.to_string(),
            title: record.title,
            amount: record.amount,
            payer: record.payer,
            created_at: record.created_at,
        })
    }

    /// Encode for storage at `expenses/{id}`.
    #[must_use]
    pub fn to_remote(&self) -> Value {
        serde_json::json!({
            "title": self.title,
            "amount": self.amount,
            "payer": self.payer,
            "createdAt": self.created_at,
        })
    }
}

/// Input for a new expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseDraft {
    /// What was paid for.
    pub title: String,
    /// Whole currency units.
    pub amount: i64,
    /// Member who paid.
    pub payer: String,
}

impl ExpenseDraft {
    /// Create a draft.
    #[must_use]
    pub fn new(title: impl Into<String>, amount: i64, payer: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            amount,
            payer: payer.into(),
        }
    }

    /// Check amount and payer.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative amount or a payer outside `members`.
    pub fn validate(&self, members: &[String]) -> Result<()> {
        validate_amount(self.amount)?;
        validate_payer(&self.payer, members)
    }

    /// Stamp the draft with its id and creation time.
    #[must_use]
    pub fn into_expense(self, id: String, created_at: DateTime<Utc>) -> Expense {
        Expense {
            id,
            title: self.title,
            amount: self.amount,
            payer: self.payer,
            created_at,
        }
    }
}

/// Partial update of an expense. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpensePatch {
    /// New title.
    pub title: Option<String>,
    /// New amount.
    pub amount: Option<i64>,
    /// New payer.
    pub payer: Option<String>,
}

impl ExpensePatch {
    /// Check whatever fields are present.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative amount or a payer outside `members`.
    pub fn validate(&self, members: &[String]) -> Result<()> {
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        if let Some(payer) = &self.payer {
            validate_payer(payer, members)?;
        }
        Ok(())
    }

    /// Check if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.amount.is_none() && self.payer.is_none()
    }

    /// Fields to merge into the stored record.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(title) = &self.title {
            fields.insert("title".to_string(), Value::from(title.clone()));
        }
        if let Some(amount) = self.amount {
            fields.insert("amount".to_string(), Value::from(amount));
        }
        if let Some(payer) = &self.payer {
            fields.insert("payer".to_string(), Value::from(payer.clone()));
        }
        fields
    }
}

fn validate_amount(amount: i64) -> Result<()> {
    if amount < 0 {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(())
}

fn validate_payer(payer: &str, members: &[String]) -> Result<()> {
    if members.iter().any(|m| m == payer) {
        Ok(())
    } else {
        Err(Error::UnknownMember {
            name: payer.to_string(),
        })
    }
}

/// Sort newest first; ties broken by id so the order is stable.
pub fn sort_ledger(entries: &mut [Expense]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Sum of all amounts paid by `payer`.
#[must_use]
pub fn total_paid_by(entries: &[Expense], payer: &str) -> i64 {
    entries
        .iter()
        .filter(|e| e.payer == payer)
        .map(|e| e.amount)
        .sum()
}
