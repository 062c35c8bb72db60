//! Listing filters, sort orders, and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::HistoryRecord;

/// Page size used when a filter doesn't set one.
pub const DEFAULT_LIMIT: usize = 100;

/// Record fields the listing can sort by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Id,
    CreatedAt,
    Text,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Filtering, sorting, and pagination for one listing call.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Keep only records with exactly this model.
    pub model_uuid: Option<String>,

    /// Keep only records whose text contains this, case-insensitively.
    pub text_contains: Option<String>,

    /// Keep only records created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,

    /// Keep only records created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,

    /// Sort key; newest-id-first is the default.
    pub sort_by: SortBy,

    /// Sort direction.
    pub sort_order: SortOrder,

    /// Page size.
    pub limit: usize,

    /// Records to skip before the page starts.
    pub offset: usize,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            model_uuid: None,
            text_contains: None,
            created_after: None,
            created_before: None,
            sort_by: SortBy::Id,
            sort_order: SortOrder::Desc,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of a listing. `total` counts every match, ignoring pagination.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub records: Vec<HistoryRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

impl Filter {
    /// Whether `record` passes every set predicate.
    fn matches(&self, record: &HistoryRecord) -> bool {
        if let Some(model) = &self.model_uuid {
            if record.model_uuid != *model {
                return false;
            }
        }

        if let Some(needle) = &self.text_contains {
            if !record
                .text
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }

        if let Some(after) = self.created_after {
            if record.created_at < after {
                return false;
            }
        }

        if let Some(before) = self.created_before {
            if record.created_at >= before {
                return false;
            }
        }

        true
    }

    /// Sorts `records` per the filter's key and direction.
    fn sort(&self, records: &mut [HistoryRecord]) {
        records.sort_by(|a, b| {
            let ordering = match self.sort_by {
                SortBy::Id => a.id.cmp(&b.id),
                SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
                SortBy::Text => a.text.cmp(&b.text),
            };

            match self.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }

    /// Filters, sorts, and paginates `records` into a [`Page`].
    pub fn page(&self, records: Vec<HistoryRecord>) -> Page {
        let mut matched: Vec<HistoryRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        self.sort(&mut matched);

        let total = matched.len();
        let records: Vec<HistoryRecord> = matched
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect();
        let has_more = self.offset + records.len() < total;

        Page {
            records,
            total,
            limit: self.limit,
            offset: self.offset,
            has_more,
        }
    }
}
