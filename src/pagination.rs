//! Offset and cursor windows over a point-in-time snapshot of entities.
//!
//! Both projections are pure functions of `(snapshot, query)`. Equal sort
//! keys fall back to [`Listable::tie_break`]; items equal on both keep their
//! snapshot order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default sort field, shared by tasks and robots.
pub const DEFAULT_ORDER_BY: &str = "createdAt";

/// A value an entity exposes for ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    /// Field absent on this entity; sorts as zero.
    Missing,
    Int(i64),
    Float(f64),
    /// Full-precision timestamp.
    Time(DateTime<Utc>),
    Text(String),
}

impl SortValue {
    fn numeric(&self) -> Option<f64> {
        match self {
            SortValue::Missing => Some(0.0),
            SortValue::Int(v) => Some(*v as f64),
            SortValue::Float(v) => Some(*v),
            SortValue::Time(t) => Some(t.timestamp_millis() as f64),
            SortValue::Text(_) => None,
        }
    }

    /// Total order: numbers (missing = 0) before text, text lexicographic.
    pub fn compare(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Int(a), SortValue::Int(b)) => a.cmp(b),
            (SortValue::Time(a), SortValue::Time(b)) => a.cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Text(_), _) => Ordering::Greater,
            (_, SortValue::Text(_)) => Ordering::Less,
            (a, b) => {
                let (a, b) = (a.numeric().unwrap_or(0.0), b.numeric().unwrap_or(0.0));
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        }
    }

    /// Render as a cursor token, used when an entity has no id.
    pub fn as_cursor(&self) -> Option<String> {
        match self {
            SortValue::Missing => None,
            SortValue::Int(v) => Some(v.to_string()),
            SortValue::Float(v) => Some(v.to_string()),
            SortValue::Time(t) => Some(t.to_rfc3339()),
            SortValue::Text(v) => Some(v.clone()),
        }
    }
}

/// Entities that can be listed through [`paginate`] and [`cursor`].
pub trait Listable {
    /// Stable identity used as a cursor.
    fn cursor_id(&self) -> Option<String>;

    /// Value of the named field; unknown fields return [`SortValue::Missing`].
    fn sort_value(&self, field: &str) -> SortValue;

    /// Secondary key for items whose ordering field compares equal.
    fn tie_break(&self) -> SortValue {
        self.cursor_id().map_or(SortValue::Missing, SortValue::Text)
    }

    /// Identity, falling back to the ordering field.
    fn identity(&self, order_by: &str) -> Option<String> {
        self.cursor_id()
            .or_else(|| self.sort_value(order_by).as_cursor())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}


/// Offset pagination options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageQuery {
    pub page: usize,
    pub page_size: usize,
    pub order_by: String,
    pub order: SortOrder,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            order_by: DEFAULT_ORDER_BY.to_string(),
            order: SortOrder::Desc,
        }
    }
}

impl PageQuery {
    pub fn page(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    pub fn ordered_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = field.into();
        self.order = order;
        self
    }
}

/// Cursor pagination options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CursorQuery {
    pub cursor: Option<String>,
    pub limit: usize,
    pub order_by: String,
    pub order: SortOrder,
}

impl Default for CursorQuery {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: 10,
            order_by: DEFAULT_ORDER_BY.to_string(),
            order: SortOrder::Desc,
        }
    }
}

impl CursorQuery {
    pub fn after(cursor: Option<String>, limit: usize) -> Self {
        Self {
            cursor,
            limit,
            ..Self::default()
        }
    }

    pub fn ordered_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = field.into();
        self.order = order;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_next: bool,
}

fn sorted<T: Listable>(mut items: Vec<T>, order_by: &str, order: SortOrder) -> Vec<T> {
    items.sort_by(|a, b| {
        let ord = a
            .sort_value(order_by)
            .compare(&b.sort_value(order_by))
            .then_with(|| a.tie_break().compare(&b.tie_break()));
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
    items
}

/// Sort, clamp the page into `[1, total_pages]`, and slice.
pub fn paginate<T: Listable>(items: Vec<T>, query: &PageQuery) -> Page<T> {
    let sorted = sorted(items, &query.order_by, query.order);
    let total = sorted.len();
    let page_size = query.page_size.max(1);
    let total_pages = total.div_ceil(page_size).max(1);
    let page = query.page.clamp(1, total_pages);
    let start = ((page - 1) * page_size).min(total);
    let end = (start + page_size).min(total);

    let items = sorted.into_iter().skip(start).take(end - start).collect();
    Page {
        items,
        page,
        page_size,
        total,
        total_pages,
    }
}

/// Sort, start one past the cursor item (or at 0 if absent), take `limit`.
pub fn cursor<T: Listable>(items: Vec<T>, query: &CursorQuery) -> CursorPage<T> {
    let sorted = sorted(items, &query.order_by, query.order);
    let total = sorted.len();
    let start = query
        .cursor
        .as_deref()
        .and_then(|cursor| {
            sorted
                .iter()
                .position(|item| item.identity(&query.order_by).as_deref() == Some(cursor))
        })
        .map_or(0, |pos| pos + 1);

    let items: Vec<T> = sorted.into_iter().skip(start).take(query.limit).collect();
    let next_cursor = items
        .last()
        .and_then(|last| last.identity(&query.order_by));
    CursorPage {
        items,
        next_cursor,
        has_next: query.limit < total - start,
    }
}
