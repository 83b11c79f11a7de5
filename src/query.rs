use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{PricingError, PricingResult};
use crate::models::{CalculationHistoryRecord, PriceHistoryRecord};
use crate::types::EntityType;

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

/// Sort field for price history queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrderField {
    #[default]
    ChangedAt,
    OldPrice,
    NewPrice,
}

impl HistoryOrderField {
    fn column(&self) -> &'static str {
        match self {
            HistoryOrderField::ChangedAt => "changed_at",
            HistoryOrderField::OldPrice => "old_price",
            HistoryOrderField::NewPrice => "new_price",
        }
    }
}

/// Sort order options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filter for the price change log
///
/// The date range is closed on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<i32>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub order_by: HistoryOrderField,
    pub order: SortOrder,
    pub limit: u32,
    pub offset: u32,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            entity_type: None,
            entity_id: None,
            start: None,
            end: None,
            order_by: HistoryOrderField::ChangedAt,
            order: SortOrder::Desc,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl HistoryQuery {
    pub fn for_entity(entity_type: EntityType, entity_id: i32) -> Self {
        Self {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id),
            ..Self::default()
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn sorted_by(mut self, field: HistoryOrderField, order: SortOrder) -> Self {
        self.order_by = field;
        self.order = order;
        self
    }

    pub fn paginate(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn validate(&self) -> PricingResult<()> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(PricingError::validation(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }

        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(PricingError::validation("start date must not be after end date"));
            }
        }

        Ok(())
    }

    /// Whether a record passes the filter part of the query
    pub fn matches(&self, record: &PriceHistoryRecord) -> bool {
        if let Some(entity_type) = self.entity_type {
            if record.entity_type != entity_type {
                return false;
            }
        }
        if let Some(entity_id) = self.entity_id {
            if record.entity_id != entity_id {
                return false;
            }
        }
        if let Some(start) = self.start {
            if record.changed_at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if record.changed_at > end {
                return false;
            }
        }
        true
    }

    /// Ordering used by the query; ties fall back to record id for stability
    pub fn compare(&self, a: &PriceHistoryRecord, b: &PriceHistoryRecord) -> Ordering {
        let ordering = match self.order_by {
            HistoryOrderField::ChangedAt => a.changed_at.cmp(&b.changed_at),
            HistoryOrderField::OldPrice => a.old_price.cmp(&b.old_price),
            HistoryOrderField::NewPrice => a.new_price.cmp(&b.new_price),
        };
        let ordering = match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    }

    /// Filter, sort and paginate an in-memory record set
    pub fn apply<'a, I>(&self, records: I) -> Vec<PriceHistoryRecord>
    where
        I: IntoIterator<Item = &'a PriceHistoryRecord>,
    {
        let mut matching: Vec<PriceHistoryRecord> =
            records.into_iter().filter(|r| self.matches(r)).cloned().collect();
        matching.sort_by(|a, b| self.compare(a, b));

        matching
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

/// Filter for stored calculations, newest first
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculationQuery {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<i32>,
    pub package_id: Option<i32>,
    pub since: Option<DateTime<Utc>>,
    /// No limit when absent
    pub limit: Option<u32>,
}

impl CalculationQuery {
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            ..Self::default()
        }
    }

    /// Calculations from the `days` days before `now`
    ///
    /// A window reaching past the representable calendar has no lower bound.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            since: Duration::try_days(days).and_then(|window| now.checked_sub_signed(window)),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &CalculationHistoryRecord) -> bool {
        self.entity_type.map_or(true, |t| record.entity_type == t)
            && self.entity_id.map_or(true, |id| record.entity_id == id)
            && self.package_id.map_or(true, |id| record.package_id == id)
            && self.since.map_or(true, |since| record.created_at >= since)
    }
}

/// Bound value for a generated query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    Int(i32),
    Timestamp(DateTime<Utc>),
}

/// SQL query builder for price history reads
///
/// Every filter value becomes a positional `$n` parameter. Only the column
/// and direction keywords, which come from closed enums, are written into
/// the SQL text.
pub struct HistoryQueryBuilder {
    base_query: String,
    where_clauses: Vec<String>,
    params: Vec<QueryParam>,
    order_clause: Option<String>,
    limit: u32,
    offset: u32,
}

impl HistoryQueryBuilder {
    pub fn new() -> Self {
        Self {
            base_query: "SELECT id, entity_type, entity_id, old_price, new_price, change_reason, \
                         changed_by, changed_at, metadata FROM price_history"
                .to_string(),
            where_clauses: Vec::new(),
            params: Vec::new(),
            order_clause: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    /// Builder pre-loaded with every part of a validated query
    pub fn from_query(query: &HistoryQuery) -> Self {
        let mut builder = Self::new();
        if let Some(entity_type) = query.entity_type {
            builder.add_entity_type(entity_type);
        }
        if let Some(entity_id) = query.entity_id {
            builder.add_entity_id(entity_id);
        }
        builder.add_date_range(query.start, query.end);
        builder.set_sort(query.order_by, query.order);
        builder.set_pagination(query.limit, query.offset);
        builder
    }

    fn push_param(&mut self, clause: &str, param: QueryParam) {
        self.params.push(param);
        self.where_clauses.push(format!("{} ${}", clause, self.params.len()));
    }

    pub fn add_entity_type(&mut self, entity_type: EntityType) {
        self.push_param("entity_type =", QueryParam::Text(entity_type.to_string()));
    }

    pub fn add_entity_id(&mut self, entity_id: i32) {
        self.push_param("entity_id =", QueryParam::Int(entity_id));
    }

    /// Both bounds are inclusive
    pub fn add_date_range(&mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) {
        if let Some(start) = start {
            self.push_param("changed_at >=", QueryParam::Timestamp(start));
        }
        if let Some(end) = end {
            self.push_param("changed_at <=", QueryParam::Timestamp(end));
        }
    }

    pub fn set_sort(&mut self, field: HistoryOrderField, order: SortOrder) {
        self.order_clause = Some(format!("{} {}, id ASC", field.column(), order.keyword()));
    }

    pub fn set_pagination(&mut self, limit: u32, offset: u32) {
        self.limit = limit;
        self.offset = offset;
    }

    /// Returns the SQL text and the parameters to bind, in placeholder order
    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let mut query = self.base_query.clone();

        if !self.where_clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&self.where_clauses.join(" AND "));
        }

        if let Some(ref order) = self.order_clause {
            query.push_str(" ORDER BY ");
            query.push_str(order);
        }

        // LIMIT and OFFSET are integers from the validated query, not caller text
        query.push_str(&format!(" LIMIT {}", self.limit));
        query.push_str(&format!(" OFFSET {}", self.offset));

        (query, self.params.clone())
    }
}

impl Default for HistoryQueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn record(n: u128, entity_id: i32, old: Decimal, new: Decimal, minutes_ago: i64) -> PriceHistoryRecord {
        PriceHistoryRecord {
            id: Uuid::from_u128(n),
            entity_type: EntityType::Bot,
            entity_id,
            old_price: old,
            new_price: new,
            change_reason: "adjustment".to_string(),
            changed_by: "ops".to_string(),
            changed_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            metadata: None,
        }
    }

    #[test]
    fn test_builder_basic_query() {
        let (query, params) = HistoryQueryBuilder::new().build();

        assert!(query.contains("FROM price_history"));
        assert!(!query.contains("WHERE"));
        assert!(query.contains("LIMIT 100"));
        assert!(query.contains("OFFSET 0"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_builder_combined_filters() {
        let start = Utc::now() - chrono::Duration::days(1);
        let end = Utc::now();
        let query = HistoryQuery::for_entity(EntityType::Agent, 7)
            .between(start, end)
            .sorted_by(HistoryOrderField::NewPrice, SortOrder::Asc)
            .paginate(20, 40);

        let (sql, params) = HistoryQueryBuilder::from_query(&query).build();

        assert!(sql.contains("entity_type = $1"));
        assert!(sql.contains("entity_id = $2"));
        assert!(sql.contains("changed_at >= $3"));
        assert!(sql.contains("changed_at <= $4"));
        assert!(sql.contains("ORDER BY new_price ASC, id ASC"));
        assert!(sql.contains("LIMIT 20"));
        assert!(sql.contains("OFFSET 40"));

        assert_eq!(params[0], QueryParam::Text("agent".to_string()));
        assert_eq!(params[1], QueryParam::Int(7));
        assert_eq!(params[2], QueryParam::Timestamp(start));
        assert_eq!(params[3], QueryParam::Timestamp(end));
    }

    #[test]
    fn test_validate_limit_bounds() {
        assert!(HistoryQuery::default().paginate(0, 0).validate().is_err());
        assert!(HistoryQuery::default().paginate(1001, 0).validate().is_err());
        assert!(HistoryQuery::default().paginate(1000, 0).validate().is_ok());
    }

    #[test]
    fn test_validate_inverted_range() {
        let now = Utc::now();
        let query = HistoryQuery::default().between(now, now - chrono::Duration::hours(1));
        assert!(matches!(query.validate(), Err(PricingError::Validation(_))));
    }

    #[test]
    fn test_apply_filters_sorts_and_paginates() {
        let records = vec![
            record(1, 1, dec!(10), dec!(12), 30),
            record(2, 1, dec!(12), dec!(9), 20),
            record(3, 2, dec!(5), dec!(6), 10),
            record(4, 1, dec!(9), dec!(15), 5),
        ];

        let query = HistoryQuery::for_entity(EntityType::Bot, 1)
            .sorted_by(HistoryOrderField::NewPrice, SortOrder::Desc);
        let result = query.apply(&records);
        let ids: Vec<u128> = result.iter().map(|r| r.id.as_u128()).collect();
        assert_eq!(ids, vec![4, 1, 2]);

        let page = query.clone().paginate(1, 1).apply(&records);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, Uuid::from_u128(1));
    }

    #[test]
    fn test_apply_closed_date_range() {
        let records = vec![record(1, 1, dec!(1), dec!(2), 60)];
        let at = records[0].changed_at;

        let query = HistoryQuery::default().between(at, at);
        assert_eq!(query.apply(&records).len(), 1);
    }

    #[test]
    fn test_last_days_window() {
        let now = Utc::now();
        let week = CalculationQuery::last_days(now, 7);
        assert_eq!(week.since, Some(now - Duration::days(7)));

        let unbounded = CalculationQuery::last_days(now, i64::from(u32::MAX));
        assert_eq!(unbounded.since, None);
        assert_eq!(CalculationQuery::last_days(now, i64::MAX).since, None);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let records = vec![
            record(1, 1, dec!(10), dec!(12), 30),
            record(2, 1, dec!(12), dec!(9), 30),
        ];
        let query = HistoryQuery::default();
        assert_eq!(query.apply(&records), query.apply(&records));
    }
}
