// Postgres-backed catalog and audit store
//
// Runtime-checked sqlx queries with positional binds. Enum columns are
// stored as varchar and parsed on the way out, so a bad row surfaces as a
// validation error naming the offending value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{PricingError, PricingResult};
use crate::models::{
    CalculationHistoryRecord, DiscountRule, Fee, PackageInfo, PriceHistoryRecord, RuleCondition,
    RuleDiscount,
};
use crate::query::{CalculationQuery, HistoryQuery, HistoryQueryBuilder, QueryParam};
use crate::store::{AuditStore, CatalogStore};
use crate::types::{Channel, EntityType, RuleScope};

/// Creates and configures a PostgreSQL connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    tracing::debug!("Creating database connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await?;

    tracing::info!("Database connection pool created successfully");
    Ok(pool)
}

#[derive(Debug, FromRow)]
struct PackageRow {
    id: i32,
    name: String,
    resource_type: String,
    unit_amount: i64,
    base_price: Decimal,
    currency: String,
    min_quantity: i32,
    max_quantity: Option<i32>,
    min_price: Option<Decimal>,
    max_price: Option<Decimal>,
    is_active: bool,
}

impl TryFrom<PackageRow> for PackageInfo {
    type Error = PricingError;

    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        let min_quantity = u32::try_from(row.min_quantity).map_err(|_| {
            PricingError::Configuration(format!("Package {} has a negative min_quantity", row.id))
        })?;
        let max_quantity = row
            .max_quantity
            .map(u32::try_from)
            .transpose()
            .map_err(|_| {
                PricingError::Configuration(format!("Package {} has a negative max_quantity", row.id))
            })?;

        Ok(PackageInfo {
            id: row.id,
            name: row.name,
            resource_type: row.resource_type.parse()?,
            unit_amount: row.unit_amount,
            base_price: row.base_price,
            currency: row.currency,
            min_quantity,
            max_quantity,
            min_price: row.min_price,
            max_price: row.max_price,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    rule_type: String,
    scope_type: String,
    scope_id: Option<i32>,
    condition: serde_json::Value,
    discount: serde_json::Value,
    priority: i32,
    is_active: bool,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
}

impl TryFrom<RuleRow> for DiscountRule {
    type Error = PricingError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        // An unknown operator or discount type fails here, not at evaluation time
        let condition: RuleCondition = serde_json::from_value(row.condition).map_err(|e| {
            PricingError::validation(format!("Rule {} has an invalid condition: {}", row.id, e))
        })?;
        let discount: RuleDiscount = serde_json::from_value(row.discount).map_err(|e| {
            PricingError::validation(format!("Rule {} has an invalid discount: {}", row.id, e))
        })?;

        Ok(DiscountRule {
            id: row.id,
            name: row.name,
            rule_type: row.rule_type.parse()?,
            scope: RuleScope::from_parts(&row.scope_type, row.scope_id)?,
            condition,
            discount,
            priority: row.priority,
            is_active: row.is_active,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
        })
    }
}

#[derive(Debug, FromRow)]
struct FeeRow {
    id: i32,
    name: String,
    fee_type: String,
    amount: Decimal,
    is_percentage: bool,
    is_active: bool,
}

impl TryFrom<FeeRow> for Fee {
    type Error = PricingError;

    fn try_from(row: FeeRow) -> Result<Self, Self::Error> {
        Ok(Fee {
            id: row.id,
            name: row.name,
            fee_type: row.fee_type.parse()?,
            amount: row.amount,
            is_percentage: row.is_percentage,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, FromRow)]
struct PriceHistoryRow {
    id: Uuid,
    entity_type: String,
    entity_id: i32,
    old_price: Decimal,
    new_price: Decimal,
    change_reason: String,
    changed_by: String,
    changed_at: DateTime<Utc>,
    metadata: Option<serde_json::Value>,
}

impl TryFrom<PriceHistoryRow> for PriceHistoryRecord {
    type Error = PricingError;

    fn try_from(row: PriceHistoryRow) -> Result<Self, Self::Error> {
        Ok(PriceHistoryRecord {
            id: row.id,
            entity_type: row.entity_type.parse()?,
            entity_id: row.entity_id,
            old_price: row.old_price,
            new_price: row.new_price,
            change_reason: row.change_reason,
            changed_by: row.changed_by,
            changed_at: row.changed_at,
            metadata: row.metadata,
        })
    }
}

#[derive(Debug, FromRow)]
struct CalculationRow {
    id: Uuid,
    entity_type: String,
    entity_id: i32,
    package_id: i32,
    input: serde_json::Value,
    base_price: Decimal,
    final_price: Decimal,
    discount: Decimal,
    applied_rules: Vec<String>,
    applied_rule_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CalculationRow> for CalculationHistoryRecord {
    type Error = PricingError;

    fn try_from(row: CalculationRow) -> Result<Self, Self::Error> {
        Ok(CalculationHistoryRecord {
            id: row.id,
            entity_type: row.entity_type.parse()?,
            entity_id: row.entity_id,
            package_id: row.package_id,
            input: row.input,
            base_price: row.base_price,
            final_price: row.final_price,
            discount: row.discount,
            applied_rules: row.applied_rules,
            applied_rule_ids: row.applied_rule_ids,
            created_at: row.created_at,
        })
    }
}

fn convert_rows<R, T>(rows: Vec<R>) -> PricingResult<Vec<T>>
where
    T: TryFrom<R, Error = PricingError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Catalog and audit store on a Postgres pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn fetch_package(&self, package_id: i32) -> PricingResult<Option<PackageInfo>> {
        let row = sqlx::query_as::<_, PackageRow>(
            r#"
            SELECT id, name, resource_type, unit_amount, base_price, currency,
                   min_quantity, max_quantity, min_price, max_price, is_active
            FROM packages
            WHERE id = $1
            "#,
        )
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PackageInfo::try_from).transpose()
    }

    async fn fetch_rules(&self, scope: &RuleScope) -> PricingResult<Vec<DiscountRule>> {
        let (scope_type, scope_id) = scope.to_parts();

        let rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, name, rule_type, scope_type, scope_id, condition, discount,
                   priority, is_active, valid_from, valid_until
            FROM discount_rules
            WHERE is_active = true
              AND scope_type = $1
              AND scope_id IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(scope_type)
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await?;

        convert_rows(rows)
    }

    async fn fetch_fees(&self) -> PricingResult<Vec<Fee>> {
        let rows = sqlx::query_as::<_, FeeRow>(
            r#"
            SELECT id, name, fee_type, amount, is_percentage, is_active
            FROM fees
            WHERE is_active = true
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        convert_rows(rows)
    }

    async fn fetch_exchange_rate(&self, from: &str, to: &str) -> PricingResult<Option<Decimal>> {
        let rate: Option<Decimal> = sqlx::query_scalar(
            "SELECT rate FROM exchange_rates WHERE from_currency = $1 AND to_currency = $2",
        )
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rate)
    }

    async fn fetch_setting(&self, key: &str) -> PricingResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM pricing_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    async fn fetch_channel_price(
        &self,
        package_id: i32,
        channel: Channel,
    ) -> PricingResult<Option<Decimal>> {
        let channel_id = match channel {
            Channel::Direct => return Ok(None),
            Channel::Bot(id) | Channel::Agent(id) => id,
        };

        let price: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT price FROM channel_prices
            WHERE package_id = $1 AND channel_type = $2 AND channel_id = $3
            "#,
        )
        .bind(package_id)
        .bind(channel.kind())
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn insert_calculation(&self, record: &CalculationHistoryRecord) -> PricingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO calculation_history
                (id, entity_type, entity_id, package_id, input, base_price, final_price,
                 discount, applied_rules, applied_rule_ids, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.entity_type.to_string())
        .bind(record.entity_id)
        .bind(record.package_id)
        .bind(&record.input)
        .bind(record.base_price)
        .bind(record.final_price)
        .bind(record.discount)
        .bind(&record.applied_rules)
        .bind(&record.applied_rule_ids)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_price_change(&self, record: &PriceHistoryRecord) -> PricingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history
                (id, entity_type, entity_id, old_price, new_price, change_reason,
                 changed_by, changed_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.entity_type.to_string())
        .bind(record.entity_id)
        .bind(record.old_price)
        .bind(record.new_price)
        .bind(&record.change_reason)
        .bind(&record.changed_by)
        .bind(record.changed_at)
        .bind(&record.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_price_history(&self, query: &HistoryQuery) -> PricingResult<Vec<PriceHistoryRecord>> {
        let (sql, params) = HistoryQueryBuilder::from_query(query).build();

        let mut statement = sqlx::query_as::<_, PriceHistoryRow>(&sql);
        for param in params {
            statement = match param {
                QueryParam::Text(value) => statement.bind(value),
                QueryParam::Int(value) => statement.bind(value),
                QueryParam::Timestamp(value) => statement.bind(value),
            };
        }

        let rows = statement.fetch_all(&self.pool).await?;
        convert_rows(rows)
    }

    async fn list_price_changes(
        &self,
        entity_type: Option<EntityType>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> PricingResult<Vec<PriceHistoryRecord>> {
        let rows = sqlx::query_as::<_, PriceHistoryRow>(
            r#"
            SELECT id, entity_type, entity_id, old_price, new_price, change_reason,
                   changed_by, changed_at, metadata
            FROM price_history
            WHERE ($1::varchar IS NULL OR entity_type = $1)
              AND ($2::timestamptz IS NULL OR changed_at >= $2)
              AND ($3::timestamptz IS NULL OR changed_at <= $3)
            ORDER BY changed_at ASC, id ASC
            "#,
        )
        .bind(entity_type.map(|t| t.to_string()))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        convert_rows(rows)
    }

    async fn query_calculations(
        &self,
        query: &CalculationQuery,
    ) -> PricingResult<Vec<CalculationHistoryRecord>> {
        let rows = sqlx::query_as::<_, CalculationRow>(
            r#"
            SELECT id, entity_type, entity_id, package_id, input, base_price, final_price,
                   discount, applied_rules, applied_rule_ids, created_at
            FROM calculation_history
            WHERE ($1::varchar IS NULL OR entity_type = $1)
              AND ($2::int IS NULL OR entity_id = $2)
              AND ($3::int IS NULL OR package_id = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
            ORDER BY created_at DESC, id ASC
            LIMIT $5
            "#,
        )
        .bind(query.entity_type.map(|t| t.to_string()))
        .bind(query.entity_id)
        .bind(query.package_id)
        .bind(query.since)
        .bind(query.limit.map(i64::from))
        .fetch_all(&self.pool)
        .await?;

        convert_rows(rows)
    }
}
