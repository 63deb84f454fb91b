use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::models::attempt::AttemptOutcome;
use crate::models::domain_state::TokenBucketState;
use crate::models::{AttemptResult, DomainState, MonitoredUrl, PriceRecord, Strategy};
use crate::store::{StrategyStore, UrlFilter};
use crate::time::now_ms;

/// SQLx-backed `StrategyStore`, grounded file-for-file on
/// `backend::session::repository_sqlx::SqlxSessionRepository`: same
/// CAS-via-`WHERE`-clause pattern for `update_last_check`, same
/// `Result`-narrowing numeric helpers, same poison-row resilience (a
/// malformed row is logged and skipped rather than failing the page).
pub struct SqlxStrategyStore {
    pool: AnyPool,
}

impl SqlxStrategyStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        super::schema::migrate(&self.pool).await
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl StrategyStore for SqlxStrategyStore {
    async fn list_urls(&self, filter: &UrlFilter) -> anyhow::Result<Vec<MonitoredUrl>> {
        let rows = sqlx::query(
            r#"
SELECT url_id, url, domain, priority, base_interval_minutes, last_check_ms,
       CASE WHEN active THEN 1 ELSE 0 END AS active_i64
FROM monitored_urls
WHERE (? IS NULL OR domain = ?)
  AND (? = 0 OR active = 1)
  AND (? IS NULL OR last_check_ms IS NULL OR last_check_ms < ?);
"#,
        )
        .bind(filter.domain.as_deref())
        .bind(filter.domain.as_deref())
        .bind(filter.active_only as i64)
        .bind(filter.due_before_ms.map(u64_to_i64).transpose()?)
        .bind(filter.due_before_ms.map(u64_to_i64).transpose()?)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_url(&r) {
                Ok(u) => out.push(u),
                Err(e) => tracing::warn!(error = %e, "skipping malformed monitored_url row"),
            }
        }
        Ok(out)
    }

    async fn update_last_check(
        &self,
        url_id: Uuid,
        prev_ms: Option<u64>,
        new_ms: u64,
    ) -> anyhow::Result<bool> {
        let new_i64 = u64_to_i64(new_ms)?;
        let prev_i64 = prev_ms.map(u64_to_i64).transpose()?;

        let res = sqlx::query(
            r#"
UPDATE monitored_urls
SET last_check_ms = ?
WHERE url_id = ?
  AND ((last_check_ms IS NULL AND ? IS NULL) OR last_check_ms = ?);
"#,
        )
        .bind(new_i64)
        .bind(url_id.to_string())
        .bind(prev_i64)
        .bind(prev_i64)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn list_strategies(&self, domain: &str) -> anyhow::Result<Vec<Strategy>> {
        let rows = sqlx::query(
            r#"
SELECT strategy_id, domain, target_field, kind_json, confidence, priority,
       attempts, successes, last_success_ms, sample_urls_json, parent_id
FROM strategies
WHERE domain = ? OR domain = '*';
"#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_strategy(&r) {
                Ok(s) => out.push(s),
                Err(e) => tracing::warn!(error = %e, "skipping malformed strategy row"),
            }
        }
        Ok(out)
    }

    async fn upsert_strategies(&self, strategies: &[Strategy]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for s in strategies {
            let kind_json = serde_json::to_string(&s.kind)?;
            let sample_urls_json = serde_json::to_string(&s.sample_urls)?;
            let target_field_json = serde_json::to_string(&s.target_field)?;

            sqlx::query(
                r#"
DELETE FROM strategies WHERE strategy_id = ?;
"#,
            )
            .bind(s.id.to_string())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
INSERT INTO strategies(
  strategy_id, domain, target_field, kind_json, confidence, priority,
  attempts, successes, last_success_ms, sample_urls_json, parent_id
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(s.id.to_string())
            .bind(&s.domain)
            .bind(target_field_json)
            .bind(kind_json)
            .bind(s.confidence)
            .bind(s.priority)
            .bind(u64_to_i64(s.attempts)?)
            .bind(u64_to_i64(s.successes)?)
            .bind(s.last_success_ms.map(u64_to_i64).transpose()?)
            .bind(sample_urls_json)
            .bind(s.parent_id.map(|p| p.to_string()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_price_record(&self, record: &PriceRecord) -> anyhow::Result<()> {
        let installment_json = serde_json::to_string(&record.installment)?;
        let availability_json = serde_json::to_string(&record.availability)?;
        let promotion_labels_json = serde_json::to_string(&record.promotion_labels)?;

        sqlx::query(
            r#"
INSERT INTO price_records(
  record_id, url_id, checked_at_ms, price, old_price, pix_price,
  installment_json, availability, availability_text, seller,
  promotion_labels_json, promotion_end_ms, extraction_strategy_id,
  extraction_confidence
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(record.url_id.to_string())
        .bind(u64_to_i64(record.checked_at_ms)?)
        .bind(record.price.to_string())
        .bind(record.old_price.map(|d| d.to_string()))
        .bind(record.pix_price.map(|d| d.to_string()))
        .bind(installment_json)
        .bind(availability_json)
        .bind(&record.availability_text)
        .bind(&record.seller)
        .bind(promotion_labels_json)
        .bind(record.promotion_end_ms.map(u64_to_i64).transpose()?)
        .bind(record.extraction_strategy_id.to_string())
        .bind(record.extraction_confidence)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_attempt_log(&self, attempt: &AttemptResult) -> anyhow::Result<()> {
        let outcome_json = serde_json::to_string(&attempt.outcome)?;
        let strategies_tried_json = serde_json::to_string(&attempt.strategies_tried)?;
        let record_json = attempt
            .record
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let signals_json = serde_json::to_string(&attempt.signals)?;

        // Idempotent by (url_id, started_at): a re-delivered attempt is a
        // no-op, matching the §8 dedup invariant.
        let res = sqlx::query(
            r#"
INSERT INTO attempt_logs(
  url_id, started_at_ms, finished_at_ms, outcome, strategies_tried_json,
  record_json, signals_json
) VALUES (?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (url_id, started_at_ms) DO NOTHING;
"#,
        )
        .bind(attempt.url_id.to_string())
        .bind(u64_to_i64(attempt.started_at_ms)?)
        .bind(u64_to_i64(attempt.finished_at_ms)?)
        .bind(outcome_json)
        .bind(strategies_tried_json)
        .bind(record_json)
        .bind(signals_json)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            // `ON CONFLICT` is not universally supported across the `Any`
            // backends sqlx targets; fall back to a plain insert and treat
            // a primary-key violation as the same idempotent no-op.
            Err(sqlx::Error::Database(e)) if e.message().to_lowercase().contains("unique") => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn archive_strategy(&self, strategy_id: Uuid) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
SELECT strategy_id, domain, target_field, kind_json, confidence, priority,
       attempts, successes, last_success_ms, sample_urls_json, parent_id
FROM strategies WHERE strategy_id = ?;
"#,
        )
        .bind(strategy_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(());
        };

        sqlx::query(
            r#"
INSERT INTO strategies_archive(
  strategy_id, domain, target_field, kind_json, confidence, priority,
  attempts, successes, last_success_ms, sample_urls_json, parent_id, archived_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(row.get::<String, _>("strategy_id"))
        .bind(row.get::<String, _>("domain"))
        .bind(row.get::<String, _>("target_field"))
        .bind(row.get::<String, _>("kind_json"))
        .bind(row.get::<f64, _>("confidence"))
        .bind(row.get::<i64, _>("priority"))
        .bind(row.get::<i64, _>("attempts"))
        .bind(row.get::<i64, _>("successes"))
        .bind(row.get::<Option<i64>, _>("last_success_ms"))
        .bind(row.get::<String, _>("sample_urls_json"))
        .bind(row.get::<Option<String>, _>("parent_id"))
        .bind(u64_to_i64(now_ms())?)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM strategies WHERE strategy_id = ?;"#)
            .bind(strategy_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_domain_state(&self, state: &DomainState) -> anyhow::Result<()> {
        let last_outcome_json = state
            .last_outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
DELETE FROM domain_states WHERE domain = ?;
"#,
        )
        .bind(&state.domain)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
INSERT INTO domain_states(
  domain, cooldown_until_ms, consecutive_blocks, last_outcome, tokens, last_refill_ms
) VALUES (?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(&state.domain)
        .bind(state.cooldown_until_ms.map(u64_to_i64).transpose()?)
        .bind(u64_to_i64(state.consecutive_blocks as u64)?)
        .bind(last_outcome_json)
        .bind(state.token_bucket.tokens)
        .bind(u64_to_i64(state.token_bucket.last_refill_ms)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_domain_states(&self) -> anyhow::Result<Vec<DomainState>> {
        let rows = sqlx::query(
            r#"
SELECT domain, cooldown_until_ms, consecutive_blocks, last_outcome, tokens, last_refill_ms
FROM domain_states;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_domain_state(&r) {
                Ok(s) => out.push(s),
                Err(e) => tracing::warn!(error = %e, "skipping malformed domain_state row"),
            }
        }
        Ok(out)
    }
}

fn row_to_url(r: &sqlx::any::AnyRow) -> anyhow::Result<MonitoredUrl> {
    let id = Uuid::parse_str(&r.get::<String, _>("url_id")).context("invalid url_id")?;
    let priority: i64 = r.get("priority");
    let active_i64: i64 = r.get("active_i64");

    Ok(MonitoredUrl {
        id,
        url: r.get("url"),
        domain: r.get("domain"),
        priority: priority.clamp(0, 9) as u8,
        base_interval_minutes: i64_to_u32(r.get("base_interval_minutes"))?,
        last_check_ms: r.get::<Option<i64>, _>("last_check_ms").map(|v| v as u64),
        active: active_i64 == 1,
    })
}

fn row_to_strategy(r: &sqlx::any::AnyRow) -> anyhow::Result<Strategy> {
    let id = Uuid::parse_str(&r.get::<String, _>("strategy_id")).context("invalid strategy_id")?;
    let parent_id = r
        .get::<Option<String>, _>("parent_id")
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .context("invalid parent_id")?;

    Ok(Strategy {
        id,
        domain: r.get("domain"),
        target_field: serde_json::from_str(&r.get::<String, _>("target_field"))?,
        kind: serde_json::from_str(&r.get::<String, _>("kind_json"))?,
        confidence: r.get("confidence"),
        priority: r.get("priority"),
        attempts: i64_to_u64(r.get("attempts"))?,
        successes: i64_to_u64(r.get("successes"))?,
        last_success_ms: r
            .get::<Option<i64>, _>("last_success_ms")
            .map(i64_to_u64)
            .transpose()?,
        sample_urls: serde_json::from_str(&r.get::<String, _>("sample_urls_json"))?,
        parent_id,
    })
}

fn row_to_domain_state(r: &sqlx::any::AnyRow) -> anyhow::Result<DomainState> {
    let last_outcome_raw: Option<String> = r.get("last_outcome");
    let last_outcome: Option<AttemptOutcome> = last_outcome_raw
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(DomainState {
        domain: r.get("domain"),
        cooldown_until_ms: r
            .get::<Option<i64>, _>("cooldown_until_ms")
            .map(i64_to_u64)
            .transpose()?,
        consecutive_blocks: i64_to_u32(r.get("consecutive_blocks"))?,
        last_outcome,
        token_bucket: TokenBucketState {
            tokens: r.get("tokens"),
            last_refill_ms: i64_to_u64(r.get("last_refill_ms"))?,
        },
    })
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn i64_to_u32(v: i64) -> anyhow::Result<u32> {
    if v < 0 || v > u32::MAX as i64 {
        return Err(anyhow!("out of range for u32: {v}"));
    }
    Ok(v as u32)
}
