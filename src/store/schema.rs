use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS monitored_urls (
  url_id TEXT PRIMARY KEY,
  url TEXT NOT NULL UNIQUE,
  domain TEXT NOT NULL,
  priority INTEGER NOT NULL,
  base_interval_minutes INTEGER NOT NULL,
  last_check_ms BIGINT,
  active BOOLEAN NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS strategies (
  strategy_id TEXT PRIMARY KEY,
  domain TEXT NOT NULL,
  target_field TEXT NOT NULL,
  kind_json TEXT NOT NULL,
  confidence DOUBLE PRECISION NOT NULL,
  priority BIGINT NOT NULL,
  attempts BIGINT NOT NULL,
  successes BIGINT NOT NULL,
  last_success_ms BIGINT,
  sample_urls_json TEXT NOT NULL,
  parent_id TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS strategies_archive (
  strategy_id TEXT PRIMARY KEY,
  domain TEXT NOT NULL,
  target_field TEXT NOT NULL,
  kind_json TEXT NOT NULL,
  confidence DOUBLE PRECISION NOT NULL,
  priority BIGINT NOT NULL,
  attempts BIGINT NOT NULL,
  successes BIGINT NOT NULL,
  last_success_ms BIGINT,
  sample_urls_json TEXT NOT NULL,
  parent_id TEXT,
  archived_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS price_records (
  record_id TEXT PRIMARY KEY,
  url_id TEXT NOT NULL,
  checked_at_ms BIGINT NOT NULL,
  price TEXT NOT NULL,
  old_price TEXT,
  pix_price TEXT,
  installment_json TEXT NOT NULL,
  availability TEXT NOT NULL,
  availability_text TEXT,
  seller TEXT,
  promotion_labels_json TEXT NOT NULL,
  promotion_end_ms BIGINT,
  extraction_strategy_id TEXT NOT NULL,
  extraction_confidence DOUBLE PRECISION NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS attempt_logs (
  url_id TEXT NOT NULL,
  started_at_ms BIGINT NOT NULL,
  finished_at_ms BIGINT NOT NULL,
  outcome TEXT NOT NULL,
  strategies_tried_json TEXT NOT NULL,
  record_json TEXT,
  signals_json TEXT NOT NULL,
  PRIMARY KEY (url_id, started_at_ms)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS domain_states (
  domain TEXT PRIMARY KEY,
  cooldown_until_ms BIGINT,
  consecutive_blocks BIGINT NOT NULL,
  last_outcome TEXT,
  tokens DOUBLE PRECISION NOT NULL,
  last_refill_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_urls_domain ON monitored_urls(domain);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_strategies_domain ON strategies(domain);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_price_records_url ON price_records(url_id);"#)
        .execute(pool)
        .await?;

    Ok(())
}
