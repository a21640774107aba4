use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{from_json_text, parse_enum, parse_timestamp, to_db_time, to_json_text, SqliteStorage};
use crate::contradictions::ContradictionStats;
use crate::error::{AppResult, StorageError};
use crate::evidence::coverage_ratio;
use crate::metrics::{MetricInputs, MetricType, MetricsStore, QualityMetric};
use crate::stress_test::StressTestResults;

const METRIC_COLUMNS: &str = "id, engagement_id, metric_type, value, metadata, recorded_at";

#[async_trait]
impl MetricsStore for SqliteStorage {
    async fn metric_inputs(&self, engagement_id: &str) -> AppResult<MetricInputs> {
        // Every read shares the transaction's snapshot.
        let mut tx = self.pool.begin().await?;

        let hypotheses = sqlx::query(
            "SELECT COUNT(*) AS n, COALESCE(SUM(confidence), 0.0) AS confidence_sum \
             FROM hypotheses WHERE engagement_id = ?",
        )
        .bind(engagement_id)
        .fetch_one(&mut *tx)
        .await?;

        let evidence = sqlx::query(
            "SELECT COUNT(*) AS n, AVG(credibility) AS avg_credibility, \
             COUNT(DISTINCT source_type) AS source_types \
             FROM evidence WHERE engagement_id = ?",
        )
        .bind(engagement_id)
        .fetch_one(&mut *tx)
        .await?;

        let linked_hypotheses: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT l.hypothesis_id)
              FROM evidence_hypothesis_links l
              JOIN evidence e ON e.id = l.evidence_id
              JOIN hypotheses h ON h.id = l.hypothesis_id
             WHERE e.engagement_id = ?1 AND h.engagement_id = ?1
            "#,
        )
        .bind(engagement_id)
        .fetch_one(&mut *tx)
        .await?;

        let contradiction_rows = sqlx::query(
            "SELECT severity, status, COUNT(*) AS n FROM contradictions \
             WHERE engagement_id = ? GROUP BY severity, status",
        )
        .bind(engagement_id)
        .fetch_all(&mut *tx)
        .await?;

        let latest_results: Option<Option<String>> = sqlx::query_scalar(
            "SELECT results FROM stress_tests WHERE engagement_id = ? AND status = 'completed' \
             ORDER BY completed_at DESC, rowid DESC LIMIT 1",
        )
        .bind(engagement_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut groups = Vec::with_capacity(contradiction_rows.len());
        for row in contradiction_rows {
            groups.push((
                parse_enum("severity", row.get::<&str, _>("severity"))?,
                parse_enum("status", row.get::<&str, _>("status"))?,
                row.get::<i64, _>("n") as u64,
            ));
        }
        let contradictions = ContradictionStats::from_groups(groups);

        let latest_risk_score = match latest_results.flatten() {
            Some(text) => Some(
                serde_json::from_str::<StressTestResults>(&text)
                    .map_err(|e| StorageError::Query {
                        message: format!("Invalid stress test results: {}", e),
                    })?
                    .overall_risk_score,
            ),
            None => None,
        };

        let hypothesis_count = hypotheses.get::<i64, _>("n") as u64;
        Ok(MetricInputs {
            hypothesis_count,
            confidence_sum: hypotheses.get::<f64, _>("confidence_sum"),
            evidence_count: evidence.get::<i64, _>("n") as u64,
            average_credibility: evidence
                .get::<Option<f64>, _>("avg_credibility")
                .unwrap_or(0.0),
            distinct_source_types: evidence.get::<i64, _>("source_types") as u64,
            hypothesis_coverage: coverage_ratio(linked_hypotheses as u64, hypothesis_count),
            resolution_rate: contradictions.resolution_rate,
            latest_risk_score,
        })
    }

    async fn record_metrics(&self, metrics: &[QualityMetric]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        for metric in metrics {
            let metadata = to_json_text(metric.metadata.as_ref())?;
            sqlx::query(
                r#"
                INSERT INTO quality_metrics (id, engagement_id, metric_type, value, metadata, recorded_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&metric.id)
            .bind(&metric.engagement_id)
            .bind(metric.metric_type.as_str())
            .bind(metric.value)
            .bind(&metadata)
            .bind(to_db_time(&metric.recorded_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn current_metrics(&self, engagement_id: &str) -> AppResult<Vec<QualityMetric>> {
        // Latest row per type; rowid breaks ties within one batch timestamp.
        let rows: Vec<MetricRow> = sqlx::query_as(
            r#"
            SELECT id, engagement_id, metric_type, value, metadata, recorded_at
            FROM quality_metrics q
            WHERE engagement_id = ?1
              AND rowid = (
                  SELECT rowid FROM quality_metrics
                  WHERE engagement_id = ?1 AND metric_type = q.metric_type
                  ORDER BY recorded_at DESC, rowid DESC
                  LIMIT 1
              )
            ORDER BY metric_type ASC
            "#,
        )
        .bind(engagement_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(QualityMetric::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn metric_history(
        &self,
        engagement_id: &str,
        metric_type: Option<MetricType>,
        limit: Option<u32>,
    ) -> AppResult<Vec<QualityMetric>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM quality_metrics WHERE engagement_id = ",
            METRIC_COLUMNS
        ));
        qb.push_bind(engagement_id);
        if let Some(metric_type) = metric_type {
            qb.push(" AND metric_type = ").push_bind(metric_type.as_str());
        }
        qb.push(" ORDER BY recorded_at DESC, rowid DESC LIMIT ")
            .push_bind(limit.map(i64::from).unwrap_or(-1));

        let rows: Vec<MetricRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(QualityMetric::try_from)
            .collect::<Result<_, _>>()?)
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct MetricRow {
    id: String,
    engagement_id: String,
    metric_type: String,
    value: f64,
    metadata: Option<String>,
    recorded_at: String,
}

impl TryFrom<MetricRow> for QualityMetric {
    type Error = StorageError;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            engagement_id: row.engagement_id,
            metric_type: parse_enum("metric_type", &row.metric_type)?,
            value: row.value,
            metadata: from_json_text(row.metadata),
            recorded_at: parse_timestamp(&row.recorded_at),
        })
    }
}
