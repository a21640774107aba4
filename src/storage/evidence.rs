use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use super::{
    from_json_text, parse_enum, parse_optional_timestamp, parse_timestamp, to_db_time,
    to_json_text, SqliteStorage,
};
use crate::error::{AppError, AppResult, StorageError};
use crate::evidence::{
    coverage_ratio, Evidence, EvidenceFilter, EvidenceLink, EvidenceStats, EvidenceStore,
    EvidenceUpdate, SourceMetadata,
};
use crate::graph::validate_unit;

const EVIDENCE_COLUMNS: &str = "id, engagement_id, content, source_type, sentiment, credibility, \
     source_title, source_author, source_url, source_published_at, document_id, provenance, \
     metadata, retrieved_at, created_at";

impl SqliteStorage {
    /// True when `id` names evidence of `engagement_id`.
    pub(crate) async fn evidence_in_scope(&self, engagement_id: &str, id: &str) -> AppResult<bool> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM evidence WHERE id = ? AND engagement_id = ?")
                .bind(id)
                .bind(engagement_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    async fn fetch_link(&self, evidence_id: &str, hypothesis_id: &str) -> AppResult<EvidenceLink> {
        let row: Option<LinkRow> = sqlx::query_as(
            r#"
            SELECT evidence_id, hypothesis_id, relevance_score, created_at
            FROM evidence_hypothesis_links
            WHERE evidence_id = ? AND hypothesis_id = ?
            "#,
        )
        .bind(evidence_id)
        .bind(hypothesis_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EvidenceLink::from)
            .ok_or_else(|| AppError::not_found("evidence link", format!("{}:{}", evidence_id, hypothesis_id)))
    }
}

#[async_trait]
impl EvidenceStore for SqliteStorage {
    async fn create_evidence(&self, evidence: &Evidence) -> AppResult<()> {
        evidence.validate()?;

        let provenance = to_json_text(evidence.provenance.as_ref())?;
        let metadata = to_json_text(evidence.metadata.as_ref())?;

        sqlx::query(
            r#"
            INSERT INTO evidence (id, engagement_id, content, source_type, sentiment, credibility,
                                  source_title, source_author, source_url, source_published_at,
                                  document_id, provenance, metadata, retrieved_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&evidence.id)
        .bind(&evidence.engagement_id)
        .bind(&evidence.content)
        .bind(evidence.source_type.as_str())
        .bind(evidence.sentiment.as_str())
        .bind(evidence.credibility)
        .bind(&evidence.source.title)
        .bind(&evidence.source.author)
        .bind(&evidence.source.url)
        .bind(evidence.source.published_at.as_ref().map(to_db_time))
        .bind(&evidence.document_id)
        .bind(&provenance)
        .bind(&metadata)
        .bind(evidence.retrieved_at.as_ref().map(to_db_time))
        .bind(to_db_time(&evidence.created_at))
        .execute(&self.pool)
        .await?;

        debug!(engagement_id = %evidence.engagement_id, evidence_id = %evidence.id, source_type = %evidence.source_type, "Evidence created");
        Ok(())
    }

    async fn get_evidence(&self, engagement_id: &str, id: &str) -> AppResult<Evidence> {
        let row: Option<EvidenceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM evidence WHERE id = ? AND engagement_id = ?",
            EVIDENCE_COLUMNS
        ))
        .bind(id)
        .bind(engagement_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_into()?),
            None => Err(AppError::not_found("evidence", id)),
        }
    }

    async fn update_evidence(
        &self,
        engagement_id: &str,
        id: &str,
        update: &EvidenceUpdate,
    ) -> AppResult<Evidence> {
        let mut evidence = self.get_evidence(engagement_id, id).await?;
        update.apply(&mut evidence)?;

        let metadata = to_json_text(evidence.metadata.as_ref())?;

        let result = sqlx::query(
            r#"
            UPDATE evidence
            SET content = ?, source_type = ?, sentiment = ?, credibility = ?,
                source_title = ?, source_author = ?, source_url = ?, source_published_at = ?,
                metadata = ?
            WHERE id = ? AND engagement_id = ?
            "#,
        )
        .bind(&evidence.content)
        .bind(evidence.source_type.as_str())
        .bind(evidence.sentiment.as_str())
        .bind(evidence.credibility)
        .bind(&evidence.source.title)
        .bind(&evidence.source.author)
        .bind(&evidence.source.url)
        .bind(evidence.source.published_at.as_ref().map(to_db_time))
        .bind(&metadata)
        .bind(id)
        .bind(engagement_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("evidence", id));
        }
        Ok(evidence)
    }

    async fn delete_evidence(&self, engagement_id: &str, id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM evidence WHERE id = ? AND engagement_id = ?")
            .bind(id)
            .bind(engagement_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("evidence", id));
        }
        Ok(())
    }

    async fn link_evidence(
        &self,
        engagement_id: &str,
        evidence_id: &str,
        hypothesis_id: &str,
        relevance_score: f64,
    ) -> AppResult<EvidenceLink> {
        validate_unit("relevance_score", relevance_score)?;

        if !self.evidence_in_scope(engagement_id, evidence_id).await? {
            return Err(AppError::not_found("evidence", evidence_id));
        }
        if !self.node_in_scope(engagement_id, hypothesis_id).await? {
            return Err(AppError::not_found("hypothesis", hypothesis_id));
        }

        sqlx::query(
            r#"
            INSERT INTO evidence_hypothesis_links (evidence_id, hypothesis_id, relevance_score, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(evidence_id, hypothesis_id) DO UPDATE SET
                relevance_score = excluded.relevance_score
            "#,
        )
        .bind(evidence_id)
        .bind(hypothesis_id)
        .bind(relevance_score)
        .bind(to_db_time(&chrono::Utc::now()))
        .execute(&self.pool)
        .await?;

        self.fetch_link(evidence_id, hypothesis_id).await
    }

    async fn unlink_evidence(
        &self,
        engagement_id: &str,
        evidence_id: &str,
        hypothesis_id: &str,
    ) -> AppResult<bool> {
        if !self.evidence_in_scope(engagement_id, evidence_id).await? {
            return Err(AppError::not_found("evidence", evidence_id));
        }

        let result = sqlx::query(
            "DELETE FROM evidence_hypothesis_links WHERE evidence_id = ? AND hypothesis_id = ?",
        )
        .bind(evidence_id)
        .bind(hypothesis_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_links_for_evidence(
        &self,
        engagement_id: &str,
        evidence_id: &str,
    ) -> AppResult<Vec<EvidenceLink>> {
        if !self.evidence_in_scope(engagement_id, evidence_id).await? {
            return Err(AppError::not_found("evidence", evidence_id));
        }

        let rows: Vec<LinkRow> = sqlx::query_as(
            r#"
            SELECT evidence_id, hypothesis_id, relevance_score, created_at
            FROM evidence_hypothesis_links
            WHERE evidence_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(evidence_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EvidenceLink::from).collect())
    }

    async fn list_links_for_hypothesis(
        &self,
        engagement_id: &str,
        hypothesis_id: &str,
    ) -> AppResult<Vec<EvidenceLink>> {
        let rows: Vec<LinkRow> = sqlx::query_as(
            r#"
            SELECT l.evidence_id, l.hypothesis_id, l.relevance_score, l.created_at
            FROM evidence_hypothesis_links l
            JOIN evidence e ON e.id = l.evidence_id
            WHERE e.engagement_id = ? AND l.hypothesis_id = ?
            ORDER BY l.relevance_score DESC, l.created_at ASC
            "#,
        )
        .bind(engagement_id)
        .bind(hypothesis_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EvidenceLink::from).collect())
    }

    async fn list_evidence(
        &self,
        engagement_id: &str,
        filter: &EvidenceFilter,
    ) -> AppResult<Vec<Evidence>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM evidence WHERE engagement_id = ",
            EVIDENCE_COLUMNS
        ));
        qb.push_bind(engagement_id);

        if let Some(source_type) = filter.source_type {
            qb.push(" AND source_type = ").push_bind(source_type.as_str());
        }
        if let Some(sentiment) = filter.sentiment {
            qb.push(" AND sentiment = ").push_bind(sentiment.as_str());
        }
        if let Some(min) = filter.min_credibility {
            qb.push(" AND credibility >= ").push_bind(min);
        }
        if let Some(max) = filter.max_credibility {
            qb.push(" AND credibility <= ").push_bind(max);
        }
        if let Some(document_id) = &filter.document_id {
            qb.push(" AND document_id = ").push_bind(document_id.clone());
        }

        qb.push(" ORDER BY created_at DESC, rowid DESC");
        // SQLite needs a LIMIT before OFFSET; -1 means unbounded.
        qb.push(" LIMIT ")
            .push_bind(filter.limit.map(i64::from).unwrap_or(-1));
        qb.push(" OFFSET ")
            .push_bind(i64::from(filter.offset.unwrap_or(0)));

        let rows: Vec<EvidenceRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let mut items = rows
            .into_iter()
            .map(Evidence::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        // Post-filter over the page, not a join: pagination happens first.
        if let Some(hypothesis_id) = &filter.hypothesis_id {
            let linked: HashSet<String> = self
                .list_links_for_hypothesis(engagement_id, hypothesis_id)
                .await?
                .into_iter()
                .map(|l| l.evidence_id)
                .collect();
            items.retain(|e| linked.contains(&e.id));
        }

        Ok(items)
    }

    async fn evidence_stats(&self, engagement_id: &str) -> AppResult<EvidenceStats> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS total, AVG(credibility) AS avg_credibility FROM evidence WHERE engagement_id = ?",
        )
        .bind(engagement_id)
        .fetch_one(&self.pool)
        .await?;

        let by_source_type = group_counts(
            self,
            "SELECT source_type AS k, COUNT(*) AS n FROM evidence WHERE engagement_id = ? GROUP BY source_type",
            engagement_id,
        )
        .await?;
        let by_sentiment = group_counts(
            self,
            "SELECT sentiment AS k, COUNT(*) AS n FROM evidence WHERE engagement_id = ? GROUP BY sentiment",
            engagement_id,
        )
        .await?;

        let coverage = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM hypotheses WHERE engagement_id = ?1) AS total_hypotheses,
                (SELECT COUNT(DISTINCT l.hypothesis_id)
                   FROM evidence_hypothesis_links l
                   JOIN evidence e ON e.id = l.evidence_id
                   JOIN hypotheses h ON h.id = l.hypothesis_id
                  WHERE e.engagement_id = ?1 AND h.engagement_id = ?1) AS linked_hypotheses
            "#,
        )
        .bind(engagement_id)
        .fetch_one(&self.pool)
        .await?;

        let total_hypotheses: i64 = coverage.get("total_hypotheses");
        let linked_hypotheses: i64 = coverage.get("linked_hypotheses");

        Ok(EvidenceStats {
            total: totals.get::<i64, _>("total") as u64,
            by_source_type,
            by_sentiment,
            average_credibility: totals
                .get::<Option<f64>, _>("avg_credibility")
                .unwrap_or(0.0),
            hypothesis_coverage: coverage_ratio(linked_hypotheses as u64, total_hypotheses as u64),
        })
    }
}

async fn group_counts(
    storage: &SqliteStorage,
    sql: &str,
    engagement_id: &str,
) -> AppResult<BTreeMap<String, u64>> {
    let rows = sqlx::query(sql)
        .bind(engagement_id)
        .fetch_all(&storage.pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>("k"), r.get::<i64, _>("n") as u64))
        .collect())
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: String,
    engagement_id: String,
    content: String,
    source_type: String,
    sentiment: String,
    credibility: f64,
    source_title: Option<String>,
    source_author: Option<String>,
    source_url: Option<String>,
    source_published_at: Option<String>,
    document_id: Option<String>,
    provenance: Option<String>,
    metadata: Option<String>,
    retrieved_at: Option<String>,
    created_at: String,
}

impl TryFrom<EvidenceRow> for Evidence {
    type Error = StorageError;

    fn try_from(row: EvidenceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            engagement_id: row.engagement_id,
            content: row.content,
            source_type: parse_enum("source_type", &row.source_type)?,
            sentiment: parse_enum("sentiment", &row.sentiment)?,
            credibility: row.credibility,
            source: SourceMetadata {
                title: row.source_title,
                author: row.source_author,
                url: row.source_url,
                published_at: parse_optional_timestamp(row.source_published_at),
            },
            document_id: row.document_id,
            provenance: from_json_text(row.provenance),
            metadata: from_json_text(row.metadata),
            retrieved_at: parse_optional_timestamp(row.retrieved_at),
            created_at: parse_timestamp(&row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    evidence_id: String,
    hypothesis_id: Option<String>,
    relevance_score: f64,
    created_at: String,
}

impl From<LinkRow> for EvidenceLink {
    fn from(row: LinkRow) -> Self {
        Self {
            evidence_id: row.evidence_id,
            hypothesis_id: row.hypothesis_id,
            relevance_score: row.relevance_score,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}
