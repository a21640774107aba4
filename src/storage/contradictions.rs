use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

use super::{parse_enum, parse_optional_timestamp, parse_timestamp, to_db_time, SqliteStorage};
use crate::contradictions::{
    Contradiction, ContradictionFilter, ContradictionStats, ContradictionStatus,
    ContradictionStore,
};
use crate::error::{AppError, AppResult, ConflictError, StorageError};

const CONTRADICTION_COLUMNS: &str = "id, engagement_id, hypothesis_id, evidence_id, description, \
     severity, status, bear_case_theme, resolution_notes, resolved_by, found_at, resolved_at";

const SEVERITY_ORDER: &str =
    "CASE severity WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END";

#[async_trait]
impl ContradictionStore for SqliteStorage {
    async fn create_contradiction(&self, contradiction: &Contradiction) -> AppResult<()> {
        contradiction.validate()?;

        if let Some(hypothesis_id) = &contradiction.hypothesis_id {
            if !self
                .node_in_scope(&contradiction.engagement_id, hypothesis_id)
                .await?
            {
                return Err(AppError::not_found("hypothesis", hypothesis_id.clone()));
            }
        }
        if let Some(evidence_id) = &contradiction.evidence_id {
            if !self
                .evidence_in_scope(&contradiction.engagement_id, evidence_id)
                .await?
            {
                return Err(AppError::not_found("evidence", evidence_id.clone()));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO contradictions (id, engagement_id, hypothesis_id, evidence_id, description,
                                        severity, status, bear_case_theme, resolution_notes,
                                        resolved_by, found_at, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&contradiction.id)
        .bind(&contradiction.engagement_id)
        .bind(&contradiction.hypothesis_id)
        .bind(&contradiction.evidence_id)
        .bind(&contradiction.description)
        .bind(contradiction.severity.as_str())
        .bind(contradiction.status.as_str())
        .bind(&contradiction.bear_case_theme)
        .bind(&contradiction.resolution_notes)
        .bind(&contradiction.resolved_by)
        .bind(to_db_time(&contradiction.found_at))
        .bind(contradiction.resolved_at.as_ref().map(to_db_time))
        .execute(&self.pool)
        .await?;

        debug!(
            engagement_id = %contradiction.engagement_id,
            contradiction_id = %contradiction.id,
            severity = %contradiction.severity,
            "Contradiction recorded"
        );
        Ok(())
    }

    async fn get_contradiction(&self, engagement_id: &str, id: &str) -> AppResult<Contradiction> {
        let row: Option<ContradictionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM contradictions WHERE id = ? AND engagement_id = ?",
            CONTRADICTION_COLUMNS
        ))
        .bind(id)
        .bind(engagement_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_into()?),
            None => Err(AppError::not_found("contradiction", id)),
        }
    }

    async fn list_contradictions(
        &self,
        engagement_id: &str,
        filter: &ContradictionFilter,
    ) -> AppResult<Vec<Contradiction>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM contradictions WHERE engagement_id = ",
            CONTRADICTION_COLUMNS
        ));
        qb.push_bind(engagement_id);

        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(severity) = filter.severity {
            qb.push(" AND severity = ").push_bind(severity.as_str());
        }
        if let Some(hypothesis_id) = &filter.hypothesis_id {
            qb.push(" AND hypothesis_id = ")
                .push_bind(hypothesis_id.clone());
        }
        qb.push(format!(
            " ORDER BY {}, found_at DESC, rowid DESC",
            SEVERITY_ORDER
        ));

        let rows: Vec<ContradictionRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(Contradiction::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn resolve_contradiction(
        &self,
        engagement_id: &str,
        id: &str,
        status: ContradictionStatus,
        notes: Option<&str>,
        resolved_by: Option<&str>,
    ) -> AppResult<Contradiction> {
        if !status.is_resolution() {
            return Err(AppError::validation(
                "status",
                format!("{} is not a resolution; use explained or dismissed", status),
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE contradictions
            SET status = ?, resolution_notes = ?, resolved_by = ?, resolved_at = ?
            WHERE id = ? AND engagement_id = ? AND status IN ('unresolved', 'critical')
            "#,
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(resolved_by)
        .bind(to_db_time(&Utc::now()))
        .bind(id)
        .bind(engagement_id)
        .execute(&self.pool)
        .await?;

        let current = self.get_contradiction(engagement_id, id).await?;
        if result.rows_affected() == 0 {
            return Err(ConflictError::AlreadyResolved {
                contradiction_id: id.to_string(),
                status: current.status.to_string(),
            }
            .into());
        }

        info!(
            engagement_id = %engagement_id,
            contradiction_id = %id,
            status = %status,
            "Contradiction resolved"
        );
        Ok(current)
    }

    async fn mark_critical(&self, engagement_id: &str, id: &str) -> AppResult<Contradiction> {
        let result = sqlx::query(
            "UPDATE contradictions SET status = 'critical' \
             WHERE id = ? AND engagement_id = ? AND status = 'unresolved'",
        )
        .bind(id)
        .bind(engagement_id)
        .execute(&self.pool)
        .await?;

        let current = self.get_contradiction(engagement_id, id).await?;
        if result.rows_affected() == 0 && current.status != ContradictionStatus::Critical {
            return Err(ConflictError::InvalidTransition {
                entity: "contradiction",
                id: id.to_string(),
                from: current.status.to_string(),
                to: ContradictionStatus::Critical.to_string(),
            }
            .into());
        }

        Ok(current)
    }

    async fn delete_contradiction(&self, engagement_id: &str, id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM contradictions WHERE id = ? AND engagement_id = ?")
            .bind(id)
            .bind(engagement_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("contradiction", id));
        }
        Ok(())
    }

    async fn contradiction_stats(&self, engagement_id: &str) -> AppResult<ContradictionStats> {
        let rows = sqlx::query(
            r#"
            SELECT severity, status, COUNT(*) AS n
            FROM contradictions
            WHERE engagement_id = ?
            GROUP BY severity, status
            "#,
        )
        .bind(engagement_id)
        .fetch_all(&self.pool)
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            groups.push((
                parse_enum("severity", row.get::<&str, _>("severity"))?,
                parse_enum("status", row.get::<&str, _>("status"))?,
                row.get::<i64, _>("n") as u64,
            ));
        }

        Ok(ContradictionStats::from_groups(groups))
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct ContradictionRow {
    id: String,
    engagement_id: String,
    hypothesis_id: Option<String>,
    evidence_id: Option<String>,
    description: String,
    severity: String,
    status: String,
    bear_case_theme: Option<String>,
    resolution_notes: Option<String>,
    resolved_by: Option<String>,
    found_at: String,
    resolved_at: Option<String>,
}

impl TryFrom<ContradictionRow> for Contradiction {
    type Error = StorageError;

    fn try_from(row: ContradictionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            engagement_id: row.engagement_id,
            hypothesis_id: row.hypothesis_id,
            evidence_id: row.evidence_id,
            description: row.description,
            severity: parse_enum("severity", &row.severity)?,
            status: parse_enum("status", &row.status)?,
            bear_case_theme: row.bear_case_theme,
            resolution_notes: row.resolution_notes,
            resolved_by: row.resolved_by,
            found_at: parse_timestamp(&row.found_at),
            resolved_at: parse_optional_timestamp(row.resolved_at),
        })
    }
}
