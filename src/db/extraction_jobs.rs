use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Row};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Database;
use crate::models::{failure_text, stale_cutoff, ExtractionJob, ExtractionSettings, JobStatus};
use crate::ocr::error::OcrError;
use crate::ocr::registry::{stale_job_message, JobRegistry, Registration};

const JOB_COLUMNS: &str = r#"
    id, document_id, status, extracted_text, confidence, page_count,
    processing_time_ms, error_message, strategy, language,
    settings_language, quality_hint, document_category, advanced_mode,
    created_at, updated_at
"#;

/// Registration attempts before giving up when an in-flight job keeps
/// finishing between the insert and the lookup.
const MAX_REGISTRATION_ATTEMPTS: usize = 3;

fn parse_column<T: std::str::FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T, OcrError> {
    row.get::<String, _>(column)
        .parse()
        .map_err(|details| OcrError::Registry { details })
}

fn row_to_job(row: &PgRow) -> Result<ExtractionJob, OcrError> {
    let strategy = match row.get::<Option<String>, _>("strategy") {
        Some(strategy) => Some(strategy.parse().map_err(|details| OcrError::Registry { details })?),
        None => None,
    };

    Ok(ExtractionJob {
        id: row.get("id"),
        document_id: row.get("document_id"),
        status: parse_column(row, "status")?,
        extracted_text: row.get("extracted_text"),
        confidence: row.get::<f32, _>("confidence"),
        page_count: row.get::<i32, _>("page_count").max(1) as u32,
        processing_time_ms: row.get::<i64, _>("processing_time_ms").max(0) as u64,
        error_message: row.get("error_message"),
        strategy,
        language: row.get("language"),
        settings: ExtractionSettings {
            language: row.get("settings_language"),
            quality_hint: parse_column(row, "quality_hint")?,
            document_category: parse_column(row, "document_category")?,
            advanced_mode: row.get("advanced_mode"),
        },
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

impl Database {
    async fn find_in_flight_job(&self, document_id: Uuid) -> Result<Option<ExtractionJob>, OcrError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM extraction_jobs
            WHERE document_id = $1 AND status IN ('pending', 'processing')
            LIMIT 1
            "#,
            JOB_COLUMNS
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn current_job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>, OcrError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM extraction_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        status
            .map(|s| s.parse().map_err(|details| OcrError::Registry { details }))
            .transpose()
    }
}

#[async_trait]
impl JobRegistry for Database {
    async fn create_if_absent(
        &self,
        document_id: Uuid,
        settings: ExtractionSettings,
        initial_status: JobStatus,
    ) -> Result<Registration, OcrError> {
        for attempt in 0..MAX_REGISTRATION_ATTEMPTS {
            let job = ExtractionJob::new(document_id, settings.clone(), initial_status);

            // The partial unique index makes this a no-op while a job is in flight
            let inserted = sqlx::query(&format!(
                r#"
                INSERT INTO extraction_jobs (
                    id, document_id, status, extracted_text, confidence, page_count,
                    processing_time_ms, settings_language, quality_hint,
                    document_category, advanced_mode, created_at, updated_at
                )
                VALUES ($1, $2, $3, '', 0, 1, 0, $4, $5, $6, $7, $8, $8)
                ON CONFLICT (document_id) WHERE status IN ('pending', 'processing') DO NOTHING
                RETURNING {}
                "#,
                JOB_COLUMNS
            ))
            .bind(job.id)
            .bind(document_id)
            .bind(initial_status.as_str())
            .bind(&settings.language)
            .bind(settings.quality_hint.as_str())
            .bind(settings.document_category.as_str())
            .bind(settings.advanced_mode)
            .bind(job.created_at)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = inserted {
                let job = row_to_job(&row)?;
                info!("Created extraction job {} for document {}", job.id, document_id);
                return Ok(Registration::Created(job));
            }

            if let Some(existing) = self.find_in_flight_job(document_id).await? {
                debug!(
                    "Document {} already has in-flight job {} ({})",
                    document_id, existing.id, existing.status
                );
                return Ok(Registration::Existing(existing));
            }

            warn!(
                "In-flight job for document {} finished during registration, retrying (attempt {})",
                document_id,
                attempt + 1
            );
        }

        Err(OcrError::Registry {
            details: format!(
                "could not register a job for document {} after {} attempts",
                document_id, MAX_REGISTRATION_ATTEMPTS
            ),
        })
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<ExtractionJob>, OcrError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM extraction_jobs
            WHERE document_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            JOB_COLUMNS
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn save(&self, job: &ExtractionJob) -> Result<(), OcrError> {
        let allowed_from: Vec<String> = std::iter::once(job.status)
            .chain(job.status.predecessors().iter().copied())
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = $2,
                extracted_text = $3,
                confidence = $4,
                page_count = $5,
                processing_time_ms = $6,
                error_message = $7,
                strategy = $8,
                language = $9,
                updated_at = $10
            WHERE id = $1 AND status = ANY($11)
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.extracted_text)
        .bind(job.confidence)
        .bind(job.page_count as i32)
        .bind(job.processing_time_ms as i64)
        .bind(&job.error_message)
        .bind(job.strategy.map(|s| s.as_str()))
        .bind(&job.language)
        .bind(job.updated_at)
        .bind(allowed_from)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.current_job_status(job.id).await? {
            Some(from) => Err(OcrError::InvalidTransition {
                job_id: job.id,
                from,
                to: job.status,
            }),
            None => Err(OcrError::JobNotFound {
                document_id: job.document_id,
            }),
        }
    }

    async fn history(&self, document_id: Uuid) -> Result<Vec<ExtractionJob>, OcrError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM extraction_jobs
            WHERE document_id = $1
            ORDER BY created_at DESC
            "#,
            JOB_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    async fn recover_stale_jobs(&self, stale_after: Duration) -> Result<u64, OcrError> {
        let message = stale_job_message(stale_after);
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'errored',
                extracted_text = $2,
                confidence = 0,
                error_message = $3,
                strategy = NULL,
                language = NULL,
                updated_at = NOW()
            WHERE status IN ('pending', 'processing')
              AND updated_at < $1
            "#,
        )
        .bind(stale_cutoff(stale_after))
        .bind(failure_text(&message))
        .bind(&message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            warn!("Recovered {} stale extraction jobs", result.rows_affected());
        }

        Ok(result.rows_affected())
    }
}
