//! PostgreSQL-backed Project State Store.
//!
//! Row structs map the relational schema back onto the domain types;
//! status columns reference the seeded `*_statuses` lookup tables.
//! `save` runs in a transaction so a concurrent reader never observes a
//! project row paired with stage records from a previous transition.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use nichepress_core::project::{
    ActivityEvent, NewActivityEvent, Preferences, Project, ProjectSnapshot, StageRecord,
};
use nichepress_core::stage::Stage;
use nichepress_core::status::{ProjectStatus, StageStatus, StatusId};
use nichepress_core::store::{ProjectFilter, ProjectStore, StoreError};
use nichepress_core::types::{ProjectId, Timestamp};

/// Column list for `projects` queries.
const PROJECT_COLUMNS: &str = "\
    id, topic, preferences, status_id, current_stage, progress, \
    error_message, deployment_url, created_at, updated_at";

/// Column list for `stage_records` queries.
const STAGE_COLUMNS: &str = "\
    stage, status_id, attempts, started_at, finished_at, output, error_message";

/// Column list for `activity_events` queries.
const EVENT_COLUMNS: &str = "id, created_at, kind, stage, description";

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: ProjectId,
    topic: String,
    preferences: serde_json::Value,
    status_id: StatusId,
    current_stage: Option<String>,
    progress: i16,
    error_message: Option<String>,
    deployment_url: Option<String>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<ProjectRow> for Project {
    type Error = StoreError;

    fn try_from(row: ProjectRow) -> Result<Self, StoreError> {
        let status = ProjectStatus::from_id(row.status_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown status id {}", row.status_id)))?;
        let current_stage = match row.current_stage.as_deref() {
            Some(name) => Some(
                Stage::from_name(name)
                    .ok_or_else(|| StoreError::Backend(format!("unknown stage \"{name}\"")))?,
            ),
            None => None,
        };
        let preferences: Preferences = serde_json::from_value(row.preferences)
            .map_err(|e| StoreError::Backend(format!("corrupt preferences payload: {e}")))?;
        Ok(Project {
            id: row.id,
            topic: row.topic,
            preferences,
            status,
            current_stage,
            progress: row.progress.clamp(0, 100) as u8,
            error: row.error_message,
            deployment_url: row.deployment_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StageRow {
    stage: String,
    status_id: StatusId,
    attempts: i32,
    started_at: Option<Timestamp>,
    finished_at: Option<Timestamp>,
    output: Option<serde_json::Value>,
    error_message: Option<String>,
}

impl TryFrom<StageRow> for StageRecord {
    type Error = StoreError;

    fn try_from(row: StageRow) -> Result<Self, StoreError> {
        let stage = Stage::from_name(&row.stage)
            .ok_or_else(|| StoreError::Backend(format!("unknown stage \"{}\"", row.stage)))?;
        let status = StageStatus::from_id(row.status_id).ok_or_else(|| {
            StoreError::Backend(format!("unknown stage status id {}", row.status_id))
        })?;
        Ok(StageRecord {
            stage,
            status,
            attempts: row.attempts.max(0) as u32,
            started_at: row.started_at,
            finished_at: row.finished_at,
            output: row.output,
            error: row.error_message,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    created_at: Timestamp,
    kind: String,
    stage: Option<String>,
    description: String,
}

impl EventRow {
    fn into_event(self) -> ActivityEvent {
        ActivityEvent {
            seq: self.id,
            timestamp: self.created_at,
            kind: self.kind,
            // Tolerate names from removed stages rather than failing the read.
            stage: self.stage.as_deref().and_then(Stage::from_name),
            description: self.description,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`ProjectStore`] backed by PostgreSQL.
pub struct PgProjectStore {
    pool: PgPool,
}

impl PgProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend_err(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn create(&self, project: &Project) -> Result<(), StoreError> {
        let preferences = serde_json::to_value(&project.preferences)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO projects \
                 (id, topic, preferences, status_id, current_stage, progress, \
                  error_message, deployment_url, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(project.id)
        .bind(&project.topic)
        .bind(&preferences)
        .bind(project.status.id())
        .bind(project.current_stage.map(Stage::as_str))
        .bind(project.progress as i16)
        .bind(&project.error)
        .bind(&project.deployment_url)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(StoreError::DuplicateProject(project.id))
            }
            Err(err) => Err(backend_err(err)),
        }
    }

    async fn load(&self, id: ProjectId) -> Result<ProjectSnapshot, StoreError> {
        // Repeatable-read so the three selects observe one consistent state.
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1");
        let row: Option<ProjectRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_err)?;
        let project = Project::try_from(row.ok_or(StoreError::ProjectNotFound(id))?)?;

        let query = format!(
            "SELECT {STAGE_COLUMNS} FROM stage_records \
             WHERE project_id = $1 ORDER BY position"
        );
        let stage_rows: Vec<StageRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(backend_err)?;
        let stages = stage_rows
            .into_iter()
            .map(StageRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM activity_events \
             WHERE project_id = $1 ORDER BY id"
        );
        let event_rows: Vec<EventRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(backend_err)?;
        let events = event_rows.into_iter().map(EventRow::into_event).collect();

        tx.commit().await.map_err(backend_err)?;

        Ok(ProjectSnapshot {
            project,
            stages,
            events,
        })
    }

    async fn save(&self, project: &Project, stages: &[StageRecord]) -> Result<(), StoreError> {
        let preferences = serde_json::to_value(&project.preferences)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let updated = sqlx::query(
            "UPDATE projects \
             SET topic = $2, preferences = $3, status_id = $4, current_stage = $5, \
                 progress = $6, error_message = $7, deployment_url = $8, updated_at = $9 \
             WHERE id = $1",
        )
        .bind(project.id)
        .bind(&project.topic)
        .bind(&preferences)
        .bind(project.status.id())
        .bind(project.current_stage.map(Stage::as_str))
        .bind(project.progress as i16)
        .bind(&project.error)
        .bind(&project.deployment_url)
        .bind(project.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::ProjectNotFound(project.id));
        }

        for record in stages {
            sqlx::query(
                "INSERT INTO stage_records \
                     (project_id, stage, position, status_id, attempts, \
                      started_at, finished_at, output, error_message) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (project_id, stage) DO UPDATE \
                 SET status_id = EXCLUDED.status_id, attempts = EXCLUDED.attempts, \
                     started_at = EXCLUDED.started_at, finished_at = EXCLUDED.finished_at, \
                     output = EXCLUDED.output, error_message = EXCLUDED.error_message",
            )
            .bind(project.id)
            .bind(record.stage.as_str())
            .bind(record.stage.index() as i16)
            .bind(record.status.id())
            .bind(record.attempts as i32)
            .bind(record.started_at)
            .bind(record.finished_at)
            .bind(&record.output)
            .bind(&record.error)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }

        tx.commit().await.map_err(backend_err)
    }

    async fn append_event(
        &self,
        id: ProjectId,
        event: NewActivityEvent,
    ) -> Result<ActivityEvent, StoreError> {
        let query = format!(
            "INSERT INTO activity_events (project_id, kind, stage, description) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {EVENT_COLUMNS}"
        );
        let row: EventRow = sqlx::query_as(&query)
            .bind(id)
            .bind(&event.kind)
            .bind(event.stage.map(Stage::as_str))
            .bind(&event.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503") => {
                    StoreError::ProjectNotFound(id)
                }
                _ => backend_err(err),
            })?;
        Ok(row.into_event())
    }

    async fn list(&self, filter: ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let rows: Vec<ProjectRow> = match filter.status {
            Some(status) => {
                let query = format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects \
                     WHERE status_id = $1 ORDER BY created_at DESC, id DESC"
                );
                sqlx::query_as(&query)
                    .bind(status.id())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let query = format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects \
                     ORDER BY created_at DESC, id DESC"
                );
                sqlx::query_as(&query).fetch_all(&self.pool).await
            }
        }
        .map_err(backend_err)?;

        rows.into_iter().map(Project::try_from).collect()
    }
}
