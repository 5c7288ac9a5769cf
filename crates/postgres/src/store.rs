//! Postgres implementation of the engine store traits.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError | Scenario |
//! |------------|-----------------|------------|----------|
//! | Database (unique violation) | `23505` | `AlreadyExists` | Duplicate job insert |
//! | `UPDATE ... WHERE revision = $n` hit 0 rows, job present | — | `Concurrency` | Stale revision |
//! | `UPDATE`/`DELETE` hit 0 rows, row absent | — | `JobNotFound` / `IncidentNotFound` | Row gone |
//! | anything else | — | `Storage` | Connectivity, timeouts, pool exhaustion |
//!
//! ## Thread Safety
//!
//! The adapter is `Send + Sync`; every call blocks on an internal runtime,
//! so acquisition and worker threads can use it directly without a tokio
//! context of their own.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Row};
use tracing::debug;
use uuid::Uuid;

use flowforge_core::{
    ExecutionId, IncidentId, JobId, ProcessDefinitionId, ProcessInstanceId, TenantId,
};
use flowforge_engine::{
    ExecutionHierarchy, ExecutionRef, Incident, IncidentStore, IncidentType, Job, JobStore,
    StoreError,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS flowforge_jobs (
        id UUID PRIMARY KEY,
        job_type TEXT NOT NULL,
        payload JSONB NOT NULL,
        due_date TIMESTAMPTZ,
        priority BIGINT NOT NULL,
        lock_owner TEXT,
        lock_expiration_time TIMESTAMPTZ,
        retries BIGINT NOT NULL,
        exception_message TEXT,
        exception_stack_trace TEXT,
        execution_id UUID,
        process_instance_id UUID,
        process_definition_id UUID,
        tenant_id UUID,
        is_exclusive BOOLEAN NOT NULL,
        suspended BOOLEAN NOT NULL,
        repeat_interval_ms BIGINT,
        created_at TIMESTAMPTZ NOT NULL,
        revision BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_flowforge_jobs_acquirable
        ON flowforge_jobs (priority DESC, due_date ASC NULLS FIRST)
        WHERE suspended = FALSE AND retries > 0
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_flowforge_jobs_instance
        ON flowforge_jobs (process_instance_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS flowforge_incidents (
        id UUID PRIMARY KEY,
        incident_type TEXT NOT NULL,
        configuration UUID,
        message TEXT,
        execution_id UUID,
        activity_id TEXT,
        process_instance_id UUID,
        process_definition_id UUID,
        tenant_id UUID,
        cause_incident_id UUID,
        root_cause_incident_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_flowforge_incidents_execution
        ON flowforge_incidents (execution_id, incident_type)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_flowforge_incidents_configuration
        ON flowforge_incidents (configuration)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS flowforge_executions (
        id UUID PRIMARY KEY,
        process_instance_id UUID NOT NULL,
        process_definition_id UUID,
        activity_id TEXT,
        super_execution_id UUID,
        tenant_id UUID
    )
    "#,
];

/// Postgres-backed job/incident/execution store.
pub struct PostgresEngineStore {
    pool: PgPool,
    runtime: tokio::runtime::Runtime,
}

impl PostgresEngineStore {
    /// Connect and build the internal runtime.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("flowforge-postgres")
            .enable_all()
            .build()
            .map_err(|e| StoreError::Storage(format!("runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect(database_url),
            )
            .map_err(|e| StoreError::Storage(format!("connect: {e}")))?;

        Ok(Self { pool, runtime })
    }

    /// Create the tables and indexes if they do not exist.
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.block_on(async {
            for statement in SCHEMA {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("migrate", &e))?;
            }
            Ok(())
        })?;
        debug!("flowforge schema ensured");
        Ok(())
    }

    /// Seed an execution row (the engine owns these in the full platform).
    pub fn insert_execution(&self, execution: &ExecutionRef) -> Result<(), StoreError> {
        self.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO flowforge_executions
                    (id, process_instance_id, process_definition_id, activity_id,
                     super_execution_id, tenant_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE SET
                    activity_id = EXCLUDED.activity_id,
                    super_execution_id = EXCLUDED.super_execution_id
                "#,
            )
            .bind(*execution.id.as_uuid())
            .bind(*execution.process_instance_id.as_uuid())
            .bind(execution.process_definition_id.map(|id| *id.as_uuid()))
            .bind(execution.activity_id.clone())
            .bind(execution.super_execution_id.map(|id| *id.as_uuid()))
            .bind(execution.tenant_id.map(|id| *id.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_execution", &e))?;
            Ok(())
        })
    }

    fn block_on<F, T>(&self, future: F) -> T
    where
        F: Future<Output = T>,
    {
        self.runtime.block_on(future)
    }
}

impl JobStore for PostgresEngineStore {
    fn insert(&self, job: Job) -> Result<JobId, StoreError> {
        self.block_on(async {
            let result = sqlx::query(
                r#"
                INSERT INTO flowforge_jobs
                    (id, job_type, payload, due_date, priority, lock_owner,
                     lock_expiration_time, retries, exception_message,
                     exception_stack_trace, execution_id, process_instance_id,
                     process_definition_id, tenant_id, is_exclusive, suspended,
                     repeat_interval_ms, created_at, revision)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                        $11, $12, $13, $14, $15, $16, $17, $18, $19)
                "#,
            )
            .bind(*job.id.as_uuid())
            .bind(&job.job_type)
            .bind(&job.payload)
            .bind(job.due_date)
            .bind(job.priority)
            .bind(&job.lock_owner)
            .bind(job.lock_expiration_time)
            .bind(job.retries as i64)
            .bind(&job.exception_message)
            .bind(&job.exception_stack_trace)
            .bind(job.execution_id.map(|id| *id.as_uuid()))
            .bind(job.process_instance_id.map(|id| *id.as_uuid()))
            .bind(job.process_definition_id.map(|id| *id.as_uuid()))
            .bind(job.tenant_id.map(|id| *id.as_uuid()))
            .bind(job.exclusive)
            .bind(job.suspended)
            .bind(job.repeat_interval.map(|d| d.as_millis() as i64))
            .bind(job.created_at)
            .bind(job.revision as i64)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(job.id),
                Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists(job.id)),
                Err(e) => Err(map_sqlx_error("insert_job", &e)),
            }
        })
    }

    fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.block_on(async {
            let row = sqlx::query("SELECT * FROM flowforge_jobs WHERE id = $1")
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_job", &e))?;
            row.map(|r| job_from_row(&r)).transpose()
        })
    }

    fn update(&self, job: &Job) -> Result<Job, StoreError> {
        self.block_on(async {
            let result = sqlx::query(
                r#"
                UPDATE flowforge_jobs SET
                    due_date = $1, priority = $2, lock_owner = $3,
                    lock_expiration_time = $4, retries = $5,
                    exception_message = $6, exception_stack_trace = $7,
                    suspended = $8, repeat_interval_ms = $9,
                    revision = revision + 1
                WHERE id = $10 AND revision = $11
                "#,
            )
            .bind(job.due_date)
            .bind(job.priority)
            .bind(&job.lock_owner)
            .bind(job.lock_expiration_time)
            .bind(job.retries as i64)
            .bind(&job.exception_message)
            .bind(&job.exception_stack_trace)
            .bind(job.suspended)
            .bind(job.repeat_interval.map(|d| d.as_millis() as i64))
            .bind(*job.id.as_uuid())
            .bind(job.revision as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_job", &e))?;

            if result.rows_affected() == 1 {
                let mut updated = job.clone();
                updated.revision += 1;
                return Ok(updated);
            }

            // zero rows: stale revision or vanished job
            let exists = sqlx::query("SELECT 1 FROM flowforge_jobs WHERE id = $1")
                .bind(*job.id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("update_job", &e))?;
            match exists {
                Some(_) => Err(StoreError::Concurrency(format!(
                    "job {}: revision {} is stale",
                    job.id, job.revision
                ))),
                None => Err(StoreError::JobNotFound(job.id)),
            }
        })
    }

    fn delete(&self, id: JobId) -> Result<(), StoreError> {
        self.block_on(async {
            let result = sqlx::query("DELETE FROM flowforge_jobs WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_job", &e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::JobNotFound(id));
            }
            Ok(())
        })
    }

    fn find_due_lockable(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT * FROM flowforge_jobs
                WHERE suspended = FALSE
                  AND retries > 0
                  AND (due_date IS NULL OR due_date <= $1)
                  AND (lock_owner IS NULL OR lock_expiration_time < $1)
                ORDER BY priority DESC, due_date ASC NULLS FIRST
                LIMIT $2
                "#,
            )
            .bind(now)
            .bind(max as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_due_lockable", &e))?;

            rows.iter().map(job_from_row).collect()
        })
    }

    fn try_lock(
        &self,
        id: JobId,
        owner: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.block_on(async {
            // the single conditional write that makes acquisition safe
            // across nodes
            let result = sqlx::query(
                r#"
                UPDATE flowforge_jobs
                SET lock_owner = $1, lock_expiration_time = $2
                WHERE id = $3
                  AND (lock_owner IS NULL OR lock_expiration_time < $4)
                "#,
            )
            .bind(owner)
            .bind(until)
            .bind(*id.as_uuid())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("try_lock", &e))?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn unlock(&self, id: JobId) -> Result<(), StoreError> {
        self.block_on(async {
            sqlx::query(
                "UPDATE flowforge_jobs SET lock_owner = NULL, lock_expiration_time = NULL WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("unlock", &e))?;
            Ok(())
        })
    }

    fn find_by_process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Vec<Job>, StoreError> {
        self.block_on(async {
            let rows = sqlx::query(
                "SELECT * FROM flowforge_jobs WHERE process_instance_id = $1 ORDER BY created_at",
            )
            .bind(*process_instance_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_jobs_by_instance", &e))?;

            rows.iter().map(job_from_row).collect()
        })
    }
}

impl IncidentStore for PostgresEngineStore {
    fn insert(&self, incident: Incident) -> Result<IncidentId, StoreError> {
        self.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO flowforge_incidents
                    (id, incident_type, configuration, message, execution_id,
                     activity_id, process_instance_id, process_definition_id,
                     tenant_id, cause_incident_id, root_cause_incident_id,
                     created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(*incident.id.as_uuid())
            .bind(incident.incident_type.as_str())
            .bind(incident.configuration.map(|id| *id.as_uuid()))
            .bind(&incident.message)
            .bind(incident.execution_id.map(|id| *id.as_uuid()))
            .bind(&incident.activity_id)
            .bind(incident.process_instance_id.map(|id| *id.as_uuid()))
            .bind(incident.process_definition_id.map(|id| *id.as_uuid()))
            .bind(incident.tenant_id.map(|id| *id.as_uuid()))
            .bind(incident.cause_incident_id.map(|id| *id.as_uuid()))
            .bind(*incident.root_cause_incident_id.as_uuid())
            .bind(incident.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_incident", &e))?;
            Ok(incident.id)
        })
    }

    fn find(&self, id: IncidentId) -> Result<Option<Incident>, StoreError> {
        self.block_on(async {
            let row = sqlx::query("SELECT * FROM flowforge_incidents WHERE id = $1")
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_incident", &e))?;
            row.map(|r| incident_from_row(&r)).transpose()
        })
    }

    fn delete(&self, id: IncidentId) -> Result<(), StoreError> {
        self.block_on(async {
            let result = sqlx::query("DELETE FROM flowforge_incidents WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_incident", &e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::IncidentNotFound(id));
            }
            Ok(())
        })
    }

    fn find_by_execution_and_type(
        &self,
        execution_id: ExecutionId,
        incident_type: &IncidentType,
    ) -> Result<Vec<Incident>, StoreError> {
        self.block_on(async {
            let rows = sqlx::query(
                "SELECT * FROM flowforge_incidents WHERE execution_id = $1 AND incident_type = $2",
            )
            .bind(*execution_id.as_uuid())
            .bind(incident_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_incidents_by_execution", &e))?;

            rows.iter().map(incident_from_row).collect()
        })
    }

    fn find_by_configuration(&self, job_id: JobId) -> Result<Vec<Incident>, StoreError> {
        self.block_on(async {
            let rows = sqlx::query("SELECT * FROM flowforge_incidents WHERE configuration = $1")
                .bind(*job_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_incidents_by_configuration", &e))?;

            rows.iter().map(incident_from_row).collect()
        })
    }

    fn find_by_process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Vec<Incident>, StoreError> {
        self.block_on(async {
            let rows = sqlx::query(
                "SELECT * FROM flowforge_incidents WHERE process_instance_id = $1 ORDER BY created_at",
            )
            .bind(*process_instance_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_incidents_by_instance", &e))?;

            rows.iter().map(incident_from_row).collect()
        })
    }
}

impl ExecutionHierarchy for PostgresEngineStore {
    fn find_execution(&self, id: ExecutionId) -> Result<Option<ExecutionRef>, StoreError> {
        self.block_on(async {
            let row = sqlx::query("SELECT * FROM flowforge_executions WHERE id = $1")
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_execution", &e))?;
            row.map(|r| execution_from_row(&r)).transpose()
        })
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

fn map_sqlx_error(operation: &str, e: &sqlx::Error) -> StoreError {
    StoreError::Storage(format!("{operation}: {e}"))
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    JobRow::from_row(row)
        .map(Job::from)
        .map_err(|e| StoreError::Storage(format!("failed to deserialize job row: {e}")))
}

fn incident_from_row(row: &PgRow) -> Result<Incident, StoreError> {
    IncidentRow::from_row(row)
        .map(Incident::from)
        .map_err(|e| StoreError::Storage(format!("failed to deserialize incident row: {e}")))
}

fn execution_from_row(row: &PgRow) -> Result<ExecutionRef, StoreError> {
    ExecutionRow::from_row(row)
        .map(ExecutionRef::from)
        .map_err(|e| StoreError::Storage(format!("failed to deserialize execution row: {e}")))
}

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    due_date: Option<DateTime<Utc>>,
    priority: i64,
    lock_owner: Option<String>,
    lock_expiration_time: Option<DateTime<Utc>>,
    retries: i64,
    exception_message: Option<String>,
    exception_stack_trace: Option<String>,
    execution_id: Option<Uuid>,
    process_instance_id: Option<Uuid>,
    process_definition_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
    is_exclusive: bool,
    suspended: bool,
    repeat_interval_ms: Option<i64>,
    created_at: DateTime<Utc>,
    revision: i64,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            job_type: row.try_get("job_type")?,
            payload: row.try_get("payload")?,
            due_date: row.try_get("due_date")?,
            priority: row.try_get("priority")?,
            lock_owner: row.try_get("lock_owner")?,
            lock_expiration_time: row.try_get("lock_expiration_time")?,
            retries: row.try_get("retries")?,
            exception_message: row.try_get("exception_message")?,
            exception_stack_trace: row.try_get("exception_stack_trace")?,
            execution_id: row.try_get("execution_id")?,
            process_instance_id: row.try_get("process_instance_id")?,
            process_definition_id: row.try_get("process_definition_id")?,
            tenant_id: row.try_get("tenant_id")?,
            is_exclusive: row.try_get("is_exclusive")?,
            suspended: row.try_get("suspended")?,
            repeat_interval_ms: row.try_get("repeat_interval_ms")?,
            created_at: row.try_get("created_at")?,
            revision: row.try_get("revision")?,
        })
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: JobId::from_uuid(row.id),
            job_type: row.job_type,
            payload: row.payload,
            due_date: row.due_date,
            priority: row.priority,
            lock_owner: row.lock_owner,
            lock_expiration_time: row.lock_expiration_time,
            retries: row.retries.max(0) as u32,
            exception_message: row.exception_message,
            exception_stack_trace: row.exception_stack_trace,
            execution_id: row.execution_id.map(ExecutionId::from_uuid),
            process_instance_id: row.process_instance_id.map(ProcessInstanceId::from_uuid),
            process_definition_id: row.process_definition_id.map(ProcessDefinitionId::from_uuid),
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            exclusive: row.is_exclusive,
            suspended: row.suspended,
            repeat_interval: row
                .repeat_interval_ms
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            created_at: row.created_at,
            revision: row.revision.max(0) as u64,
        }
    }
}

#[derive(Debug)]
struct IncidentRow {
    id: Uuid,
    incident_type: String,
    configuration: Option<Uuid>,
    message: Option<String>,
    execution_id: Option<Uuid>,
    activity_id: Option<String>,
    process_instance_id: Option<Uuid>,
    process_definition_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
    cause_incident_id: Option<Uuid>,
    root_cause_incident_id: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for IncidentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(IncidentRow {
            id: row.try_get("id")?,
            incident_type: row.try_get("incident_type")?,
            configuration: row.try_get("configuration")?,
            message: row.try_get("message")?,
            execution_id: row.try_get("execution_id")?,
            activity_id: row.try_get("activity_id")?,
            process_instance_id: row.try_get("process_instance_id")?,
            process_definition_id: row.try_get("process_definition_id")?,
            tenant_id: row.try_get("tenant_id")?,
            cause_incident_id: row.try_get("cause_incident_id")?,
            root_cause_incident_id: row.try_get("root_cause_incident_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<IncidentRow> for Incident {
    fn from(row: IncidentRow) -> Self {
        Incident {
            id: IncidentId::from_uuid(row.id),
            incident_type: IncidentType::from(row.incident_type.as_str()),
            configuration: row.configuration.map(JobId::from_uuid),
            message: row.message,
            execution_id: row.execution_id.map(ExecutionId::from_uuid),
            activity_id: row.activity_id,
            process_instance_id: row.process_instance_id.map(ProcessInstanceId::from_uuid),
            process_definition_id: row.process_definition_id.map(ProcessDefinitionId::from_uuid),
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            cause_incident_id: row.cause_incident_id.map(IncidentId::from_uuid),
            root_cause_incident_id: IncidentId::from_uuid(row.root_cause_incident_id),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug)]
struct ExecutionRow {
    id: Uuid,
    process_instance_id: Uuid,
    process_definition_id: Option<Uuid>,
    activity_id: Option<String>,
    super_execution_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for ExecutionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ExecutionRow {
            id: row.try_get("id")?,
            process_instance_id: row.try_get("process_instance_id")?,
            process_definition_id: row.try_get("process_definition_id")?,
            activity_id: row.try_get("activity_id")?,
            super_execution_id: row.try_get("super_execution_id")?,
            tenant_id: row.try_get("tenant_id")?,
        })
    }
}

impl From<ExecutionRow> for ExecutionRef {
    fn from(row: ExecutionRow) -> Self {
        ExecutionRef {
            id: ExecutionId::from_uuid(row.id),
            process_instance_id: ProcessInstanceId::from_uuid(row.process_instance_id),
            process_definition_id: row.process_definition_id.map(ProcessDefinitionId::from_uuid),
            activity_id: row.activity_id,
            super_execution_id: row.super_execution_id.map(ExecutionId::from_uuid),
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
        }
    }
}

// Run with a live database:
//   DATABASE_URL=postgres://localhost/flowforge_test cargo test -p flowforge-postgres -- --ignored
#[cfg(test)]
mod tests {
    use super::*;

    fn live_store() -> Option<PostgresEngineStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PostgresEngineStore::connect(&url).ok()?;
        store.migrate().ok()?;
        Some(store)
    }

    #[test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    fn job_round_trip() {
        let Some(store) = live_store() else { return };

        let job = Job::new("timer", serde_json::json!({"k": "v"}))
            .with_priority(7)
            .exclusive();
        let id = JobStore::insert(&store, job.clone()).unwrap();

        let loaded = JobStore::find(&store, id).unwrap().unwrap();
        assert_eq!(loaded.job_type, "timer");
        assert_eq!(loaded.priority, 7);
        assert!(loaded.exclusive);

        JobStore::delete(&store, id).unwrap();
        assert!(JobStore::find(&store, id).unwrap().is_none());
    }

    #[test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    fn conditional_lock_admits_one_owner() {
        let Some(store) = live_store() else { return };

        let job = Job::new("timer", serde_json::json!({}));
        let id = JobStore::insert(&store, job).unwrap();

        let until = Utc::now() + chrono::Duration::minutes(5);
        assert!(store.try_lock(id, "node-1", until).unwrap());
        assert!(!store.try_lock(id, "node-2", until).unwrap());

        store.unlock(id).unwrap();
        assert!(store.try_lock(id, "node-2", until).unwrap());
        JobStore::delete(&store, id).unwrap();
    }

    #[test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    fn stale_revision_update_is_rejected() {
        let Some(store) = live_store() else { return };

        let job = Job::new("timer", serde_json::json!({}));
        let id = JobStore::insert(&store, job).unwrap();

        let fresh = JobStore::find(&store, id).unwrap().unwrap();
        store.update(&fresh).unwrap();

        assert!(matches!(
            store.update(&fresh),
            Err(StoreError::Concurrency(_))
        ));
        JobStore::delete(&store, id).unwrap();
    }
}
