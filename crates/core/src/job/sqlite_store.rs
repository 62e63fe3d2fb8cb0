//! SQLite-backed job store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{ConflictReason, JobError, JobStore};
use super::types::{Candidate, ContentType, EpisodeNumber, Job, JobStatus};

const JOB_COLUMNS: &str = "id, source, name_override, title, content_type, year, season, episode, \
     candidates, status, progress, task, error, file_path, created_at, updated_at, \
     attempt_count, candidate_index, version";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                name_override TEXT,
                title TEXT NOT NULL,
                content_type TEXT NOT NULL,
                year INTEGER,
                season INTEGER,
                episode INTEGER,
                candidates TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER,
                task TEXT NOT NULL,
                error TEXT,
                file_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                candidate_index INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let content_type_str: String = row.get(4)?;
        let season: Option<u32> = row.get(6)?;
        let episode: Option<u32> = row.get(7)?;
        let candidates_json: String = row.get(8)?;
        let status_str: String = row.get(9)?;
        let file_path: Option<String> = row.get(13)?;
        let created_at_str: String = row.get(14)?;
        let updated_at_str: String = row.get(15)?;
        let candidate_index: i64 = row.get(17)?;
        let version: i64 = row.get(18)?;

        let status = JobStatus::parse(&status_str).ok_or_else(|| {
            conversion_err(9, format!("unknown job status: {}", status_str))
        })?;
        let content_type = ContentType::parse(&content_type_str).ok_or_else(|| {
            conversion_err(4, format!("unknown content type: {}", content_type_str))
        })?;
        let candidates: Vec<Candidate> = serde_json::from_str(&candidates_json)
            .map_err(|e| conversion_err(8, e.to_string()))?;

        Ok(Job {
            id: row.get(0)?,
            source: row.get(1)?,
            name_override: row.get(2)?,
            title: row.get(3)?,
            content_type,
            year: row.get(5)?,
            episode: season
                .zip(episode)
                .map(|(season, episode)| EpisodeNumber { season, episode }),
            candidates,
            status,
            progress: row.get(10)?,
            task: row.get(11)?,
            error: row.get(12)?,
            file_path: file_path.map(PathBuf::from),
            created_at: parse_timestamp(&created_at_str, 14)?,
            updated_at: parse_timestamp(&updated_at_str, 15)?,
            attempt_count: row.get(16)?,
            candidate_index: candidate_index.max(0) as usize,
            version: version.max(0) as u64,
        })
    }
}

fn db_err(e: rusqlite::Error) -> JobError {
    JobError::Database(e.to_string())
}

fn conversion_err(column: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed width so that lexical order matches chronological order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(column, e.to_string()))
}

fn candidates_json(job: &Job) -> Result<String, JobError> {
    serde_json::to_string(&job.candidates).map_err(|e| JobError::Database(e.to_string()))
}

fn path_string(job: &Job) -> Option<String> {
    job.file_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &Job) -> Result<(), JobError> {
        let candidates = candidates_json(job)?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.source,
                job.name_override,
                job.title,
                job.content_type.as_str(),
                job.year,
                job.episode.map(|e| e.season),
                job.episode.map(|e| e.episode),
                candidates,
                job.status.as_str(),
                job.progress,
                job.task,
                job.error,
                path_string(job),
                format_timestamp(&job.created_at),
                format_timestamp(&job.updated_at),
                job.attempt_count,
                job.candidate_index as i64,
                job.version as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn list(&self, limit: usize) -> Result<Vec<Job>, JobError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                JOB_COLUMNS
            ))
            .map_err(db_err)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let jobs = stmt
            .query_map(params![limit], Self::row_to_job)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(jobs)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
                JOB_COLUMNS
            ))
            .map_err(db_err)?;
        let jobs = stmt
            .query_map(params![status.as_str()], Self::row_to_job)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(jobs)
    }

    fn compare_and_swap(&self, expected_version: u64, job: &Job) -> Result<(), JobError> {
        let candidates = candidates_json(job)?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE jobs SET candidates = ?1, status = ?2, progress = ?3, task = ?4, error = ?5, \
                 file_path = ?6, updated_at = ?7, attempt_count = ?8, candidate_index = ?9, version = ?10 \
                 WHERE id = ?11 AND version = ?12",
                params![
                    candidates,
                    job.status.as_str(),
                    job.progress,
                    job.task,
                    job.error,
                    path_string(job),
                    format_timestamp(&job.updated_at),
                    job.attempt_count,
                    job.candidate_index as i64,
                    job.version as i64,
                    job.id,
                    expected_version as i64,
                ],
            )
            .map_err(db_err)?;

        if changed == 1 {
            return Ok(());
        }

        let actual: Option<i64> = conn
            .query_row(
                "SELECT version FROM jobs WHERE id = ?1",
                params![job.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match actual {
            None => Err(JobError::NotFound(job.id.clone())),
            Some(actual) => Err(JobError::conflict(
                job.id.clone(),
                ConflictReason::StaleVersion {
                    expected: expected_version,
                    actual: actual.max(0) as u64,
                },
            )),
        }
    }

    fn delete(&self, id: &str, expected_version: u64) -> Result<(), JobError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM jobs WHERE id = ?1 AND version = ?2",
                params![id, expected_version as i64],
            )
            .map_err(db_err)?;

        if changed == 1 {
            return Ok(());
        }

        let actual: Option<i64> = conn
            .query_row(
                "SELECT version FROM jobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match actual {
            None => Err(JobError::NotFound(id.to_string())),
            Some(actual) => Err(JobError::conflict(
                id,
                ConflictReason::StaleVersion {
                    expected: expected_version,
                    actual: actual.max(0) as u64,
                },
            )),
        }
    }
}
