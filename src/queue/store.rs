//! SQLite persistence for jobs, their error history, the media library and settings
//!
//! Every status change is a single guarded `UPDATE ... WHERE status IN (...)`
//! executed under the connection mutex, so two workers can never move the same
//! job at once.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, SubforgeError};
use crate::scanner::{self, MediaFile, MediaFilter, SubtitleInfo, VideoEntry};
use super::{EnqueueOutcome, Job, JobError, JobStatus, QueueCounts};

const JOB_COLUMNS: &str =
    "id, file_path, status, progress, message, error_message, attempts, pause_requested, created_at, updated_at";
const IN_FLIGHT: &str = "('transcribing', 'translating')";
const QUEUE_PAUSED_KEY: &str = "queue_paused";
const CONFIG_KEY: &str = "config";
const MEDIA_COLUMNS: &str = "file_path, relative_path, file_name, size, subtitles, has_translated, scanned_at";

/// Handle to the queue database; clones share the connection
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create or open the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| SubforgeError::Config(format!("Failed to open database {}: {}", path.display(), e)))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                error_message TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                pause_requested INTEGER NOT NULL DEFAULT 0,
                queue_seq INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status_seq ON jobs(status, queue_seq);

            -- Append-only; survives retries
            CREATE TABLE IF NOT EXISTS job_errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                attempt INTEGER NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_job_errors_job ON job_errors(job_id);

            CREATE TABLE IF NOT EXISTS media_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL UNIQUE,
                relative_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                size INTEGER NOT NULL,
                subtitles TEXT NOT NULL,
                has_subtitle INTEGER NOT NULL,
                has_translated INTEGER NOT NULL,
                scanned_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_media_relative ON media_files(relative_path);

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Database migrations complete");
        Ok(())
    }

    // ==================== Submission ====================

    /// Queue one job per path. Paths that already have a job are skipped.
    pub fn enqueue_batch<P: AsRef<Path>>(&self, paths: &[P]) -> Result<EnqueueOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut outcome = EnqueueOutcome::default();

        for path in paths {
            let path = path.as_ref();
            let inserted = tx.execute(
                r#"
                INSERT OR IGNORE INTO jobs (file_path, status, progress, message, queue_seq, created_at, updated_at)
                VALUES (?1, 'queued', 0, 'Waiting', (SELECT COALESCE(MAX(queue_seq), 0) + 1 FROM jobs), ?2, ?2)
                "#,
                params![path.to_string_lossy(), now],
            )?;

            if inserted == 0 {
                outcome.skipped.push(path.to_path_buf());
            } else {
                outcome.queued.push(tx.last_insert_rowid());
            }
        }

        tx.commit()?;
        info!(
            "Enqueued {} jobs ({} already present)",
            outcome.queued.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    // ==================== Worker transitions ====================

    /// Take the oldest queued job and mark it `transcribing`. Nothing is claimed
    /// while the queue is paused.
    pub fn claim_next(&self) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        if read_setting(&conn, QUEUE_PAUSED_KEY)?.as_deref() == Some("1") {
            return Ok(None);
        }

        let next: Option<i64> = conn
            .query_row(
                "SELECT id FROM jobs WHERE status = 'queued' ORDER BY queue_seq LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = next else {
            return Ok(None);
        };

        let claimed = conn.execute(
            r#"
            UPDATE jobs SET status = 'transcribing', progress = 0, attempts = attempts + 1,
                message = 'Starting', error_message = NULL, pause_requested = 0, updated_at = ?2
            WHERE id = ?1 AND status = 'queued'
            "#,
            params![id, Utc::now()],
        )?;
        if claimed == 0 {
            return Ok(None);
        }

        fetch_job(&conn, id).map(Some)
    }

    /// Move an in-flight job to another in-flight stage
    pub fn set_stage(&self, id: i64, stage: JobStatus, progress: u8, message: &str) -> Result<()> {
        if !stage.is_in_flight() {
            return Err(SubforgeError::Config(format!("{} is not a processing stage", stage)));
        }
        let conn = self.conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE jobs SET status = ?2, progress = ?3, message = ?4, updated_at = ?5 \
                 WHERE id = ?1 AND status IN {IN_FLIGHT}"
            ),
            params![id, stage.as_str(), progress.min(100), message, Utc::now()],
        )?;
        ensure_updated(&conn, updated, id, stage)
    }

    pub fn update_progress(&self, id: i64, progress: u8, message: &str) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE jobs SET progress = ?2, message = ?3, updated_at = ?4 \
                 WHERE id = ?1 AND status IN {IN_FLIGHT}"
            ),
            params![id, progress.min(100), message, Utc::now()],
        )?;
        if updated == 0 {
            let current = current_status(&conn, id)?.ok_or(SubforgeError::JobNotFound(id))?;
            return Err(SubforgeError::InvalidTransition { id, from: current, to: current });
        }
        Ok(())
    }

    pub fn complete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE jobs SET status = 'done', progress = 100, message = 'Completed', \
                 pause_requested = 0, updated_at = ?2 WHERE id = ?1 AND status IN {IN_FLIGHT}"
            ),
            params![id, Utc::now()],
        )?;
        ensure_updated(&conn, updated, id, JobStatus::Done)
    }

    /// Mark an in-flight job failed and append the message to its history
    pub fn record_failure(&self, id: i64, message: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();

        let updated = tx.execute(
            &format!(
                "UPDATE jobs SET status = 'failed', error_message = ?2, message = 'Failed', \
                 pause_requested = 0, updated_at = ?3 WHERE id = ?1 AND status IN {IN_FLIGHT}"
            ),
            params![id, message, now],
        )?;
        ensure_updated(&tx, updated, id, JobStatus::Failed)?;

        tx.execute(
            r#"
            INSERT INTO job_errors (job_id, attempt, message, created_at)
            SELECT id, attempts, ?2, ?3 FROM jobs WHERE id = ?1
            "#,
            params![id, message, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// An in-flight job stopped at a checkpoint. It parks as `paused` while the
    /// request still stands; a request withdrawn in the meantime sends it back
    /// to the queue instead. Returns the status the job ends up in.
    pub fn mark_paused(&self, id: i64) -> Result<JobStatus> {
        let conn = self.conn.lock();
        let now = Utc::now();

        let paused = conn.execute(
            &format!(
                "UPDATE jobs SET status = 'paused', message = 'Paused', pause_requested = 0, \
                 updated_at = ?2 WHERE id = ?1 AND pause_requested = 1 AND status IN {IN_FLIGHT}"
            ),
            params![id, now],
        )?;
        if paused == 1 {
            return Ok(JobStatus::Paused);
        }

        let requeued = conn.execute(
            &format!(
                "UPDATE jobs SET status = 'queued', progress = 0, message = 'Waiting', \
                 updated_at = ?2 WHERE id = ?1 AND status IN {IN_FLIGHT}"
            ),
            params![id, now],
        )?;
        ensure_updated(&conn, requeued, id, JobStatus::Queued)?;
        Ok(JobStatus::Queued)
    }

    /// Whether the job was asked to stop at its next checkpoint
    pub fn pause_requested(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT pause_requested FROM jobs WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(SubforgeError::JobNotFound(id))
    }

    /// Jobs left in flight by a crash go back to the queue, or to `paused`
    /// when a pause had been requested.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let recovered = conn.execute(
            &format!(
                "UPDATE jobs SET status = CASE WHEN pause_requested = 1 THEN 'paused' ELSE 'queued' END, \
                 progress = 0, message = 'Recovered after restart', pause_requested = 0, updated_at = ?1 \
                 WHERE status IN {IN_FLIGHT}"
            ),
            params![Utc::now()],
        )?;
        if recovered > 0 {
            info!("Recovered {} interrupted jobs", recovered);
        }
        Ok(recovered)
    }

    // ==================== Control operations ====================

    /// Stop new job starts and park every queued job. In-flight jobs run on.
    pub fn pause_all(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        write_setting(&tx, QUEUE_PAUSED_KEY, "1", now)?;
        let paused = tx.execute(
            "UPDATE jobs SET status = 'paused', message = 'Paused', updated_at = ?1 WHERE status = 'queued'",
            params![now],
        )?;
        tx.commit()?;

        info!("Queue paused ({} jobs parked)", paused);
        Ok(paused)
    }

    /// Lift the queue pause and put paused jobs back at the end of the queue
    pub fn resume_all(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        write_setting(&tx, QUEUE_PAUSED_KEY, "0", now)?;

        // Offsetting by the current maximum keeps their relative order
        let max_seq = max_queue_seq(&tx)?;
        let resumed = tx.execute(
            "UPDATE jobs SET status = 'queued', message = 'Waiting', pause_requested = 0, \
             queue_seq = ?1 + queue_seq, updated_at = ?2 WHERE status = 'paused'",
            params![max_seq, now],
        )?;
        tx.commit()?;

        info!("Queue resumed ({} jobs re-queued)", resumed);
        Ok(resumed)
    }

    pub fn is_paused(&self) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(read_setting(&conn, QUEUE_PAUSED_KEY)?.as_deref() == Some("1"))
    }

    /// Pause one job. A queued job is parked at once; an in-flight job is asked
    /// to stop after its current step. Returns the job's status afterwards.
    pub fn pause_job(&self, id: i64) -> Result<JobStatus> {
        let conn = self.conn.lock();
        let now = Utc::now();

        let parked = conn.execute(
            "UPDATE jobs SET status = 'paused', message = 'Paused', updated_at = ?2 \
             WHERE id = ?1 AND status = 'queued'",
            params![id, now],
        )?;
        if parked == 1 {
            return Ok(JobStatus::Paused);
        }

        let requested = conn.execute(
            &format!(
                "UPDATE jobs SET pause_requested = 1, message = 'Pausing', updated_at = ?2 \
                 WHERE id = ?1 AND status IN {IN_FLIGHT}"
            ),
            params![id, now],
        )?;
        if requested == 1 {
            return current_status(&conn, id)?.ok_or(SubforgeError::JobNotFound(id));
        }

        Err(transition_error(&conn, id, JobStatus::Paused))
    }

    /// Re-queue a paused job at the back, or withdraw a pending pause request
    pub fn resume_job(&self, id: i64) -> Result<JobStatus> {
        let conn = self.conn.lock();
        let now = Utc::now();

        let withdrawn = conn.execute(
            &format!(
                "UPDATE jobs SET pause_requested = 0, message = 'Resumed', updated_at = ?2 \
                 WHERE id = ?1 AND pause_requested = 1 AND status IN {IN_FLIGHT}"
            ),
            params![id, now],
        )?;
        if withdrawn == 1 {
            return current_status(&conn, id)?.ok_or(SubforgeError::JobNotFound(id));
        }

        let max_seq = max_queue_seq(&conn)?;
        let resumed = conn.execute(
            "UPDATE jobs SET status = 'queued', message = 'Waiting', queue_seq = ?2, updated_at = ?3 \
             WHERE id = ?1 AND status = 'paused'",
            params![id, max_seq + 1, now],
        )?;
        ensure_updated(&conn, resumed, id, JobStatus::Queued)?;
        Ok(JobStatus::Queued)
    }

    /// Send a failed job back to the end of the queue. Its error history is kept.
    pub fn retry(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        let max_seq = max_queue_seq(&conn)?;
        let updated = conn.execute(
            "UPDATE jobs SET status = 'queued', progress = 0, error_message = NULL, \
             message = 'Queued for retry', pause_requested = 0, queue_seq = ?2, updated_at = ?3 \
             WHERE id = ?1 AND status = 'failed'",
            params![id, max_seq + 1, Utc::now()],
        )?;
        ensure_updated(&conn, updated, id, JobStatus::Queued)?;
        info!("Job {} queued for retry", id);
        Ok(())
    }

    /// Remove a job and its history. In-flight jobs are refused.
    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        match current_status(&conn, id)? {
            None => Err(SubforgeError::JobNotFound(id)),
            Some(status) if status.is_in_flight() => Err(SubforgeError::JobBusy(id)),
            Some(_) => {
                conn.execute(
                    &format!("DELETE FROM jobs WHERE id = ?1 AND status NOT IN {IN_FLIGHT}"),
                    params![id],
                )?;
                Ok(())
            }
        }
    }

    /// Remove done and failed jobs
    pub fn clear_finished(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM jobs WHERE status IN ('done', 'failed')", [])?;
        info!("Cleared {} finished jobs", removed);
        Ok(removed)
    }

    // ==================== Queries ====================

    pub fn get(&self, id: i64) -> Result<Job> {
        let conn = self.conn.lock();
        fetch_job(&conn, id)
    }

    pub fn find_by_path<P: AsRef<Path>>(&self, path: P) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE file_path = ?1"),
                params![path.as_ref().to_string_lossy()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Jobs in queue order, optionally filtered by status
    pub fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE ?1 IS NULL OR status = ?1 ORDER BY queue_seq"
        ))?;
        let jobs = stmt
            .query_map(params![status.map(|s| s.as_str())], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            counts.add(status.parse()?, count as usize);
        }
        Ok(counts)
    }

    pub fn error_history(&self, id: i64) -> Result<Vec<JobError>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, attempt, message, created_at FROM job_errors WHERE job_id = ?1 ORDER BY id",
        )?;
        let errors = stmt
            .query_map(params![id], |row| {
                Ok(JobError {
                    job_id: row.get(0)?,
                    attempt: row.get(1)?,
                    message: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(errors)
    }

    // ==================== Media library ====================

    /// Record scanned videos, replacing what an earlier scan stored for them
    pub fn upsert_media_files(&self, videos: &[VideoEntry], target_language: &str) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();

        for video in videos {
            tx.execute(
                r#"
                INSERT INTO media_files (file_path, relative_path, file_name, size, subtitles,
                    has_subtitle, has_translated, scanned_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(file_path) DO UPDATE SET
                    relative_path = excluded.relative_path, file_name = excluded.file_name,
                    size = excluded.size, subtitles = excluded.subtitles,
                    has_subtitle = excluded.has_subtitle, has_translated = excluded.has_translated,
                    scanned_at = excluded.scanned_at
                "#,
                params![
                    video.path.to_string_lossy(),
                    video.relative_path.to_string_lossy(),
                    video.file_name,
                    video.size as i64,
                    serde_json::to_string(&video.subtitles)?,
                    video.has_subtitle(),
                    video.has_language(target_language),
                    now
                ],
            )?;
        }

        tx.commit()?;
        debug!("Stored {} media files", videos.len());
        Ok(videos.len())
    }

    /// Replace the subtitles recorded for one video. False when the video was
    /// never scanned.
    pub fn refresh_media_subtitles(
        &self,
        path: &Path,
        subtitles: &[SubtitleInfo],
        target_language: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE media_files SET subtitles = ?2, has_subtitle = ?3, has_translated = ?4, scanned_at = ?5 \
             WHERE file_path = ?1",
            params![
                path.to_string_lossy(),
                serde_json::to_string(subtitles)?,
                !subtitles.is_empty(),
                scanner::has_language(subtitles, target_language),
                Utc::now()
            ],
        )?;
        Ok(updated == 1)
    }

    /// Media library entries ordered by relative path
    pub fn list_media(&self, filter: &MediaFilter) -> Result<Vec<MediaFile>> {
        let directory = filter
            .directory
            .as_ref()
            .map(|d| d.to_string_lossy().trim_matches('/').to_string())
            .filter(|d| !d.is_empty());

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media_files \
             WHERE (?1 IS NULL OR substr(relative_path, 1, length(?1) + 1) = ?1 || '/') \
               AND (?2 IS NULL OR has_subtitle = ?2) \
               AND (?3 IS NULL OR has_translated = ?3) \
             ORDER BY relative_path"
        ))?;
        let files = stmt
            .query_map(
                params![directory, filter.has_subtitle, filter.has_translated],
                row_to_media_file,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    // ==================== Settings ====================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        read_setting(&conn, key)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        write_setting(&conn, key, value, Utc::now())
    }

    /// Persist the active configuration. Returns false when it was unchanged.
    pub fn save_config(&self, config: &Config) -> Result<bool> {
        let serialized = config.to_toml()?;
        let conn = self.conn.lock();
        if read_setting(&conn, CONFIG_KEY)?.as_deref() == Some(serialized.as_str()) {
            debug!("Stored configuration unchanged");
            return Ok(false);
        }
        write_setting(&conn, CONFIG_KEY, &serialized, Utc::now())?;
        Ok(true)
    }

    pub fn load_config(&self) -> Result<Option<Config>> {
        let stored = self.get_setting(CONFIG_KEY)?;
        stored.map(|content| Config::from_toml(&content)).transpose()
    }

    /// Configuration a worker runs with. A configuration read from a file wins
    /// and is stored; without one the stored configuration applies, then the
    /// defaults.
    pub fn effective_config(&self, from_file: Option<Config>) -> Result<Config> {
        if let Some(config) = from_file {
            if self.save_config(&config)? {
                info!("Stored configuration updated");
            }
            return Ok(config);
        }

        match self.load_config()? {
            Some(stored) => {
                info!("Using configuration stored in the database");
                Ok(stored)
            }
            None => Ok(Config::default()),
        }
    }
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let status: String = row.get(2)?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let progress: i64 = row.get(3)?;

    Ok(Job {
        id: row.get(0)?,
        file_path: row.get(1)?,
        status,
        progress: progress.clamp(0, 100) as u8,
        message: row.get(4)?,
        error_message: row.get(5)?,
        attempts: row.get(6)?,
        pause_requested: row.get(7)?,
        created_at: row.get::<_, DateTime<Utc>>(8)?,
        updated_at: row.get::<_, DateTime<Utc>>(9)?,
    })
}

fn row_to_media_file(row: &Row) -> rusqlite::Result<MediaFile> {
    let subtitles: String = row.get(4)?;
    let subtitles = serde_json::from_str::<Vec<SubtitleInfo>>(&subtitles)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let size: i64 = row.get(3)?;

    Ok(MediaFile {
        path: PathBuf::from(row.get::<_, String>(0)?),
        relative_path: PathBuf::from(row.get::<_, String>(1)?),
        file_name: row.get(2)?,
        size: size.max(0) as u64,
        subtitles,
        has_translated: row.get(5)?,
        scanned_at: row.get::<_, DateTime<Utc>>(6)?,
    })
}

fn fetch_job(conn: &Connection, id: i64) -> Result<Job> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![id],
        row_to_job,
    )
    .optional()?
    .ok_or(SubforgeError::JobNotFound(id))
}

fn current_status(conn: &Connection, id: i64) -> Result<Option<JobStatus>> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    status.map(|s| s.parse()).transpose()
}

fn transition_error(conn: &Connection, id: i64, to: JobStatus) -> SubforgeError {
    match current_status(conn, id) {
        Ok(Some(from)) => SubforgeError::InvalidTransition { id, from, to },
        Ok(None) => SubforgeError::JobNotFound(id),
        Err(e) => e,
    }
}

fn ensure_updated(conn: &Connection, updated: usize, id: i64, to: JobStatus) -> Result<()> {
    if updated == 0 {
        return Err(transition_error(conn, id, to));
    }
    Ok(())
}

fn max_queue_seq(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COALESCE(MAX(queue_seq), 0) FROM jobs", [], |row| row.get(0))?)
}

fn read_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?)
}

fn write_setting(conn: &Connection, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        params![key, value, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(paths: &[&str]) -> Store {
        let store = Store::open_in_memory().unwrap();
        store.enqueue_batch(paths).unwrap();
        store
    }

    #[test]
    fn test_enqueue_skips_known_paths() {
        let store = store_with(&["/m/a.mkv", "/m/b.mkv"]);
        let outcome = store.enqueue_batch(&["/m/b.mkv", "/m/c.mkv", "/m/c.mkv"]).unwrap();

        assert_eq!(outcome.queued.len(), 1);
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(store.counts().unwrap().queued, 3);
    }

    #[test]
    fn test_claim_follows_fifo_order() {
        let store = store_with(&["/m/a.mkv", "/m/b.mkv"]);

        let first = store.claim_next().unwrap().unwrap();
        assert_eq!(first.file_path, "/m/a.mkv");
        assert_eq!(first.status, JobStatus::Transcribing);
        assert_eq!(first.attempts, 1);

        assert_eq!(store.claim_next().unwrap().unwrap().file_path, "/m/b.mkv");
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn test_failure_is_recorded_and_retry_keeps_history() {
        let store = store_with(&["/m/a.mkv", "/m/b.mkv"]);
        let job = store.claim_next().unwrap().unwrap();
        store.record_failure(job.id, "whisper exploded").unwrap();

        let failed = store.get(job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("whisper exploded"));

        store.retry(job.id).unwrap();
        let retried = store.get(job.id).unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert_eq!(retried.progress, 0);
        assert!(retried.error_message.is_none());

        // Retried job now waits behind b
        assert_eq!(store.claim_next().unwrap().unwrap().file_path, "/m/b.mkv");
        let again = store.claim_next().unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.attempts, 2);

        let history = store.error_history(job.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attempt, 1);
    }

    #[test]
    fn test_invalid_transitions_are_refused() {
        let store = store_with(&["/m/a.mkv"]);
        let id = store.list(None).unwrap()[0].id;

        assert!(matches!(
            store.retry(id),
            Err(SubforgeError::InvalidTransition { from: JobStatus::Queued, to: JobStatus::Queued, .. })
        ));
        assert!(matches!(store.complete(id), Err(SubforgeError::InvalidTransition { .. })));
        assert!(matches!(store.retry(999), Err(SubforgeError::JobNotFound(999))));
    }

    #[test]
    fn test_pause_all_parks_queued_jobs_only() {
        let store = store_with(&["/m/a.mkv", "/m/b.mkv", "/m/c.mkv"]);
        let running = store.claim_next().unwrap().unwrap();

        assert_eq!(store.pause_all().unwrap(), 2);
        assert!(store.is_paused().unwrap());
        assert!(store.claim_next().unwrap().is_none());
        assert_eq!(store.get(running.id).unwrap().status, JobStatus::Transcribing);

        // Work already running still finishes
        store.complete(running.id).unwrap();

        store.enqueue_batch(&["/m/d.mkv"]).unwrap();
        assert_eq!(store.resume_all().unwrap(), 2);
        assert!(!store.is_paused().unwrap());

        let order: Vec<String> = std::iter::from_fn(|| store.claim_next().unwrap())
            .map(|job| job.file_path)
            .collect();
        assert_eq!(order, vec!["/m/d.mkv", "/m/b.mkv", "/m/c.mkv"]);
    }

    #[test]
    fn test_pause_single_job() {
        let store = store_with(&["/m/a.mkv", "/m/b.mkv"]);
        let running = store.claim_next().unwrap().unwrap();
        let waiting = store.list(Some(JobStatus::Queued)).unwrap()[0].id;

        assert_eq!(store.pause_job(waiting).unwrap(), JobStatus::Paused);
        assert_eq!(store.pause_job(running.id).unwrap(), JobStatus::Transcribing);
        assert!(store.pause_requested(running.id).unwrap());

        assert_eq!(store.mark_paused(running.id).unwrap(), JobStatus::Paused);
        let paused = store.get(running.id).unwrap();
        assert_eq!(paused.status, JobStatus::Paused);
        assert!(!paused.pause_requested);

        assert_eq!(store.resume_job(running.id).unwrap(), JobStatus::Queued);
        assert!(matches!(store.resume_job(running.id), Err(SubforgeError::InvalidTransition { .. })));
    }

    #[test]
    fn test_resume_job_withdraws_pending_pause() {
        let store = store_with(&["/m/a.mkv"]);
        let running = store.claim_next().unwrap().unwrap();
        store.pause_job(running.id).unwrap();

        assert_eq!(store.resume_job(running.id).unwrap(), JobStatus::Transcribing);
        assert!(!store.pause_requested(running.id).unwrap());
    }

    #[test]
    fn test_withdrawn_pause_requeues_stopped_job() {
        let store = store_with(&["/m/a.mkv", "/m/b.mkv"]);
        let running = store.claim_next().unwrap().unwrap();
        store.pause_job(running.id).unwrap();

        // The job already stopped at its checkpoint when the pause is withdrawn
        assert_eq!(store.resume_job(running.id).unwrap(), JobStatus::Transcribing);
        assert_eq!(store.mark_paused(running.id).unwrap(), JobStatus::Queued);

        let requeued = store.get(running.id).unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert!(!requeued.pause_requested);
        assert_eq!(store.claim_next().unwrap().unwrap().id, running.id);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = store_with(&["/m/a.mkv", "/m/b.mkv", "/m/c.mkv"]);
        let a = store.claim_next().unwrap().unwrap();
        let b = store.claim_next().unwrap().unwrap();
        store.record_failure(b.id, "boom").unwrap();

        assert!(matches!(store.delete(a.id), Err(SubforgeError::JobBusy(_))));
        store.complete(a.id).unwrap();

        assert_eq!(store.clear_finished().unwrap(), 2);
        assert!(store.error_history(b.id).unwrap().is_empty());

        let c = store.list(None).unwrap()[0].id;
        store.delete(c).unwrap();
        assert_eq!(store.counts().unwrap().total(), 0);
        assert!(matches!(store.delete(c), Err(SubforgeError::JobNotFound(_))));
    }

    #[test]
    fn test_recover_interrupted() {
        let store = store_with(&["/m/a.mkv", "/m/b.mkv", "/m/c.mkv"]);
        let a = store.claim_next().unwrap().unwrap();
        let b = store.claim_next().unwrap().unwrap();
        store.set_stage(b.id, JobStatus::Translating, 60, "Translating").unwrap();
        store.pause_job(b.id).unwrap();

        assert_eq!(store.recover_interrupted().unwrap(), 2);
        assert_eq!(store.get(a.id).unwrap().status, JobStatus::Queued);
        assert_eq!(store.get(b.id).unwrap().status, JobStatus::Paused);
        assert_eq!(store.counts().unwrap().in_flight(), 0);
    }

    #[test]
    fn test_progress_only_for_running_jobs() {
        let store = store_with(&["/m/a.mkv"]);
        let job = store.claim_next().unwrap().unwrap();
        store.update_progress(job.id, 50, "Transcribed").unwrap();
        assert_eq!(store.get(job.id).unwrap().progress, 50);

        store.complete(job.id).unwrap();
        assert!(store.update_progress(job.id, 10, "late").is_err());
        assert_eq!(store.get(job.id).unwrap().progress, 100);
    }

    #[test]
    fn test_config_round_trip_skips_unchanged_writes() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_config().unwrap().is_none());

        let mut config = Config::default();
        assert!(store.save_config(&config).unwrap());
        assert!(!store.save_config(&config).unwrap());

        config.translate.target_language = "ja".to_string();
        assert!(store.save_config(&config).unwrap());
        assert_eq!(store.load_config().unwrap().unwrap(), config);
    }

    #[test]
    fn test_stored_config_applies_without_a_file() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.effective_config(None).unwrap(), Config::default());

        let mut from_file = Config::default();
        from_file.translate.enabled = true;
        from_file.translate.target_language = "ko".to_string();
        assert_eq!(store.effective_config(Some(from_file.clone())).unwrap(), from_file);

        // A later start without a file picks up what was stored
        let restarted = store.effective_config(None).unwrap();
        assert_eq!(restarted.translate.target_language, "ko");
        assert!(restarted.translate.enabled);
    }

    fn video(relative: &str, languages: &[&str]) -> VideoEntry {
        let path = PathBuf::from("/media").join(relative);
        let subtitles = languages
            .iter()
            .map(|lang| SubtitleInfo {
                path: path.with_extension(format!("{}.srt", lang)),
                language: lang.to_string(),
                is_default: false,
            })
            .collect();
        VideoEntry {
            file_name: path.file_name().unwrap().to_string_lossy().to_string(),
            relative_path: PathBuf::from(relative),
            path,
            size: 1024,
            subtitles,
        }
    }

    #[test]
    fn test_media_library_filters() {
        let store = Store::open_in_memory().unwrap();
        let videos = vec![
            video("Movies/A.mkv", &["en", "chs"]),
            video("Movies/B.mkv", &["en"]),
            video("Movies2/C.mkv", &[]),
            video("TV/D.mkv", &[]),
        ];
        assert_eq!(store.upsert_media_files(&videos, "zh").unwrap(), 4);
        // Rescanning replaces rows instead of duplicating them
        store.upsert_media_files(&videos[..1], "zh").unwrap();

        let all = store.list_media(&MediaFilter::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].subtitles.len(), 2);
        assert!(all[0].has_translated);

        let in_movies = store
            .list_media(&MediaFilter {
                directory: Some(PathBuf::from("Movies/")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(in_movies.len(), 2);

        let missing = store
            .list_media(&MediaFilter {
                has_subtitle: Some(false),
                ..Default::default()
            })
            .unwrap();
        let names: Vec<_> = missing.iter().map(|m| m.file_name.as_str()).collect();
        assert_eq!(names, vec!["C.mkv", "D.mkv"]);

        let untranslated = store
            .list_media(&MediaFilter {
                has_subtitle: Some(true),
                has_translated: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(untranslated.len(), 1);
        assert_eq!(untranslated[0].file_name, "B.mkv");
    }

    #[test]
    fn test_refresh_media_subtitles() {
        let store = Store::open_in_memory().unwrap();
        let entry = video("TV/D.mkv", &[]);
        store.upsert_media_files(std::slice::from_ref(&entry), "zh").unwrap();

        let subtitles = video("TV/D.mkv", &["en", "chs"]).subtitles;
        assert!(store.refresh_media_subtitles(&entry.path, &subtitles, "zh").unwrap());
        assert!(!store.refresh_media_subtitles(Path::new("/media/unknown.mkv"), &subtitles, "zh").unwrap());

        let stored = store.list_media(&MediaFilter::default()).unwrap();
        assert!(stored[0].has_subtitle());
        assert!(stored[0].has_translated);
        assert_eq!(stored[0].subtitles, subtitles);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");

        {
            let store = Store::open(&path).unwrap();
            store.enqueue_batch(&["/m/a.mkv"]).unwrap();
            store.pause_all().unwrap();
        }

        let reopened = Store::open(&path).unwrap();
        assert!(reopened.is_paused().unwrap());
        assert_eq!(reopened.counts().unwrap().paused, 1);
    }
}
