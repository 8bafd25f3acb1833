//! CRUD and status queries over the `jobs` table.

use crate::models::{job_status_to_str, JobRow, NewJobRow, NewStepResultRow, StepResultRow};
use crate::schema::{jobs, step_results};
use crate::{Database, StorageError};
use diesel::prelude::*;
use flowline_core::{Id, Job, JobStatus, StepResult};

/// Persists and retrieves [`Job`]s (and, transitively, their history of
/// [`StepResult`]s).
pub struct JobStore<'a> {
    conn: &'a Database,
}

impl<'a> JobStore<'a> {
    /// Build a store over a checked-out connection.
    #[must_use]
    pub fn new(conn: &'a Database) -> Self {
        Self { conn }
    }

    /// Upsert a job and its full history, keyed by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a JSON encoding failure or a query error.
    pub fn save(&self, job: &Job) -> Result<(), StorageError> {
        let row = NewJobRow::from_job(job)?;
        diesel::replace_into(jobs::table)
            .values(&row)
            .execute(&**self.conn)?;

        for (position, result) in job.history.iter().enumerate() {
            let step_row = NewStepResultRow::from_step_result(&job.id, position, result)?;
            diesel::replace_into(step_results::table)
                .values(&step_row)
                .execute(&**self.conn)?;
        }

        Ok(())
    }

    /// Fetch a job by id, with its history loaded in execution order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn get(&self, id: &Id) -> Result<Option<Job>, StorageError> {
        let row = jobs::table
            .find(id.as_str())
            .first::<JobRow>(&**self.conn)
            .optional()?;

        match row {
            Some(row) => {
                let history = self.history_for(id)?;
                Ok(Some(row.into_job(history)?))
            }
            None => Ok(None),
        }
    }

    /// List jobs, optionally filtered by status and/or tag, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn list(
        &self,
        status: Option<JobStatus>,
        tag: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>, StorageError> {
        let mut query = jobs::table.into_boxed();

        if let Some(status) = status {
            query = query.filter(jobs::status.eq(job_status_to_str(status)));
        }
        if let Some(tag) = tag {
            // tags is a JSON array encoded as text; a quoted substring match
            // is a cheap, good-enough filter without a dedicated tags table.
            query = query.filter(jobs::tags.like(format!("%\"{}\"%", tag)));
        }

        let rows = query
            .order(jobs::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<JobRow>(&**self.conn)?;

        self.hydrate(rows)
    }

    /// The next pending jobs eligible for pickup, ordered by
    /// `(priority DESC, created_at ASC)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn list_pending_for_pickup(&self, limit: i64) -> Result<Vec<Job>, StorageError> {
        let rows = jobs::table
            .filter(jobs::status.eq(job_status_to_str(JobStatus::Pending)))
            .order((jobs::priority.desc(), jobs::created_at.asc()))
            .limit(limit)
            .load::<JobRow>(&**self.conn)?;

        self.hydrate(rows)
    }

    /// Delete a job. Its step results and artifacts cascade via the
    /// foreign key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error.
    pub fn delete(&self, id: &Id) -> Result<(), StorageError> {
        diesel::delete(jobs::table.find(id.as_str())).execute(&**self.conn)?;
        Ok(())
    }

    fn hydrate(&self, rows: Vec<JobRow>) -> Result<Vec<Job>, StorageError> {
        rows.into_iter()
            .map(|row| {
                let id = Id::from_string(row.id.clone());
                let history = self.history_for(&id)?;
                row.into_job(history)
            })
            .collect()
    }

    fn history_for(&self, job_id: &Id) -> Result<Vec<StepResult>, StorageError> {
        let rows = step_results::table
            .filter(step_results::job_id.eq(job_id.as_str()))
            .order(step_results::position.asc())
            .load::<StepResultRow>(&**self.conn)?;

        rows.into_iter().map(StepResultRow::into_step_result).collect()
    }
}
