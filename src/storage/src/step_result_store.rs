//! Narrow single-step queries that don't require loading a whole [`Job`].
//!
//! [`crate::JobStore::save`] already persists every step result as part of a
//! job's history; this store exists for callers (chiefly the executor) that
//! need to look up or patch one step result without reading and rewriting
//! the entire job.

use crate::models::StepResultRow;
use crate::schema::step_results;
use crate::{Database, StorageError};
use diesel::prelude::*;
use flowline_core::{Id, StepResult};

/// Point queries over the `step_results` table.
pub struct StepResultStore<'a> {
    conn: &'a Database,
}

impl<'a> StepResultStore<'a> {
    /// Build a store over a checked-out connection.
    #[must_use]
    pub fn new(conn: &'a Database) -> Self {
        Self { conn }
    }

    /// Fetch a single step result by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn get(&self, id: &Id) -> Result<Option<StepResult>, StorageError> {
        let row = step_results::table
            .find(id.as_str())
            .first::<StepResultRow>(&**self.conn)
            .optional()?;

        row.map(StepResultRow::into_step_result).transpose()
    }

    /// The most recent step result for `step_name` within a job, if the step
    /// has run at least once.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn latest_for_step(
        &self,
        job_id: &Id,
        step_name: &str,
    ) -> Result<Option<StepResult>, StorageError> {
        let row = step_results::table
            .filter(step_results::job_id.eq(job_id.as_str()))
            .filter(step_results::step_name.eq(step_name))
            .order(step_results::position.desc())
            .first::<StepResultRow>(&**self.conn)
            .optional()?;

        row.map(StepResultRow::into_step_result).transpose()
    }

    /// Every step result recorded for a job, in execution order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn list_for_job(&self, job_id: &Id) -> Result<Vec<StepResult>, StorageError> {
        let rows = step_results::table
            .filter(step_results::job_id.eq(job_id.as_str()))
            .order(step_results::position.asc())
            .load::<StepResultRow>(&**self.conn)?;

        rows.into_iter().map(StepResultRow::into_step_result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database as Db, JobStore};
    use chrono::Utc;
    use flowline_core::{Job, SourceType};

    fn memory_store() -> crate::DatabasePool {
        Db::connect(":memory:").expect("in-memory database")
    }

    #[test]
    fn test_latest_for_step_returns_most_recent_by_position() {
        let pool = memory_store();
        let conn = Db::from_pool(&pool).unwrap();
        let jobs = JobStore::new(&conn);
        let steps = StepResultStore::new(&conn);

        let mut job = Job::new("note.md ingested", SourceType::File, Utc::now());
        job.transition_to_processing("parse", Utc::now());

        let mut first = flowline_core::StepResult::new("parse", Utc::now());
        first.mark_failed("boom", None, Utc::now());
        job.history.push(first);

        let mut second = flowline_core::StepResult::new("parse", Utc::now());
        second.mark_completed(flowline_core::DataBag::new(), Utc::now());
        job.history.push(second.clone());

        jobs.save(&job).unwrap();

        let latest = steps.latest_for_step(&job.id, "parse").unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[test]
    fn test_latest_for_step_returns_none_when_never_run() {
        let pool = memory_store();
        let conn = Db::from_pool(&pool).unwrap();
        let steps = StepResultStore::new(&conn);

        assert!(steps.latest_for_step(&Id::new(), "parse").unwrap().is_none());
    }

    #[test]
    fn test_list_for_job_preserves_history_order() {
        let pool = memory_store();
        let conn = Db::from_pool(&pool).unwrap();
        let jobs = JobStore::new(&conn);
        let steps = StepResultStore::new(&conn);

        let mut job = Job::new("a", SourceType::Manual, Utc::now());
        job.history.push(flowline_core::StepResult::new("one", Utc::now()));
        job.history.push(flowline_core::StepResult::new("two", Utc::now()));
        jobs.save(&job).unwrap();

        let history = steps.list_for_job(&job.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].step_name, "one");
        assert_eq!(history[1].step_name, "two");
    }
}
