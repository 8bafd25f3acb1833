//! CRUD and reversal queries over the `artifacts` table.

use crate::models::{artifact_status_to_str, ArtifactRow, NewArtifactRow};
use crate::schema::artifacts;
use crate::{Database, StorageError};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use flowline_core::{Artifact, ArtifactStatus, Id, Reversibility};

/// Persists and retrieves [`Artifact`]s.
pub struct ArtifactStore<'a> {
    conn: &'a Database,
}

impl<'a> ArtifactStore<'a> {
    /// Build a store over a checked-out connection.
    #[must_use]
    pub fn new(conn: &'a Database) -> Self {
        Self { conn }
    }

    /// Upsert an artifact, keyed by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a JSON encoding failure or a query error.
    pub fn save(&self, artifact: &Artifact) -> Result<(), StorageError> {
        let row = NewArtifactRow::from_artifact(artifact)?;
        diesel::replace_into(artifacts::table)
            .values(&row)
            .execute(&**self.conn)?;
        Ok(())
    }

    /// Upsert a batch of artifacts in one call.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a JSON encoding failure or a query error.
    pub fn save_all(&self, artifacts: &[Artifact]) -> Result<(), StorageError> {
        for artifact in artifacts {
            self.save(artifact)?;
        }
        Ok(())
    }

    /// Fetch an artifact by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn get(&self, id: &Id) -> Result<Option<Artifact>, StorageError> {
        let row = artifacts::table
            .find(id.as_str())
            .first::<ArtifactRow>(&**self.conn)
            .optional()?;

        row.map(ArtifactRow::into_artifact).transpose()
    }

    /// Every artifact recorded for a job, oldest first (creation order).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn list_for_job(&self, job_id: &Id) -> Result<Vec<Artifact>, StorageError> {
        let rows = artifacts::table
            .filter(artifacts::job_id.eq(job_id.as_str()))
            .order(artifacts::created_at.asc())
            .load::<ArtifactRow>(&**self.conn)?;

        rows.into_iter().map(ArtifactRow::into_artifact).collect()
    }

    /// Every artifact recorded for a step result, in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn list_for_step_result(&self, step_result_id: &Id) -> Result<Vec<Artifact>, StorageError> {
        let rows = artifacts::table
            .filter(artifacts::step_result_id.eq(step_result_id.as_str()))
            .order(artifacts::created_at.asc())
            .load::<ArtifactRow>(&**self.conn)?;

        rows.into_iter().map(ArtifactRow::into_artifact).collect()
    }

    /// Artifacts for a job that are still reversible (`created`, not marked
    /// irreversible), newest first -- the order a revert must undo them in.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error or a corrupt row.
    pub fn list_reversible_by_job(&self, job_id: &Id) -> Result<Vec<Artifact>, StorageError> {
        let rows = artifacts::table
            .filter(artifacts::job_id.eq(job_id.as_str()))
            .filter(artifacts::status.eq(artifact_status_to_str(ArtifactStatus::Created)))
            .filter(artifacts::reversibility.ne("irreversible"))
            .order(artifacts::created_at.desc())
            .load::<ArtifactRow>(&**self.conn)?;

        rows.into_iter().map(ArtifactRow::into_artifact).collect()
    }

    /// Mark an artifact reverted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error.
    pub fn mark_reverted(&self, id: &Id, now: DateTime<Utc>) -> Result<(), StorageError> {
        diesel::update(artifacts::table.find(id.as_str()))
            .set((
                artifacts::status.eq(artifact_status_to_str(ArtifactStatus::Reverted)),
                artifacts::updated_at.eq(now.naive_utc()),
                artifacts::error_message.eq(None::<String>),
            ))
            .execute(&**self.conn)?;
        Ok(())
    }

    /// Mark an artifact orphaned: its target vanished outside our control,
    /// so the revert is a (warned) no-op success.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error.
    pub fn mark_orphaned(&self, id: &Id, now: DateTime<Utc>) -> Result<(), StorageError> {
        diesel::update(artifacts::table.find(id.as_str()))
            .set((
                artifacts::status.eq(artifact_status_to_str(ArtifactStatus::Orphaned)),
                artifacts::updated_at.eq(now.naive_utc()),
            ))
            .execute(&**self.conn)?;
        Ok(())
    }

    /// Mark an artifact's revert attempt failed, recording why.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error.
    pub fn mark_failed(
        &self,
        id: &Id,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        diesel::update(artifacts::table.find(id.as_str()))
            .set((
                artifacts::status.eq(artifact_status_to_str(ArtifactStatus::Failed)),
                artifacts::updated_at.eq(now.naive_utc()),
                artifacts::error_message.eq(Some(message.to_owned())),
            ))
            .execute(&**self.conn)?;
        Ok(())
    }

    /// Lower an artifact's reversibility, e.g. once a processor's own
    /// `revert()` hook determines a partial undo is all that's possible.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on a query error.
    pub fn set_reversibility(
        &self,
        id: &Id,
        reversibility: Reversibility,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        diesel::update(artifacts::table.find(id.as_str()))
            .set((
                artifacts::reversibility.eq(crate::models::reversibility_to_str(reversibility)),
                artifacts::updated_at.eq(now.naive_utc()),
            ))
            .execute(&**self.conn)?;
        Ok(())
    }
}
