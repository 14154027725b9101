use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson},
    Collection, Database,
};

use crate::models::{StudentProgressRecord, UnitEntryPatch, UnitProgressEntry};
use crate::services::EngineError;

/// Result of a unit-entry upsert, used by the propagator for counting and
/// for applying the first-video grant exactly when a unit flips unlocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertOutcome {
    pub created_record: bool,
    pub created_entry: bool,
    pub changed: bool,
    /// The entry transitioned absent/locked -> unlocked in this call.
    pub unlocked_now: bool,
}

/// Durable per-(student, course) unlock/completion state. Safe to call
/// concurrently for different students; same-student races resolve as
/// last-write-wins per field, which the idempotent recomputation repairs.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(
        &self,
        student_id: &str,
        course_id: &ObjectId,
    ) -> Result<Option<StudentProgressRecord>, EngineError>;

    async fn find_by_course(
        &self,
        course_id: &ObjectId,
    ) -> Result<Vec<StudentProgressRecord>, EngineError>;

    /// Records in a course whose entry for `unit_id` has a passed quiz.
    async fn find_with_passed_quiz(
        &self,
        course_id: &ObjectId,
        unit_id: &ObjectId,
    ) -> Result<Vec<StudentProgressRecord>, EngineError>;

    /// Creates the parent record if absent (check-then-create), creates the
    /// unit entry if absent, otherwise merges `patch` into the entry.
    async fn upsert_unit_entry(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        unit_id: &ObjectId,
        patch: UnitEntryPatch,
    ) -> Result<UpsertOutcome, EngineError>;

    /// Set semantics; returns true when the video was newly added.
    /// Creates the parent record if absent.
    async fn add_unlocked_video(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        video_id: &ObjectId,
    ) -> Result<bool, EngineError>;

    /// Set semantics; returns true when newly recorded.
    async fn complete_reading_material(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        material_id: &ObjectId,
    ) -> Result<bool, EngineError>;
}

/// Merge a patch into an entry, enforcing the status state machine and
/// monotonic unlocking. Returns (changed, unlocked_now). Shared by the
/// Mongo and in-memory backends so validation lives in exactly one place.
pub fn apply_patch(
    entry: &mut UnitProgressEntry,
    patch: &UnitEntryPatch,
) -> Result<(bool, bool), EngineError> {
    if let Some(next) = patch.status {
        if !entry.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: entry.status,
                to: next,
            });
        }
    }

    let mut changed = false;
    let mut unlocked_now = false;

    if let Some(next) = patch.status {
        if entry.status != next {
            entry.status = next;
            changed = true;
        }
    }

    // Unlocking is monotonic: a false patch against an unlocked entry is
    // ignored field-wise.
    if patch.unlocked == Some(true) && !entry.unlocked {
        entry.unlocked = true;
        entry.unlocked_at = Some(mongodb::bson::DateTime::now());
        changed = true;
        unlocked_now = true;
    }

    if let Some(value) = patch.unit_quiz_completed {
        if entry.unit_quiz_completed != value {
            entry.unit_quiz_completed = value;
            changed = true;
        }
    }

    if let Some(value) = patch.unit_quiz_passed {
        if entry.unit_quiz_passed != value {
            entry.unit_quiz_passed = value;
            changed = true;
        }
    }

    if let Some(value) = patch.all_videos_watched {
        if entry.all_videos_watched != value {
            entry.all_videos_watched = value;
            changed = true;
        }
    }

    if let Some(video_id) = patch.watched_video {
        if !entry.videos_watched.contains(&video_id) {
            entry.videos_watched.push(video_id);
            changed = true;
        }
    }

    if patch.increment_quiz_attempts {
        entry.quiz_attempts += 1;
        changed = true;
    }

    Ok((changed, unlocked_now))
}

pub struct MongoProgressStore {
    mongo: Database,
}

impl MongoProgressStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn records(&self) -> Collection<StudentProgressRecord> {
        self.mongo.collection("student_progress")
    }

    fn pair_filter(student_id: &str, course_id: &ObjectId) -> mongodb::bson::Document {
        doc! { "student_id": student_id, "course_id": course_id }
    }

    /// Check-then-create so at most one record per pair exists. A losing
    /// race against a concurrent creator falls back to the existing record.
    async fn ensure_record(
        &self,
        student_id: &str,
        course_id: &ObjectId,
    ) -> Result<(StudentProgressRecord, bool), EngineError> {
        if let Some(record) = self.get(student_id, course_id).await? {
            return Ok((record, false));
        }

        let record = StudentProgressRecord::new(student_id, *course_id);
        match self.records().insert_one(&record).await {
            Ok(_) => Ok((record, true)),
            Err(err) => {
                // Concurrent creator won; re-read instead of failing.
                if let Some(existing) = self.get(student_id, course_id).await? {
                    tracing::debug!(
                        student_id,
                        course_id = %course_id,
                        "Progress record created concurrently, reusing"
                    );
                    Ok((existing, false))
                } else {
                    Err(EngineError::Store(
                        anyhow::Error::from(err).context("Failed to create progress record"),
                    ))
                }
            }
        }
    }

    /// Write one entry's mutated fields back with `$set` on the positional
    /// element, so concurrent writers on other fields are not clobbered.
    async fn write_entry(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        entry: &UnitProgressEntry,
    ) -> Result<(), EngineError> {
        let entry_bson = to_bson(entry).context("Failed to serialize unit entry")?;
        self.records()
            .update_one(
                doc! {
                    "student_id": student_id,
                    "course_id": course_id,
                    "units.unit_id": entry.unit_id,
                },
                doc! {
                    "$set": {
                        "units.$": entry_bson,
                        "updatedAt": mongodb::bson::DateTime::now(),
                    },
                },
            )
            .await
            .context("Failed to update unit entry")?;
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for MongoProgressStore {
    async fn get(
        &self,
        student_id: &str,
        course_id: &ObjectId,
    ) -> Result<Option<StudentProgressRecord>, EngineError> {
        let record = self
            .records()
            .find_one(Self::pair_filter(student_id, course_id))
            .await
            .context("Failed to fetch progress record")?;
        Ok(record)
    }

    async fn find_by_course(
        &self,
        course_id: &ObjectId,
    ) -> Result<Vec<StudentProgressRecord>, EngineError> {
        let cursor = self
            .records()
            .find(doc! { "course_id": course_id })
            .await
            .context("Failed to query progress records")?;
        let records = cursor
            .try_collect()
            .await
            .context("Failed to collect progress records")?;
        Ok(records)
    }

    async fn find_with_passed_quiz(
        &self,
        course_id: &ObjectId,
        unit_id: &ObjectId,
    ) -> Result<Vec<StudentProgressRecord>, EngineError> {
        let cursor = self
            .records()
            .find(doc! {
                "course_id": course_id,
                "units": {
                    "$elemMatch": { "unit_id": unit_id, "unit_quiz_passed": true }
                },
            })
            .await
            .context("Failed to query passed-quiz records")?;
        let records = cursor
            .try_collect()
            .await
            .context("Failed to collect passed-quiz records")?;
        Ok(records)
    }

    async fn upsert_unit_entry(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        unit_id: &ObjectId,
        patch: UnitEntryPatch,
    ) -> Result<UpsertOutcome, EngineError> {
        let (record, created_record) = self.ensure_record(student_id, course_id).await?;

        match record.entry(unit_id) {
            None => {
                let mut entry = UnitProgressEntry::locked(*unit_id);
                let (_, unlocked_now) = apply_patch(&mut entry, &patch)?;
                let entry_bson = to_bson(&entry).context("Failed to serialize unit entry")?;
                self.records()
                    .update_one(
                        Self::pair_filter(student_id, course_id),
                        doc! {
                            "$push": { "units": entry_bson },
                            "$set": { "updatedAt": mongodb::bson::DateTime::now() },
                        },
                    )
                    .await
                    .context("Failed to push unit entry")?;

                Ok(UpsertOutcome {
                    created_record,
                    created_entry: true,
                    changed: true,
                    unlocked_now,
                })
            }
            Some(existing) => {
                let mut entry = existing.clone();
                let (changed, unlocked_now) = apply_patch(&mut entry, &patch)?;
                if changed {
                    self.write_entry(student_id, course_id, &entry).await?;
                }
                Ok(UpsertOutcome {
                    created_record,
                    created_entry: false,
                    changed,
                    unlocked_now,
                })
            }
        }
    }

    async fn add_unlocked_video(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        video_id: &ObjectId,
    ) -> Result<bool, EngineError> {
        self.ensure_record(student_id, course_id).await?;

        let result = self
            .records()
            .update_one(
                Self::pair_filter(student_id, course_id),
                doc! { "$addToSet": { "unlocked_videos": video_id } },
            )
            .await
            .context("Failed to add unlocked video")?;
        Ok(result.modified_count > 0)
    }

    async fn complete_reading_material(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        material_id: &ObjectId,
    ) -> Result<bool, EngineError> {
        self.ensure_record(student_id, course_id).await?;

        let result = self
            .records()
            .update_one(
                Self::pair_filter(student_id, course_id),
                doc! { "$addToSet": { "completed_reading_materials": material_id } },
            )
            .await
            .context("Failed to record reading material")?;
        Ok(result.modified_count > 0)
    }
}
