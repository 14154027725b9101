use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::oid::ObjectId;
use serde::Serialize;

use crate::metrics;
use crate::models::{UnitEntryPatch, UnitRecord};
use crate::services::catalog::CourseCatalog;
use crate::services::progress_store::ProgressStore;
use crate::services::{AppState, EngineError};
use crate::utils::retry::retry_async;

/// Students are processed in fixed-size chunks during full recomputation so
/// one run never holds the whole enrollment of a large course in flight.
const RECALC_BATCH_SIZE: usize = 100;

const STORE_RETRY_ATTEMPTS: usize = 2;
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Best-effort counts reported by the incremental triggers.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PropagationOutcome {
    pub students_touched: u64,
    pub units_unlocked: u64,
    pub videos_unlocked: u64,
    pub failed_students: u64,
}

/// Aggregate counts reported by the full recomputation, for operator
/// visibility rather than correctness.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RecalculateOutcome {
    pub students_updated: u64,
    pub units_unlocked: u64,
    pub videos_unlocked: u64,
    pub total_students: u64,
    pub total_units: u64,
    pub failed_students: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct UnlockApplied {
    unlocked: bool,
    videos_unlocked: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct StudentRepair {
    units_unlocked: u64,
    videos_unlocked: u64,
}

impl StudentRepair {
    fn is_empty(&self) -> bool {
        self.units_unlocked == 0 && self.videos_unlocked == 0
    }
}

/// The unlock propagator. Derives and applies locked -> unlocked
/// transitions from triggering facts; every transition is monotonic and
/// every entry point is idempotent, so duplicate or replayed triggers are
/// harmless and `recalculate` can repair any missed propagation.
pub struct UnlockService {
    catalog: Arc<dyn CourseCatalog>,
    progress: Arc<dyn ProgressStore>,
}

impl UnlockService {
    pub fn new(state: &AppState) -> Self {
        Self {
            catalog: state.catalog.clone(),
            progress: state.progress.clone(),
        }
    }

    pub fn with_stores(
        catalog: Arc<dyn CourseCatalog>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self { catalog, progress }
    }

    /// The single write path that flips a unit entry unlocked and grants
    /// the unit's first video. Safe to call for already-unlocked entries.
    async fn unlock_unit_for_student(
        &self,
        student_id: &str,
        unit: &UnitRecord,
        trigger: &'static str,
    ) -> Result<UnlockApplied, EngineError> {
        let outcome = self
            .progress
            .upsert_unit_entry(
                student_id,
                &unit.course_id,
                &unit.id,
                UnitEntryPatch::unlock(),
            )
            .await?;

        let mut applied = UnlockApplied::default();
        if outcome.unlocked_now {
            applied.unlocked = true;
            metrics::UNITS_UNLOCKED_TOTAL
                .with_label_values(&[trigger])
                .inc();
        }

        // First video by sequence, if one exists at this moment. When the
        // unit has no videos yet, on_video_created closes the gap later.
        // The entry is unlocked after an unlock patch whether or not this
        // call flipped it, so the grant runs on every call; set semantics
        // make replays no-ops and a grant lost between the two writes is
        // re-applied by the next attempt.
        if let Some(video) = self.catalog.first_video_of_unit(&unit.id).await? {
            if self
                .progress
                .add_unlocked_video(student_id, &unit.course_id, &video.id)
                .await?
            {
                applied.videos_unlocked += 1;
                metrics::VIDEOS_UNLOCKED_TOTAL.inc();
            }
        }

        Ok(applied)
    }

    async fn unlock_with_retry(
        &self,
        student_id: &str,
        unit: &UnitRecord,
        trigger: &'static str,
    ) -> Result<UnlockApplied, EngineError> {
        retry_async(STORE_RETRY_ATTEMPTS, STORE_RETRY_BACKOFF, || {
            self.unlock_unit_for_student(student_id, unit, trigger)
        })
        .await
    }

    /// Trigger: a unit was durably created and linked to its course.
    ///
    /// Order 0 unlocks for every enrolled student. A later unit unlocks for
    /// every student who has already passed the predecessor's quiz, which
    /// covers units created after students started progressing.
    pub async fn on_unit_created(
        &self,
        unit: &UnitRecord,
    ) -> Result<PropagationOutcome, EngineError> {
        let mut outcome = PropagationOutcome::default();

        let students: Vec<String> = if unit.order == 0 {
            self.catalog.enrolled_students(&unit.course_id).await?
        } else {
            let Some(previous) = self
                .catalog
                .unit_at_order(&unit.course_id, unit.order - 1)
                .await?
            else {
                // Predecessor not created yet; a legitimate transient state.
                // The eventual predecessor creation or a recalculate run
                // converges this unit.
                tracing::debug!(
                    unit_id = %unit.id,
                    order = unit.order,
                    "No predecessor unit yet, skipping propagation"
                );
                return Ok(outcome);
            };

            self.progress
                .find_with_passed_quiz(&unit.course_id, &previous.id)
                .await?
                .into_iter()
                .map(|record| record.student_id)
                .collect()
        };

        for student_id in &students {
            match self.unlock_with_retry(student_id, unit, "unit_created").await {
                Ok(applied) => {
                    outcome.students_touched += 1;
                    if applied.unlocked {
                        outcome.units_unlocked += 1;
                    }
                    outcome.videos_unlocked += applied.videos_unlocked;
                }
                Err(err) => {
                    outcome.failed_students += 1;
                    metrics::PROPAGATION_STUDENT_FAILURES_TOTAL.inc();
                    tracing::warn!(
                        student_id,
                        unit_id = %unit.id,
                        error = %err,
                        "Unit propagation failed for student, continuing"
                    );
                }
            }
        }

        tracing::info!(
            unit_id = %unit.id,
            course_id = %unit.course_id,
            order = unit.order,
            students = students.len(),
            units_unlocked = outcome.units_unlocked,
            "Unit creation propagated"
        );
        Ok(outcome)
    }

    /// Trigger: a video was durably created and linked to its course/unit.
    ///
    /// A unit video is granted to students whose unit is already unlocked
    /// but who hold no video of that unit yet (the unit was created before
    /// its first video). A course-level video is granted to every enrolled
    /// student unconditionally.
    pub async fn on_video_created(
        &self,
        video: &crate::models::VideoRecord,
    ) -> Result<PropagationOutcome, EngineError> {
        let mut outcome = PropagationOutcome::default();

        let Some(unit_id) = video.unit_id else {
            // Flat, ungated video: every enrolled student gets it.
            let students = self.catalog.enrolled_students(&video.course_id).await?;
            for student_id in &students {
                match self
                    .progress
                    .add_unlocked_video(student_id, &video.course_id, &video.id)
                    .await
                {
                    Ok(added) => {
                        outcome.students_touched += 1;
                        if added {
                            outcome.videos_unlocked += 1;
                            metrics::VIDEOS_UNLOCKED_TOTAL.inc();
                        }
                    }
                    Err(err) => {
                        outcome.failed_students += 1;
                        metrics::PROPAGATION_STUDENT_FAILURES_TOTAL.inc();
                        tracing::warn!(
                            student_id,
                            video_id = %video.id,
                            error = %err,
                            "Video propagation failed for student, continuing"
                        );
                    }
                }
            }
            return Ok(outcome);
        };

        // Only the lowest-sequence video of a unit is auto-granted; later
        // videos unlock through watch progression, outside this engine.
        let unit_videos = self.catalog.videos_of_unit(&unit_id).await?;
        match unit_videos.first() {
            Some(first) if first.id == video.id => {}
            _ => return Ok(outcome),
        }
        let unit_video_ids: HashSet<ObjectId> = unit_videos.iter().map(|v| v.id).collect();

        for record in self.progress.find_by_course(&video.course_id).await? {
            let unlocked = record
                .entry(&unit_id)
                .map(|entry| entry.unlocked)
                .unwrap_or(false);
            if !unlocked {
                continue;
            }
            if record
                .unlocked_videos
                .iter()
                .any(|v| unit_video_ids.contains(v))
            {
                continue;
            }

            match self
                .progress
                .add_unlocked_video(&record.student_id, &video.course_id, &video.id)
                .await
            {
                Ok(added) => {
                    outcome.students_touched += 1;
                    if added {
                        outcome.videos_unlocked += 1;
                        metrics::VIDEOS_UNLOCKED_TOTAL.inc();
                    }
                }
                Err(err) => {
                    outcome.failed_students += 1;
                    metrics::PROPAGATION_STUDENT_FAILURES_TOTAL.inc();
                    tracing::warn!(
                        student_id = %record.student_id,
                        video_id = %video.id,
                        error = %err,
                        "Video propagation failed for student, continuing"
                    );
                }
            }
        }

        Ok(outcome)
    }

    /// Trigger: the quiz grader reports a result for (student, unit).
    ///
    /// Records the fact, and on a pass eagerly attempts the unlock of the
    /// unit at `order + 1`. `recalculate` remains the repair path if the
    /// eager step is lost.
    pub async fn on_quiz_result(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        unit_id: &ObjectId,
        passed: bool,
    ) -> Result<PropagationOutcome, EngineError> {
        let unit = self
            .catalog
            .unit(unit_id)
            .await?
            .ok_or_else(|| EngineError::not_found("unit", unit_id.to_hex()))?;
        if unit.course_id != *course_id {
            return Err(EngineError::not_found("unit in course", unit_id.to_hex()));
        }

        self.progress
            .upsert_unit_entry(student_id, course_id, unit_id, UnitEntryPatch::quiz_result(passed))
            .await?;
        metrics::QUIZ_RESULTS_RECORDED_TOTAL
            .with_label_values(&[if passed { "true" } else { "false" }])
            .inc();

        let mut outcome = PropagationOutcome {
            students_touched: 1,
            ..PropagationOutcome::default()
        };

        if passed {
            if let Some(next) = self
                .catalog
                .unit_at_order(course_id, unit.order + 1)
                .await?
            {
                let applied = self
                    .unlock_with_retry(student_id, &next, "quiz_passed")
                    .await?;
                if applied.unlocked {
                    outcome.units_unlocked += 1;
                }
                outcome.videos_unlocked += applied.videos_unlocked;
            }
        }

        Ok(outcome)
    }

    /// Idempotent on-demand repair: re-derives all unlock state for a
    /// course from first principles. Never re-locks anything; with no new
    /// facts since the last run it applies zero transitions.
    pub async fn recalculate(
        &self,
        course_id: &ObjectId,
    ) -> Result<RecalculateOutcome, EngineError> {
        let result = self.recalculate_inner(course_id).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::RECALCULATE_RUNS_TOTAL
            .with_label_values(&[status])
            .inc();
        result
    }

    async fn recalculate_inner(
        &self,
        course_id: &ObjectId,
    ) -> Result<RecalculateOutcome, EngineError> {
        let course = self
            .catalog
            .course(course_id)
            .await?
            .ok_or_else(|| EngineError::not_found("course", course_id.to_hex()))?;

        let mut outcome = RecalculateOutcome::default();

        // Flat courses carry no gating; their progress is never touched.
        if !course.has_units {
            tracing::info!(course_id = %course_id, "Course is ungated, nothing to recalculate");
            return Ok(outcome);
        }

        let units = self.catalog.units_of_course(course_id).await?;
        let students = self.catalog.enrolled_students(course_id).await?;
        outcome.total_units = units.len() as u64;
        outcome.total_students = students.len() as u64;

        for batch in students.chunks(RECALC_BATCH_SIZE) {
            for student_id in batch {
                match self.recalculate_student(student_id, course_id, &units).await {
                    Ok(repair) => {
                        if !repair.is_empty() {
                            outcome.students_updated += 1;
                            outcome.units_unlocked += repair.units_unlocked;
                            outcome.videos_unlocked += repair.videos_unlocked;
                        }
                    }
                    Err(err) => {
                        outcome.failed_students += 1;
                        metrics::PROPAGATION_STUDENT_FAILURES_TOTAL.inc();
                        tracing::warn!(
                            student_id,
                            course_id = %course_id,
                            error = %err,
                            "Recalculation failed for student, continuing"
                        );
                    }
                }
            }
        }

        tracing::info!(
            course_id = %course_id,
            students_updated = outcome.students_updated,
            units_unlocked = outcome.units_unlocked,
            total_students = outcome.total_students,
            total_units = outcome.total_units,
            "Recalculation complete"
        );
        Ok(outcome)
    }

    /// Walk a student's units in ascending order, unlocking each unit whose
    /// predecessor quiz is passed (unit 0 unconditionally). Units that are
    /// already unlocked still get their first-video grant re-checked, so a
    /// record where the unlock landed but the grant was lost is repaired
    /// here. Stale entries referencing units no longer in the course are
    /// simply never visited.
    async fn recalculate_student(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        units: &[UnitRecord],
    ) -> Result<StudentRepair, EngineError> {
        let record = self.progress.get(student_id, course_id).await?;

        let mut repair = StudentRepair::default();
        let mut previous_passed = false;

        for (index, unit) in units.iter().enumerate() {
            let entry = record.as_ref().and_then(|r| r.entry(&unit.id));
            let should_unlock = index == 0 || previous_passed;
            previous_passed = entry.map(|e| e.unit_quiz_passed).unwrap_or(false);

            let already_unlocked = entry.map(|e| e.unlocked).unwrap_or(false);
            if should_unlock && !already_unlocked {
                let applied = self
                    .unlock_with_retry(student_id, unit, "recalculate")
                    .await?;
                if applied.unlocked {
                    repair.units_unlocked += 1;
                }
                repair.videos_unlocked += applied.videos_unlocked;
            } else if already_unlocked {
                // An unlocked unit must hold its first video.
                let Some(video) = self.catalog.first_video_of_unit(&unit.id).await? else {
                    continue;
                };
                let held = record
                    .as_ref()
                    .map(|r| r.has_unlocked_video(&video.id))
                    .unwrap_or(false);
                if !held
                    && self
                        .progress
                        .add_unlocked_video(student_id, course_id, &video.id)
                        .await?
                {
                    repair.videos_unlocked += 1;
                    metrics::VIDEOS_UNLOCKED_TOTAL.inc();
                }
            }
        }

        Ok(repair)
    }
}
