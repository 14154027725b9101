use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::extractors::AppJson;
use crate::models::UnitEntryPatch;
use crate::services::unlock_service::{PropagationOutcome, RecalculateOutcome, UnlockService};
use crate::services::view_service::{StudentCourseView, ViewService};
use crate::services::AppState;

use super::{parse_object_id, ApiError};

#[derive(Debug, Deserialize)]
pub struct QuizResultPayload {
    pub student_id: String,
    pub course_id: String,
    pub unit_id: String,
    pub passed: bool,
}

#[derive(Debug, Deserialize)]
pub struct VideoWatchedPayload {
    pub student_id: String,
    pub course_id: String,
    pub unit_id: String,
    pub video_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadingCompletePayload {
    pub student_id: String,
    pub course_id: String,
    pub material_id: String,
}

/// Quiz-grading collaborator notification. Records the result and, on a
/// pass, eagerly propagates the unlock of the next unit.
pub async fn quiz_result(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<QuizResultPayload>,
) -> Result<Json<PropagationOutcome>, ApiError> {
    let course_id = parse_object_id(&payload.course_id, "course_id")?;
    let unit_id = parse_object_id(&payload.unit_id, "unit_id")?;

    let outcome = UnlockService::new(&state)
        .on_quiz_result(&payload.student_id, &course_id, &unit_id, payload.passed)
        .await?;

    Ok(Json(outcome))
}

/// Collaborator write from the video-serving path: record a watched video
/// and derive `all_videos_watched`. Never flips `unlocked` or `status`.
pub async fn video_watched(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<VideoWatchedPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let course_id = parse_object_id(&payload.course_id, "course_id")?;
    let unit_id = parse_object_id(&payload.unit_id, "unit_id")?;
    let video_id = parse_object_id(&payload.video_id, "video_id")?;

    let unit = state
        .catalog
        .unit(&unit_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Unit not found"))?;
    if unit.course_id != course_id {
        return Err(ApiError::bad_request("Unit does not belong to this course"));
    }

    let unit_videos = state.catalog.videos_of_unit(&unit_id).await?;
    if !unit_videos.iter().any(|video| video.id == video_id) {
        return Err(ApiError::not_found("Video not found in unit"));
    }

    state
        .progress
        .upsert_unit_entry(
            &payload.student_id,
            &course_id,
            &unit_id,
            UnitEntryPatch::video_watched(video_id),
        )
        .await?;

    // Derive all_videos_watched from the stored entry after the write.
    let record = state.progress.get(&payload.student_id, &course_id).await?;
    let all_watched = record
        .as_ref()
        .and_then(|r| r.entry(&unit_id))
        .map(|entry| {
            unit_videos
                .iter()
                .all(|video| entry.videos_watched.contains(&video.id))
        })
        .unwrap_or(false);

    if all_watched {
        state
            .progress
            .upsert_unit_entry(
                &payload.student_id,
                &course_id,
                &unit_id,
                UnitEntryPatch {
                    all_videos_watched: Some(true),
                    ..UnitEntryPatch::default()
                },
            )
            .await?;
    }

    Ok(Json(json!({
        "video_id": video_id.to_hex(),
        "all_videos_watched": all_watched,
    })))
}

pub async fn reading_complete(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<ReadingCompletePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let course_id = parse_object_id(&payload.course_id, "course_id")?;
    let material_id = parse_object_id(&payload.material_id, "material_id")?;

    let newly_completed = state
        .progress
        .complete_reading_material(&payload.student_id, &course_id, &material_id)
        .await?;

    Ok(Json(json!({
        "material_id": material_id.to_hex(),
        "newly_completed": newly_completed,
    })))
}

/// Operator-facing repair: idempotent full recomputation for a course.
pub async fn recalculate(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
) -> Result<Json<RecalculateOutcome>, ApiError> {
    let course_id = parse_object_id(&course_id, "course_id")?;

    let outcome = UnlockService::new(&state).recalculate(&course_id).await?;
    Ok(Json(outcome))
}

/// Student-facing unlock/completion projection for one (student, course).
pub async fn student_view(
    State(state): State<Arc<AppState>>,
    Path((course_id, student_id)): Path<(String, String)>,
) -> Result<Json<StudentCourseView>, ApiError> {
    let course_id = parse_object_id(&course_id, "course_id")?;

    let view = ViewService::new(&state)
        .student_view(&student_id, &course_id)
        .await?;
    Ok(Json(view))
}
