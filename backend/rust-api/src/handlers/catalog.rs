use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mongodb::bson::oid::ObjectId;
use serde::Serialize;
use serde_json::json;

use crate::extractors::AppJson;
use crate::models::course::{
    UnitCreateRequest, UnitRecord, UnitSummary, VideoCreateRequest, VideoRecord, VideoSummary,
};
use crate::services::{unlock_service::PropagationOutcome, unlock_service::UnlockService, AppState};

use super::{parse_object_id, ApiError};

#[derive(Debug, Serialize)]
pub struct UnitCreatedResponse {
    pub unit: UnitSummary,
    pub propagation: PropagationOutcome,
}

#[derive(Debug, Serialize)]
pub struct VideoCreatedResponse {
    pub video: VideoSummary,
    pub propagation: PropagationOutcome,
}

/// Persist a unit, link it to its course, then propagate unlocks. The
/// propagation runs only after the unit is durable, so a replayed request
/// at worst repeats an idempotent trigger.
pub async fn create_unit(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
    AppJson(payload): AppJson<UnitCreateRequest>,
) -> Result<(StatusCode, Json<UnitCreatedResponse>), ApiError> {
    let course_id = parse_object_id(&course_id, "course_id")?;

    if payload.order < 0 {
        return Err(ApiError::bad_request("Unit order must be non-negative"));
    }

    let course = state
        .catalog
        .course(&course_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Course not found"))?;

    // `order` is unique within a course.
    if state
        .catalog
        .unit_at_order(&course_id, payload.order)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict(format!(
            "Course {} already has a unit at order {}",
            course.id.to_hex(),
            payload.order
        )));
    }

    let now = mongodb::bson::DateTime::now();
    let unit = UnitRecord {
        id: ObjectId::new(),
        course_id,
        title: payload.title,
        order: payload.order,
        videos: Vec::new(),
        quizzes: Vec::new(),
        reading_materials: Vec::new(),
        quiz_pools: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    state.catalog.insert_unit(&unit).await?;

    let propagation = UnlockService::new(&state).on_unit_created(&unit).await?;

    Ok((
        StatusCode::CREATED,
        Json(UnitCreatedResponse {
            unit: UnitSummary::from_record(&unit),
            propagation,
        }),
    ))
}

pub async fn delete_unit(
    State(state): State<Arc<AppState>>,
    Path(unit_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let unit_id = parse_object_id(&unit_id, "unit_id")?;

    if !state.catalog.remove_unit(&unit_id).await? {
        return Err(ApiError::not_found("Unit not found"));
    }

    Ok(Json(json!({ "deleted": unit_id.to_hex() })))
}

/// Persist a video, link it to its course/unit, then propagate: the first
/// video of an already-unlocked unit is granted to those students, and a
/// course-level video is granted to every enrolled student.
pub async fn create_video(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
    AppJson(payload): AppJson<VideoCreateRequest>,
) -> Result<(StatusCode, Json<VideoCreatedResponse>), ApiError> {
    let course_id = parse_object_id(&course_id, "course_id")?;

    state
        .catalog
        .course(&course_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Course not found"))?;

    let unit_id = match payload.unit_id.as_deref() {
        Some(raw) => {
            let unit_id = parse_object_id(raw, "unit_id")?;
            let unit = state
                .catalog
                .unit(&unit_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Unit not found"))?;
            if unit.course_id != course_id {
                return Err(ApiError::bad_request(
                    "Unit does not belong to this course",
                ));
            }
            Some(unit_id)
        }
        None => None,
    };

    let video = VideoRecord {
        id: ObjectId::new(),
        course_id,
        unit_id,
        title: payload.title,
        sequence: payload.sequence.unwrap_or(0),
        created_at: mongodb::bson::DateTime::now(),
    };
    state.catalog.insert_video(&video).await?;

    let propagation = UnlockService::new(&state).on_video_created(&video).await?;

    Ok((
        StatusCode::CREATED,
        Json(VideoCreatedResponse {
            video: VideoSummary::from_record(&video),
            propagation,
        }),
    ))
}
