use std::collections::HashSet;
use std::sync::Arc;

use mongodb::bson::oid::ObjectId;
use serde::Serialize;

use crate::models::{StudentProgressRecord, UnitRecord, UnitStatus, VideoRecord};
use crate::services::catalog::CourseCatalog;
use crate::services::progress_store::ProgressStore;
use crate::services::{AppState, EngineError};
use crate::utils::time::bson_to_iso;

/// Student-facing projection of a course joined against the student's
/// progress record. Read-only: this component never writes.
#[derive(Debug, Serialize)]
pub struct StudentCourseView {
    pub course_id: String,
    pub student_id: String,
    pub course_title: String,
    pub has_units: bool,
    pub units: Vec<UnitView>,
}

#[derive(Debug, Serialize)]
pub struct UnitView {
    pub id: String,
    pub title: String,
    pub order: i32,
    pub status: UnitStatus,
    pub unlocked: bool,
    pub unlocked_at: Option<String>,
    pub videos: Vec<VideoView>,
    pub reading_materials: Vec<ReadingMaterialView>,
    pub quizzes: Vec<String>,
    pub videos_completed: u32,
    pub total_videos: u32,
    pub reading_materials_completed: u32,
    pub quizzes_passed: u32,
    pub quiz_attempts: i32,
}

#[derive(Debug, Serialize)]
pub struct VideoView {
    pub id: String,
    pub title: String,
    pub sequence: i32,
    pub watched: bool,
}

#[derive(Debug, Serialize)]
pub struct ReadingMaterialView {
    pub id: String,
    pub completed: bool,
}

pub struct ViewService {
    catalog: Arc<dyn CourseCatalog>,
    progress: Arc<dyn ProgressStore>,
}

impl ViewService {
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

    /// Join course structure with the progress record. A missing record for
    /// an enrolled student means "nothing unlocked yet" and yields locked
    /// placeholders; a student who is not enrolled at all is a not-found.
    pub async fn student_view(
        &self,
        student_id: &str,
        course_id: &ObjectId,
    ) -> Result<StudentCourseView, EngineError> {
        let course = self
            .catalog
            .course(course_id)
            .await?
            .ok_or_else(|| EngineError::not_found("course", course_id.to_hex()))?;

        let enrolled = self.catalog.enrolled_students(course_id).await?;
        if !enrolled.iter().any(|s| s == student_id) {
            return Err(EngineError::not_found(
                "enrollment for student",
                student_id,
            ));
        }

        let record = self.progress.get(student_id, course_id).await?;
        let units = self.catalog.units_of_course(course_id).await?;

        let mut unit_views = Vec::with_capacity(units.len());
        for unit in &units {
            unit_views.push(self.project_unit(unit, record.as_ref()).await?);
        }

        Ok(StudentCourseView {
            course_id: course_id.to_hex(),
            student_id: student_id.to_string(),
            course_title: course.title,
            has_units: course.has_units,
            units: unit_views,
        })
    }

    async fn project_unit(
        &self,
        unit: &UnitRecord,
        record: Option<&StudentProgressRecord>,
    ) -> Result<UnitView, EngineError> {
        let entry = record
            .and_then(|r| r.entry(&unit.id))
            .filter(|e| e.unlocked);

        // Locked units are placeholders: status only, no content arrays.
        let Some(entry) = entry else {
            return Ok(UnitView {
                id: unit.id.to_hex(),
                title: unit.title.clone(),
                order: unit.order,
                status: UnitStatus::Locked,
                unlocked: false,
                unlocked_at: None,
                videos: Vec::new(),
                reading_materials: Vec::new(),
                quizzes: Vec::new(),
                videos_completed: 0,
                total_videos: 0,
                reading_materials_completed: 0,
                quizzes_passed: 0,
                quiz_attempts: 0,
            });
        };

        let unlocked_video_ids: HashSet<ObjectId> = record
            .map(|r| r.unlocked_videos.iter().copied().collect())
            .unwrap_or_default();
        let completed_materials: HashSet<ObjectId> = record
            .map(|r| r.completed_reading_materials.iter().copied().collect())
            .unwrap_or_default();
        let watched: HashSet<ObjectId> = entry.videos_watched.iter().copied().collect();

        let unit_videos = self.catalog.videos_of_unit(&unit.id).await?;
        let total_videos = unit_videos.len() as u32;
        let videos: Vec<VideoView> = unit_videos
            .iter()
            .filter(|video| unlocked_video_ids.contains(&video.id))
            .map(|video| project_video(video, &watched))
            .collect();
        let videos_completed = unit_videos
            .iter()
            .filter(|video| watched.contains(&video.id))
            .count() as u32;

        let reading_materials: Vec<ReadingMaterialView> = unit
            .reading_materials
            .iter()
            .map(|material_id| ReadingMaterialView {
                id: material_id.to_hex(),
                completed: completed_materials.contains(material_id),
            })
            .collect();
        let reading_materials_completed = reading_materials
            .iter()
            .filter(|material| material.completed)
            .count() as u32;

        Ok(UnitView {
            id: unit.id.to_hex(),
            title: unit.title.clone(),
            order: unit.order,
            status: entry.status,
            unlocked: true,
            unlocked_at: entry.unlocked_at.as_ref().map(bson_to_iso),
            videos,
            reading_materials,
            quizzes: unit.quizzes.iter().map(|id| id.to_hex()).collect(),
            videos_completed,
            total_videos,
            reading_materials_completed,
            quizzes_passed: u32::from(entry.unit_quiz_passed),
            quiz_attempts: entry.quiz_attempts,
        })
    }
}

fn project_video(video: &VideoRecord, watched: &HashSet<ObjectId>) -> VideoView {
    VideoView {
        id: video.id.to_hex(),
        title: video.title.clone(),
        sequence: video.sequence,
        watched: watched.contains(&video.id),
    }
}
