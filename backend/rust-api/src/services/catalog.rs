use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    options::{FindOneOptions, FindOptions},
    Collection, Database,
};

use crate::models::{CourseRecord, EnrollmentRecord, UnitRecord, VideoRecord};
use crate::services::EngineError;

/// Read surface over the course-catalog collections, plus the minimal
/// mutations the unit/video creation handlers need. Enrollment membership
/// is owned by another subsystem; the engine only reads it.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn ping(&self) -> Result<(), EngineError>;

    async fn course(&self, course_id: &ObjectId) -> Result<Option<CourseRecord>, EngineError>;

    async fn unit(&self, unit_id: &ObjectId) -> Result<Option<UnitRecord>, EngineError>;

    /// Units of a course in ascending `order`.
    async fn units_of_course(&self, course_id: &ObjectId) -> Result<Vec<UnitRecord>, EngineError>;

    async fn unit_at_order(
        &self,
        course_id: &ObjectId,
        order: i32,
    ) -> Result<Option<UnitRecord>, EngineError>;

    /// Videos of a unit in ascending `sequence`.
    async fn videos_of_unit(&self, unit_id: &ObjectId) -> Result<Vec<VideoRecord>, EngineError>;

    async fn first_video_of_unit(
        &self,
        unit_id: &ObjectId,
    ) -> Result<Option<VideoRecord>, EngineError>;

    /// Resolved student-id list for a course.
    async fn enrolled_students(&self, course_id: &ObjectId) -> Result<Vec<String>, EngineError>;

    /// Persist a unit and link it to its course (`units` push + `hasUnits`).
    async fn insert_unit(&self, unit: &UnitRecord) -> Result<(), EngineError>;

    /// Unlink and remove a unit; clears `hasUnits` when the last unit of
    /// the course goes away. Returns false when the unit does not exist.
    async fn remove_unit(&self, unit_id: &ObjectId) -> Result<bool, EngineError>;

    async fn insert_video(&self, video: &VideoRecord) -> Result<(), EngineError>;
}

pub struct MongoCatalog {
    mongo: Database,
}

impl MongoCatalog {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn courses(&self) -> Collection<CourseRecord> {
        self.mongo.collection("courses")
    }

    fn units(&self) -> Collection<UnitRecord> {
        self.mongo.collection("units")
    }

    fn videos(&self) -> Collection<VideoRecord> {
        self.mongo.collection("videos")
    }

    fn enrollments(&self) -> Collection<EnrollmentRecord> {
        self.mongo.collection("enrollments")
    }
}

#[async_trait]
impl CourseCatalog for MongoCatalog {
    async fn ping(&self) -> Result<(), EngineError> {
        self.mongo
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }

    async fn course(&self, course_id: &ObjectId) -> Result<Option<CourseRecord>, EngineError> {
        let course = self
            .courses()
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to fetch course")?;
        Ok(course)
    }

    async fn unit(&self, unit_id: &ObjectId) -> Result<Option<UnitRecord>, EngineError> {
        let unit = self
            .units()
            .find_one(doc! { "_id": unit_id })
            .await
            .context("Failed to fetch unit")?;
        Ok(unit)
    }

    async fn units_of_course(&self, course_id: &ObjectId) -> Result<Vec<UnitRecord>, EngineError> {
        let options = FindOptions::builder().sort(doc! { "order": 1 }).build();
        let cursor = self
            .units()
            .find(doc! { "course_id": course_id })
            .with_options(options)
            .await
            .context("Failed to query units")?;

        let units = cursor
            .try_collect()
            .await
            .context("Failed to collect units")?;
        Ok(units)
    }

    async fn unit_at_order(
        &self,
        course_id: &ObjectId,
        order: i32,
    ) -> Result<Option<UnitRecord>, EngineError> {
        let unit = self
            .units()
            .find_one(doc! { "course_id": course_id, "order": order })
            .await
            .context("Failed to fetch unit by order")?;
        Ok(unit)
    }

    async fn videos_of_unit(&self, unit_id: &ObjectId) -> Result<Vec<VideoRecord>, EngineError> {
        let options = FindOptions::builder().sort(doc! { "sequence": 1 }).build();
        let cursor = self
            .videos()
            .find(doc! { "unit_id": unit_id })
            .with_options(options)
            .await
            .context("Failed to query unit videos")?;

        let videos = cursor
            .try_collect()
            .await
            .context("Failed to collect unit videos")?;
        Ok(videos)
    }

    async fn first_video_of_unit(
        &self,
        unit_id: &ObjectId,
    ) -> Result<Option<VideoRecord>, EngineError> {
        let options = FindOneOptions::builder().sort(doc! { "sequence": 1 }).build();
        let video = self
            .videos()
            .find_one(doc! { "unit_id": unit_id })
            .with_options(options)
            .await
            .context("Failed to fetch first unit video")?;
        Ok(video)
    }

    async fn enrolled_students(&self, course_id: &ObjectId) -> Result<Vec<String>, EngineError> {
        let mut cursor = self
            .enrollments()
            .find(doc! { "course_id": course_id })
            .await
            .context("Failed to query enrollments")?;

        let mut students = Vec::new();
        while let Some(enrollment) = cursor
            .try_next()
            .await
            .context("Enrollment cursor error")?
        {
            students.push(enrollment.student_id);
        }
        Ok(students)
    }

    async fn insert_unit(&self, unit: &UnitRecord) -> Result<(), EngineError> {
        self.units()
            .insert_one(unit)
            .await
            .context("Failed to insert unit")?;

        self.courses()
            .update_one(
                doc! { "_id": unit.course_id },
                doc! {
                    "$push": { "units": unit.id },
                    "$set": { "hasUnits": true, "updatedAt": mongodb::bson::DateTime::now() },
                },
            )
            .await
            .context("Failed to link unit to course")?;
        Ok(())
    }

    async fn remove_unit(&self, unit_id: &ObjectId) -> Result<bool, EngineError> {
        let Some(unit) = self.unit(unit_id).await? else {
            return Ok(false);
        };

        self.units()
            .delete_one(doc! { "_id": unit_id })
            .await
            .context("Failed to delete unit")?;

        self.courses()
            .update_one(
                doc! { "_id": unit.course_id },
                doc! {
                    "$pull": { "units": unit_id },
                    "$set": { "updatedAt": mongodb::bson::DateTime::now() },
                },
            )
            .await
            .context("Failed to unlink unit from course")?;

        // Last unit gone: the course falls back to an ungated video list.
        let remaining = self
            .units()
            .count_documents(doc! { "course_id": unit.course_id })
            .await
            .context("Failed to count remaining units")?;
        if remaining == 0 {
            self.courses()
                .update_one(
                    doc! { "_id": unit.course_id },
                    doc! { "$set": { "hasUnits": false } },
                )
                .await
                .context("Failed to clear hasUnits")?;
        }

        Ok(true)
    }

    async fn insert_video(&self, video: &VideoRecord) -> Result<(), EngineError> {
        self.videos()
            .insert_one(video)
            .await
            .context("Failed to insert video")?;

        if let Some(unit_id) = video.unit_id {
            self.units()
                .update_one(
                    doc! { "_id": unit_id },
                    doc! {
                        "$push": { "videos": video.id },
                        "$set": { "updatedAt": mongodb::bson::DateTime::now() },
                    },
                )
                .await
                .context("Failed to link video to unit")?;
        }
        Ok(())
    }
}
