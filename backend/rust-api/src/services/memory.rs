//! In-memory store backends. The test suite runs the full engine and the
//! HTTP surface against these instead of a live MongoDB; the progress store
//! supports per-student fault injection to exercise partial-failure
//! isolation in the propagation loops.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::models::{
    CourseRecord, StudentProgressRecord, UnitEntryPatch, UnitProgressEntry, UnitRecord,
    VideoRecord,
};
use crate::services::catalog::CourseCatalog;
use crate::services::progress_store::{apply_patch, ProgressStore, UpsertOutcome};
use crate::services::EngineError;

#[derive(Default)]
struct CatalogData {
    courses: Vec<CourseRecord>,
    units: Vec<UnitRecord>,
    videos: Vec<VideoRecord>,
    enrollments: Vec<(ObjectId, String)>,
}

#[derive(Default)]
pub struct MemoryCatalog {
    data: Mutex<CatalogData>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_course(&self, title: &str, has_units: bool) -> ObjectId {
        let now = mongodb::bson::DateTime::now();
        let course = CourseRecord {
            id: ObjectId::new(),
            title: title.to_string(),
            has_units,
            units: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let id = course.id;
        self.data.lock().unwrap().courses.push(course);
        id
    }

    pub fn enroll(&self, course_id: ObjectId, student_id: &str) {
        self.data
            .lock()
            .unwrap()
            .enrollments
            .push((course_id, student_id.to_string()));
    }

    pub fn build_unit(&self, course_id: ObjectId, title: &str, order: i32) -> UnitRecord {
        let now = mongodb::bson::DateTime::now();
        UnitRecord {
            id: ObjectId::new(),
            course_id,
            title: title.to_string(),
            order,
            videos: Vec::new(),
            quizzes: Vec::new(),
            reading_materials: Vec::new(),
            quiz_pools: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn build_video(
        &self,
        course_id: ObjectId,
        unit_id: Option<ObjectId>,
        title: &str,
        sequence: i32,
    ) -> VideoRecord {
        VideoRecord {
            id: ObjectId::new(),
            course_id,
            unit_id,
            title: title.to_string(),
            sequence,
            created_at: mongodb::bson::DateTime::now(),
        }
    }

    pub fn attach_reading_material(&self, unit_id: &ObjectId) -> ObjectId {
        let material_id = ObjectId::new();
        let mut data = self.data.lock().unwrap();
        if let Some(unit) = data.units.iter_mut().find(|u| u.id == *unit_id) {
            unit.reading_materials.push(material_id);
        }
        material_id
    }

    pub fn attach_quiz(&self, unit_id: &ObjectId) -> ObjectId {
        let quiz_id = ObjectId::new();
        let mut data = self.data.lock().unwrap();
        if let Some(unit) = data.units.iter_mut().find(|u| u.id == *unit_id) {
            unit.quizzes.push(quiz_id);
        }
        quiz_id
    }
}

#[async_trait]
impl CourseCatalog for MemoryCatalog {
    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn course(&self, course_id: &ObjectId) -> Result<Option<CourseRecord>, EngineError> {
        let data = self.data.lock().unwrap();
        Ok(data.courses.iter().find(|c| c.id == *course_id).cloned())
    }

    async fn unit(&self, unit_id: &ObjectId) -> Result<Option<UnitRecord>, EngineError> {
        let data = self.data.lock().unwrap();
        Ok(data.units.iter().find(|u| u.id == *unit_id).cloned())
    }

    async fn units_of_course(&self, course_id: &ObjectId) -> Result<Vec<UnitRecord>, EngineError> {
        let data = self.data.lock().unwrap();
        let mut units: Vec<UnitRecord> = data
            .units
            .iter()
            .filter(|u| u.course_id == *course_id)
            .cloned()
            .collect();
        units.sort_by_key(|u| u.order);
        Ok(units)
    }

    async fn unit_at_order(
        &self,
        course_id: &ObjectId,
        order: i32,
    ) -> Result<Option<UnitRecord>, EngineError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .units
            .iter()
            .find(|u| u.course_id == *course_id && u.order == order)
            .cloned())
    }

    async fn videos_of_unit(&self, unit_id: &ObjectId) -> Result<Vec<VideoRecord>, EngineError> {
        let data = self.data.lock().unwrap();
        let mut videos: Vec<VideoRecord> = data
            .videos
            .iter()
            .filter(|v| v.unit_id == Some(*unit_id))
            .cloned()
            .collect();
        videos.sort_by_key(|v| v.sequence);
        Ok(videos)
    }

    async fn first_video_of_unit(
        &self,
        unit_id: &ObjectId,
    ) -> Result<Option<VideoRecord>, EngineError> {
        Ok(self.videos_of_unit(unit_id).await?.into_iter().next())
    }

    async fn enrolled_students(&self, course_id: &ObjectId) -> Result<Vec<String>, EngineError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .enrollments
            .iter()
            .filter(|(cid, _)| cid == course_id)
            .map(|(_, sid)| sid.clone())
            .collect())
    }

    async fn insert_unit(&self, unit: &UnitRecord) -> Result<(), EngineError> {
        let mut data = self.data.lock().unwrap();
        data.units.push(unit.clone());
        if let Some(course) = data.courses.iter_mut().find(|c| c.id == unit.course_id) {
            course.units.push(unit.id);
            course.has_units = true;
        }
        Ok(())
    }

    async fn remove_unit(&self, unit_id: &ObjectId) -> Result<bool, EngineError> {
        let mut data = self.data.lock().unwrap();
        let Some(pos) = data.units.iter().position(|u| u.id == *unit_id) else {
            return Ok(false);
        };
        let unit = data.units.remove(pos);
        let remaining = data
            .units
            .iter()
            .any(|u| u.course_id == unit.course_id);
        if let Some(course) = data.courses.iter_mut().find(|c| c.id == unit.course_id) {
            course.units.retain(|id| id != unit_id);
            if !remaining {
                course.has_units = false;
            }
        }
        Ok(true)
    }

    async fn insert_video(&self, video: &VideoRecord) -> Result<(), EngineError> {
        let mut data = self.data.lock().unwrap();
        data.videos.push(video.clone());
        if let Some(unit_id) = video.unit_id {
            if let Some(unit) = data.units.iter_mut().find(|u| u.id == unit_id) {
                unit.videos.push(video.id);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProgressStore {
    records: Mutex<Vec<StudentProgressRecord>>,
    failing_students: Mutex<HashSet<String>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write for this student fails with a simulated store error
    /// until cleared. Used by the partial-failure tests.
    pub fn fail_writes_for(&self, student_id: &str) {
        self.failing_students
            .lock()
            .unwrap()
            .insert(student_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_students.lock().unwrap().clear();
    }

    fn check_fault(&self, student_id: &str) -> Result<(), EngineError> {
        if self.failing_students.lock().unwrap().contains(student_id) {
            return Err(EngineError::Store(anyhow!(
                "simulated store failure for student {student_id}"
            )));
        }
        Ok(())
    }

    fn ensure_record_locked(
        records: &mut Vec<StudentProgressRecord>,
        student_id: &str,
        course_id: &ObjectId,
    ) -> (usize, bool) {
        if let Some(pos) = records
            .iter()
            .position(|r| r.student_id == student_id && r.course_id == *course_id)
        {
            (pos, false)
        } else {
            records.push(StudentProgressRecord::new(student_id, *course_id));
            (records.len() - 1, true)
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(
        &self,
        student_id: &str,
        course_id: &ObjectId,
    ) -> Result<Option<StudentProgressRecord>, EngineError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| r.student_id == student_id && r.course_id == *course_id)
            .cloned())
    }

    async fn find_by_course(
        &self,
        course_id: &ObjectId,
    ) -> Result<Vec<StudentProgressRecord>, EngineError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.course_id == *course_id)
            .cloned()
            .collect())
    }

    async fn find_with_passed_quiz(
        &self,
        course_id: &ObjectId,
        unit_id: &ObjectId,
    ) -> Result<Vec<StudentProgressRecord>, EngineError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| {
                r.course_id == *course_id
                    && r.entry(unit_id).map(|e| e.unit_quiz_passed).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn upsert_unit_entry(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        unit_id: &ObjectId,
        patch: UnitEntryPatch,
    ) -> Result<UpsertOutcome, EngineError> {
        self.check_fault(student_id)?;

        let mut records = self.records.lock().unwrap();
        let (pos, created_record) =
            Self::ensure_record_locked(&mut records, student_id, course_id);
        let record = &mut records[pos];

        let (created_entry, changed, unlocked_now) = match record.entry_mut(unit_id) {
            Some(entry) => {
                let (changed, unlocked_now) = apply_patch(entry, &patch)?;
                (false, changed, unlocked_now)
            }
            None => {
                let mut entry = UnitProgressEntry::locked(*unit_id);
                let (_, unlocked_now) = apply_patch(&mut entry, &patch)?;
                record.units.push(entry);
                (true, true, unlocked_now)
            }
        };
        record.updated_at = mongodb::bson::DateTime::now();

        Ok(UpsertOutcome {
            created_record,
            created_entry,
            changed,
            unlocked_now,
        })
    }

    async fn add_unlocked_video(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        video_id: &ObjectId,
    ) -> Result<bool, EngineError> {
        self.check_fault(student_id)?;

        let mut records = self.records.lock().unwrap();
        let (pos, _) = Self::ensure_record_locked(&mut records, student_id, course_id);
        let record = &mut records[pos];
        if record.unlocked_videos.contains(video_id) {
            return Ok(false);
        }
        record.unlocked_videos.push(*video_id);
        record.updated_at = mongodb::bson::DateTime::now();
        Ok(true)
    }

    async fn complete_reading_material(
        &self,
        student_id: &str,
        course_id: &ObjectId,
        material_id: &ObjectId,
    ) -> Result<bool, EngineError> {
        self.check_fault(student_id)?;

        let mut records = self.records.lock().unwrap();
        let (pos, _) = Self::ensure_record_locked(&mut records, student_id, course_id);
        let record = &mut records[pos];
        if record.completed_reading_materials.contains(material_id) {
            return Ok(false);
        }
        record.completed_reading_materials.push(*material_id);
        record.updated_at = mongodb::bson::DateTime::now();
        Ok(true)
    }
}
