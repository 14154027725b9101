use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed status set for a per-unit progress entry. Transitions are
/// validated at the store boundary: once a unit is in progress or
/// completed it can never be re-locked by an external write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnitStatus {
    #[serde(rename = "locked")]
    Locked,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Locked => "locked",
            UnitStatus::InProgress => "in-progress",
            UnitStatus::Completed => "completed",
        }
    }

    pub fn can_transition_to(&self, next: UnitStatus) -> bool {
        *self == next
            || matches!(
                (self, next),
                (UnitStatus::Locked, UnitStatus::InProgress)
                    | (UnitStatus::Locked, UnitStatus::Completed)
                    | (UnitStatus::InProgress, UnitStatus::Completed)
            )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().replace('_', "-").as_str() {
            "locked" => Ok(UnitStatus::Locked),
            "in-progress" | "inprogress" => Ok(UnitStatus::InProgress),
            "completed" => Ok(UnitStatus::Completed),
            _ => Err(format!("Invalid unit status: {}", value)),
        }
    }
}

/// Per-unit progress carried inside a StudentProgressRecord, keyed by
/// `unit_id`, ordered by insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitProgressEntry {
    pub unit_id: ObjectId,
    pub status: UnitStatus,
    pub unlocked: bool,
    #[serde(default)]
    pub unlocked_at: Option<mongodb::bson::DateTime>,
    #[serde(default)]
    pub videos_watched: Vec<ObjectId>,
    #[serde(default)]
    pub quiz_attempts: i32,
    #[serde(default)]
    pub unit_quiz_completed: bool,
    #[serde(default)]
    pub unit_quiz_passed: bool,
    #[serde(default)]
    pub all_videos_watched: bool,
}

impl UnitProgressEntry {
    pub fn locked(unit_id: ObjectId) -> Self {
        Self {
            unit_id,
            status: UnitStatus::Locked,
            unlocked: false,
            unlocked_at: None,
            videos_watched: Vec::new(),
            quiz_attempts: 0,
            unit_quiz_completed: false,
            unit_quiz_passed: false,
            all_videos_watched: false,
        }
    }
}

/// One record per (student, course) pair; the mutable heart of the
/// unlock engine. At most one record per pair exists at any time (the
/// store checks before creating, never blind-inserts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProgressRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub student_id: String,
    pub course_id: ObjectId,
    #[serde(default)]
    pub units: Vec<UnitProgressEntry>,
    #[serde(default)]
    pub unlocked_videos: Vec<ObjectId>,
    #[serde(default)]
    pub completed_reading_materials: Vec<ObjectId>,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: mongodb::bson::DateTime,
    #[serde(rename = "updatedAt", alias = "updated_at")]
    pub updated_at: mongodb::bson::DateTime,
}

impl StudentProgressRecord {
    pub fn new(student_id: impl Into<String>, course_id: ObjectId) -> Self {
        let now = mongodb::bson::DateTime::now();
        Self {
            id: ObjectId::new(),
            student_id: student_id.into(),
            course_id,
            units: Vec::new(),
            unlocked_videos: Vec::new(),
            completed_reading_materials: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn entry(&self, unit_id: &ObjectId) -> Option<&UnitProgressEntry> {
        self.units.iter().find(|entry| entry.unit_id == *unit_id)
    }

    pub fn entry_mut(&mut self, unit_id: &ObjectId) -> Option<&mut UnitProgressEntry> {
        self.units
            .iter_mut()
            .find(|entry| entry.unit_id == *unit_id)
    }

    pub fn has_unlocked_video(&self, video_id: &ObjectId) -> bool {
        self.unlocked_videos.contains(video_id)
    }
}

/// Field-wise merge applied to a unit entry by the store. Absent fields
/// are left untouched, so two writers patching different fields of the
/// same entry do not corrupt each other.
#[derive(Debug, Clone, Default)]
pub struct UnitEntryPatch {
    pub status: Option<UnitStatus>,
    pub unlocked: Option<bool>,
    pub unit_quiz_completed: Option<bool>,
    pub unit_quiz_passed: Option<bool>,
    pub all_videos_watched: Option<bool>,
    /// Added to `videos_watched` with set semantics.
    pub watched_video: Option<ObjectId>,
    pub increment_quiz_attempts: bool,
}

impl UnitEntryPatch {
    /// The unlock transition: status in-progress, unlocked true.
    pub fn unlock() -> Self {
        Self {
            status: Some(UnitStatus::InProgress),
            unlocked: Some(true),
            ..Self::default()
        }
    }

    /// Quiz-grading collaborator write. A pass also completes the unit.
    pub fn quiz_result(passed: bool) -> Self {
        Self {
            status: passed.then_some(UnitStatus::Completed),
            unit_quiz_completed: Some(true),
            unit_quiz_passed: Some(passed),
            increment_quiz_attempts: true,
            ..Self::default()
        }
    }

    pub fn video_watched(video_id: ObjectId) -> Self {
        Self {
            watched_video: Some(video_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.unlocked.is_none()
            && self.unit_quiz_completed.is_none()
            && self.unit_quiz_passed.is_none()
            && self.all_videos_watched.is_none()
            && self.watched_video.is_none()
            && !self.increment_quiz_attempts
    }
}
