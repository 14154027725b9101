use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::utils::time::bson_to_iso;

/// A course as stored in the `courses` collection. Courses written by the
/// legacy service use camelCase keys, so aliases are accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    /// Whether unit-based gating applies at all. Flat, ungated video lists
    /// keep this false and the unlock engine never touches their progress.
    #[serde(rename = "hasUnits", alias = "has_units", default)]
    pub has_units: bool,
    /// Ordered collection of unit references.
    #[serde(default)]
    pub units: Vec<ObjectId>,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: mongodb::bson::DateTime,
    #[serde(rename = "updatedAt", alias = "updated_at")]
    pub updated_at: mongodb::bson::DateTime,
}

/// An ordered chapter of a course; the atomic gating granularity.
/// `order` is unique within a course and order 0 is eligible immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub course_id: ObjectId,
    pub title: String,
    pub order: i32,
    #[serde(default)]
    pub videos: Vec<ObjectId>,
    #[serde(default)]
    pub quizzes: Vec<ObjectId>,
    #[serde(default)]
    pub reading_materials: Vec<ObjectId>,
    #[serde(default)]
    pub quiz_pools: Vec<ObjectId>,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: mongodb::bson::DateTime,
    #[serde(rename = "updatedAt", alias = "updated_at")]
    pub updated_at: mongodb::bson::DateTime,
}

/// A video belongs to a course and optionally to one unit; `sequence`
/// orders videos within their unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub course_id: ObjectId,
    #[serde(default)]
    pub unit_id: Option<ObjectId>,
    pub title: String,
    #[serde(default)]
    pub sequence: i32,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: mongodb::bson::DateTime,
}

/// Membership fact owned by the enrollment subsystem; the engine only
/// reads these to resolve "students enrolled in course X".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub course_id: ObjectId,
    pub student_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UnitCreateRequest {
    pub title: String,
    pub order: i32,
}

#[derive(Debug, Deserialize)]
pub struct VideoCreateRequest {
    pub title: String,
    #[serde(default)]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub sequence: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct UnitSummary {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub order: i32,
    pub created_at: String,
}

impl UnitSummary {
    pub fn from_record(unit: &UnitRecord) -> Self {
        Self {
            id: unit.id.to_hex(),
            course_id: unit.course_id.to_hex(),
            title: unit.title.clone(),
            order: unit.order,
            created_at: bson_to_iso(&unit.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VideoSummary {
    pub id: String,
    pub course_id: String,
    pub unit_id: Option<String>,
    pub title: String,
    pub sequence: i32,
}

impl VideoSummary {
    pub fn from_record(video: &VideoRecord) -> Self {
        Self {
            id: video.id.to_hex(),
            course_id: video.course_id.to_hex(),
            unit_id: video.unit_id.map(|id| id.to_hex()),
            title: video.title.clone(),
            sequence: video.sequence,
        }
    }
}
