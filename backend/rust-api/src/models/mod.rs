pub mod course;
pub mod progress;

pub use course::{CourseRecord, EnrollmentRecord, UnitRecord, VideoRecord};
pub use progress::{StudentProgressRecord, UnitEntryPatch, UnitProgressEntry, UnitStatus};
