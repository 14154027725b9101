//! Read-projection tests: locked placeholders, content filtering by
//! unlocked videos, derived completion counters.

mod common;

use common::{create_test_app, seed_unit, seed_video, TestContext};
use coursegate_api::services::unlock_service::UnlockService;
use coursegate_api::services::view_service::ViewService;
use coursegate_api::services::{EngineError, ProgressStore};

fn unlock_service(ctx: &TestContext) -> UnlockService {
    UnlockService::with_stores(ctx.catalog.clone(), ctx.progress.clone())
}

fn view_service(ctx: &TestContext) -> ViewService {
    ViewService::with_stores(ctx.catalog.clone(), ctx.progress.clone())
}

#[tokio::test]
async fn enrolled_student_without_record_sees_all_units_locked() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");
    let unit0 = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    seed_video(&ctx.catalog, course_id, Some(unit0.id), "Part 1", 1).await;
    seed_unit(&ctx.catalog, course_id, "Unit 1", 1).await;

    let view = view_service(&ctx)
        .student_view("student-1", &course_id)
        .await
        .unwrap();

    assert_eq!(view.course_title, "Algebra");
    assert_eq!(view.units.len(), 2);
    for unit in &view.units {
        assert!(!unit.unlocked);
        assert!(unit.unlocked_at.is_none());
        assert!(unit.videos.is_empty());
        assert!(unit.reading_materials.is_empty());
        assert!(unit.quizzes.is_empty());
        assert_eq!(unit.total_videos, 0);
        assert_eq!(unit.videos_completed, 0);
        assert_eq!(unit.quiz_attempts, 0);
    }
}

#[tokio::test]
async fn unlocked_unit_exposes_only_granted_videos() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let first = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 1", 1).await;
    let second = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 2", 2).await;
    unlock_service(&ctx).on_unit_created(&unit).await.unwrap();

    let view = view_service(&ctx)
        .student_view("student-1", &course_id)
        .await
        .unwrap();

    let unit_view = &view.units[0];
    assert!(unit_view.unlocked);
    assert!(unit_view.unlocked_at.is_some());
    assert_eq!(unit_view.total_videos, 2);
    // Only the granted first video appears; the second stays hidden.
    assert_eq!(unit_view.videos.len(), 1);
    assert_eq!(unit_view.videos[0].id, first.id.to_hex());
    assert!(!unit_view.videos[0].watched);
    assert!(unit_view
        .videos
        .iter()
        .all(|video| video.id != second.id.to_hex()));
}

#[tokio::test]
async fn watched_videos_drive_completion_counters() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let first = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 1", 1).await;
    seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 2", 2).await;
    unlock_service(&ctx).on_unit_created(&unit).await.unwrap();

    ctx.progress
        .upsert_unit_entry(
            "student-1",
            &course_id,
            &unit.id,
            coursegate_api::models::UnitEntryPatch::video_watched(first.id),
        )
        .await
        .unwrap();

    let view = view_service(&ctx)
        .student_view("student-1", &course_id)
        .await
        .unwrap();
    let unit_view = &view.units[0];
    assert_eq!(unit_view.videos_completed, 1);
    assert_eq!(unit_view.total_videos, 2);
    assert!(unit_view.videos[0].watched);
}

#[tokio::test]
async fn reading_materials_are_annotated_with_completion() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let done = ctx.catalog.attach_reading_material(&unit.id);
    let pending = ctx.catalog.attach_reading_material(&unit.id);
    unlock_service(&ctx).on_unit_created(&unit).await.unwrap();

    ctx.progress
        .complete_reading_material("student-1", &course_id, &done)
        .await
        .unwrap();

    let view = view_service(&ctx)
        .student_view("student-1", &course_id)
        .await
        .unwrap();
    let unit_view = &view.units[0];
    assert_eq!(unit_view.reading_materials.len(), 2);
    assert_eq!(unit_view.reading_materials_completed, 1);
    for material in &unit_view.reading_materials {
        if material.id == done.to_hex() {
            assert!(material.completed);
        } else {
            assert_eq!(material.id, pending.to_hex());
            assert!(!material.completed);
        }
    }
}

#[tokio::test]
async fn quiz_pass_is_reflected_in_projection() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let service = unlock_service(&ctx);
    let unit0 = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let quiz = ctx.catalog.attach_quiz(&unit0.id);
    let unit1 = seed_unit(&ctx.catalog, course_id, "Unit 1", 1).await;
    service.on_unit_created(&unit0).await.unwrap();
    service.on_unit_created(&unit1).await.unwrap();
    service
        .on_quiz_result("student-1", &course_id, &unit0.id, true)
        .await
        .unwrap();

    let view = view_service(&ctx)
        .student_view("student-1", &course_id)
        .await
        .unwrap();

    let unit0_view = &view.units[0];
    assert_eq!(unit0_view.quizzes, vec![quiz.to_hex()]);
    assert_eq!(unit0_view.quizzes_passed, 1);
    assert_eq!(unit0_view.quiz_attempts, 1);
    assert!(view.units[1].unlocked);
}

#[tokio::test]
async fn non_enrolled_student_is_not_found() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let err = view_service(&ctx)
        .student_view("stranger", &course_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn unknown_course_is_not_found() {
    let ctx = create_test_app();
    let missing = mongodb::bson::oid::ObjectId::new();

    let err = view_service(&ctx)
        .student_view("student-1", &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}
