//! Engine-level tests for the unlock propagator: order-0 convergence,
//! no-skip ordering, idempotent recomputation, first-video consistency and
//! partial-failure isolation.

mod common;

use common::{create_test_app, seed_unit, seed_video, TestContext};
use coursegate_api::models::{UnitEntryPatch, UnitStatus};
use coursegate_api::services::unlock_service::UnlockService;
use coursegate_api::services::ProgressStore;

fn unlock_service(ctx: &TestContext) -> UnlockService {
    UnlockService::with_stores(ctx.catalog.clone(), ctx.progress.clone())
}

#[tokio::test]
async fn order_zero_unlocks_when_enrollment_exists_first() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");
    ctx.catalog.enroll(course_id, "student-2");

    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let outcome = unlock_service(&ctx).on_unit_created(&unit).await.unwrap();

    assert_eq!(outcome.students_touched, 2);
    assert_eq!(outcome.units_unlocked, 2);
    assert_eq!(outcome.failed_students, 0);

    for student in ["student-1", "student-2"] {
        let record = ctx
            .progress
            .get(student, &course_id)
            .await
            .unwrap()
            .expect("record should exist");
        let entry = record.entry(&unit.id).expect("entry should exist");
        assert!(entry.unlocked);
        assert_eq!(entry.status, UnitStatus::InProgress);
        assert!(entry.unlocked_at.is_some());
    }
}

#[tokio::test]
async fn order_zero_converges_when_unit_exists_first() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);

    // Unit created with nobody enrolled: a no-op, not an error.
    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let service = unlock_service(&ctx);
    let outcome = service.on_unit_created(&unit).await.unwrap();
    assert_eq!(outcome.students_touched, 0);
    assert_eq!(outcome.units_unlocked, 0);

    // Enrollment arrives later; the repair path converges to the same state.
    ctx.catalog.enroll(course_id, "student-1");
    let recalc = service.recalculate(&course_id).await.unwrap();
    assert_eq!(recalc.students_updated, 1);
    assert_eq!(recalc.units_unlocked, 1);

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .expect("record should exist");
    assert!(record.entry(&unit.id).unwrap().unlocked);
}

#[tokio::test]
async fn later_units_never_unlock_out_of_order() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let service = unlock_service(&ctx);
    let unit0 = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let unit1 = seed_unit(&ctx.catalog, course_id, "Unit 1", 1).await;
    let unit2 = seed_unit(&ctx.catalog, course_id, "Unit 2", 2).await;
    service.on_unit_created(&unit0).await.unwrap();
    service.on_unit_created(&unit1).await.unwrap();
    service.on_unit_created(&unit2).await.unwrap();

    // Passing unit 0's quiz unlocks unit 1 and nothing further; unit 2
    // stays absent until unit 1's own quiz is passed.
    service
        .on_quiz_result("student-1", &course_id, &unit0.id, true)
        .await
        .unwrap();

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.entry(&unit0.id).unwrap().unlocked);
    assert!(record.entry(&unit1.id).unwrap().unlocked);
    assert!(record.entry(&unit2.id).is_none());

    // Invariant: any unlocked unit at order i > 0 has a passed predecessor.
    let units = [&unit0, &unit1, &unit2];
    for window in units.windows(2) {
        let (prev, next) = (window[0], window[1]);
        let next_unlocked = record.entry(&next.id).map(|e| e.unlocked).unwrap_or(false);
        if next_unlocked {
            assert!(record.entry(&prev.id).unwrap().unit_quiz_passed);
        }
    }
}

#[tokio::test]
async fn failed_quiz_does_not_unlock_next_unit() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let service = unlock_service(&ctx);
    let unit0 = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let unit1 = seed_unit(&ctx.catalog, course_id, "Unit 1", 1).await;
    service.on_unit_created(&unit0).await.unwrap();
    service.on_unit_created(&unit1).await.unwrap();

    let outcome = service
        .on_quiz_result("student-1", &course_id, &unit0.id, false)
        .await
        .unwrap();
    assert_eq!(outcome.units_unlocked, 0);

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    let entry0 = record.entry(&unit0.id).unwrap();
    assert!(entry0.unit_quiz_completed);
    assert!(!entry0.unit_quiz_passed);
    assert_eq!(entry0.quiz_attempts, 1);
    assert!(record.entry(&unit1.id).is_none());
}

#[tokio::test]
async fn recalculate_twice_is_idempotent() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let service = unlock_service(&ctx);
    let unit0 = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    seed_unit(&ctx.catalog, course_id, "Unit 1", 1).await;
    seed_unit(&ctx.catalog, course_id, "Unit 2", 2).await;

    // Record the quiz pass directly, without eager propagation, to model a
    // propagation step that was lost before the repair run.
    service.on_unit_created(&unit0).await.unwrap();
    ctx.progress
        .upsert_unit_entry(
            "student-1",
            &course_id,
            &unit0.id,
            UnitEntryPatch::quiz_result(true),
        )
        .await
        .unwrap();

    let first = service.recalculate(&course_id).await.unwrap();
    assert_eq!(first.students_updated, 1);
    assert_eq!(first.units_unlocked, 1);
    assert_eq!(first.total_students, 1);
    assert_eq!(first.total_units, 3);

    let second = service.recalculate(&course_id).await.unwrap();
    assert_eq!(second.students_updated, 0);
    assert_eq!(second.units_unlocked, 0);
    assert_eq!(second.total_students, 1);
    assert_eq!(second.total_units, 3);
}

#[tokio::test]
async fn unlocking_grants_lowest_sequence_video() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let later = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 2", 2).await;
    let first = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 1", 1).await;

    let outcome = unlock_service(&ctx).on_unit_created(&unit).await.unwrap();
    assert_eq!(outcome.videos_unlocked, 1);

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.has_unlocked_video(&first.id));
    assert!(!record.has_unlocked_video(&later.id));
}

#[tokio::test]
async fn first_video_created_after_unit_closes_the_gap() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let service = unlock_service(&ctx);
    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    service.on_unit_created(&unit).await.unwrap();

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.unlocked_videos.is_empty());

    let video = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 1", 1).await;
    let outcome = service.on_video_created(&video).await.unwrap();
    assert_eq!(outcome.videos_unlocked, 1);

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.has_unlocked_video(&video.id));

    // A second, higher-sequence video is not auto-granted.
    let second = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 2", 2).await;
    let outcome = service.on_video_created(&second).await.unwrap();
    assert_eq!(outcome.videos_unlocked, 0);
}

#[tokio::test]
async fn recalculate_restores_a_lost_first_video_grant() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let video = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 1", 1).await;

    // The unlock write landed but the first-video grant was lost.
    ctx.progress
        .upsert_unit_entry("student-1", &course_id, &unit.id, UnitEntryPatch::unlock())
        .await
        .unwrap();
    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.entry(&unit.id).unwrap().unlocked);
    assert!(record.unlocked_videos.is_empty());

    let service = unlock_service(&ctx);
    let outcome = service.recalculate(&course_id).await.unwrap();
    assert_eq!(outcome.units_unlocked, 0);
    assert_eq!(outcome.videos_unlocked, 1);
    assert_eq!(outcome.students_updated, 1);

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.has_unlocked_video(&video.id));

    let again = service.recalculate(&course_id).await.unwrap();
    assert_eq!(again.videos_unlocked, 0);
    assert_eq!(again.students_updated, 0);
}

#[tokio::test]
async fn replayed_unit_trigger_restores_a_lost_first_video_grant() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let video = seed_video(&ctx.catalog, course_id, Some(unit.id), "Part 1", 1).await;

    ctx.progress
        .upsert_unit_entry("student-1", &course_id, &unit.id, UnitEntryPatch::unlock())
        .await
        .unwrap();

    // A replay of the creation trigger applies the grant without counting
    // the unit as newly unlocked.
    let outcome = unlock_service(&ctx).on_unit_created(&unit).await.unwrap();
    assert_eq!(outcome.units_unlocked, 0);
    assert_eq!(outcome.videos_unlocked, 1);

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.has_unlocked_video(&video.id));
}

#[tokio::test]
async fn course_level_video_is_granted_to_everyone() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Flat course", false);
    ctx.catalog.enroll(course_id, "student-1");
    ctx.catalog.enroll(course_id, "student-2");

    let video = seed_video(&ctx.catalog, course_id, None, "Welcome", 0).await;
    let outcome = unlock_service(&ctx).on_video_created(&video).await.unwrap();

    assert_eq!(outcome.students_touched, 2);
    assert_eq!(outcome.videos_unlocked, 2);
    for student in ["student-1", "student-2"] {
        let record = ctx.progress.get(student, &course_id).await.unwrap().unwrap();
        assert!(record.has_unlocked_video(&video.id));
    }
}

#[tokio::test]
async fn one_failing_student_does_not_abort_the_batch() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-a");
    ctx.catalog.enroll(course_id, "student-b");
    ctx.progress.fail_writes_for("student-a");

    let unit = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let outcome = unlock_service(&ctx).on_unit_created(&unit).await.unwrap();

    assert_eq!(outcome.failed_students, 1);
    assert_eq!(outcome.units_unlocked, 1);

    assert!(ctx.progress.get("student-a", &course_id).await.unwrap().is_none());
    let record = ctx
        .progress
        .get("student-b", &course_id)
        .await
        .unwrap()
        .expect("student-b should still be processed");
    assert!(record.entry(&unit.id).unwrap().unlocked);

    // The skipped student self-heals on the next repair run.
    ctx.progress.clear_failures();
    let recalc = unlock_service(&ctx).recalculate(&course_id).await.unwrap();
    assert_eq!(recalc.students_updated, 1);
    assert_eq!(recalc.failed_students, 0);
    let record = ctx
        .progress
        .get("student-a", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.entry(&unit.id).unwrap().unlocked);
}

#[tokio::test]
async fn quiz_pass_eagerly_unlocks_next_unit_with_its_first_video() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let service = unlock_service(&ctx);
    let unit0 = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let unit1 = seed_unit(&ctx.catalog, course_id, "Unit 1", 1).await;
    let video1 = seed_video(&ctx.catalog, course_id, Some(unit1.id), "Part 1", 1).await;
    service.on_unit_created(&unit0).await.unwrap();
    service.on_unit_created(&unit1).await.unwrap();

    let outcome = service
        .on_quiz_result("student-1", &course_id, &unit0.id, true)
        .await
        .unwrap();
    assert_eq!(outcome.units_unlocked, 1);
    assert_eq!(outcome.videos_unlocked, 1);

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    let entry0 = record.entry(&unit0.id).unwrap();
    assert_eq!(entry0.status, UnitStatus::Completed);
    assert!(entry0.unit_quiz_passed);
    assert!(record.entry(&unit1.id).unwrap().unlocked);
    assert!(record.has_unlocked_video(&video1.id));
}

#[tokio::test]
async fn retroactive_unit_unlocks_for_students_who_already_passed() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");
    ctx.catalog.enroll(course_id, "student-2");

    let service = unlock_service(&ctx);
    let unit0 = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    service.on_unit_created(&unit0).await.unwrap();

    // Only student-1 passes before unit 1 exists.
    service
        .on_quiz_result("student-1", &course_id, &unit0.id, true)
        .await
        .unwrap();

    let unit1 = seed_unit(&ctx.catalog, course_id, "Unit 1", 1).await;
    let outcome = service.on_unit_created(&unit1).await.unwrap();
    assert_eq!(outcome.units_unlocked, 1);

    let passed = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(passed.entry(&unit1.id).unwrap().unlocked);

    let other = ctx
        .progress
        .get("student-2", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(other.entry(&unit1.id).is_none());
}

#[tokio::test]
async fn unit_without_predecessor_is_a_transient_no_op() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    // Order 2 created while order 1 does not exist yet.
    let unit2 = seed_unit(&ctx.catalog, course_id, "Unit 2", 2).await;
    let outcome = unlock_service(&ctx).on_unit_created(&unit2).await.unwrap();
    assert_eq!(outcome.students_touched, 0);
    assert_eq!(outcome.units_unlocked, 0);
}

#[tokio::test]
async fn ungated_course_is_never_touched_by_recalculate() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Flat course", false);
    ctx.catalog.enroll(course_id, "student-1");

    let outcome = unlock_service(&ctx).recalculate(&course_id).await.unwrap();
    assert_eq!(outcome.total_units, 0);
    assert_eq!(outcome.total_students, 0);
    assert_eq!(outcome.units_unlocked, 0);
    assert!(ctx.progress.get("student-1", &course_id).await.unwrap().is_none());
}

#[tokio::test]
async fn scenario_stepwise_recalculate_matches_expected_counts() {
    let ctx = create_test_app();
    let course_id = ctx.catalog.add_course("Algebra", false);
    ctx.catalog.enroll(course_id, "student-1");

    let service = unlock_service(&ctx);
    let unit0 = seed_unit(&ctx.catalog, course_id, "Unit 0", 0).await;
    let unit1 = seed_unit(&ctx.catalog, course_id, "Unit 1", 1).await;
    let unit2 = seed_unit(&ctx.catalog, course_id, "Unit 2", 2).await;
    service.on_unit_created(&unit0).await.unwrap();

    // Quiz pass recorded without eager propagation (lost trigger).
    ctx.progress
        .upsert_unit_entry(
            "student-1",
            &course_id,
            &unit0.id,
            UnitEntryPatch::quiz_result(true),
        )
        .await
        .unwrap();

    let outcome = service.recalculate(&course_id).await.unwrap();
    assert_eq!(outcome.units_unlocked, 1);
    assert_eq!(outcome.students_updated, 1);

    let record = ctx
        .progress
        .get("student-1", &course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.entry(&unit1.id).unwrap().unlocked);
    assert!(record.entry(&unit2.id).is_none());

    let again = service.recalculate(&course_id).await.unwrap();
    assert_eq!(again.units_unlocked, 0);
    assert_eq!(again.students_updated, 0);
}
