use cliqsafe::{
    clock::ManualClock,
    models::{BillingCycle, MembershipRole, MembershipStatus},
    services::{CreatePlanRequest, PlanError, PlanService},
    test_utils::test_helpers,
};
use serial_test::serial;
use sqlx::SqlitePool;
use std::sync::Arc;

async fn family_plan(pool: &SqlitePool, service: &PlanService, seats: i64) -> (i64, i64) {
    let owner = test_helpers::insert_account(pool, Some("owner@example.com"), "parent")
        .await
        .unwrap();
    let plan = service
        .create_plan(CreatePlanRequest {
            owner_id: owner,
            max_members: seats,
            is_group_plan: false,
            billing_cycle: BillingCycle::Monthly,
            stripe_subscription_id: None,
        })
        .await
        .unwrap();
    (owner, plan.id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_reservations_never_overfill_a_plan() {
    let (pool, _file) = test_helpers::create_test_db_file().await.unwrap();
    let service = PlanService::new(pool.clone(), Arc::new(ManualClock::starting_now()));
    let (_, plan_id) = family_plan(&pool, &service, 4).await;

    let mut children = Vec::new();
    for _ in 0..10 {
        children.push(
            test_helpers::insert_account(&pool, None, "child")
                .await
                .unwrap(),
        );
    }

    let mut handles = Vec::new();
    for child_id in children {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .reserve_seat(plan_id, child_id, MembershipRole::Child)
                .await
        }));
    }

    let mut admitted = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(seat) => {
                assert!(seat.current_members <= seat.max_members);
                admitted += 1;
            }
            Err(PlanError::CapacityExceeded {
                slots_remaining, ..
            }) => {
                assert_eq!(slots_remaining, 0);
                refused += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // The owner holds one of the four seats.
    assert_eq!(admitted, 3);
    assert_eq!(refused, 7);

    let plan = service.find_plan(plan_id).await.unwrap().unwrap();
    let active = service
        .list_members(plan_id, Some(MembershipStatus::Active))
        .await
        .unwrap();
    assert_eq!(plan.current_members, 4);
    assert_eq!(active.len() as i64, plan.current_members);
}

#[tokio::test]
async fn reserving_twice_uses_one_seat() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = PlanService::new(pool.clone(), Arc::new(ManualClock::starting_now()));
    let (_, plan_id) = family_plan(&pool, &service, 2).await;
    let child = test_helpers::insert_account(&pool, None, "child")
        .await
        .unwrap();

    let first = service
        .reserve_seat(plan_id, child, MembershipRole::Child)
        .await
        .unwrap();
    let second = service
        .reserve_seat(plan_id, child, MembershipRole::Child)
        .await
        .unwrap();

    assert_eq!(first.current_members, 2);
    assert_eq!(second.current_members, 2);
    assert_eq!(second.slots_remaining, 0);
}

#[tokio::test]
async fn released_seat_can_be_taken_again() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = PlanService::new(pool.clone(), Arc::new(ManualClock::starting_now()));
    let (_, plan_id) = family_plan(&pool, &service, 2).await;
    let first = test_helpers::insert_account(&pool, None, "child")
        .await
        .unwrap();
    let second = test_helpers::insert_account(&pool, None, "child")
        .await
        .unwrap();

    service
        .reserve_seat(plan_id, first, MembershipRole::Child)
        .await
        .unwrap();
    assert!(matches!(
        service
            .reserve_seat(plan_id, second, MembershipRole::Child)
            .await,
        Err(PlanError::CapacityExceeded { .. })
    ));

    let availability = service.release_seat(plan_id, first).await.unwrap();
    assert_eq!(availability.current_members, 1);
    assert_eq!(availability.slots_remaining, 1);

    // Releasing again is a no-op.
    let again = service.release_seat(plan_id, first).await.unwrap();
    assert_eq!(again.current_members, 1);

    service
        .reserve_seat(plan_id, second, MembershipRole::Child)
        .await
        .unwrap();
    let membership = service.membership(plan_id, first).await.unwrap().unwrap();
    assert_eq!(membership.status, MembershipStatus::Removed);
}

#[tokio::test]
async fn unknown_plan_and_member_are_reported() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = PlanService::new(pool.clone(), Arc::new(ManualClock::starting_now()));
    let (_, plan_id) = family_plan(&pool, &service, 3).await;
    let child = test_helpers::insert_account(&pool, None, "child")
        .await
        .unwrap();

    assert!(matches!(
        service
            .reserve_seat(plan_id + 100, child, MembershipRole::Child)
            .await,
        Err(PlanError::PlanNotFound)
    ));
    assert!(matches!(
        service.release_seat(plan_id, child).await,
        Err(PlanError::MembershipNotFound)
    ));
    assert!(matches!(
        service.check_availability(plan_id + 100).await,
        Err(PlanError::PlanNotFound)
    ));
}

#[tokio::test]
async fn capacity_cannot_shrink_below_seats_in_use() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = PlanService::new(pool.clone(), Arc::new(ManualClock::starting_now()));
    let (_, plan_id) = family_plan(&pool, &service, 3).await;
    let child = test_helpers::insert_account(&pool, None, "child")
        .await
        .unwrap();
    service
        .reserve_seat(plan_id, child, MembershipRole::Child)
        .await
        .unwrap();

    assert!(matches!(
        service.change_capacity(plan_id, 1).await,
        Err(PlanError::InvalidCapacity(_))
    ));
    let plan = service.change_capacity(plan_id, 2).await.unwrap();
    assert_eq!(plan.max_members, 2);
    assert_eq!(plan.current_members, 2);
}

#[tokio::test]
async fn owner_may_hold_only_one_plan() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = PlanService::new(pool.clone(), Arc::new(ManualClock::starting_now()));
    let (owner, _) = family_plan(&pool, &service, 3).await;

    let result = service
        .create_plan(CreatePlanRequest {
            owner_id: owner,
            max_members: 10,
            is_group_plan: true,
            billing_cycle: BillingCycle::Yearly,
            stripe_subscription_id: Some("sub_123".to_string()),
        })
        .await;
    assert!(matches!(result, Err(PlanError::PlanAlreadyExists)));
}
