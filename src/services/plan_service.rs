use crate::clock::Clock;
use crate::models::{
    BillingCycle, Membership, MembershipRole, MembershipStatus, Plan, SeatAvailability,
};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

const PLAN_COLUMNS: &str = r#"
    id, owner_id, max_members, current_members, is_group_plan, billing_cycle,
    stripe_subscription_id, created_at, updated_at
"#;

const MEMBERSHIP_COLUMNS: &str =
    "id, member_id, plan_id, role, status, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Plan not found")]
    PlanNotFound,
    #[error("Plan is full ({current_members}/{max_members} seats used)")]
    CapacityExceeded {
        slots_remaining: i64,
        max_members: i64,
        current_members: i64,
    },
    #[error("Account already owns a plan")]
    PlanAlreadyExists,
    #[error("Membership not found")]
    MembershipNotFound,
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatReservation {
    pub plan_id: i64,
    pub member_id: i64,
    pub slots_remaining: i64,
    pub current_members: i64,
    pub max_members: i64,
}

#[derive(Debug, Clone)]
pub struct CreatePlanRequest {
    pub owner_id: i64,
    pub max_members: i64,
    pub is_group_plan: bool,
    pub billing_cycle: BillingCycle,
    pub stripe_subscription_id: Option<String>,
}

/// Seat accounting for family and group plans.
///
/// `plans.current_members` is only ever written by [`recompute_members`],
/// inside the same transaction as the membership change that prompted it.
#[derive(Clone)]
pub struct PlanService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl PlanService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn create_plan(&self, request: CreatePlanRequest) -> Result<Plan, PlanError> {
        if request.max_members < 1 {
            return Err(PlanError::InvalidCapacity(
                "a plan needs at least one seat".to_string(),
            ));
        }

        let now = self.clock.now_ts();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO plans
                (owner_id, max_members, current_members, is_group_plan, billing_cycle,
                 stripe_subscription_id, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.owner_id)
        .bind(request.max_members)
        .bind(request.is_group_plan)
        .bind(request.billing_cycle)
        .bind(&request.stripe_subscription_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                PlanError::PlanAlreadyExists
            } else {
                PlanError::Database(e)
            }
        })?;
        let plan_id = inserted.last_insert_rowid();

        let owner_role = if request.is_group_plan {
            MembershipRole::Admin
        } else {
            MembershipRole::Parent
        };

        sqlx::query(
            r#"
            INSERT INTO memberships (member_id, plan_id, role, status, created_at, updated_at)
            VALUES (?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(request.owner_id)
        .bind(plan_id)
        .bind(owner_role)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        recompute_members(&mut *tx, plan_id, now).await?;
        tx.commit().await?;

        tracing::info!(
            "Created plan {} for owner {} with {} seats",
            plan_id,
            request.owner_id,
            request.max_members
        );

        self.find_plan(plan_id).await?.ok_or(PlanError::PlanNotFound)
    }

    /// Admits `member_id` to the plan if a seat is free.
    ///
    /// The capacity check is folded into the membership upsert itself, so
    /// the decision and the write happen in one statement that SQLite
    /// serialises against every other writer. Reserving for a member who
    /// already holds an active seat succeeds without using another one.
    pub async fn reserve_seat(
        &self,
        plan_id: i64,
        member_id: i64,
        role: MembershipRole,
    ) -> Result<SeatReservation, PlanError> {
        let mut tx = self.pool.begin().await?;
        let seat = self.reserve_seat_in(&mut *tx, plan_id, member_id, role).await?;
        tx.commit().await?;

        tracing::info!(
            "Member {} holds a seat on plan {} ({}/{})",
            member_id,
            plan_id,
            seat.current_members,
            seat.max_members
        );
        Ok(seat)
    }

    /// [`reserve_seat`](Self::reserve_seat) on a caller-owned connection.
    /// The caller commits; on error nothing has been written.
    pub(crate) async fn reserve_seat_in(
        &self,
        conn: &mut SqliteConnection,
        plan_id: i64,
        member_id: i64,
        role: MembershipRole,
    ) -> Result<SeatReservation, PlanError> {
        let now = self.clock.now_ts();

        // An active member keeps the role they were admitted with.
        let admitted = sqlx::query(
            r#"
            INSERT INTO memberships (member_id, plan_id, role, status, created_at, updated_at)
            SELECT ?, p.id, ?, 'active', ?, ?
            FROM plans p
            WHERE p.id = ?
              AND (
                  SELECT COUNT(*) FROM memberships m
                  WHERE m.plan_id = p.id AND m.status = 'active' AND m.member_id != ?
              ) < p.max_members
            ON CONFLICT(member_id, plan_id) DO UPDATE
            SET role = CASE WHEN memberships.status = 'active'
                            THEN memberships.role ELSE excluded.role END,
                status = 'active',
                updated_at = excluded.updated_at
            "#,
        )
        .bind(member_id)
        .bind(role)
        .bind(now)
        .bind(now)
        .bind(plan_id)
        .bind(member_id)
        .execute(&mut *conn)
        .await?;

        if admitted.rows_affected() == 0 {
            let occupancy = sqlx::query_as::<_, (i64, i64)>(
                r#"
                SELECT p.max_members,
                       (SELECT COUNT(*) FROM memberships m
                        WHERE m.plan_id = p.id AND m.status = 'active')
                FROM plans p
                WHERE p.id = ?
                "#,
            )
            .bind(plan_id)
            .fetch_optional(&mut *conn)
            .await?;

            return match occupancy {
                None => Err(PlanError::PlanNotFound),
                Some((max_members, current_members)) => {
                    tracing::warn!(
                        "Seat request for member {} rejected: plan {} is full ({}/{})",
                        member_id,
                        plan_id,
                        current_members,
                        max_members
                    );
                    Err(PlanError::CapacityExceeded {
                        slots_remaining: (max_members - current_members).max(0),
                        max_members,
                        current_members,
                    })
                }
            };
        }

        let (max_members, current_members) = recompute_members(conn, plan_id, now).await?;

        Ok(SeatReservation {
            plan_id,
            member_id,
            slots_remaining: (max_members - current_members).max(0),
            current_members,
            max_members,
        })
    }

    /// Frees a member's seat. Releasing an already removed membership is a
    /// no-op.
    pub async fn release_seat(
        &self,
        plan_id: i64,
        member_id: i64,
    ) -> Result<SeatAvailability, PlanError> {
        let now = self.clock.now_ts();
        let mut tx = self.pool.begin().await?;

        let released = sqlx::query(
            r#"
            UPDATE memberships
            SET status = 'removed', updated_at = ?
            WHERE plan_id = ? AND member_id = ? AND status != 'removed'
            "#,
        )
        .bind(now)
        .bind(plan_id)
        .bind(member_id)
        .execute(&mut *tx)
        .await?;

        if released.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM memberships WHERE plan_id = ? AND member_id = ?",
            )
            .bind(plan_id)
            .bind(member_id)
            .fetch_one(&mut *tx)
            .await?;
            if exists == 0 {
                tx.rollback().await?;
                return Err(PlanError::MembershipNotFound);
            }
        }

        let (max_members, current_members) = recompute_members(&mut *tx, plan_id, now).await?;
        tx.commit().await?;

        tracing::info!("Released seat of member {} on plan {}", member_id, plan_id);

        Ok(SeatAvailability::new(max_members, current_members))
    }

    /// Advisory read of free seats; `reserve_seat` makes the binding decision.
    pub async fn check_availability(&self, plan_id: i64) -> Result<SeatAvailability, PlanError> {
        let (max_members, current_members) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT p.max_members,
                   (SELECT COUNT(*) FROM memberships m
                    WHERE m.plan_id = p.id AND m.status = 'active')
            FROM plans p
            WHERE p.id = ?
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(PlanError::PlanNotFound)?;

        Ok(SeatAvailability::new(max_members, current_members))
    }

    /// Changes the seat ceiling; never below the seats already in use.
    pub async fn change_capacity(&self, plan_id: i64, max_members: i64) -> Result<Plan, PlanError> {
        if max_members < 1 {
            return Err(PlanError::InvalidCapacity(
                "a plan needs at least one seat".to_string(),
            ));
        }

        let now = self.clock.now_ts();
        let updated = sqlx::query(
            r#"
            UPDATE plans
            SET max_members = ?, updated_at = ?
            WHERE id = ?
              AND (SELECT COUNT(*) FROM memberships m
                   WHERE m.plan_id = plans.id AND m.status = 'active') <= ?
            "#,
        )
        .bind(max_members)
        .bind(now)
        .bind(plan_id)
        .bind(max_members)
        .execute(&self.pool)
        .await?;

        let plan = self.find_plan(plan_id).await?.ok_or(PlanError::PlanNotFound)?;
        if updated.rows_affected() == 0 {
            return Err(PlanError::InvalidCapacity(format!(
                "{} seats are in use; cannot shrink to {}",
                plan.current_members, max_members
            )));
        }

        Ok(plan)
    }

    pub async fn find_plan(&self, plan_id: i64) -> Result<Option<Plan>, PlanError> {
        let plan = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan)
    }

    pub async fn plan_for_owner(&self, owner_id: i64) -> Result<Option<Plan>, PlanError> {
        let mut conn = self.pool.acquire().await?;
        plan_for_owner_in(&mut conn, owner_id).await
    }

    pub async fn membership(
        &self,
        plan_id: i64,
        member_id: i64,
    ) -> Result<Option<Membership>, PlanError> {
        let membership = sqlx::query_as::<_, Membership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE plan_id = ? AND member_id = ?"
        ))
        .bind(plan_id)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    pub async fn list_members(
        &self,
        plan_id: i64,
        status: Option<MembershipStatus>,
    ) -> Result<Vec<Membership>, PlanError> {
        let members = sqlx::query_as::<_, Membership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
             WHERE plan_id = ? AND (? IS NULL OR status = ?)
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(plan_id)
        .bind(status)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }
}

pub(crate) async fn plan_for_owner_in(
    conn: &mut SqliteConnection,
    owner_id: i64,
) -> Result<Option<Plan>, PlanError> {
    let plan = sqlx::query_as::<_, Plan>(&format!(
        "SELECT {PLAN_COLUMNS} FROM plans WHERE owner_id = ?"
    ))
    .bind(owner_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(plan)
}

/// Rewrites the cached member count from the membership rows and returns
/// `(max_members, current_members)`.
async fn recompute_members(
    conn: &mut SqliteConnection,
    plan_id: i64,
    now: i64,
) -> Result<(i64, i64), PlanError> {
    let counts = sqlx::query_as::<_, (i64, i64)>(
        r#"
        UPDATE plans
        SET current_members = (
                SELECT COUNT(*) FROM memberships
                WHERE plan_id = ? AND status = 'active'
            ),
            updated_at = ?
        WHERE id = ?
        RETURNING max_members, current_members
        "#,
    )
    .bind(plan_id)
    .bind(now)
    .bind(plan_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(PlanError::PlanNotFound)?;

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::test_utils::{create_test_pool, test_helpers};

    async fn service_with_owner() -> (PlanService, SqlitePool, i64) {
        let pool = create_test_pool().await;
        let owner = test_helpers::insert_account(&pool, Some("owner@example.com"), "parent")
            .await
            .expect("owner");
        (PlanService::new(pool.clone(), Arc::new(SystemClock)), pool, owner)
    }

    fn family_plan(owner_id: i64, max_members: i64) -> CreatePlanRequest {
        CreatePlanRequest {
            owner_id,
            max_members,
            is_group_plan: false,
            billing_cycle: BillingCycle::Monthly,
            stripe_subscription_id: None,
        }
    }

    #[tokio::test]
    async fn owner_takes_first_seat() {
        let (service, _pool, owner) = service_with_owner().await;
        let plan = service
            .create_plan(family_plan(owner, 4))
            .await
            .expect("plan");

        assert_eq!(plan.current_members, 1);
        let membership = service
            .membership(plan.id, owner)
            .await
            .expect("query")
            .expect("owner membership");
        assert_eq!(membership.role, MembershipRole::Parent);
        assert_eq!(membership.status, MembershipStatus::Active);
    }

    #[tokio::test]
    async fn second_plan_for_owner_is_rejected() {
        let (service, _pool, owner) = service_with_owner().await;
        service
            .create_plan(family_plan(owner, 2))
            .await
            .expect("plan");

        let again = service.create_plan(family_plan(owner, 2)).await;
        assert!(matches!(again, Err(PlanError::PlanAlreadyExists)));
    }

    #[tokio::test]
    async fn reserving_twice_uses_one_seat() {
        let (service, pool, owner) = service_with_owner().await;
        let plan = service
            .create_plan(family_plan(owner, 3))
            .await
            .expect("plan");
        let child = test_helpers::insert_account(&pool, None, "child")
            .await
            .expect("child");

        service
            .reserve_seat(plan.id, child, MembershipRole::Child)
            .await
            .expect("first");
        let again = service
            .reserve_seat(plan.id, child, MembershipRole::Child)
            .await
            .expect("second");

        assert_eq!(again.current_members, 2);
        assert_eq!(again.slots_remaining, 1);
    }

    #[tokio::test]
    async fn shrinking_below_occupancy_is_refused() {
        let (service, pool, owner) = service_with_owner().await;
        let plan = service
            .create_plan(family_plan(owner, 3))
            .await
            .expect("plan");
        let child = test_helpers::insert_account(&pool, None, "child")
            .await
            .expect("child");
        service
            .reserve_seat(plan.id, child, MembershipRole::Child)
            .await
            .expect("reserve");

        let shrink = service.change_capacity(plan.id, 1).await;
        assert!(matches!(shrink, Err(PlanError::InvalidCapacity(_))));

        let resized = service.change_capacity(plan.id, 2).await.expect("resize");
        assert_eq!(resized.max_members, 2);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (service, pool, owner) = service_with_owner().await;
        let plan = service
            .create_plan(family_plan(owner, 3))
            .await
            .expect("plan");
        let child = test_helpers::insert_account(&pool, None, "child")
            .await
            .expect("child");
        service
            .reserve_seat(plan.id, child, MembershipRole::Child)
            .await
            .expect("reserve");

        let first = service.release_seat(plan.id, child).await.expect("release");
        let second = service.release_seat(plan.id, child).await.expect("again");
        assert_eq!(first.current_members, 1);
        assert_eq!(second.current_members, 1);

        let missing = service.release_seat(plan.id, 9999).await;
        assert!(matches!(missing, Err(PlanError::MembershipNotFound)));
    }

    #[tokio::test]
    async fn reserving_an_active_member_keeps_their_role() {
        let (service, _pool, owner) = service_with_owner().await;
        let plan = service
            .create_plan(family_plan(owner, 3))
            .await
            .expect("plan");

        let seat = service
            .reserve_seat(plan.id, owner, MembershipRole::Child)
            .await
            .expect("reserve");
        assert_eq!(seat.current_members, 1);

        let membership = service
            .membership(plan.id, owner)
            .await
            .expect("query")
            .expect("owner membership");
        assert_eq!(membership.role, MembershipRole::Parent);
    }

    #[tokio::test]
    async fn returning_member_takes_the_requested_role() {
        let (service, pool, owner) = service_with_owner().await;
        let plan = service
            .create_plan(family_plan(owner, 3))
            .await
            .expect("plan");
        let member = test_helpers::insert_account(&pool, Some("aunt@example.com"), "parent")
            .await
            .expect("member");

        service
            .reserve_seat(plan.id, member, MembershipRole::Parent)
            .await
            .expect("reserve");
        service.release_seat(plan.id, member).await.expect("release");
        service
            .reserve_seat(plan.id, member, MembershipRole::Member)
            .await
            .expect("rejoin");

        let membership = service
            .membership(plan.id, member)
            .await
            .expect("query")
            .expect("membership");
        assert_eq!(membership.role, MembershipRole::Member);
        assert_eq!(membership.status, MembershipStatus::Active);
    }
}
