//! Seat bookkeeping for schedules.
//!
//! `enrolled_count` is never read, modified and written back. Every change is
//! a single conditional `UPDATE` so concurrent joins and drops cannot lose
//! increments or push the count below zero.

use crate::entities::schedule;
use crate::errors::ServiceError;
use metrics::counter;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::debug;
use uuid::Uuid;

/// Takes one seat in a schedule.
///
/// Without `enforce_capacity` the increment is unconditional. With it, the
/// statement only matches while `enrolled_count < max_slots` and a full
/// schedule surfaces as `Conflict`.
pub async fn join<C>(conn: &C, schedule_id: Uuid, enforce_capacity: bool) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let mut update = schedule::Entity::update_many()
        .col_expr(
            schedule::Column::EnrolledCount,
            Expr::col(schedule::Column::EnrolledCount).add(1),
        )
        .filter(schedule::Column::Id.eq(schedule_id));

    if enforce_capacity {
        update = update.filter(
            Expr::col(schedule::Column::EnrolledCount).lt(Expr::col(schedule::Column::MaxSlots)),
        );
    }

    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        return Err(if enforce_capacity {
            counter!("enrollment_capacity.rejected_full", 1);
            ServiceError::Conflict(format!("Schedule {} has no available slots", schedule_id))
        } else {
            ServiceError::NotFound(format!("Schedule {} not found", schedule_id))
        });
    }

    debug!(%schedule_id, "seat taken");
    Ok(())
}

/// Releases one seat, never going below zero. Returns whether a seat was
/// actually released.
pub async fn leave<C>(conn: &C, schedule_id: Uuid) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let result = schedule::Entity::update_many()
        .col_expr(
            schedule::Column::EnrolledCount,
            Expr::col(schedule::Column::EnrolledCount).sub(1),
        )
        .filter(schedule::Column::Id.eq(schedule_id))
        .filter(schedule::Column::EnrolledCount.gt(0))
        .exec(conn)
        .await?;

    let released = result.rows_affected > 0;
    debug!(%schedule_id, released, "seat released");
    Ok(released)
}

/// Seats still open. Negative when a schedule was overbooked while capacity
/// was not enforced.
pub fn available_slots(schedule: &schedule::Model) -> i32 {
    schedule.max_slots - schedule.enrolled_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::subject;
    use chrono::{NaiveTime, Utc};
    use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

    async fn setup(max_slots: i32, enrolled_count: i32) -> (DatabaseConnection, Uuid) {
        let db = establish_connection_with_config(&DbConfig::in_memory())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();

        let now = Utc::now();
        let subject = subject::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set("CS101".into()),
            title: Set("Intro to Computing".into()),
            description: Set(String::new()),
            units: Set(3),
            year_level: Set(1),
            semester: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .unwrap();

        let schedule = schedule::ActiveModel {
            id: Set(Uuid::new_v4()),
            subject_id: Set(subject.id),
            section: Set("A".into()),
            instructor: Set("Staff".into()),
            academic_year: Set("2024-2025".into()),
            semester: Set(1),
            days: Set("M,W,F".into()),
            time_start: Set(NaiveTime::from_hms_opt(8, 0, 0).unwrap()),
            time_end: Set(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            room: Set("R1".into()),
            max_slots: Set(max_slots),
            enrolled_count: Set(enrolled_count),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .unwrap();

        (db, schedule.id)
    }

    async fn count(db: &DatabaseConnection, id: Uuid) -> i32 {
        schedule::Entity::find_by_id(id)
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .enrolled_count
    }

    #[tokio::test]
    async fn join_is_unconditional_by_default() {
        let (db, id) = setup(1, 1).await;
        join(&db, id, false).await.unwrap();
        assert_eq!(count(&db, id).await, 2);
    }

    #[tokio::test]
    async fn enforced_join_rejects_full_schedule() {
        let (db, id) = setup(2, 1).await;
        join(&db, id, true).await.unwrap();
        let err = join(&db, id, true).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(count(&db, id).await, 2);
    }

    #[tokio::test]
    async fn leave_floors_at_zero() {
        let (db, id) = setup(40, 1).await;
        assert!(leave(&db, id).await.unwrap());
        assert!(!leave(&db, id).await.unwrap());
        assert_eq!(count(&db, id).await, 0);
    }

    #[tokio::test]
    async fn join_on_unknown_schedule_is_not_found() {
        let (db, _) = setup(40, 0).await;
        let err = join(&db, Uuid::new_v4(), false).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
