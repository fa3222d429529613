//! Ownership scoping.
//!
//! The access policy only decides whether a role may touch a category of
//! action. Which rows it may see is decided here: students are narrowed to
//! records hanging off their own profile, staff see everything. Each workflow
//! turns a [`RecordScope`] into a query [`Condition`] with a pure function so
//! the rules can be tested without HTTP or a database.

use crate::auth::{AuthUser, Role};
use crate::entities::{assessment, enrollment, payment, student};
use crate::errors::ServiceError;
use sea_orm::{
    sea_query::{Expr, Query},
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScope {
    /// Unrestricted
    All,
    /// Only records owned by this student profile
    Student(Uuid),
    /// Matches no record
    Nothing,
}

impl RecordScope {
    /// Pure mapping from role and (optional) student profile id
    pub fn for_role(role: Option<Role>, profile_id: Option<Uuid>) -> Self {
        match (role, profile_id) {
            (Some(Role::Student), Some(id)) => RecordScope::Student(id),
            (Some(Role::Student), None) | (None, _) => RecordScope::Nothing,
            (Some(_), _) => RecordScope::All,
        }
    }

    /// Looks up the caller's student profile when the role needs one
    pub async fn resolve<C>(conn: &C, caller: &AuthUser) -> Result<Self, ServiceError>
    where
        C: ConnectionTrait,
    {
        if caller.role != Some(Role::Student) {
            return Ok(Self::for_role(caller.role, None));
        }

        let profile = student_profile(conn, caller.user_id).await?;
        Ok(Self::for_role(caller.role, profile.map(|p| p.id)))
    }

    pub fn student_id(&self) -> Option<Uuid> {
        match self {
            RecordScope::Student(id) => Some(*id),
            _ => None,
        }
    }
}

/// The student profile linked to a user, if any
pub async fn student_profile<C>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<student::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(student::Entity::find()
        .filter(student::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

fn match_nothing() -> Condition {
    Condition::all().add(Expr::cust("1 = 0"))
}

pub fn enrollment_scope_condition(scope: &RecordScope) -> Condition {
    match scope {
        RecordScope::All => Condition::all(),
        RecordScope::Student(id) => Condition::all().add(enrollment::Column::StudentId.eq(*id)),
        RecordScope::Nothing => match_nothing(),
    }
}

pub fn assessment_scope_condition(scope: &RecordScope) -> Condition {
    match scope {
        RecordScope::All => Condition::all(),
        RecordScope::Student(id) => Condition::all().add(
            assessment::Column::EnrollmentId.in_subquery(
                Query::select()
                    .column(enrollment::Column::Id)
                    .from(enrollment::Entity)
                    .and_where(enrollment::Column::StudentId.eq(*id))
                    .to_owned(),
            ),
        ),
        RecordScope::Nothing => match_nothing(),
    }
}

pub fn payment_scope_condition(scope: &RecordScope) -> Condition {
    match scope {
        RecordScope::All => Condition::all(),
        RecordScope::Student(id) => Condition::all().add(
            payment::Column::AssessmentId.in_subquery(
                Query::select()
                    .column(assessment::Column::Id)
                    .from(assessment::Entity)
                    .and_where(
                        assessment::Column::EnrollmentId.in_subquery(
                            Query::select()
                                .column(enrollment::Column::Id)
                                .from(enrollment::Entity)
                                .and_where(enrollment::Column::StudentId.eq(*id))
                                .to_owned(),
                        ),
                    )
                    .to_owned(),
            ),
        ),
        RecordScope::Nothing => match_nothing(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sea_orm::{DbBackend, QueryTrait};

    #[rstest]
    #[case(Some(Role::Admin), None, RecordScope::All)]
    #[case(Some(Role::Registrar), None, RecordScope::All)]
    #[case(Some(Role::Cashier), None, RecordScope::All)]
    #[case(Some(Role::Faculty), None, RecordScope::All)]
    #[case(Some(Role::Student), None, RecordScope::Nothing)]
    #[case(None, None, RecordScope::Nothing)]
    fn scope_by_role(
        #[case] role: Option<Role>,
        #[case] profile: Option<Uuid>,
        #[case] expected: RecordScope,
    ) {
        assert_eq!(RecordScope::for_role(role, profile), expected);
    }

    #[test]
    fn student_with_profile_is_narrowed() {
        let id = Uuid::new_v4();
        assert_eq!(
            RecordScope::for_role(Some(Role::Student), Some(id)),
            RecordScope::Student(id)
        );
        // a profile id is ignored for staff
        assert_eq!(
            RecordScope::for_role(Some(Role::Registrar), Some(id)),
            RecordScope::All
        );
    }

    fn enrollment_sql(scope: RecordScope) -> String {
        enrollment::Entity::find()
            .filter(enrollment_scope_condition(&scope))
            .build(DbBackend::Sqlite)
            .to_string()
    }

    #[test]
    fn enrollment_conditions() {
        // an empty `Condition::all()` renders as `WHERE TRUE`
        let all = enrollment_sql(RecordScope::All);
        assert!(!all.contains("student_id"));
        assert!(!all.contains("1 = 0"));
        assert!(enrollment_sql(RecordScope::Nothing).contains("1 = 0"));

        let id = Uuid::new_v4();
        let sql = enrollment_sql(RecordScope::Student(id));
        assert!(sql.contains("\"enrollments\".\"student_id\" ="));
        assert!(sql.contains(&id.to_string()));
    }

    #[test]
    fn assessment_condition_goes_through_enrollments() {
        let id = Uuid::new_v4();
        let sql = assessment::Entity::find()
            .filter(assessment_scope_condition(&RecordScope::Student(id)))
            .build(DbBackend::Sqlite)
            .to_string();
        assert!(sql.contains("\"enrollment_id\" IN (SELECT"));
        assert!(sql.contains(&id.to_string()));
    }

    #[test]
    fn payment_condition_nests_two_levels() {
        let id = Uuid::new_v4();
        let sql = payment::Entity::find()
            .filter(payment_scope_condition(&RecordScope::Student(id)))
            .build(DbBackend::Sqlite)
            .to_string();
        assert!(sql.contains("\"assessment_id\" IN (SELECT"));
        assert!(sql.contains("\"enrollment_id\" IN (SELECT"));

        let none = payment::Entity::find()
            .filter(payment_scope_condition(&RecordScope::Nothing))
            .build(DbBackend::Sqlite)
            .to_string();
        assert!(none.contains("1 = 0"));
    }
}
