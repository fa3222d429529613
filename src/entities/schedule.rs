use chrono::{DateTime, NaiveTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A section of a subject offered in one term, with a seat capacity.
///
/// `enrolled_count` is only ever changed through the capacity ledger's
/// single-statement increments and decrements.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schedules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub subject_id: Uuid,
    pub section: String,
    pub instructor: String,
    pub academic_year: String,
    pub semester: i32,
    /// Comma separated day codes, e.g. `M,W,F`
    pub days: String,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub room: String,
    pub max_slots: i32,
    pub enrolled_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn day_codes(&self) -> Vec<String> {
        self.days
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::subject::Entity",
        from = "Column::SubjectId",
        to = "super::subject::Column::Id"
    )]
    Subject,
    #[sea_orm(has_many = "super::enrolled_subject::Entity")]
    EnrolledSubjects,
}

impl Related<super::subject::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subject.def()
    }
}

impl Related<super::enrolled_subject::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EnrolledSubjects.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
