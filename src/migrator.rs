use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_students_table::Migration),
            Box::new(m20240601_000002_create_catalog_tables::Migration),
            Box::new(m20240601_000003_create_enrollment_tables::Migration),
            Box::new(m20240601_000004_create_billing_tables::Migration),
        ]
    }
}

mod m20240601_000001_create_students_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_students_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Students::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Students::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Students::UserId).uuid().not_null())
                        .col(ColumnDef::new(Students::StudentNumber).string().not_null())
                        .col(ColumnDef::new(Students::FirstName).string().not_null())
                        .col(ColumnDef::new(Students::LastName).string().not_null())
                        .col(ColumnDef::new(Students::MiddleName).string().null())
                        .col(ColumnDef::new(Students::Email).string().not_null())
                        .col(ColumnDef::new(Students::Program).string().not_null())
                        .col(
                            ColumnDef::new(Students::YearLevel)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Students::Status)
                                .string_len(20)
                                .not_null()
                                .default("active"),
                        )
                        .col(ColumnDef::new(Students::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Students::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_students_user_id")
                        .table(Students::Table)
                        .col(Students::UserId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_students_student_number")
                        .table(Students::Table)
                        .col(Students::StudentNumber)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Students::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Students {
        Table,
        Id,
        UserId,
        StudentNumber,
        FirstName,
        LastName,
        MiddleName,
        Email,
        Program,
        YearLevel,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Subjects::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Subjects::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Subjects::Code).string().not_null())
                        .col(ColumnDef::new(Subjects::Title).string().not_null())
                        .col(
                            ColumnDef::new(Subjects::Description)
                                .text()
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(Subjects::Units).integer().not_null())
                        .col(ColumnDef::new(Subjects::YearLevel).integer().not_null())
                        .col(ColumnDef::new(Subjects::Semester).integer().not_null())
                        .col(ColumnDef::new(Subjects::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Subjects::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_subjects_code")
                        .table(Subjects::Table)
                        .col(Subjects::Code)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Schedules::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Schedules::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Schedules::SubjectId).uuid().not_null())
                        .col(ColumnDef::new(Schedules::Section).string().not_null())
                        .col(ColumnDef::new(Schedules::Instructor).string().not_null())
                        .col(ColumnDef::new(Schedules::AcademicYear).string().not_null())
                        .col(ColumnDef::new(Schedules::Semester).integer().not_null())
                        .col(ColumnDef::new(Schedules::Days).string().not_null())
                        .col(ColumnDef::new(Schedules::TimeStart).time().not_null())
                        .col(ColumnDef::new(Schedules::TimeEnd).time().not_null())
                        .col(ColumnDef::new(Schedules::Room).string().not_null())
                        .col(
                            ColumnDef::new(Schedules::MaxSlots)
                                .integer()
                                .not_null()
                                .default(40),
                        )
                        .col(
                            ColumnDef::new(Schedules::EnrolledCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Schedules::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Schedules::UpdatedAt).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_schedules_subject")
                                .from(Schedules::Table, Schedules::SubjectId)
                                .to(Subjects::Table, Subjects::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_schedules_term")
                        .table(Schedules::Table)
                        .col(Schedules::AcademicYear)
                        .col(Schedules::Semester)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(FeeItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(FeeItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(FeeItems::Name).string().not_null())
                        .col(
                            ColumnDef::new(FeeItems::Description)
                                .text()
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(FeeItems::Category).string_len(20).not_null())
                        .col(ColumnDef::new(FeeItems::Amount).decimal_len(12, 2).not_null())
                        .col(
                            ColumnDef::new(FeeItems::PerUnit)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(FeeItems::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(FeeItems::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(FeeItems::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(FeeItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Schedules::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Subjects::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Subjects {
        Table,
        Id,
        Code,
        Title,
        Description,
        Units,
        YearLevel,
        Semester,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Schedules {
        Table,
        Id,
        SubjectId,
        Section,
        Instructor,
        AcademicYear,
        Semester,
        Days,
        TimeStart,
        TimeEnd,
        Room,
        MaxSlots,
        EnrolledCount,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum FeeItems {
        Table,
        Id,
        Name,
        Description,
        Category,
        Amount,
        PerUnit,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_enrollment_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_enrollment_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Enrollments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Enrollments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Enrollments::StudentId).uuid().not_null())
                        .col(ColumnDef::new(Enrollments::AcademicYear).string().not_null())
                        .col(ColumnDef::new(Enrollments::Semester).integer().not_null())
                        .col(
                            ColumnDef::new(Enrollments::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(Enrollments::TotalUnits)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Enrollments::ApprovedBy).uuid().null())
                        .col(ColumnDef::new(Enrollments::ApprovedAt).timestamp().null())
                        .col(
                            ColumnDef::new(Enrollments::RejectionReason)
                                .text()
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(Enrollments::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Enrollments::UpdatedAt).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_enrollments_student")
                                .from(Enrollments::Table, Enrollments::StudentId)
                                .to(Students::Table, Students::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // One enrollment per student per term
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_enrollments_student_term")
                        .table(Enrollments::Table)
                        .col(Enrollments::StudentId)
                        .col(Enrollments::AcademicYear)
                        .col(Enrollments::Semester)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(EnrolledSubjects::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(EnrolledSubjects::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(EnrolledSubjects::EnrollmentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(EnrolledSubjects::ScheduleId).uuid().not_null())
                        .col(
                            ColumnDef::new(EnrolledSubjects::Status)
                                .string_len(20)
                                .not_null()
                                .default("enrolled"),
                        )
                        .col(ColumnDef::new(EnrolledSubjects::Grade).decimal_len(3, 2).null())
                        .col(
                            ColumnDef::new(EnrolledSubjects::EnrolledAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(EnrolledSubjects::DroppedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_enrolled_subjects_enrollment")
                                .from(EnrolledSubjects::Table, EnrolledSubjects::EnrollmentId)
                                .to(Enrollments::Table, Enrollments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_enrolled_subjects_schedule")
                                .from(EnrolledSubjects::Table, EnrolledSubjects::ScheduleId)
                                .to(Schedules::Table, Schedules::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_enrolled_subjects_pair")
                        .table(EnrolledSubjects::Table)
                        .col(EnrolledSubjects::EnrollmentId)
                        .col(EnrolledSubjects::ScheduleId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(EnrolledSubjects::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Enrollments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Students {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Schedules {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Enrollments {
        Table,
        Id,
        StudentId,
        AcademicYear,
        Semester,
        Status,
        TotalUnits,
        ApprovedBy,
        ApprovedAt,
        RejectionReason,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum EnrolledSubjects {
        Table,
        Id,
        EnrollmentId,
        ScheduleId,
        Status,
        Grade,
        EnrolledAt,
        DroppedAt,
    }
}

mod m20240601_000004_create_billing_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_billing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Assessments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Assessments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Assessments::EnrollmentId).uuid().not_null())
                        .col(
                            ColumnDef::new(Assessments::TotalAmount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Assessments::DiscountAmount)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Assessments::NetAmount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Assessments::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(Assessments::CreatedBy).uuid().not_null())
                        .col(ColumnDef::new(Assessments::ApprovedBy).uuid().null())
                        .col(ColumnDef::new(Assessments::ApprovedAt).timestamp().null())
                        .col(ColumnDef::new(Assessments::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Assessments::UpdatedAt).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_assessments_enrollment")
                                .from(Assessments::Table, Assessments::EnrollmentId)
                                .to(Enrollments::Table, Enrollments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Exactly one assessment per enrollment
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_assessments_enrollment_id")
                        .table(Assessments::Table)
                        .col(Assessments::EnrollmentId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AssessmentItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssessmentItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AssessmentItems::AssessmentId).uuid().not_null())
                        .col(ColumnDef::new(AssessmentItems::FeeItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(AssessmentItems::Quantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(AssessmentItems::Amount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_assessment_items_assessment")
                                .from(AssessmentItems::Table, AssessmentItems::AssessmentId)
                                .to(Assessments::Table, Assessments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_assessment_items_fee_item")
                                .from(AssessmentItems::Table, AssessmentItems::FeeItemId)
                                .to(FeeItems::Table, FeeItems::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::AssessmentId).uuid().not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal_len(12, 2).not_null())
                        .col(
                            ColumnDef::new(Payments::PaymentMethod)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::ReferenceNumber)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(Payments::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(Payments::ReceivedBy).uuid().not_null())
                        .col(ColumnDef::new(Payments::Notes).text().not_null().default(""))
                        .col(ColumnDef::new(Payments::PaymentDate).timestamp().not_null())
                        .col(ColumnDef::new(Payments::ConfirmedAt).timestamp().null())
                        .col(ColumnDef::new(Payments::CancelledAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_assessment")
                                .from(Payments::Table, Payments::AssessmentId)
                                .to(Assessments::Table, Assessments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_assessment_id")
                        .table(Payments::Table)
                        .col(Payments::AssessmentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(AssessmentItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Assessments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Enrollments {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum FeeItems {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Assessments {
        Table,
        Id,
        EnrollmentId,
        TotalAmount,
        DiscountAmount,
        NetAmount,
        Status,
        CreatedBy,
        ApprovedBy,
        ApprovedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum AssessmentItems {
        Table,
        Id,
        AssessmentId,
        FeeItemId,
        Quantity,
        Amount,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        AssessmentId,
        Amount,
        PaymentMethod,
        ReferenceNumber,
        Status,
        ReceivedBy,
        Notes,
        PaymentDate,
        ConfirmedAt,
        CancelledAt,
    }
}

/// Standalone migration runner used by the operator CLI
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
