//! Persistence models for the enrollment workflow.
//!
//! Reference data (students, subjects, schedules, fee items) and the
//! workflow tables (enrollments, enrolled subjects, assessments, assessment
//! items, payments). Ownership follows the foreign keys: an enrollment owns
//! its enrolled subjects and its assessment, an assessment owns its items and
//! payments. Schedules are referenced, never owned.

pub mod assessment;
pub mod assessment_item;
pub mod enrolled_subject;
pub mod enrollment;
pub mod fee_item;
pub mod payment;
pub mod schedule;
pub mod student;
pub mod subject;

pub use assessment::{AssessmentStatus, Entity as Assessment, Model as AssessmentModel};
pub use assessment_item::{Entity as AssessmentItem, Model as AssessmentItemModel};
pub use enrolled_subject::{
    EnrolledSubjectStatus, Entity as EnrolledSubject, Model as EnrolledSubjectModel,
};
pub use enrollment::{Entity as Enrollment, EnrollmentStatus, Model as EnrollmentModel};
pub use fee_item::{Entity as FeeItem, FeeCategory, Model as FeeItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentMethod, PaymentStatus};
pub use schedule::{Entity as Schedule, Model as ScheduleModel};
pub use student::{Entity as Student, Model as StudentModel, StudentStatus};
pub use subject::{Entity as Subject, Model as SubjectModel};
