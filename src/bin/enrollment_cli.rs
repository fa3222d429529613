use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::{ArgAction, Args, Parser, Subcommand};
use enrollment_api::{
    auth::{AuthConfig, AuthService, Role},
    config::{self, AppConfig},
    db,
    entities::fee_item::FeeCategory,
    errors::ServiceError,
    migrator,
    services::catalog::{
        CatalogService, CreateFeeItemRequest, CreateScheduleRequest, CreateStudentRequest,
        CreateSubjectRequest,
    },
};
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "enrollment-cli",
    about = "Operator tooling for the enrollment API",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Load a small demo catalog (subjects, schedules, fee items)
    Seed(SeedArgs),
    /// Issue a signed access token for local testing
    IssueToken(IssueTokenArgs),
}

#[derive(Args)]
struct SeedArgs {
    #[arg(long, default_value = "2024-2025", help = "Academic year for seeded schedules")]
    academic_year: String,
    #[arg(long, default_value_t = 1, help = "Semester for seeded schedules")]
    semester: i32,
    #[arg(long, help = "Also create a student profile for this account id")]
    student_user_id: Option<Uuid>,
}

#[derive(Args)]
struct IssueTokenArgs {
    #[arg(long, help = "Account id placed in the `sub` claim")]
    user_id: Uuid,
    #[arg(long, help = "admin, registrar, cashier, faculty or student")]
    role: String,
    #[arg(long, help = "Display name")]
    name: Option<String>,
}

#[derive(Serialize)]
struct SeedSummary {
    subjects: Vec<Uuid>,
    schedules: Vec<Uuid>,
    fee_items: Vec<Uuid>,
    student: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    match cli.command {
        Commands::Migrate => {
            migrator::run_migration(cfg.database_url()).await?;
            println!("Migrations applied");
        }
        Commands::Seed(args) => handle_seed(&cfg, args, cli.json).await?,
        Commands::IssueToken(args) => handle_issue_token(&cfg, args, cli.json)?,
    }

    Ok(())
}

fn handle_issue_token(cfg: &AppConfig, args: IssueTokenArgs, json: bool) -> Result<()> {
    let role: Role = args
        .role
        .parse()
        .with_context(|| format!("cannot issue token for role '{}'", args.role))?;

    let auth = AuthService::new(AuthConfig::from(cfg));
    let token = auth
        .generate_token(args.user_id, role.as_str(), args.name)
        .context("failed to sign token")?;

    if json {
        print_json(&serde_json::json!({
            "user_id": args.user_id,
            "role": role,
            "access_token": token,
        }))?;
    } else {
        println!("{}", token);
    }
    Ok(())
}

async fn handle_seed(cfg: &AppConfig, args: SeedArgs, json: bool) -> Result<()> {
    let pool = db::establish_connection_from_app_config(cfg).await?;
    db::run_migrations(&pool).await?;
    let catalog = CatalogService::new(Arc::new(pool));

    let mut summary = SeedSummary {
        subjects: Vec::new(),
        schedules: Vec::new(),
        fee_items: Vec::new(),
        student: None,
    };

    let courses = [
        ("CS101", "Introduction to Computing", 3, "A", "07:30:00", "09:00:00"),
        ("MATH101", "College Algebra", 3, "A", "09:00:00", "10:30:00"),
        ("ENG101", "Purposive Communication", 3, "B", "10:30:00", "12:00:00"),
        ("PE101", "Physical Fitness", 2, "C", "13:00:00", "15:00:00"),
    ];

    for (code, title, units, section, start, end) in courses {
        let created = catalog
            .create_subject(CreateSubjectRequest {
                code: code.to_string(),
                title: title.to_string(),
                description: String::new(),
                units,
                year_level: 1,
                semester: args.semester,
            })
            .await;

        let subject = match created {
            Ok(subject) => subject,
            Err(ServiceError::Conflict(_)) => {
                warn!(code, "subject already present; skipping its schedule");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        summary.subjects.push(subject.id);

        let schedule = catalog
            .create_schedule(CreateScheduleRequest {
                subject_id: subject.id,
                section: section.to_string(),
                instructor: "TBA".to_string(),
                academic_year: args.academic_year.clone(),
                semester: args.semester,
                days: vec!["M".to_string(), "W".to_string(), "F".to_string()],
                time_start: NaiveTime::parse_from_str(start, "%H:%M:%S")?,
                time_end: NaiveTime::parse_from_str(end, "%H:%M:%S")?,
                room: format!("RM-{}", section),
                max_slots: 40,
            })
            .await?;
        summary.schedules.push(schedule.id);
    }

    let fees = [
        ("Tuition", FeeCategory::Tuition, dec!(500.00), true),
        ("Computer Laboratory", FeeCategory::Laboratory, dec!(1500.00), false),
        ("Registration", FeeCategory::Miscellaneous, dec!(750.00), false),
        ("Library", FeeCategory::Miscellaneous, dec!(300.00), false),
    ];

    for (name, category, amount, per_unit) in fees {
        let fee = catalog
            .create_fee_item(CreateFeeItemRequest {
                name: name.to_string(),
                description: String::new(),
                category,
                amount,
                per_unit,
                is_active: true,
            })
            .await?;
        summary.fee_items.push(fee.id);
    }

    if let Some(user_id) = args.student_user_id {
        let student = catalog
            .create_student(CreateStudentRequest {
                user_id,
                student_number: format!(
                    "{}-00001",
                    args.academic_year.chars().take(4).collect::<String>()
                ),
                first_name: "Demo".to_string(),
                last_name: "Student".to_string(),
                middle_name: None,
                email: "demo.student@example.edu".to_string(),
                program: "BSCS".to_string(),
                year_level: 1,
            })
            .await?;
        summary.student = Some(student.id);
    }

    info!(
        subjects = summary.subjects.len(),
        schedules = summary.schedules.len(),
        fee_items = summary.fee_items.len(),
        "seed complete"
    );

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "Seeded {} subjects, {} schedules, {} fee items",
            summary.subjects.len(),
            summary.schedules.len(),
            summary.fee_items.len()
        );
        if let Some(student) = summary.student {
            println!("Student profile: {}", student);
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
