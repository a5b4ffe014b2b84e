use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod advisory;
mod db;
mod error;
mod export;
mod generator;
mod models;
mod report;
mod roster;
mod selection;
mod service;
mod store;
mod workload;

use db::PgStore;
use models::{DateWindow, DutyAssignment, DutyType, Snapshot, WEEKDAY_COUNT};
use roster::TeacherChanges;
use service::DutyService;
use store::{DutyStore, MemoryStore};

#[derive(Parser)]
#[command(name = "duty-roster")]
#[command(about = "Weekly duty roster planner for school staff", long_about = None)]
struct Cli {
    /// Account that owns the roster
    #[arg(long, env = "DUTY_OWNER_ID", global = true)]
    owner: Option<Uuid>,
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,
    #[arg(long, default_value_t = 5, global = true)]
    max_connections: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo schools, classrooms and teachers
    Seed,
    /// Import weekly teaching hours from a CSV file
    ImportWorkloads {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show schools, classrooms, teachers and their weekly hours
    ListRoster,
    AddSchool {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        building: String,
    },
    /// Delete a school that no longer has classrooms
    RemoveSchool {
        #[arg(long)]
        id: Uuid,
    },
    AddClassroom {
        #[arg(long)]
        school: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0)]
        floor: i32,
    },
    RemoveClassroom {
        #[arg(long)]
        id: Uuid,
    },
    AddTeacher {
        #[arg(long)]
        name: String,
        /// Comma-separated school ids
        #[arg(long, value_delimiter = ',')]
        schools: Vec<Uuid>,
        #[arg(long)]
        limit: u32,
    },
    UpdateTeacher {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_delimiter = ',')]
        schools: Option<Vec<Uuid>>,
        #[arg(long)]
        limit: Option<u32>,
    },
    RemoveTeacher {
        #[arg(long)]
        id: Uuid,
    },
    /// Set a teacher's teaching hours, Monday to Friday
    SetWorkload {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long, value_delimiter = ',', num_args = 1.., allow_negative_numbers = true)]
        hours: Vec<i32>,
    },
    /// Record entrance, exit or yard duty dates for a month
    AddSchoolDuty {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
        /// entrance, exit or yard
        #[arg(long = "type")]
        duty_type: DutyType,
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        dates: Vec<NaiveDate>,
    },
    ListSchoolDuties {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
    },
    RemoveSchoolDuty {
        #[arg(long)]
        id: Uuid,
    },
    /// Generate draft duties for a week, replacing earlier drafts
    Generate {
        #[arg(long)]
        week: i32,
    },
    /// Approve the week's drafts
    Approve {
        #[arg(long)]
        week: i32,
    },
    /// Derive a new draft batch from the week's approved duties
    Transform {
        #[arg(long)]
        week: i32,
    },
    /// List duties for a week
    #[command(group(
        ArgGroup::new("state")
            .args(["approved", "drafts"])
            .multiple(false)
    ))]
    List {
        #[arg(long)]
        week: i32,
        #[arg(long)]
        approved: bool,
        #[arg(long)]
        drafts: bool,
    },
    /// Add a draft duty by hand
    Assign {
        #[arg(long)]
        week: i32,
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        classroom: Uuid,
        /// 0 = Monday .. 4 = Friday
        #[arg(long)]
        day: i32,
    },
    /// Change a draft duty
    Reassign {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        classroom: Uuid,
        #[arg(long)]
        day: i32,
    },
    /// Remove a draft duty
    Unassign {
        #[arg(long)]
        id: Uuid,
    },
    /// Show approved weeks
    Archive,
    /// Count approved duty days per teacher and location
    Statistics {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Write the approved week grid as CSV
    Export {
        #[arg(long)]
        week: i32,
        #[arg(long, default_value = "duty-grid.csv")]
        out: PathBuf,
    },
    /// Generate a markdown report for a week
    Report {
        #[arg(long)]
        week: i32,
        #[arg(long, default_value = "duty-report.md")]
        out: PathBuf,
    },
    /// Generate from a JSON snapshot without touching the database
    DryRun {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        week: i32,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::DryRun {
            snapshot,
            week,
            out,
        } => return dry_run(cli.owner.unwrap_or_default(), &snapshot, week, out).await,
        command => command,
    };

    let owner = cli
        .owner
        .context("--owner or DUTY_OWNER_ID must identify the roster owner")?;
    let database_url = cli
        .database_url
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    run(command, pool, owner).await
}

async fn run(command: Commands, pool: PgPool, owner: Uuid) -> anyhow::Result<()> {
    let service = DutyService::new(PgStore::new(pool.clone()));

    match command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool, owner).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportWorkloads { csv } => {
            let imported = db::import_workloads(&pool, owner, &csv).await?;
            println!("Imported {imported} workloads from {}.", csv.display());
        }
        Commands::ListRoster => print_roster(service.store(), owner).await?,
        Commands::AddSchool { name, building } => {
            let school = service.add_school(owner, &name, &building).await?;
            println!("Added school {} ({}).", school.name, school.id);
        }
        Commands::RemoveSchool { id } => {
            service.remove_school(owner, id).await?;
            println!("Removed school {id}.");
        }
        Commands::AddClassroom {
            school,
            name,
            floor,
        } => {
            let classroom = service.add_classroom(owner, school, &name, floor).await?;
            println!("Added classroom {} ({}).", classroom.label(), classroom.id);
        }
        Commands::RemoveClassroom { id } => {
            service.remove_classroom(owner, id).await?;
            println!("Removed classroom {id}.");
        }
        Commands::AddTeacher {
            name,
            schools,
            limit,
        } => {
            let teacher = service.add_teacher(owner, &name, schools, limit).await?;
            println!("Added teacher {} ({}).", teacher.name, teacher.id);
        }
        Commands::UpdateTeacher {
            id,
            name,
            schools,
            limit,
        } => {
            let changes = TeacherChanges {
                name,
                school_ids: schools,
                weekly_duty_limit: limit,
            };
            let teacher = service.update_teacher(owner, id, changes).await?;
            println!(
                "Updated teacher {}: {} schools, up to {} duties a week.",
                teacher.name,
                teacher.school_ids.len(),
                teacher.weekly_duty_limit
            );
        }
        Commands::RemoveTeacher { id } => {
            service.remove_teacher(owner, id).await?;
            println!("Removed teacher {id}.");
        }
        Commands::SetWorkload { teacher, hours } => {
            let workload = service.set_workload(owner, teacher, &hours).await?;
            println!("Workload for {teacher} set to {:?}.", workload.hours);
        }
        Commands::AddSchoolDuty {
            teacher,
            month,
            year,
            duty_type,
            dates,
        } => {
            let duty = service
                .add_school_duty(owner, teacher, month, year, duty_type, dates)
                .await?;
            println!(
                "Added {} duty {} with {} dates.",
                duty.duty_type,
                duty.id,
                duty.dates.len()
            );
        }
        Commands::ListSchoolDuties { month, year } => {
            let duties = service.school_duties(owner, month, year).await?;
            if duties.is_empty() {
                println!("No school duties for {year}-{month:02}.");
                return Ok(());
            }
            let teachers: HashMap<Uuid, String> = service
                .store()
                .teachers(owner)
                .await?
                .into_iter()
                .map(|t| (t.id, t.name))
                .collect();
            for duty in duties {
                let dates: Vec<String> = duty.dates.iter().map(|d| d.format("%d").to_string()).collect();
                println!(
                    "- {} {}: {} ({})",
                    duty.duty_type,
                    teachers.get(&duty.teacher_id).map_or("?", String::as_str),
                    dates.join(", "),
                    duty.id
                );
            }
        }
        Commands::RemoveSchoolDuty { id } => {
            service.remove_school_duty(owner, id).await?;
            println!("Removed school duty {id}.");
        }
        Commands::Generate { week } => {
            let outcome = service.generate(owner, week).await?;
            println!(
                "Generated {} duty assignments for week {week}.",
                outcome.assignments.len()
            );
            for advisory in &outcome.advisories {
                println!("! {}", advisory.message);
            }
        }
        Commands::Approve { week } => {
            let affected = service.approve(owner, week).await?;
            println!("Approved {affected} duties for week {week}.");
        }
        Commands::Transform { week } => {
            let batch = service.transform(owner, week).await?;
            println!(
                "Created {} transformed drafts for week {week}.",
                batch.len()
            );
        }
        Commands::List {
            week,
            approved,
            drafts,
        } => {
            let filter = match (approved, drafts) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let rows = service.assignments(owner, week, filter).await?;
            if rows.is_empty() {
                println!("No duties recorded for week {week}.");
                return Ok(());
            }
            print_assignments(service.store(), owner, &rows).await?;
        }
        Commands::Assign {
            week,
            teacher,
            classroom,
            day,
        } => {
            let assignment = service.assign(owner, week, teacher, classroom, day).await?;
            println!("Added duty {}.", assignment.id);
        }
        Commands::Reassign {
            id,
            teacher,
            classroom,
            day,
        } => {
            service.reassign(owner, id, teacher, classroom, day).await?;
            println!("Updated duty {id}.");
        }
        Commands::Unassign { id } => {
            service.unassign(owner, id).await?;
            println!("Removed duty {id}.");
        }
        Commands::Archive => {
            let entries = service.archive(owner).await?;
            if entries.is_empty() {
                println!("No approved weeks yet.");
                return Ok(());
            }
            for entry in entries {
                let approved_at = entry
                    .approved_at
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "n/a".to_string());
                let origin = entry
                    .transformed_from
                    .map(|id| format!(", transformed from {id}"))
                    .unwrap_or_default();
                println!(
                    "- week {}: {} duties, approved {approved_at}{origin}",
                    entry.week_number, entry.count
                );
            }
        }
        Commands::Statistics { from, to } => {
            let stats = service.statistics(owner, DateWindow { from, to }).await?;
            if stats.is_empty() {
                println!("No approved duties in this window.");
                return Ok(());
            }
            for stat in stats {
                let weeks: Vec<String> = stat.weeks.iter().map(i32::to_string).collect();
                println!(
                    "- {} at {}: {} days (weeks {})",
                    stat.teacher_name,
                    stat.classroom_name,
                    stat.total_days,
                    weeks.join(", ")
                );
            }
        }
        Commands::Export { week, out } => {
            let grid = service.approved_grid(owner, week).await?;
            export::write_grid_csv(&grid, &out)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Grid written to {}.", out.display());
        }
        Commands::Report { week, out } => {
            let report = service.week_report(owner, week).await?;
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::DryRun { .. } => anyhow::bail!("dry-run works from a snapshot, not the database"),
    }

    Ok(())
}

async fn dry_run(
    owner: Uuid,
    snapshot: &std::path::Path,
    week: i32,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(snapshot)
        .with_context(|| format!("failed to read {}", snapshot.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&raw).context("invalid snapshot document")?;
    let service = DutyService::new(MemoryStore::from_snapshot(owner, snapshot));

    let outcome = service.generate(owner, week).await?;
    print_assignments(service.store(), owner, &outcome.assignments).await?;
    for advisory in &outcome.advisories {
        println!("! {}", advisory.message);
    }

    if let Some(out) = out {
        let report = service.week_report(owner, week).await?;
        std::fs::write(&out, report)?;
        println!("Report written to {}.", out.display());
    }
    Ok(())
}

async fn print_assignments<S: DutyStore>(
    store: &S,
    owner: Uuid,
    rows: &[DutyAssignment],
) -> anyhow::Result<()> {
    let teachers: HashMap<Uuid, String> = store
        .teachers(owner)
        .await?
        .into_iter()
        .map(|t| (t.id, t.name))
        .collect();
    let classrooms: HashMap<Uuid, String> = store
        .classrooms(owner)
        .await?
        .into_iter()
        .map(|c| (c.id, c.label()))
        .collect();

    for row in rows {
        let state = if row.approved { "approved" } else { "draft" };
        println!(
            "- {} {}: {} at {} [{state}] ({})",
            row.week_number,
            row.day,
            teachers.get(&row.teacher_id).map_or("?", String::as_str),
            classrooms.get(&row.classroom_id).map_or("?", String::as_str),
            row.id
        );
    }
    Ok(())
}

async fn print_roster<S: DutyStore>(store: &S, owner: Uuid) -> anyhow::Result<()> {
    let schools = store.schools(owner).await?;
    let classrooms = store.classrooms(owner).await?;
    let teachers = store.teachers(owner).await?;
    let workloads: HashMap<Uuid, [u8; WEEKDAY_COUNT]> = store
        .workloads(owner)
        .await?
        .into_iter()
        .map(|w| (w.teacher_id, w.hours))
        .collect();

    if schools.is_empty() && teachers.is_empty() {
        println!("The roster is empty.");
        return Ok(());
    }

    for school in &schools {
        println!("{} [{}] ({})", school.name, school.building, school.id);
        for room in classrooms.iter().filter(|c| c.school_id == school.id) {
            println!("  - {} ({})", room.label(), room.id);
        }
    }
    println!("Teachers:");
    for teacher in &teachers {
        let hours = workloads
            .get(&teacher.id)
            .map(|h| format!("{h:?}"))
            .unwrap_or_else(|| "no workload".to_string());
        println!(
            "- {}: up to {} duties, {} schools, hours {hours} ({})",
            teacher.name,
            teacher.weekly_duty_limit,
            teacher.school_ids.len(),
            teacher.id
        );
    }
    Ok(())
}
