use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod choices;
mod db;
mod error;
mod funnel;
mod models;
mod notes;
mod report;
mod status;
mod status_log;
mod students;

use models::{Actor, ActorRole, StatusUpdateRequest, UniversityChoice};

#[derive(Parser)]
#[command(name = "application-tracker")]
#[command(about = "Study-abroad application status tracker and funnel analytics", long_about = None)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[arg(long, env = "TRACKER_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    #[command(flatten)]
    actor: ActorArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Who changes are attributed to.
#[derive(Args)]
struct ActorArgs {
    #[arg(long, env = "TRACKER_ACTOR_ID", global = true)]
    actor_id: Option<String>,
    #[arg(long, env = "TRACKER_ACTOR_NAME", global = true)]
    actor_name: Option<String>,
    #[arg(long, env = "TRACKER_ACTOR_EMAIL", global = true)]
    actor_email: Option<String>,
    #[arg(long, env = "TRACKER_ACTOR_ROLE", global = true, default_value = "member")]
    actor_role: String,
}

impl ActorArgs {
    fn resolve(&self) -> anyhow::Result<Actor> {
        let role = match self.actor_role.as_str() {
            "member" => ActorRole::Member,
            "admin" => ActorRole::Admin,
            other => anyhow::bail!("unknown actor role {other:?} (expected member or admin)"),
        };
        Ok(Actor {
            id: self
                .actor_id
                .clone()
                .context("--actor-id (or TRACKER_ACTOR_ID) is required")?,
            name: self
                .actor_name
                .clone()
                .context("--actor-name (or TRACKER_ACTOR_NAME) is required")?,
            email: self
                .actor_email
                .clone()
                .context("--actor-email (or TRACKER_ACTOR_EMAIL) is required")?,
            role,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import students (one initial university choice each) from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List students
    List {
        #[arg(long, default_value_t = 0)]
        skip: i64,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Change the application status of one university choice
    Status {
        #[arg(long)]
        student: Uuid,
        #[arg(long, requires = "status", conflicts_with = "request")]
        choice: Option<usize>,
        #[arg(long, requires = "choice", conflicts_with = "request")]
        status: Option<String>,
        /// JSON body: {"university_choice_index": 0, "new_status": "..."}
        #[arg(long)]
        request: Option<String>,
    },
    /// Show the status history of one university choice
    History {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        choice: usize,
    },
    /// Add a manual note to a student, or to one of their choices
    Note {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        choice: Option<usize>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Update contact details, path, counselor, documents, visa progress or
    /// choice milestones from a JSON patch
    Update {
        #[arg(long)]
        student: Uuid,
        /// e.g. {"documents": {"passport": true}, "visa_documents": {"decision": "Accepted"}}
        #[arg(long)]
        patch: String,
    },
    /// Delete a student
    Delete {
        #[arg(long)]
        student: Uuid,
    },
    /// Add a university choice at the lowest priority
    AddChoice {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        university: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        intake: String,
        #[arg(long)]
        link: Option<String>,
    },
    /// Remove a university choice
    RemoveChoice {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        choice: usize,
    },
    /// Print the analytics aggregate as JSON
    Analytics {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown funnel report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

/// Load, change and save one student under the optimistic version check.
/// `change` returns the new student plus anything the caller wants back.
async fn update_student<F, T>(
    pool: &PgPool,
    id: Uuid,
    actor: &Actor,
    change: F,
) -> anyhow::Result<(models::Student, T)>
where
    F: FnOnce(&models::Student) -> error::Result<(models::Student, T)>,
{
    let stored = db::load_student(pool, id, actor).await?;
    let (updated, extra) = change(&stored.student)?;
    let version = db::save_student(pool, &updated, stored.version).await?;
    info!(student = %id, version, "student saved");
    Ok((updated, extra))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "application_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let actor = cli.actor.resolve()?;
            let inserted = db::import_csv(&pool, &csv, &actor).await?;
            println!("Inserted {inserted} students from {}.", csv.display());
        }
        Commands::List { skip, limit } => {
            let actor = cli.actor.resolve()?;
            let students =
                db::list_students(&pool, db::Pagination::new(skip, limit), &actor).await?;
            if students.is_empty() {
                println!("No students found.");
                return Ok(());
            }
            for student in students.iter() {
                println!(
                    "- {} {} ({}, {}, {} choices)",
                    student.id,
                    student.full_name,
                    student.target_country,
                    student.application_path,
                    student.university_choices.len()
                );
            }
        }
        Commands::Status {
            student,
            choice,
            status,
            request,
        } => {
            let request = match (request, choice, status) {
                (Some(body), _, _) => serde_json::from_str::<StatusUpdateRequest>(&body)
                    .context("status request must be {\"university_choice_index\", \"new_status\"}")?,
                (None, Some(university_choice_index), Some(new_status)) => StatusUpdateRequest {
                    university_choice_index,
                    new_status,
                },
                _ => anyhow::bail!("pass --choice and --status, or --request"),
            };
            let actor = cli.actor.resolve()?;
            let (updated, (entry, note)) = update_student(&pool, student, &actor, |current| {
                status_log::apply_status_change(
                    current,
                    request.university_choice_index,
                    &request.new_status,
                    &actor,
                    Utc::now(),
                )
                .map(|change| (change.student, (change.entry, change.note)))
            })
            .await?;
            let choice = &updated.university_choices[entry.university_choice_index];
            let from = entry
                .previous_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string());
            println!(
                "{}: {} → {} for {} at {}.",
                updated.full_name,
                from,
                entry.new_status,
                choice.university_name,
                entry.timestamp.to_rfc3339()
            );
            if note.is_none() {
                println!("(no automatic note was recorded)");
            }
        }
        Commands::History { student, choice } => {
            let actor = cli.actor.resolve()?;
            let stored = db::load_student(&pool, student, &actor).await?;
            let len = stored.student.university_choices.len();
            if choice >= len {
                return Err(error::TrackerError::IndexOutOfRange { index: choice, len }.into());
            }
            let current = &stored.student.university_choices[choice];
            println!(
                "{} ({}), milestones {:.0}% complete",
                current.university_name,
                current.course_name,
                current.milestone_progress()
            );
            let history = status_log::status_history(&stored.student, choice);
            if history.is_empty() {
                println!("No status changes recorded.");
                return Ok(());
            }
            for entry in history {
                let from = entry
                    .previous_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "none".to_string());
                println!(
                    "- {} {} → {} by {}",
                    entry.timestamp.to_rfc3339(),
                    from,
                    entry.new_status,
                    entry.changed_by.name
                );
            }
        }
        Commands::Note {
            student,
            choice,
            title,
            body,
        } => {
            let actor = cli.actor.resolve()?;
            update_student(&pool, student, &actor, |current| {
                match choice {
                    Some(index) => notes::add_university_note(
                        current,
                        index,
                        title.as_deref(),
                        &body,
                        &actor,
                        Utc::now(),
                    ),
                    None => notes::add_overview_note(
                        current,
                        title.as_deref(),
                        &body,
                        &actor,
                        Utc::now(),
                    ),
                }
                .map(|updated| (updated, ()))
            })
            .await?;
            println!("Note added.");
        }
        Commands::Update { student, patch } => {
            let actor = cli.actor.resolve()?;
            let update: students::StudentUpdate =
                serde_json::from_str(&patch).context("patch must be a JSON object")?;
            let (updated, ()) = update_student(&pool, student, &actor, |current| {
                students::update_fields(current, &update, Utc::now()).map(|updated| (updated, ()))
            })
            .await?;
            println!(
                "{} updated ({} of 6 documents, visa {}).",
                updated.full_name,
                updated.documents.completed(),
                updated.visa_documents.decision.as_str()
            );
        }
        Commands::Delete { student } => {
            let actor = cli.actor.resolve()?;
            db::delete_student(&pool, student, &actor).await?;
            info!(student = %student, actor = %actor.id, "student deleted");
            println!("Student {student} deleted.");
        }
        Commands::AddChoice {
            student,
            university,
            course,
            intake,
            link,
        } => {
            let actor = cli.actor.resolve()?;
            let mut choice = UniversityChoice::new(&university, &course, &intake);
            choice.course_link = link;
            let (updated, ()) = update_student(&pool, student, &actor, |current| {
                choices::add_choice(current, choice, Utc::now()).map(|updated| (updated, ()))
            })
            .await?;
            let last = updated.university_choices.len() - 1;
            println!(
                "Added {} as priority {}.",
                university,
                updated.choice_priority(last).unwrap_or(last + 1)
            );
        }
        Commands::RemoveChoice { student, choice } => {
            let actor = cli.actor.resolve()?;
            update_student(&pool, student, &actor, |current| {
                choices::remove_choice(current, choice, Utc::now()).map(|updated| (updated, ()))
            })
            .await?;
            println!("Removed choice {}.", choice + 1);
        }
        Commands::Analytics { out } => {
            let actor = cli.actor.resolve()?;
            let documents = db::list_student_documents(&pool, &actor).await?;
            let analytics = funnel::build_analytics_from_documents(&documents);
            let json = serde_json::to_string_pretty(&analytics)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Analytics written to {}.", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Report { out } => {
            let actor = cli.actor.resolve()?;
            let documents = db::list_student_documents(&pool, &actor).await?;
            let analytics = funnel::build_analytics_from_documents(&documents);
            let report = report::build_report(&analytics, Utc::now());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
