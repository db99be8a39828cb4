use anyhow::Context;
use chrono::{NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::models::{
    Actor, ActorRole, ApplicationPath, DegreeProfile, Documents, PriorDegree, Student,
    UniversityChoice, VisaDocuments,
};
use crate::status::{self, ApplicationStatus};
use crate::status_log;

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub skip: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip: skip.max(0),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

/// Creator id a query must match: members only reach the students they
/// created, admins reach everyone.
pub fn owner_filter(actor: &Actor) -> Option<&str> {
    match actor.role {
        ActorRole::Member => Some(actor.id.as_str()),
        ActorRole::Admin => None,
    }
}

/// A student with the row version it was read at.
#[derive(Debug, Clone)]
pub struct StoredStudent {
    pub student: Student,
    pub version: i64,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn decode_student(document: serde_json::Value) -> Result<Student> {
    let student: Student = serde_json::from_value(document)?;
    student.validate()?;
    Ok(student)
}

/// Insert a new student. Returns false when the email is already taken.
pub async fn insert_student(pool: &PgPool, student: &Student) -> Result<bool> {
    student.validate()?;
    let result = sqlx::query(
        r#"
        INSERT INTO application_tracker.students
        (id, email_address, document, version, created_at, updated_at)
        VALUES ($1, $2, $3, 1, $4, $5)
        ON CONFLICT (email_address) DO NOTHING
        "#,
    )
    .bind(student.id)
    .bind(&student.email_address)
    .bind(Json(student))
    .bind(student.created_at)
    .bind(student.updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn load_student(pool: &PgPool, id: Uuid, actor: &Actor) -> Result<StoredStudent> {
    let row = sqlx::query(
        r#"
        SELECT document, version FROM application_tracker.students
        WHERE id = $1 AND ($2::text IS NULL OR document->'created_by'->>'id' = $2)
        "#,
    )
    .bind(id)
    .bind(owner_filter(actor))
    .fetch_optional(pool)
    .await?
    .ok_or(TrackerError::NotFound(id))?;

    Ok(StoredStudent {
        student: decode_student(row.get("document"))?,
        version: row.get("version"),
    })
}

/// Write back a student read at `expected_version` through `load_student`,
/// which has already applied the owner check. Fails with
/// `ConcurrentModification` if someone else saved in between.
pub async fn save_student(
    pool: &PgPool,
    student: &Student,
    expected_version: i64,
) -> Result<i64> {
    student.validate()?;
    let row = sqlx::query(
        r#"
        UPDATE application_tracker.students
        SET document = $3, email_address = $4, version = version + 1, updated_at = $5
        WHERE id = $1 AND version = $2
        RETURNING version
        "#,
    )
    .bind(student.id)
    .bind(expected_version)
    .bind(Json(student))
    .bind(&student.email_address)
    .bind(student.updated_at)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row.get("version")),
        None => {
            let exists: bool = sqlx::query(
                "SELECT EXISTS(SELECT 1 FROM application_tracker.students WHERE id = $1) AS found",
            )
            .bind(student.id)
            .fetch_one(pool)
            .await?
            .get("found");

            if exists {
                Err(TrackerError::ConcurrentModification {
                    id: student.id,
                    expected: expected_version,
                })
            } else {
                Err(TrackerError::NotFound(student.id))
            }
        }
    }
}

/// One page of students. A stored document that no longer decodes is
/// logged and left out of the page instead of failing it.
pub async fn list_students(
    pool: &PgPool,
    page: Pagination,
    actor: &Actor,
) -> Result<Vec<Student>> {
    let rows = sqlx::query(
        r#"
        SELECT id, document FROM application_tracker.students
        WHERE ($3::text IS NULL OR document->'created_by'->>'id' = $3)
        ORDER BY created_at, id
        OFFSET $1 LIMIT $2
        "#,
    )
    .bind(page.skip)
    .bind(page.limit)
    .bind(owner_filter(actor))
    .fetch_all(pool)
    .await?;

    Ok(decode_page(rows.into_iter().map(|row| {
        let id: Uuid = row.get("id");
        let document: serde_json::Value = row.get("document");
        (id, document)
    })))
}

/// Decode a page of stored documents, skipping (and logging) any that no
/// longer parse or validate.
fn decode_page<I>(rows: I) -> Vec<Student>
where
    I: IntoIterator<Item = (Uuid, serde_json::Value)>,
{
    let mut students = Vec::new();
    for (id, document) in rows {
        match decode_student(document) {
            Ok(student) => students.push(student),
            Err(err) => warn!(student = %id, error = %err, "skipping malformed student record"),
        }
    }
    students
}

/// Every stored document the actor may see, undecoded, for analytics.
pub async fn list_student_documents(
    pool: &PgPool,
    actor: &Actor,
) -> Result<Vec<serde_json::Value>> {
    let rows = sqlx::query(
        r#"
        SELECT document FROM application_tracker.students
        WHERE ($1::text IS NULL OR document->'created_by'->>'id' = $1)
        ORDER BY created_at, id
        "#,
    )
    .bind(owner_filter(actor))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|row| row.get("document")).collect())
}

pub async fn delete_student(pool: &PgPool, id: Uuid, actor: &Actor) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM application_tracker.students
        WHERE id = $1 AND ($2::text IS NULL OR document->'created_by'->>'id' = $2)
        "#,
    )
    .bind(id)
    .bind(owner_filter(actor))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(TrackerError::NotFound(id));
    }
    Ok(())
}

fn degree_from_label(label: &str) -> anyhow::Result<DegreeProfile> {
    match label {
        "Undergraduation" | "" => Ok(DegreeProfile::Undergraduate),
        "Masters" => Ok(DegreeProfile::Masters { prior_degree: None }),
        "PHD" => Ok(DegreeProfile::Phd { prior_degree: None }),
        other => anyhow::bail!("unknown degree type {other:?}"),
    }
}

fn seed_actor() -> Actor {
    Actor {
        id: "seed".to_string(),
        name: "Seed Loader".to_string(),
        email: "seed@studyabroad.local".to_string(),
        role: ActorRole::Admin,
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let counselor = Actor {
        id: "c3c1a3f0-2f55-4d53-9b55-3f0f5b1de101".to_string(),
        name: "Meera Shah".to_string(),
        email: "meera.shah@studyabroad.local".to_string(),
        role: ActorRole::Member,
    };
    let now = Utc::now();
    let actor = seed_actor();

    let students = vec![
        (
            Uuid::parse_str("8b2e9c8e-4f4c-4d0e-9a6c-1f3a0c5e7d11")?,
            "Rohan Mehta",
            "rohan.mehta@example.com",
            "+91 98200 12345",
            "United Kingdom",
            ApplicationPath::Direct,
            DegreeProfile::Masters {
                prior_degree: Some(PriorDegree {
                    institution: "University of Mumbai".to_string(),
                    field_of_study: "Computer Engineering".to_string(),
                    graduation_year: Some(2024),
                }),
            },
            vec![
                ("University of Leeds", "MSc Data Science", "September 2026"),
                ("University of Glasgow", "MSc Software Engineering", "September 2026"),
            ],
            vec![(0, "documents received"), (0, "application filed")],
        ),
        (
            Uuid::parse_str("1d6f0b52-6a0e-4b7f-8f1e-2b4c9d3e5a22")?,
            "Ananya Iyer",
            "ananya.iyer@example.com",
            "+91 99870 54321",
            "Canada",
            ApplicationPath::Si,
            DegreeProfile::Undergraduate,
            vec![("University of Toronto", "BSc Life Sciences", "January 2027")],
            vec![(0, "conditional offer received")],
        ),
        (
            Uuid::parse_str("5a9c3e11-0b7d-4c2a-8e6f-7d1b2c3a4e33")?,
            "Kabir Singh",
            "kabir.singh@example.com",
            "+91 90040 67890",
            "Australia",
            ApplicationPath::Eduwise,
            DegreeProfile::Phd { prior_degree: None },
            vec![
                ("Monash University", "PhD Civil Engineering", "February 2027"),
                ("University of Melbourne", "PhD Civil Engineering", "July 2027"),
                ("UNSW Sydney", "PhD Structural Engineering", "February 2027"),
            ],
            vec![(0, "unconditional offer received"), (0, "Uni finalized")],
        ),
    ];

    for (id, name, email, phone, country, path, degree, choices, changes) in students {
        let mut student = Student {
            id,
            full_name: name.to_string(),
            email_address: email.to_string(),
            phone_number: phone.to_string(),
            target_country: country.to_string(),
            dob: NaiveDate::from_ymd_opt(2001, 8, 21),
            degree,
            application_path: path,
            assigned_counselor: Some(counselor.clone()),
            created_by: Some(actor.clone()),
            university_choices: choices
                .into_iter()
                .map(|(university, course, intake)| {
                    let mut choice = UniversityChoice::new(university, course, intake);
                    choice.application_status = Some(ApplicationStatus::DocumentsPending);
                    choice
                })
                .collect(),
            documents: Documents::default(),
            visa_documents: VisaDocuments::default(),
            status_logs: Vec::new(),
            overview_notes: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        for (index, status) in changes {
            student = status_log::apply_status_change(&student, index, status, &actor, now)
                .with_context(|| format!("seeding status for {name}"))?
                .student;
        }

        insert_student(pool, &student)
            .await
            .with_context(|| format!("inserting seed student {name}"))?;
    }

    Ok(())
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    created_by: &Actor,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email_address: String,
        phone_number: String,
        target_country: String,
        application_path: ApplicationPath,
        degree_type: String,
        dob: Option<NaiveDate>,
        university_name: String,
        course_name: String,
        intake_month: String,
        application_status: Option<String>,
        counselor_name: Option<String>,
        counselor_email: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let now = Utc::now();
        let mut choice =
            UniversityChoice::new(&row.university_name, &row.course_name, &row.intake_month);
        choice.application_status = match row.application_status.as_deref().map(str::trim) {
            Some(value) if status::is_valid_status(value) => value.parse().ok(),
            Some("") | None => Some(ApplicationStatus::DocumentsPending),
            Some(other) => anyhow::bail!("row {}: unknown application status {other:?}", line + 1),
        };
        let assigned_counselor = match (row.counselor_name, row.counselor_email) {
            (Some(name), Some(email)) if !name.is_empty() => Some(Actor {
                id: email.clone(),
                name,
                email,
                role: ActorRole::Member,
            }),
            _ => None,
        };

        let student = Student {
            id: Uuid::new_v4(),
            full_name: row.full_name,
            email_address: row.email_address,
            phone_number: row.phone_number,
            target_country: row.target_country,
            dob: row.dob,
            degree: degree_from_label(&row.degree_type)
                .with_context(|| format!("row {}", line + 1))?,
            application_path: row.application_path,
            assigned_counselor,
            created_by: Some(created_by.clone()),
            university_choices: vec![choice],
            documents: Documents::default(),
            visa_documents: VisaDocuments::default(),
            status_logs: Vec::new(),
            overview_notes: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        if insert_student(pool, &student)
            .await
            .with_context(|| format!("row {}", line + 1))?
        {
            inserted += 1;
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let page = Pagination::new(-3, 0);
        assert_eq!(page.skip, 0);
        assert_eq!(page.limit, 1);
        assert_eq!(Pagination::new(20, 500).limit, MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(20, 10).skip, 20);
    }

    fn actor(role: ActorRole) -> Actor {
        Actor {
            id: "665f1c2ab1e4a7d2c0a1b001".to_string(),
            name: "Priya Nair".to_string(),
            email: "priya.nair@example.com".to_string(),
            role,
        }
    }

    #[test]
    fn members_are_scoped_to_their_own_students() {
        let member = actor(ActorRole::Member);
        assert_eq!(owner_filter(&member), Some("665f1c2ab1e4a7d2c0a1b001"));
        assert_eq!(owner_filter(&actor(ActorRole::Admin)), None);
    }

    #[test]
    fn malformed_rows_are_skipped_not_fatal() {
        let good = crate::models::fixtures::student(ApplicationPath::Direct, 1);
        let rows = vec![
            (Uuid::new_v4(), serde_json::json!({ "full_name": "Half a record" })),
            (good.id, serde_json::to_value(&good).unwrap()),
        ];
        let students = decode_page(rows);
        assert_eq!(students, vec![good]);
    }

    #[test]
    fn degree_labels() {
        assert_eq!(degree_from_label("PHD").unwrap(), DegreeProfile::Phd { prior_degree: None });
        assert_eq!(degree_from_label("").unwrap(), DegreeProfile::Undergraduate);
        assert!(degree_from_label("Diploma").is_err());
    }
}
