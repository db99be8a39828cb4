use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::status::ApplicationStatus;
use crate::status_log;

pub const MAX_CHOICES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Member,
    Admin,
}

/// Authenticated user a change or note is attributed to. Also used for the
/// assigned counselor and creator references on a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: ActorRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationPath {
    Direct,
    #[serde(rename = "SI")]
    Si,
    Eduwise,
}

impl ApplicationPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::Si => "SI",
            Self::Eduwise => "Eduwise",
        }
    }
}

impl fmt::Display for ApplicationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorDegree {
    pub institution: String,
    pub field_of_study: String,
    pub graduation_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "degree_type")]
pub enum DegreeProfile {
    #[default]
    #[serde(rename = "Undergraduation")]
    Undergraduate,
    Masters {
        #[serde(default)]
        prior_degree: Option<PriorDegree>,
    },
    #[serde(rename = "PHD")]
    Phd {
        #[serde(default)]
        prior_degree: Option<PriorDegree>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OfferType {
    #[default]
    Conditional,
    Unconditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VisaDecision {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl VisaDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversityNote {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    pub title: Option<String>,
    pub description: String,
    pub created_by: Actor,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewNote {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    pub title: Option<String>,
    pub content: String,
    pub created_by: Actor,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_university_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversityChoice {
    pub university_name: String,
    pub course_name: String,
    #[serde(default)]
    pub course_link: Option<String>,
    pub intake_month: String,
    #[serde(default)]
    pub application_status: Option<ApplicationStatus>,
    #[serde(default)]
    pub offer_type: OfferType,
    #[serde(default)]
    pub application_submitted: bool,
    #[serde(default)]
    pub additional_docs_requested: bool,
    #[serde(default)]
    pub loa_cas_received: bool,
    #[serde(default)]
    pub loan_process_started: bool,
    #[serde(default)]
    pub fee_payment_completed: bool,
    #[serde(default)]
    pub notes: Vec<UniversityNote>,
}

impl UniversityChoice {
    pub fn new(university_name: &str, course_name: &str, intake_month: &str) -> Self {
        Self {
            university_name: university_name.to_string(),
            course_name: course_name.to_string(),
            course_link: None,
            intake_month: intake_month.to_string(),
            application_status: None,
            offer_type: OfferType::default(),
            application_submitted: false,
            additional_docs_requested: false,
            loa_cas_received: false,
            loan_process_started: false,
            fee_payment_completed: false,
            notes: Vec::new(),
        }
    }

    /// Share of the five milestone flags that are set, 0..=100.
    pub fn milestone_progress(&self) -> f64 {
        let done = [
            self.application_submitted,
            self.additional_docs_requested,
            self.loa_cas_received,
            self.loan_process_started,
            self.fee_payment_completed,
        ]
        .iter()
        .filter(|flag| **flag)
        .count();
        done as f64 / 5.0 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Documents {
    #[serde(default)]
    pub passport: bool,
    #[serde(default)]
    pub marksheets: bool,
    #[serde(default)]
    pub english_exam: bool,
    #[serde(default)]
    pub sop: bool,
    #[serde(default)]
    pub lor: bool,
    #[serde(default)]
    pub resume: bool,
}

impl Documents {
    pub const TOTAL: usize = 6;

    pub fn completed(&self) -> usize {
        [
            self.passport,
            self.marksheets,
            self.english_exam,
            self.sop,
            self.lor,
            self.resume,
        ]
        .iter()
        .filter(|flag| **flag)
        .count()
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == Self::TOTAL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VisaDocuments {
    #[serde(default)]
    pub decision: VisaDecision,
    #[serde(default)]
    pub counselling_started: bool,
    #[serde(default)]
    pub documents_received: bool,
    #[serde(default)]
    pub application_filled: bool,
    #[serde(default)]
    pub interview_scheduled: bool,
}

impl VisaDocuments {
    pub fn any_step_started(&self) -> bool {
        self.counselling_started
            || self.documents_received
            || self.application_filled
            || self.interview_scheduled
    }
}

/// One status change. Written once, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub previous_status: Option<ApplicationStatus>,
    pub new_status: ApplicationStatus,
    pub timestamp: DateTime<Utc>,
    pub changed_by: Actor,
    pub university_choice_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub full_name: String,
    pub email_address: String,
    pub phone_number: String,
    pub target_country: String,
    #[serde(default)]
    pub dob: Option<NaiveDate>,
    #[serde(default)]
    pub degree: DegreeProfile,
    pub application_path: ApplicationPath,
    #[serde(default)]
    pub assigned_counselor: Option<Actor>,
    #[serde(default)]
    pub created_by: Option<Actor>,
    pub university_choices: Vec<UniversityChoice>,
    #[serde(default)]
    pub documents: Documents,
    #[serde(default)]
    pub visa_documents: VisaDocuments,
    #[serde(default)]
    pub status_logs: Vec<StatusLogEntry>,
    #[serde(default)]
    pub overview_notes: Vec<OverviewNote>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    /// Priority of the choice at `index`; always its position plus one.
    pub fn choice_priority(&self, index: usize) -> Option<usize> {
        (index < self.university_choices.len()).then_some(index + 1)
    }

    pub fn validate(&self) -> Result<()> {
        let choices = self.university_choices.len();
        if choices == 0 || choices > MAX_CHOICES {
            return Err(TrackerError::InvalidStudent(format!(
                "expected 1 to {MAX_CHOICES} university choices, found {choices}"
            )));
        }
        if self.full_name.trim().is_empty() {
            return Err(TrackerError::InvalidStudent("full name is empty".into()));
        }
        if !self.email_address.contains('@') {
            return Err(TrackerError::InvalidStudent(format!(
                "invalid email address {:?}",
                self.email_address
            )));
        }
        let phone_len = self.phone_number.chars().count();
        if !(10..=20).contains(&phone_len) {
            return Err(TrackerError::InvalidStudent(format!(
                "phone number must be 10 to 20 characters, found {phone_len}"
            )));
        }
        status_log::verify_log_chain(self)
    }

    /// Decode and validate a stored document. Anything that fails becomes an
    /// `AggregationInput` error naming the record.
    pub fn from_document(document: &serde_json::Value) -> Result<Self> {
        let id = document
            .get("id")
            .and_then(|value| value.as_str())
            .unwrap_or("<unknown>")
            .to_string();

        let student: Student = serde_json::from_value(document.clone()).map_err(|err| {
            TrackerError::AggregationInput {
                id: id.clone(),
                reason: err.to_string(),
            }
        })?;

        student
            .validate()
            .map_err(|err| TrackerError::AggregationInput {
                id,
                reason: err.to_string(),
            })?;

        Ok(student)
    }
}

/// Body of a status update request. The status stays a string until the
/// status model has checked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub university_choice_index: usize,
    pub new_status: String,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;

    use super::*;

    pub fn actor() -> Actor {
        Actor {
            id: "665f1c2ab1e4a7d2c0a1b001".to_string(),
            name: "Priya Nair".to_string(),
            email: "priya.nair@example.com".to_string(),
            role: ActorRole::Member,
        }
    }

    pub fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
    }

    pub fn student(path: ApplicationPath, choices: usize) -> Student {
        let university_choices = (0..choices)
            .map(|i| {
                let mut choice = UniversityChoice::new(
                    &format!("University {}", i + 1),
                    "MSc Data Science",
                    "September 2026",
                );
                choice.application_status = Some(ApplicationStatus::DocumentsPending);
                choice
            })
            .collect();

        Student {
            id: Uuid::new_v4(),
            full_name: "Avery Lee".to_string(),
            email_address: "avery@example.com".to_string(),
            phone_number: "+44 7700 900123".to_string(),
            target_country: "United Kingdom".to_string(),
            dob: NaiveDate::from_ymd_opt(2002, 5, 14),
            degree: DegreeProfile::Masters { prior_degree: None },
            application_path: path,
            assigned_counselor: Some(actor()),
            created_by: Some(actor()),
            university_choices,
            documents: Documents::default(),
            visa_documents: VisaDocuments::default(),
            status_logs: Vec::new(),
            overview_notes: Vec::new(),
            created_at: at(9),
            updated_at: at(9),
        }
    }
}
