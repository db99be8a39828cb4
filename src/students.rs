use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::{Result, TrackerError};
use crate::models::{Actor, ApplicationPath, Documents, OfferType, Student, VisaDocuments};

/// Milestone and detail changes for one university choice. The status is
/// not here: it only moves through the status log.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChoiceUpdate {
    pub index: usize,
    #[serde(default)]
    pub intake_month: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub course_link: Option<Option<String>>,
    #[serde(default)]
    pub offer_type: Option<OfferType>,
    #[serde(default)]
    pub application_submitted: Option<bool>,
    #[serde(default)]
    pub additional_docs_requested: Option<bool>,
    #[serde(default)]
    pub loa_cas_received: Option<bool>,
    #[serde(default)]
    pub loan_process_started: Option<bool>,
    #[serde(default)]
    pub fee_payment_completed: Option<bool>,
}

/// Partial update of a student. Absent fields are left alone; `documents`
/// and `visa_documents` replace the whole checklist when given.
/// `assigned_counselor: null` unassigns.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StudentUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub target_country: Option<String>,
    #[serde(default)]
    pub application_path: Option<ApplicationPath>,
    #[serde(default, deserialize_with = "present")]
    pub assigned_counselor: Option<Option<Actor>>,
    #[serde(default)]
    pub documents: Option<Documents>,
    #[serde(default)]
    pub visa_documents: Option<VisaDocuments>,
    #[serde(default)]
    pub university_choices: Vec<ChoiceUpdate>,
}

/// Tells a field that was sent as `null` apart from one left out.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn set<T>(target: &mut T, value: &Option<T>)
where
    T: Clone,
{
    if let Some(value) = value {
        *target = value.clone();
    }
}

pub fn update_fields(
    student: &Student,
    update: &StudentUpdate,
    now: DateTime<Utc>,
) -> Result<Student> {
    let mut updated = student.clone();

    set(&mut updated.full_name, &update.full_name);
    set(&mut updated.email_address, &update.email_address);
    set(&mut updated.phone_number, &update.phone_number);
    set(&mut updated.target_country, &update.target_country);
    set(&mut updated.application_path, &update.application_path);
    set(&mut updated.assigned_counselor, &update.assigned_counselor);
    set(&mut updated.documents, &update.documents);
    set(&mut updated.visa_documents, &update.visa_documents);

    let len = updated.university_choices.len();
    for change in &update.university_choices {
        let choice = updated
            .university_choices
            .get_mut(change.index)
            .ok_or(TrackerError::IndexOutOfRange {
                index: change.index,
                len,
            })?;
        set(&mut choice.intake_month, &change.intake_month);
        set(&mut choice.course_link, &change.course_link);
        set(&mut choice.offer_type, &change.offer_type);
        set(&mut choice.application_submitted, &change.application_submitted);
        set(&mut choice.additional_docs_requested, &change.additional_docs_requested);
        set(&mut choice.loa_cas_received, &change.loa_cas_received);
        set(&mut choice.loan_process_started, &change.loan_process_started);
        set(&mut choice.fee_payment_completed, &change.fee_payment_completed);
    }

    if update.target_country.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(TrackerError::InvalidStudent("target country is empty".into()));
    }
    updated.validate()?;
    updated.updated_at = now;
    Ok(updated)
}
