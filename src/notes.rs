use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::models::{Actor, NoteType, OverviewNote, Student, UniversityNote};
use crate::status::ApplicationStatus;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_BODY_CHARS: usize = 2000;

/// Trim both parts and require at least one of them to carry text.
fn clean_note_text(title: Option<&str>, body: &str) -> Result<(Option<String>, String)> {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let body = body.trim().to_string();

    if title.is_none() && body.is_empty() {
        return Err(TrackerError::InvalidNote(
            "a note needs a title or a body".into(),
        ));
    }
    if let Some(t) = &title {
        if t.chars().count() > MAX_TITLE_CHARS {
            return Err(TrackerError::InvalidNote(format!(
                "title longer than {MAX_TITLE_CHARS} characters"
            )));
        }
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(TrackerError::InvalidNote(format!(
            "body longer than {MAX_BODY_CHARS} characters"
        )));
    }

    Ok((title, body))
}

pub fn add_overview_note(
    student: &Student,
    title: Option<&str>,
    content: &str,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Student> {
    let (title, content) = clean_note_text(title, content)?;
    let mut updated = student.clone();
    updated.overview_notes.push(OverviewNote {
        id: Uuid::new_v4(),
        note_type: NoteType::Manual,
        title,
        content,
        created_by: actor.clone(),
        created_at: now,
        related_university_index: None,
    });
    updated.updated_at = now;
    Ok(updated)
}

pub fn add_university_note(
    student: &Student,
    index: usize,
    title: Option<&str>,
    description: &str,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Student> {
    let len = student.university_choices.len();
    if index >= len {
        return Err(TrackerError::IndexOutOfRange { index, len });
    }
    let (title, description) = clean_note_text(title, description)?;

    let mut updated = student.clone();
    updated.university_choices[index].notes.push(UniversityNote {
        id: Uuid::new_v4(),
        note_type: NoteType::Manual,
        title,
        description,
        created_by: actor.clone(),
        created_at: now,
    });
    updated.updated_at = now;
    Ok(updated)
}

/// System note describing a status change on one choice.
pub fn transition_note(
    university_name: &str,
    index: usize,
    previous: Option<ApplicationStatus>,
    new: ApplicationStatus,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<OverviewNote> {
    let university = university_name.trim();
    if university.is_empty() {
        return Err(TrackerError::NoteCreation(format!(
            "choice {index} has no university name"
        )));
    }

    let content = match previous {
        Some(previous) => format!("{previous} → {new} for {university}"),
        None => format!("Initial status: {new} for {university}"),
    };
    let (title, content) = clean_note_text(Some("Application status updated"), &content)
        .map_err(|err| TrackerError::NoteCreation(err.to_string()))?;

    Ok(OverviewNote {
        id: Uuid::new_v4(),
        note_type: NoteType::Automatic,
        title,
        content,
        created_by: actor.clone(),
        created_at: now,
        related_university_index: Some(index),
    })
}
