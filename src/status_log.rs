use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Result, TrackerError};
use crate::models::{Actor, OverviewNote, StatusLogEntry, Student};
use crate::notes;
use crate::status;

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub student: Student,
    pub entry: StatusLogEntry,
    /// Automatic note, when one could be built.
    pub note: Option<OverviewNote>,
}

/// Record a status change on one university choice.
///
/// The input is never touched; on success the returned student carries the
/// appended log entry, the new live status and (usually) an automatic note.
/// A failure to build the note is logged and does not fail the change.
/// Callers must serialise writes per student so the log chain stays intact.
pub fn apply_status_change(
    student: &Student,
    index: usize,
    new_status: &str,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<StatusChange> {
    let len = student.university_choices.len();
    let choice = student
        .university_choices
        .get(index)
        .ok_or(TrackerError::IndexOutOfRange { index, len })?;

    let previous = choice.application_status;
    let new_status = status::validate_transition(previous, new_status)?;

    let entry = StatusLogEntry {
        previous_status: previous,
        new_status,
        timestamp: now,
        changed_by: actor.clone(),
        university_choice_index: index,
    };

    let mut updated = student.clone();
    updated.status_logs.push(entry.clone());
    updated.university_choices[index].application_status = Some(new_status);
    updated.updated_at = now;

    let note = match notes::transition_note(
        &choice.university_name,
        index,
        previous,
        new_status,
        actor,
        now,
    ) {
        Ok(note) => {
            updated.overview_notes.push(note.clone());
            Some(note)
        }
        Err(err) => {
            warn!(student = %student.id, index, error = %err, "skipping automatic status note");
            None
        }
    };

    info!(
        student = %student.id,
        index,
        from = previous.map(|s| s.as_str()).unwrap_or("none"),
        to = new_status.as_str(),
        actor = %actor.id,
        "application status changed"
    );

    Ok(StatusChange {
        student: updated,
        entry,
        note,
    })
}

/// Log entries for one choice, oldest first.
pub fn status_history(student: &Student, index: usize) -> Vec<&StatusLogEntry> {
    student
        .status_logs
        .iter()
        .filter(|entry| entry.university_choice_index == index)
        .collect()
}

/// Check that every choice's entries chain (`new_status` feeds the next
/// `previous_status`), point at an existing choice, and end on the choice's
/// live status.
pub fn verify_log_chain(student: &Student) -> Result<()> {
    let len = student.university_choices.len();
    if let Some(entry) = student
        .status_logs
        .iter()
        .find(|entry| entry.university_choice_index >= len)
    {
        return Err(TrackerError::InvalidStudent(format!(
            "status log references choice {} but only {len} exist",
            entry.university_choice_index
        )));
    }

    for (index, choice) in student.university_choices.iter().enumerate() {
        let history = status_history(student, index);
        for pair in history.windows(2) {
            if pair[1].previous_status != Some(pair[0].new_status) {
                return Err(TrackerError::InvalidStudent(format!(
                    "status log for choice {index} is broken at {}",
                    pair[1].timestamp
                )));
            }
        }
        if let Some(last) = history.last() {
            if choice.application_status != Some(last.new_status) {
                return Err(TrackerError::InvalidStudent(format!(
                    "choice {index} status does not match its latest log entry"
                )));
            }
        }
    }

    Ok(())
}
