use chrono::{DateTime, Utc};

use crate::error::{Result, TrackerError};
use crate::models::{Student, UniversityChoice, MAX_CHOICES};

/// Append a choice at the lowest priority.
pub fn add_choice(
    student: &Student,
    choice: UniversityChoice,
    now: DateTime<Utc>,
) -> Result<Student> {
    if student.university_choices.len() >= MAX_CHOICES {
        return Err(TrackerError::ChoiceLimit(format!(
            "a student can have at most {MAX_CHOICES} university choices"
        )));
    }
    let mut updated = student.clone();
    updated.university_choices.push(choice);
    updated.updated_at = now;
    Ok(updated)
}

/// Remove a choice; later choices move up one priority.
///
/// Log entries are immutable and address choices by position, so a choice
/// can only go if neither it nor any choice after it has status history.
pub fn remove_choice(student: &Student, index: usize, now: DateTime<Utc>) -> Result<Student> {
    let len = student.university_choices.len();
    if index >= len {
        return Err(TrackerError::IndexOutOfRange { index, len });
    }
    if len == 1 {
        return Err(TrackerError::ChoiceLimit(
            "a student needs at least one university choice".into(),
        ));
    }
    if student
        .status_logs
        .iter()
        .any(|entry| entry.university_choice_index >= index)
    {
        return Err(TrackerError::ChoiceHasHistory { index });
    }

    let mut updated = student.clone();
    updated.university_choices.remove(index);
    updated.updated_at = now;
    Ok(updated)
}
