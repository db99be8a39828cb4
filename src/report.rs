use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::funnel::{FunnelData, FunnelSegment, StudentAnalytics};

/// Segments largest first, ties by label.
pub fn sorted_segments(data: &FunnelData) -> Vec<(&str, &FunnelSegment)> {
    let mut segments: Vec<(&str, &FunnelSegment)> =
        data.iter().map(|(label, segment)| (label.as_str(), segment)).collect();
    segments.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
    segments
}

fn write_section(output: &mut String, title: &str, data: &FunnelData) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");

    if data.is_empty() {
        let _ = writeln!(output, "No data recorded.");
        return;
    }

    for (label, segment) in sorted_segments(data) {
        let _ = writeln!(
            output,
            "- {}: {} ({:.1}%)",
            label, segment.count, segment.percentage
        );
    }
}

pub fn build_report(analytics: &StudentAnalytics, generated_at: DateTime<Utc>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Student Application Funnel Report");
    let _ = writeln!(
        output,
        "Generated {} across {} students",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        analytics.total_students
    );

    write_section(&mut output, "Application Path", &analytics.application_path_funnel);
    write_section(&mut output, "Overall Stage", &analytics.overall_stage_funnel);
    write_section(
        &mut output,
        "Document Completion",
        &analytics.document_completion_funnel,
    );
    write_section(
        &mut output,
        "University Applications (per choice)",
        &analytics.university_application_funnel,
    );
    write_section(
        &mut output,
        "Visa Decisions",
        &analytics.visa_process_funnel.status_distribution,
    );
    write_section(
        &mut output,
        "Visa Process Steps",
        &analytics.visa_process_funnel.process_steps,
    );
    write_section(&mut output, "Target Countries", &analytics.country_distribution);
    write_section(&mut output, "Counselors", &analytics.counselor_distribution);

    output
}
