use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Student, UniversityChoice, VisaDecision, VisaDocuments};
use crate::status::ApplicationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FunnelSegment {
    pub count: usize,
    pub percentage: f64,
}

/// Label to segment. Ordered by label so output is stable; display code
/// sorts by count itself.
pub type FunnelData = BTreeMap<String, FunnelSegment>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VisaProcessFunnel {
    pub status_distribution: FunnelData,
    pub process_steps: FunnelData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StudentAnalytics {
    pub total_students: usize,
    pub application_path_funnel: FunnelData,
    pub overall_stage_funnel: FunnelData,
    pub document_completion_funnel: FunnelData,
    pub university_application_funnel: FunnelData,
    pub visa_process_funnel: VisaProcessFunnel,
    pub country_distribution: FunnelData,
    pub counselor_distribution: FunnelData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Document,
    Application,
    Visa,
    Departed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Application => "application",
            Self::Visa => "visa",
            Self::Departed => "departed",
        }
    }
}

pub const NOT_STARTED: &str = "not started";
pub const UNASSIGNED: &str = "Unassigned";

/// `count / total * 100`, rounded half-up to one decimal.
///
/// Worked in integer tenths so the result does not depend on float
/// rounding of the intermediate quotient.
pub fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let count = count as u128;
    let total = total as u128;
    let tenths = (2000 * count + total) / (2 * total);
    tenths as f64 / 10.0
}

/// Count `keys` and express each count against `total`.
pub fn tally<I>(keys: I, total: usize) -> FunnelData
where
    I: IntoIterator<Item = String>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    if total == 0 {
        return FunnelData::new();
    }
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| {
            (
                key,
                FunnelSegment {
                    count,
                    percentage: percentage(count, total),
                },
            )
        })
        .collect()
}

/// One key per item, percentages against the number of items.
pub fn build_funnel<T, F>(items: &[T], key_fn: F) -> FunnelData
where
    F: Fn(&T) -> String,
{
    tally(items.iter().map(key_fn), items.len())
}

/// Highest stage reached wins:
/// departed on an accepted visa; visa once any visa step has started, the
/// visa was rejected, or a university is finalized; application once all
/// documents are in, an application was submitted, or a choice has reached
/// "application pending"; document otherwise.
pub fn derive_stage(student: &Student) -> Stage {
    let visa = &student.visa_documents;
    if visa.decision == VisaDecision::Accepted {
        return Stage::Departed;
    }

    let choices = &student.university_choices;
    let finalized = choices
        .iter()
        .any(|c| c.application_status == Some(ApplicationStatus::UniFinalized));
    if visa.any_step_started() || visa.decision == VisaDecision::Rejected || finalized {
        return Stage::Visa;
    }

    let applying = choices.iter().any(|c| {
        c.application_submitted
            || c.application_status
                .is_some_and(|s| s.rank() >= ApplicationStatus::ApplicationPending.rank())
    });
    if student.documents.is_complete() || applying {
        return Stage::Application;
    }

    Stage::Document
}

fn choice_status_label(choice: &UniversityChoice) -> String {
    choice
        .application_status
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| NOT_STARTED.to_string())
}

fn visa_step_flags(visa: &VisaDocuments) -> [(&'static str, bool); 4] {
    [
        ("counselling_started", visa.counselling_started),
        ("documents_received", visa.documents_received),
        ("application_filled", visa.application_filled),
        ("interview_scheduled", visa.interview_scheduled),
    ]
}

pub fn visa_process_funnel(students: &[Student]) -> VisaProcessFunnel {
    let total = students.len();
    let status_distribution =
        build_funnel(students, |s| s.visa_documents.decision.as_str().to_string());

    let mut counts = [0usize; 4];
    for student in students {
        for (slot, (_, done)) in visa_step_flags(&student.visa_documents).iter().enumerate() {
            if *done {
                counts[slot] += 1;
            }
        }
    }

    let mut process_steps = FunnelData::new();
    if total > 0 {
        let names = visa_step_flags(&VisaDocuments::default()).map(|(name, _)| name);
        for (name, count) in names.into_iter().zip(counts) {
            process_steps.insert(
                name.to_string(),
                FunnelSegment {
                    count,
                    percentage: percentage(count, total),
                },
            );
        }
    }

    VisaProcessFunnel {
        status_distribution,
        process_steps,
    }
}

/// Per-choice status distribution. The denominator is the number of
/// choices across all students, not the number of students.
pub fn university_application_funnel(students: &[Student]) -> FunnelData {
    let choices: Vec<&UniversityChoice> = students
        .iter()
        .flat_map(|s| s.university_choices.iter())
        .collect();
    build_funnel(&choices, |c| choice_status_label(c))
}

pub fn build_analytics(students: &[Student]) -> StudentAnalytics {
    let analytics = StudentAnalytics {
        total_students: students.len(),
        application_path_funnel: build_funnel(students, |s| {
            s.application_path.as_str().to_string()
        }),
        overall_stage_funnel: build_funnel(students, |s| derive_stage(s).as_str().to_string()),
        document_completion_funnel: build_funnel(students, |s| {
            format!("{}/6 documents", s.documents.completed())
        }),
        university_application_funnel: university_application_funnel(students),
        visa_process_funnel: visa_process_funnel(students),
        country_distribution: build_funnel(students, |s| s.target_country.clone()),
        counselor_distribution: build_funnel(students, |s| {
            s.assigned_counselor
                .as_ref()
                .map(|c| c.name.clone())
                .unwrap_or_else(|| UNASSIGNED.to_string())
        }),
    };

    debug!(
        students = analytics.total_students,
        choices = analytics
            .university_application_funnel
            .values()
            .map(|s| s.count)
            .sum::<usize>(),
        "analytics built"
    );

    analytics
}

/// Aggregate raw stored documents. Records that fail to decode or validate
/// are logged and left out; the rest are still aggregated.
pub fn build_analytics_from_documents(documents: &[serde_json::Value]) -> StudentAnalytics {
    let mut students = Vec::with_capacity(documents.len());
    for document in documents {
        match Student::from_document(document) {
            Ok(student) => students.push(student),
            Err(err) => warn!(error = %err, "skipping malformed student record"),
        }
    }
    build_analytics(&students)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{actor, student};
    use crate::models::{ApplicationPath, Documents};

    fn sum_percentages(data: &FunnelData) -> f64 {
        data.values().map(|s| s.percentage).sum()
    }

    #[test]
    fn rounding_is_half_up_to_one_decimal() {
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(1, 16), 6.3);
        assert_eq!(percentage(1, 8), 12.5);
        assert_eq!(percentage(1, 6), 16.7);
        assert_eq!(percentage(1, 2000), 0.1);
        assert_eq!(percentage(1, 2001), 0.0);
        assert_eq!(percentage(5, 5), 100.0);
        assert_eq!(percentage(0, 5), 0.0);
        assert_eq!(percentage(3, 0), 0.0);
    }

    #[test]
    fn application_path_scenario() {
        let students = vec![
            student(ApplicationPath::Direct, 1),
            student(ApplicationPath::Si, 1),
            student(ApplicationPath::Si, 1),
        ];
        let analytics = build_analytics(&students);

        let mut expected = FunnelData::new();
        expected.insert("Direct".into(), FunnelSegment { count: 1, percentage: 33.3 });
        expected.insert("SI".into(), FunnelSegment { count: 2, percentage: 66.7 });
        assert_eq!(analytics.application_path_funnel, expected);
        assert_eq!(analytics.total_students, 3);
    }

    #[test]
    fn empty_collection_yields_empty_funnels() {
        let analytics = build_analytics(&[]);
        assert_eq!(analytics, StudentAnalytics::default());
        assert!(analytics.visa_process_funnel.process_steps.is_empty());
        assert!(build_funnel(&Vec::<Student>::new(), |s| s.target_country.clone()).is_empty());
    }

    #[test]
    fn university_funnel_uses_choice_denominator() {
        let one = student(ApplicationPath::Direct, 1);
        let mut three = student(ApplicationPath::Si, 3);
        three.university_choices[1].application_status =
            Some(ApplicationStatus::ApplicationFiled);
        three.university_choices[2].application_status = None;

        let funnel = university_application_funnel(&[one, three]);
        let total: usize = funnel.values().map(|s| s.count).sum();
        assert_eq!(total, 4);
        assert_eq!(
            funnel["documents pending"],
            FunnelSegment { count: 2, percentage: 50.0 }
        );
        assert_eq!(
            funnel["application filed"],
            FunnelSegment { count: 1, percentage: 25.0 }
        );
        assert_eq!(funnel[NOT_STARTED], FunnelSegment { count: 1, percentage: 25.0 });
    }

    #[test]
    fn student_funnels_sum_to_one_hundred() {
        let paths = [
            ApplicationPath::Direct,
            ApplicationPath::Si,
            ApplicationPath::Eduwise,
            ApplicationPath::Si,
            ApplicationPath::Direct,
            ApplicationPath::Eduwise,
            ApplicationPath::Si,
        ];
        let countries = ["United Kingdom", "Canada", "Australia"];
        let students: Vec<Student> = paths
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let mut s = student(*path, 1 + i % 5);
                s.target_country = countries[i % 3].to_string();
                s.documents.passport = i % 2 == 0;
                if i % 4 == 0 {
                    s.assigned_counselor = None;
                }
                s
            })
            .collect();
        let analytics = build_analytics(&students);

        for funnel in [
            &analytics.application_path_funnel,
            &analytics.overall_stage_funnel,
            &analytics.document_completion_funnel,
            &analytics.country_distribution,
            &analytics.counselor_distribution,
            &analytics.visa_process_funnel.status_distribution,
        ] {
            let tolerance = 0.1 * funnel.len() as f64;
            assert!((sum_percentages(funnel) - 100.0).abs() <= tolerance + 1e-9);
            let count: usize = funnel.values().map(|s| s.count).sum();
            assert_eq!(count, students.len());
        }
        assert_eq!(analytics.counselor_distribution[UNASSIGNED].count, 2);
    }

    #[test]
    fn output_is_deterministic() {
        let students: Vec<Student> = (0..9)
            .map(|i| {
                let mut s = student(ApplicationPath::Eduwise, 1 + i % 3);
                s.target_country = format!("Country {}", i % 4);
                s
            })
            .collect();
        let first = serde_json::to_string(&build_analytics(&students)).unwrap();
        let second = serde_json::to_string(&build_analytics(&students)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn stage_derivation_precedence() {
        let mut s = student(ApplicationPath::Direct, 2);
        assert_eq!(derive_stage(&s), Stage::Document);

        s.university_choices[1].application_status = Some(ApplicationStatus::ApplicationPending);
        assert_eq!(derive_stage(&s), Stage::Application);

        let mut docs_only = student(ApplicationPath::Direct, 1);
        docs_only.documents = Documents {
            passport: true,
            marksheets: true,
            english_exam: true,
            sop: true,
            lor: true,
            resume: true,
        };
        assert_eq!(derive_stage(&docs_only), Stage::Application);

        s.university_choices[0].application_status = Some(ApplicationStatus::UniFinalized);
        assert_eq!(derive_stage(&s), Stage::Visa);

        let mut rejected = student(ApplicationPath::Si, 1);
        rejected.visa_documents.decision = VisaDecision::Rejected;
        assert_eq!(derive_stage(&rejected), Stage::Visa);

        s.visa_documents.decision = VisaDecision::Accepted;
        assert_eq!(derive_stage(&s), Stage::Departed);
    }

    #[test]
    fn visa_funnel_counts_steps_over_students() {
        let mut a = student(ApplicationPath::Direct, 1);
        a.visa_documents.counselling_started = true;
        a.visa_documents.documents_received = true;
        a.visa_documents.decision = VisaDecision::Accepted;
        let mut b = student(ApplicationPath::Direct, 1);
        b.visa_documents.counselling_started = true;
        let c = student(ApplicationPath::Direct, 1);
        let d = student(ApplicationPath::Direct, 1);

        let visa = visa_process_funnel(&[a, b, c, d]);
        assert_eq!(
            visa.process_steps["counselling_started"],
            FunnelSegment { count: 2, percentage: 50.0 }
        );
        assert_eq!(
            visa.process_steps["documents_received"],
            FunnelSegment { count: 1, percentage: 25.0 }
        );
        assert_eq!(visa.process_steps["interview_scheduled"].count, 0);
        assert_eq!(visa.process_steps.len(), 4);
        assert_eq!(
            visa.status_distribution["Pending"],
            FunnelSegment { count: 3, percentage: 75.0 }
        );
        assert_eq!(visa.status_distribution["Accepted"].count, 1);
        assert!(!visa.status_distribution.contains_key("Rejected"));
    }

    #[test]
    fn document_completion_buckets() {
        let mut full = student(ApplicationPath::Direct, 1);
        full.documents = Documents {
            passport: true,
            marksheets: true,
            english_exam: true,
            sop: true,
            lor: true,
            resume: true,
        };
        let none = student(ApplicationPath::Direct, 1);
        let analytics = build_analytics(&[full, none]);
        assert_eq!(analytics.document_completion_funnel["6/6 documents"].count, 1);
        assert_eq!(analytics.document_completion_funnel["0/6 documents"].count, 1);
    }

    #[test]
    fn malformed_documents_are_skipped() {
        let good = student(ApplicationPath::Si, 2);
        let mut no_choices = serde_json::to_value(student(ApplicationPath::Direct, 1)).unwrap();
        no_choices["university_choices"] = serde_json::json!([]);
        let garbage = serde_json::json!({ "id": "not-a-student" });

        let analytics = build_analytics_from_documents(&[
            serde_json::to_value(&good).unwrap(),
            no_choices,
            garbage,
        ]);
        assert_eq!(analytics.total_students, 1);
        assert_eq!(
            analytics.application_path_funnel["SI"],
            FunnelSegment { count: 1, percentage: 100.0 }
        );
        assert_eq!(
            analytics.university_application_funnel["documents pending"].count,
            2
        );
    }

    #[test]
    fn counselor_distribution_uses_names() {
        let analytics = build_analytics(&[student(ApplicationPath::Direct, 1)]);
        assert_eq!(
            analytics.counselor_distribution[&actor().name],
            FunnelSegment { count: 1, percentage: 100.0 }
        );
    }

    #[test]
    fn analytics_wire_shape() {
        let json = serde_json::to_value(build_analytics(&[student(ApplicationPath::Direct, 1)]))
            .unwrap();
        for field in [
            "total_students",
            "application_path_funnel",
            "overall_stage_funnel",
            "document_completion_funnel",
            "university_application_funnel",
            "visa_process_funnel",
            "country_distribution",
            "counselor_distribution",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert!(json["visa_process_funnel"]["status_distribution"].is_object());
        assert_eq!(json["application_path_funnel"]["Direct"]["count"], 1);
        assert_eq!(json["application_path_funnel"]["Direct"]["percentage"], 100.0);
    }
}
