//! Inspection upsert service.
//!
//! Validates a submitted PM inspection and replaces the work order's single
//! report with it. Validation collects every problem before failing, and a
//! failed submission writes nothing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::model::{
    AxlePosition, ChecklistItem, ChecklistSection, InspectionId, InspectionSubmission, ItemStatus,
    Job, PmInspection, TirePosition,
};

/// The validated parts of a submission that change shape on the way in.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidInspection {
    pub checklist: Vec<ChecklistSection>,
    pub pushrod_stroke: BTreeMap<AxlePosition, f64>,
    pub tread_depth: BTreeMap<TirePosition, f64>,
}

/// Check a submission without touching any state.
///
/// Issues name the offending checklist item id, measurement key, or field.
pub fn validate(
    submission: &InspectionSubmission,
) -> std::result::Result<ValidInspection, ValidationError> {
    let mut errors = ValidationError::default();

    if submission.checklist.is_empty() {
        errors.push("checklist", "at least one section is required");
    }

    let mut checklist = Vec::with_capacity(submission.checklist.len());
    for section in &submission.checklist {
        let mut items = Vec::with_capacity(section.items.len());
        for item in &section.items {
            let notes = item.notes.as_deref().unwrap_or("").trim().to_string();
            let status = match item.status.as_deref().map(str::parse::<ItemStatus>) {
                Some(Ok(status)) => status,
                Some(Err(())) => {
                    errors.push(&item.id, "status must be pass, fail or na");
                    continue;
                }
                None => {
                    errors.push(&item.id, "status is required");
                    continue;
                }
            };
            if status == ItemStatus::Fail && notes.is_empty() {
                errors.push(&item.id, "failed items require notes");
                continue;
            }
            items.push(ChecklistItem {
                id: item.id.clone(),
                label: item.label.clone(),
                status,
                notes,
            });
        }
        checklist.push(ChecklistSection {
            id: section.id.clone(),
            title: section.title.clone(),
            items,
        });
    }

    let pushrod_stroke = measurements(
        &submission.pushrod_stroke,
        "pushrod_stroke",
        AxlePosition::from_key,
        &mut errors,
    );
    let tread_depth = measurements(
        &submission.tread_depth,
        "tread_depth",
        TirePosition::from_key,
        &mut errors,
    );

    if submission.inspector_name.trim().is_empty() {
        errors.push("inspector_name", "inspector name is required");
    }

    errors.into_result()?;
    Ok(ValidInspection {
        checklist,
        pushrod_stroke,
        tread_depth,
    })
}

fn measurements<K: Ord>(
    raw: &BTreeMap<String, f64>,
    field: &str,
    parse_key: fn(&str) -> Option<K>,
    errors: &mut ValidationError,
) -> BTreeMap<K, f64> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let target = format!("{field}.{key}");
        let Some(position) = parse_key(key) else {
            errors.push(target, "unknown position");
            continue;
        };
        if !value.is_finite() || *value < 0.0 {
            errors.push(target, "measurement must be a non-negative number");
            continue;
        }
        out.insert(position, *value);
    }
    out
}

/// Validate and store a submission as the job's only inspection.
///
/// The existing report, if any, keeps its id and has every other field
/// overwritten. Nothing from the previous submission survives.
pub fn upsert(
    job: &mut Job,
    submission: InspectionSubmission,
    now: DateTime<Utc>,
) -> std::result::Result<InspectionId, ValidationError> {
    let valid = validate(&submission)?;

    let id = job
        .inspection
        .as_ref()
        .map(|existing| existing.id)
        .unwrap_or_default();

    job.inspection = Some(PmInspection {
        id,
        work_order_id: job.id(),
        business: submission.business,
        vehicle: submission.vehicle,
        checklist: valid.checklist,
        pushrod_stroke: valid.pushrod_stroke,
        tread_depth: valid.tread_depth,
        additional_notes: submission
            .additional_notes
            .filter(|notes| !notes.trim().is_empty()),
        inspector_name: submission.inspector_name.trim().to_string(),
        inspection_date: submission
            .inspection_date
            .unwrap_or_else(|| now.date_naive()),
        submitted_at: now,
    });

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewWorkOrder, SubmittedItem, SubmittedSection};

    fn submission(items: Vec<SubmittedItem>) -> InspectionSubmission {
        InspectionSubmission {
            checklist: vec![SubmittedSection {
                id: "brakes".into(),
                title: "Brakes".into(),
                items,
            }],
            inspector_name: "Dana Ortiz".into(),
            ..Default::default()
        }
    }

    #[test]
    fn fail_without_notes_names_the_item() {
        let sub = submission(vec![
            SubmittedItem::new("b-1", "pass"),
            SubmittedItem::new("b-2", "fail"),
        ]);
        let err = validate(&sub).unwrap_err();
        assert_eq!(err.targets(), vec!["b-2"]);
    }

    #[test]
    fn every_problem_is_reported() {
        let mut sub = submission(vec![
            SubmittedItem {
                id: "b-1".into(),
                ..Default::default()
            },
            SubmittedItem::new("b-2", "maybe"),
            SubmittedItem::new("b-3", "fail").notes("   "),
        ]);
        sub.inspector_name = " ".into();
        sub.pushrod_stroke.insert("9Z".into(), 1.5);
        sub.tread_depth.insert("LF".into(), -2.0);

        let err = validate(&sub).unwrap_err();
        assert_eq!(
            err.targets(),
            vec![
                "b-1",
                "b-2",
                "b-3",
                "pushrod_stroke.9Z",
                "tread_depth.LF",
                "inspector_name"
            ]
        );
    }

    #[test]
    fn upsert_replaces_wholesale_and_keeps_id() {
        let mut job = Job::new(NewWorkOrder::new("c", "pm").into_work_order(Utc::now()));

        let mut first = submission(vec![SubmittedItem::new("b-1", "fail").notes("worn pads")]);
        first.additional_notes = Some("check again in 30 days".into());
        first.pushrod_stroke.insert("1L".into(), 1.75);
        let id1 = upsert(&mut job, first, Utc::now()).unwrap();

        let second = submission(vec![SubmittedItem::new("b-1", "pass")]);
        let id2 = upsert(&mut job, second, Utc::now()).unwrap();

        assert_eq!(id1, id2);
        let stored = job.inspection.as_ref().unwrap();
        assert_eq!(stored.checklist[0].items[0].status, ItemStatus::Pass);
        assert!(stored.additional_notes.is_none());
        assert!(stored.pushrod_stroke.is_empty());
    }

    #[test]
    fn rejected_submission_leaves_existing_report() {
        let mut job = Job::new(NewWorkOrder::new("c", "pm").into_work_order(Utc::now()));
        upsert(&mut job, submission(vec![SubmittedItem::new("b-1", "na")]), Utc::now()).unwrap();
        let before = job.inspection.clone();

        let bad = submission(vec![SubmittedItem::new("b-1", "fail")]);
        assert!(upsert(&mut job, bad, Utc::now()).is_err());
        assert_eq!(job.inspection, before);
    }
}
