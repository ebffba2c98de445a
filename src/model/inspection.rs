//! Preventive-maintenance inspection report.
//!
//! [`InspectionSubmission`] is what a client sends: loosely typed so that a
//! missing or misspelled status becomes a validation issue naming the item
//! instead of a body-parse failure. [`PmInspection`] is the validated,
//! stored form.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{InspectionId, VehicleSnapshot, WorkOrderId};

// ---------------------------------------------------------------------------
// Stored report
// ---------------------------------------------------------------------------

/// The single inspection attached to a work order. Replaced wholesale on
/// every submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmInspection {
    pub id: InspectionId,
    pub work_order_id: WorkOrderId,
    pub business: BusinessSnapshot,
    pub vehicle: VehicleSnapshot,
    pub checklist: Vec<ChecklistSection>,
    pub pushrod_stroke: BTreeMap<AxlePosition, f64>,
    pub tread_depth: BTreeMap<TirePosition, f64>,
    pub additional_notes: Option<String>,
    pub inspector_name: String,
    pub inspection_date: NaiveDate,
    pub submitted_at: DateTime<Utc>,
}

/// Business details as printed on the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessSnapshot {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistSection {
    pub id: String,
    pub title: String,
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
    pub status: ItemStatus,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pass,
    Fail,
    Na,
}

impl std::str::FromStr for ItemStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" => Ok(ItemStatus::Pass),
            "fail" => Ok(ItemStatus::Fail),
            "na" | "n/a" => Ok(ItemStatus::Na),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Measurement positions
// ---------------------------------------------------------------------------

/// Brake chamber positions for pushrod stroke: axle number and side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AxlePosition {
    #[serde(rename = "1L")]
    Axle1Left,
    #[serde(rename = "1R")]
    Axle1Right,
    #[serde(rename = "2L")]
    Axle2Left,
    #[serde(rename = "2R")]
    Axle2Right,
    #[serde(rename = "3L")]
    Axle3Left,
    #[serde(rename = "3R")]
    Axle3Right,
    #[serde(rename = "4L")]
    Axle4Left,
    #[serde(rename = "4R")]
    Axle4Right,
    #[serde(rename = "5L")]
    Axle5Left,
    #[serde(rename = "5R")]
    Axle5Right,
}

impl AxlePosition {
    pub const ALL: [AxlePosition; 10] = [
        AxlePosition::Axle1Left,
        AxlePosition::Axle1Right,
        AxlePosition::Axle2Left,
        AxlePosition::Axle2Right,
        AxlePosition::Axle3Left,
        AxlePosition::Axle3Right,
        AxlePosition::Axle4Left,
        AxlePosition::Axle4Right,
        AxlePosition::Axle5Left,
        AxlePosition::Axle5Right,
    ];

    pub fn key(self) -> &'static str {
        match self {
            AxlePosition::Axle1Left => "1L",
            AxlePosition::Axle1Right => "1R",
            AxlePosition::Axle2Left => "2L",
            AxlePosition::Axle2Right => "2R",
            AxlePosition::Axle3Left => "3L",
            AxlePosition::Axle3Right => "3R",
            AxlePosition::Axle4Left => "4L",
            AxlePosition::Axle4Right => "4R",
            AxlePosition::Axle5Left => "5L",
            AxlePosition::Axle5Right => "5R",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }
}

/// Tire positions for tread depth. Steer tires, then inner/outer duals on
/// up to two drive axles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TirePosition {
    Lf,
    Rf,
    Lro,
    Lri,
    Rro,
    Rri,
    Lr2o,
    Lr2i,
    Rr2o,
    Rr2i,
}

impl TirePosition {
    pub const ALL: [TirePosition; 10] = [
        TirePosition::Lf,
        TirePosition::Rf,
        TirePosition::Lro,
        TirePosition::Lri,
        TirePosition::Rro,
        TirePosition::Rri,
        TirePosition::Lr2o,
        TirePosition::Lr2i,
        TirePosition::Rr2o,
        TirePosition::Rr2i,
    ];

    pub fn key(self) -> &'static str {
        match self {
            TirePosition::Lf => "LF",
            TirePosition::Rf => "RF",
            TirePosition::Lro => "LRO",
            TirePosition::Lri => "LRI",
            TirePosition::Rro => "RRO",
            TirePosition::Rri => "RRI",
            TirePosition::Lr2o => "LR2O",
            TirePosition::Lr2i => "LR2I",
            TirePosition::Rr2o => "RR2O",
            TirePosition::Rr2i => "RR2I",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }
}

// ---------------------------------------------------------------------------
// Submission payload
// ---------------------------------------------------------------------------

/// Inspection as submitted by a client, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionSubmission {
    #[serde(default)]
    pub business: BusinessSnapshot,
    #[serde(default)]
    pub vehicle: VehicleSnapshot,
    #[serde(default)]
    pub checklist: Vec<SubmittedSection>,
    #[serde(default)]
    pub pushrod_stroke: BTreeMap<String, f64>,
    #[serde(default)]
    pub tread_depth: BTreeMap<String, f64>,
    #[serde(default)]
    pub additional_notes: Option<String>,
    #[serde(default)]
    pub inspector_name: String,
    /// Defaults to the server's date at submission.
    #[serde(default)]
    pub inspection_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedSection {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<SubmittedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedItem {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SubmittedItem {
    pub fn new(id: impl Into<String>, status: &str) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            status: Some(status.to_string()),
            notes: None,
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
