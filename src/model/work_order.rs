//! Work order header: customer, vehicle snapshot, diagnosis text.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkOrderId;

/// A field-service job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: WorkOrderId,
    pub customer_ref: String,
    /// Reference to the vehicle record the job is for (`vehicleId`).
    pub vehicle_ref: Option<String>,
    pub description: String,
    pub cause: Option<String>,
    pub correction: Option<String>,
    pub vehicle: VehicleSnapshot,
    /// Manual status set by non-timer flows. Combined with the derived
    /// status, never replacing it.
    pub status_override: Option<WorkOrderStatus>,
    /// Last-write stamp per details field.
    #[serde(default)]
    pub field_stamps: BTreeMap<DetailField, DateTime<Utc>>,
    /// Optimistic-concurrency counter. Bumped on every committed mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Vehicle fields copied onto the work order at service time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub vin: Option<String>,
    pub mileage: Option<u32>,
    pub unit_no: Option<String>,
    pub make_model: Option<String>,
}

/// Aggregate status of a work order. Ordered: a status only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Idle,
    InProgress,
    Completed,
}

impl std::fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkOrderStatus::Idle => "idle",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkOrderStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(WorkOrderStatus::Idle),
            "in_progress" => Ok(WorkOrderStatus::InProgress),
            "completed" => Ok(WorkOrderStatus::Completed),
            _ => Err(crate::error::Error::Other(format!(
                "unknown work order status: {s}"
            ))),
        }
    }
}

/// Fields editable through the details endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailField {
    Cause,
    Correction,
    VehicleRef,
    Vin,
    Mileage,
    UnitNo,
    MakeModel,
}

/// Partial update of the work order details. Absent fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
    #[serde(default, rename = "vehicleId", skip_serializing_if = "Option::is_none")]
    pub vehicle_ref: Option<String>,
    #[serde(default, rename = "vehicle_vin", skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mileage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make_model: Option<String>,
    /// When the edit was made on the client. Defaults to server receive time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl DetailsPatch {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Fields present in this patch.
    pub fn fields(&self) -> Vec<DetailField> {
        let mut out = Vec::new();
        if self.cause.is_some() {
            out.push(DetailField::Cause);
        }
        if self.correction.is_some() {
            out.push(DetailField::Correction);
        }
        if self.vehicle_ref.is_some() {
            out.push(DetailField::VehicleRef);
        }
        if self.vin.is_some() {
            out.push(DetailField::Vin);
        }
        if self.mileage.is_some() {
            out.push(DetailField::Mileage);
        }
        if self.unit_no.is_some() {
            out.push(DetailField::UnitNo);
        }
        if self.make_model.is_some() {
            out.push(DetailField::MakeModel);
        }
        out
    }

    /// Fold a later patch into this one. Fields set in `later` win.
    pub fn merge(&mut self, later: DetailsPatch) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if later.$field.is_some() {
                    self.$field = later.$field;
                })*
            };
        }
        take!(cause, correction, vehicle_ref, vin, mileage, unit_no, make_model, edited_at);
    }
}

/// Everything needed to open a new work order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewWorkOrder {
    pub customer_ref: String,
    pub vehicle_ref: Option<String>,
    pub description: String,
    pub vehicle: VehicleSnapshot,
}

impl NewWorkOrder {
    pub fn new(customer_ref: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            customer_ref: customer_ref.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn vehicle_ref(mut self, vehicle_ref: impl Into<String>) -> Self {
        self.vehicle_ref = Some(vehicle_ref.into());
        self
    }

    pub fn vehicle(mut self, vehicle: VehicleSnapshot) -> Self {
        self.vehicle = vehicle;
        self
    }

    pub(crate) fn into_work_order(self, now: DateTime<Utc>) -> WorkOrder {
        WorkOrder {
            id: WorkOrderId::new(),
            customer_ref: self.customer_ref,
            vehicle_ref: self.vehicle_ref,
            description: self.description,
            cause: None,
            correction: None,
            vehicle: self.vehicle,
            status_override: None,
            field_stamps: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
