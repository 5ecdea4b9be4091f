//! Simulated maintenance-management data for the Custodian reference runtime.
//!
//! All data in this module is hardcoded and fictional.  It stands in for the
//! asset register, work-order system and purchasing tables of a real CMMS.

use std::collections::BTreeMap;

use serde::Serialize;

use custodian_audit::AuditSubject;

// ── Assets ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub site: String,
    pub building: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub location: Location,
    pub status: String,
    pub running_hours: u32,
}

impl AuditSubject for Asset {
    fn entity_name(&self) -> &str {
        "Asset"
    }
    fn entity_id(&self) -> String {
        self.id.clone()
    }
}

/// The plant's asset register.
pub fn asset_register() -> Vec<Asset> {
    let asset = |id: &str, name: &str, building: &str, hours: u32| Asset {
        id: id.to_string(),
        name: name.to_string(),
        location: Location {
            site: "Riverside Plant".to_string(),
            building: building.to_string(),
        },
        status: "Operational".to_string(),
        running_hours: hours,
    };
    vec![
        asset("AST-1001", "Boiler feed pump #2", "Boiler house", 18_240),
        asset("AST-1002", "Cooling tower fan", "Cooling yard", 9_610),
        asset("AST-1003", "Air compressor C-4", "Workshop", 22_075),
    ]
}

// ── Technicians ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Technician {
    pub id: String,
    pub name: String,
    pub trade: String,
}

impl AuditSubject for Technician {
    fn entity_name(&self) -> &str {
        "Technician"
    }
    fn entity_id(&self) -> String {
        self.id.clone()
    }
}

pub fn technicians() -> Vec<Technician> {
    vec![
        Technician {
            id: "TEC-07".to_string(),
            name: "Priya Natarajan".to_string(),
            trade: "Mechanical".to_string(),
        },
        Technician {
            id: "TEC-12".to_string(),
            name: "Tomas Berg".to_string(),
            trade: "Electrical".to_string(),
        },
    ]
}

// ── Work orders ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkOrderStatus {
    Open,
    Scheduled,
    InProgress,
    Completed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkOrder {
    pub id: String,
    pub asset_id: String,
    pub title: String,
    pub status: WorkOrderStatus,
    pub priority: u8,
    pub assigned_to: Option<String>,
    pub estimated_cost: f64,
    pub completed_at: Option<String>,
}

impl AuditSubject for WorkOrder {
    fn entity_name(&self) -> &str {
        "WorkOrder"
    }
    fn entity_id(&self) -> String {
        self.id.clone()
    }
}

/// A fresh corrective work order against `asset`.
pub fn corrective_work_order(id: &str, asset: &Asset, title: &str) -> WorkOrder {
    WorkOrder {
        id: id.to_string(),
        asset_id: asset.id.clone(),
        title: title.to_string(),
        status: WorkOrderStatus::Open,
        priority: 2,
        assigned_to: None,
        estimated_cost: 1_850.00,
        completed_at: None,
    }
}

// ── Purchasing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseOrder {
    pub id: String,
    pub vendor: String,
    pub work_order_id: String,
    pub lines: Vec<PurchaseLine>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseLine {
    pub part_number: String,
    pub description: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl AuditSubject for PurchaseOrder {
    fn entity_name(&self) -> &str {
        "PurchaseOrder"
    }
    fn entity_id(&self) -> String {
        self.id.clone()
    }
}

/// Spare parts for `work_order`.
pub fn spare_parts_order(id: &str, work_order: &WorkOrder) -> PurchaseOrder {
    let lines = vec![
        PurchaseLine {
            part_number: "MS-2210".to_string(),
            description: "Mechanical seal kit".to_string(),
            quantity: 1,
            unit_price: 640.00,
        },
        PurchaseLine {
            part_number: "BRG-6308".to_string(),
            description: "Deep groove bearing".to_string(),
            quantity: 2,
            unit_price: 87.50,
        },
    ];
    let total = lines
        .iter()
        .map(|l| f64::from(l.quantity) * l.unit_price)
        .sum();
    PurchaseOrder {
        id: id.to_string(),
        vendor: "Northline Industrial Supply".to_string(),
        work_order_id: work_order.id.clone(),
        lines,
        total,
    }
}

// ── Calibration ───────────────────────────────────────────────────────────────

/// A sensor calibration table keyed by (range, point).
///
/// JSON objects need string keys, so this entity cannot be snapshotted; the
/// recorder falls back to a minimal record for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationTable {
    pub sensor_id: String,
    pub points: BTreeMap<(u16, u16), f64>,
}

impl AuditSubject for CalibrationTable {
    fn entity_name(&self) -> &str {
        "CalibrationTable"
    }
    fn entity_id(&self) -> String {
        self.sensor_id.clone()
    }
}

pub fn pressure_calibration() -> CalibrationTable {
    let mut points = BTreeMap::new();
    points.insert((0, 0), 0.0);
    points.insert((0, 1), 2.5);
    points.insert((1, 0), 5.02);
    CalibrationTable {
        sensor_id: "PT-301".to_string(),
        points,
    }
}
