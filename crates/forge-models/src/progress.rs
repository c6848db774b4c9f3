//! Progress message schema v2.
//!
//! A [`ProgressMessage`] is a single immutable record describing one
//! observable moment in a job's life. The reporter assigns the monotonic
//! per-job `event_id`; consumers treat it as the sole ordering key for
//! replay and deduplication.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::job::{JobId, JobStatus};

/// Current progress schema version.
pub const SCHEMA_VERSION: &str = "2.0";

/// Progress event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Generic operation phase transition
    Phase,
    /// Document lifecycle (open, recompute)
    Document,
    /// Assembly4 constraint solving
    Assembly4,
    /// Material framework application
    Material,
    /// OCCT boolean/fillet/chamfer operation
    Occt,
    /// Topology hash computation
    TopologyHash,
    /// Document dependency graph traversal
    DocGraph,
    /// File export
    Export,
    /// Generic progress update
    ProgressUpdate,
    /// Job status transition
    StatusChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Phase => "phase",
            EventType::Document => "document",
            EventType::Assembly4 => "assembly4",
            EventType::Material => "material",
            EventType::Occt => "occt",
            EventType::TopologyHash => "topology_hash",
            EventType::DocGraph => "doc_graph",
            EventType::Export => "export",
            EventType::ProgressUpdate => "progress_update",
            EventType::StatusChange => "status_change",
        }
    }

    /// The operation group derived from the event type when none was set.
    pub fn default_group(&self) -> OperationGroup {
        match self {
            EventType::Assembly4 => OperationGroup::Assembly4,
            EventType::Material => OperationGroup::Material,
            EventType::Occt => OperationGroup::Occt,
            EventType::TopologyHash => OperationGroup::Topology,
            EventType::DocGraph => OperationGroup::DocGraph,
            EventType::Document => OperationGroup::Document,
            EventType::Export => OperationGroup::Export,
            EventType::Phase | EventType::ProgressUpdate | EventType::StatusChange => {
                OperationGroup::General
            }
        }
    }

    /// Parse a comma-separated list of event types, e.g. `"assembly4,occt"`.
    pub fn parse_list(raw: &str) -> Result<Vec<EventType>, ValidationError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|_| {
                    ValidationError::new("filter_types", format!("unknown event type: {s}"))
                })
            })
            .collect()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse operation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationGroup {
    Assembly4,
    Occt,
    Material,
    Topology,
    DocGraph,
    Document,
    Export,
    General,
}

/// Operation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Progress,
    End,
}

/// Document lifecycle subphases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentPhase {
    DocumentOpen,
    DocumentLoadObjects,
    RecomputeStart,
    RecomputeEnd,
}

impl DocumentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentPhase::DocumentOpen => "document_open",
            DocumentPhase::DocumentLoadObjects => "document_load_objects",
            DocumentPhase::RecomputeStart => "recompute_start",
            DocumentPhase::RecomputeEnd => "recompute_end",
        }
    }

    /// Document open and recompute end are milestones.
    pub fn is_milestone(&self) -> bool {
        matches!(self, DocumentPhase::DocumentOpen | DocumentPhase::RecomputeEnd)
    }
}

/// Assembly4 solving subphases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Assembly4Phase {
    SolverStart,
    SolverProgress,
    SolverEnd,
    LcsPlacementStart,
    LcsPlacementProgress,
    LcsPlacementEnd,
}

impl Assembly4Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Assembly4Phase::SolverStart => "solver_start",
            Assembly4Phase::SolverProgress => "solver_progress",
            Assembly4Phase::SolverEnd => "solver_end",
            Assembly4Phase::LcsPlacementStart => "lcs_placement_start",
            Assembly4Phase::LcsPlacementProgress => "lcs_placement_progress",
            Assembly4Phase::LcsPlacementEnd => "lcs_placement_end",
        }
    }

    /// Map the subphase onto the coarse start/progress/end phase.
    pub fn phase(&self) -> Phase {
        match self {
            Assembly4Phase::SolverStart | Assembly4Phase::LcsPlacementStart => Phase::Start,
            Assembly4Phase::SolverEnd | Assembly4Phase::LcsPlacementEnd => Phase::End,
            _ => Phase::Progress,
        }
    }
}

/// Material framework subphases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MaterialPhase {
    MaterialResolveLibrary,
    MaterialApplyStart,
    MaterialApplyProgress,
    MaterialApplyEnd,
    MaterialOverrideProperties,
}

impl MaterialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialPhase::MaterialResolveLibrary => "material_resolve_library",
            MaterialPhase::MaterialApplyStart => "material_apply_start",
            MaterialPhase::MaterialApplyProgress => "material_apply_progress",
            MaterialPhase::MaterialApplyEnd => "material_apply_end",
            MaterialPhase::MaterialOverrideProperties => "material_override_properties",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            MaterialPhase::MaterialApplyStart => Phase::Start,
            MaterialPhase::MaterialApplyEnd => Phase::End,
            _ => Phase::Progress,
        }
    }
}

/// Topology hash computation subphases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TopologyPhase {
    TopoHashStart,
    TopoHashProgress,
    TopoHashEnd,
    ExportValidation,
}

impl TopologyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyPhase::TopoHashStart => "topo_hash_start",
            TopologyPhase::TopoHashProgress => "topo_hash_progress",
            TopologyPhase::TopoHashEnd => "topo_hash_end",
            TopologyPhase::ExportValidation => "export_validation",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            TopologyPhase::TopoHashStart => Phase::Start,
            TopologyPhase::TopoHashEnd => Phase::End,
            _ => Phase::Progress,
        }
    }

    /// Export validation is always a milestone.
    pub fn is_milestone(&self) -> bool {
        !matches!(self, TopologyPhase::TopoHashProgress)
    }
}

/// OCCT operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OcctOperation {
    BooleanFuse,
    BooleanCut,
    BooleanCommon,
    Fillet,
    Chamfer,
}

impl OcctOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcctOperation::BooleanFuse => "boolean_fuse",
            OcctOperation::BooleanCut => "boolean_cut",
            OcctOperation::BooleanCommon => "boolean_common",
            OcctOperation::Fillet => "fillet",
            OcctOperation::Chamfer => "chamfer",
        }
    }
}

/// Export file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ExportFormat {
    #[serde(rename = "FCStd")]
    FcStd,
    #[serde(rename = "STEP")]
    Step,
    #[serde(rename = "STL")]
    Stl,
    #[serde(rename = "GLB")]
    Glb,
    #[serde(rename = "IGES")]
    Iges,
    #[serde(rename = "OBJ")]
    Obj,
    #[serde(rename = "BREP")]
    Brep,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::FcStd => "FCStd",
            ExportFormat::Step => "STEP",
            ExportFormat::Stl => "STL",
            ExportFormat::Glb => "GLB",
            ExportFormat::Iges => "IGES",
            ExportFormat::Obj => "OBJ",
            ExportFormat::Brep => "BREP",
        }
    }
}

/// Schema or range violation detected during validation.
#[derive(Debug, Clone, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// The offending field
    pub field: &'static str,
    /// Human-readable reason
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Progress message schema v2.
///
/// Domain-specific fields are flattened optional fields; each event type
/// populates its own slice of them. `event_id == 0` means "not yet
/// assigned" — the reporter stamps it before publishing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProgressMessage {
    /// Job being processed
    pub job_id: JobId,
    /// Monotonic event ID per job (assigned by the reporter)
    #[serde(default)]
    pub event_id: u64,
    /// UTC instant of creation
    pub timestamp: DateTime<Utc>,
    /// Progress schema version
    pub schema_version: String,

    /// Type of progress event
    pub event_type: EventType,
    /// Stable UUID per operation within the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Uuid>,
    /// Human-readable operation name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Operation category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_group: Option<OperationGroup>,

    /// Operation phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Detailed subphase identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subphase: Option<String>,
    /// Current step number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u64>,
    /// Total number of steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_total: Option<u64>,
    /// Items completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_done: Option<u64>,
    /// Total items to process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<u64>,

    /// Job status carried on status_change events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// Progress percentage (0-100)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_pct: Option<u8>,
    /// Current step description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Short human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Elapsed time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Estimated time to completion in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,

    // Document fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_label: Option<String>,

    // Assembly4 fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints_resolved: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lcs_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residual: Option<f64>,

    // Material framework fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mat_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appearance_bake: Option<bool>,

    // OCCT operation fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occt_op: Option<OcctOperation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shapes_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shapes_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_radius: Option<f64>,

    // Topology hash fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faces_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faces_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertices_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertices_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_match: Option<bool>,

    // Export fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_format: Option<ExportFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,

    /// Milestone events bypass throttling and survive reconnection replay
    #[serde(default)]
    pub milestone: bool,
    /// Error code if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Warning message if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ProgressMessage {
    /// Create a new message with defaults for the given job and event type.
    pub fn new(job_id: JobId, event_type: EventType) -> Self {
        Self {
            job_id,
            event_id: 0,
            timestamp: Utc::now(),
            schema_version: SCHEMA_VERSION.to_string(),
            event_type,
            operation_id: None,
            operation_name: None,
            operation_group: None,
            phase: None,
            subphase: None,
            step_index: None,
            step_total: None,
            items_done: None,
            items_total: None,
            status: None,
            progress_pct: None,
            current_step: None,
            message: None,
            elapsed_ms: None,
            eta_ms: None,
            document_id: None,
            document_label: None,
            constraints_resolved: None,
            constraints_total: None,
            lcs_name: None,
            iteration: None,
            residual: None,
            library_name: None,
            material_key: None,
            mat_uid: None,
            objects_done: None,
            objects_total: None,
            appearance_bake: None,
            occt_op: None,
            shapes_done: None,
            shapes_total: None,
            edges_done: None,
            edges_total: None,
            default_radius: None,
            faces_done: None,
            faces_total: None,
            vertices_done: None,
            vertices_total: None,
            computed_hash: None,
            expected_hash: None,
            hash_match: None,
            export_format: None,
            bytes_written: None,
            bytes_total: None,
            milestone: false,
            error_code: None,
            warning: None,
        }
    }

    /// Validate ranges and cross-field constraints; fails closed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job_id.as_i64() <= 0 {
            return Err(ValidationError::new("job_id", "must be positive"));
        }
        if let Some(pct) = self.progress_pct {
            if pct > 100 {
                return Err(ValidationError::new(
                    "progress_pct",
                    format!("must be between 0 and 100, got {pct}"),
                ));
            }
        }
        for (field, done, total) in [
            ("step_index", self.step_index, self.step_total),
            ("items_done", self.items_done, self.items_total),
            ("constraints_resolved", self.constraints_resolved, self.constraints_total),
            ("objects_done", self.objects_done, self.objects_total),
            ("shapes_done", self.shapes_done, self.shapes_total),
            ("edges_done", self.edges_done, self.edges_total),
            ("faces_done", self.faces_done, self.faces_total),
            ("vertices_done", self.vertices_done, self.vertices_total),
            ("bytes_written", self.bytes_written, self.bytes_total),
        ] {
            if let (Some(done), Some(total)) = (done, total) {
                if done > total {
                    return Err(ValidationError::new(
                        field,
                        format!("{done} exceeds total {total}"),
                    ));
                }
            }
        }
        if let Some(residual) = self.residual {
            if residual < 0.0 {
                return Err(ValidationError::new("residual", "must be non-negative"));
            }
        }
        if let Some(radius) = self.default_radius {
            if radius < 0.0 {
                return Err(ValidationError::new("default_radius", "must be non-negative"));
            }
        }
        Ok(())
    }

    /// Fill derived fields, mirroring the producer-side normalization:
    /// `progress_pct` from item counters, milestone forcing on phase
    /// start/end and terminal statuses, and the default operation group.
    pub fn derive(mut self) -> Self {
        if self.progress_pct.is_none() {
            if let (Some(done), Some(total)) = (self.items_done, self.items_total) {
                if total > 0 {
                    self.progress_pct = Some(derived_pct(done, total));
                }
            }
        }
        if matches!(self.phase, Some(Phase::Start) | Some(Phase::End)) {
            self.milestone = true;
        }
        if self.status.map(|s| s.is_terminal()).unwrap_or(false) {
            self.milestone = true;
        }
        if self.operation_group.is_none() {
            self.operation_group = Some(self.event_type.default_group());
        }
        self
    }

    /// Whether this message carries a terminal job status.
    pub fn is_terminal(&self) -> bool {
        self.status.map(|s| s.is_terminal()).unwrap_or(false)
    }

    /// Encode as stable UTF-8 JSON.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode from UTF-8 JSON, failing closed on unknown event types,
    /// negative counters or out-of-range percentages.
    pub fn decode(bytes: &[u8]) -> Result<Self, ValidationError> {
        let msg: Self = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::new("message", e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }
}

/// `min(100, floor(done / total * 100))` for counter-derived percentages.
pub fn derived_pct(done: u64, total: u64) -> u8 {
    debug_assert!(total > 0);
    ((done.saturating_mul(100)) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_pct_formula() {
        assert_eq!(derived_pct(0, 3), 0);
        assert_eq!(derived_pct(1, 3), 33);
        assert_eq!(derived_pct(2, 3), 66);
        assert_eq!(derived_pct(3, 3), 100);
        assert_eq!(derived_pct(9, 10), 90);
        // Clamped when done overshoots total
        assert_eq!(derived_pct(7, 5), 100);
    }

    #[test]
    fn test_derive_fills_progress_pct() {
        let mut msg = ProgressMessage::new(JobId(1), EventType::ProgressUpdate);
        msg.items_done = Some(1);
        msg.items_total = Some(3);
        let msg = msg.derive();
        assert_eq!(msg.progress_pct, Some(33));
    }

    #[test]
    fn test_derive_does_not_override_explicit_pct() {
        let mut msg = ProgressMessage::new(JobId(1), EventType::ProgressUpdate);
        msg.items_done = Some(1);
        msg.items_total = Some(2);
        msg.progress_pct = Some(10);
        let msg = msg.derive();
        assert_eq!(msg.progress_pct, Some(10));
    }

    #[test]
    fn test_derive_marks_phase_milestones() {
        let mut msg = ProgressMessage::new(JobId(1), EventType::Phase);
        msg.phase = Some(Phase::Start);
        assert!(msg.derive().milestone);

        let mut msg = ProgressMessage::new(JobId(1), EventType::Phase);
        msg.phase = Some(Phase::Progress);
        assert!(!msg.derive().milestone);
    }

    #[test]
    fn test_derive_marks_terminal_status_milestone() {
        let mut msg = ProgressMessage::new(JobId(1), EventType::StatusChange);
        msg.status = Some(JobStatus::Failed);
        let msg = msg.derive();
        assert!(msg.milestone);
        assert!(msg.is_terminal());
    }

    #[test]
    fn test_derive_maps_operation_group() {
        let msg = ProgressMessage::new(JobId(1), EventType::Assembly4).derive();
        assert_eq!(msg.operation_group, Some(OperationGroup::Assembly4));

        let msg = ProgressMessage::new(JobId(1), EventType::ProgressUpdate).derive();
        assert_eq!(msg.operation_group, Some(OperationGroup::General));
    }

    #[test]
    fn test_validate_rejects_out_of_range_pct() {
        let mut msg = ProgressMessage::new(JobId(1), EventType::ProgressUpdate);
        msg.progress_pct = Some(101);
        let err = msg.validate().unwrap_err();
        assert_eq!(err.field, "progress_pct");
    }

    #[test]
    fn test_validate_rejects_done_over_total() {
        let mut msg = ProgressMessage::new(JobId(1), EventType::ProgressUpdate);
        msg.items_done = Some(5);
        msg.items_total = Some(3);
        let err = msg.validate().unwrap_err();
        assert_eq!(err.field, "items_done");
    }

    #[test]
    fn test_validate_rejects_nonpositive_job_id() {
        let msg = ProgressMessage::new(JobId(0), EventType::ProgressUpdate);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_decode_fails_closed_on_unknown_event_type() {
        let raw = br#"{"job_id":1,"timestamp":"2025-01-01T00:00:00Z","schema_version":"2.0","event_type":"mystery"}"#;
        assert!(ProgressMessage::decode(raw).is_err());
    }

    #[test]
    fn test_decode_fails_closed_on_negative_counter() {
        let raw = br#"{"job_id":1,"timestamp":"2025-01-01T00:00:00Z","schema_version":"2.0","event_type":"occt","shapes_done":-1}"#;
        assert!(ProgressMessage::decode(raw).is_err());
    }

    #[test]
    fn test_encode_decode() {
        let mut msg = ProgressMessage::new(JobId(42), EventType::Occt);
        msg.event_id = 7;
        msg.occt_op = Some(OcctOperation::BooleanFuse);
        msg.shapes_done = Some(2);
        msg.shapes_total = Some(3);
        let msg = msg.derive();

        let bytes = msg.encode().unwrap();
        let back = ProgressMessage::decode(&bytes).unwrap();
        assert_eq!(back.event_id, 7);
        assert_eq!(back.occt_op, Some(OcctOperation::BooleanFuse));
        assert_eq!(back.progress_pct, Some(66));
    }

    #[test]
    fn test_export_format_wire_names() {
        assert_eq!(
            serde_json::to_string(&ExportFormat::FcStd).unwrap(),
            "\"FCStd\""
        );
        assert_eq!(serde_json::to_string(&ExportFormat::Step).unwrap(), "\"STEP\"");
    }

    #[test]
    fn test_parse_filter_list() {
        let types = EventType::parse_list("assembly4, occt").unwrap();
        assert_eq!(types, vec![EventType::Assembly4, EventType::Occt]);
        assert!(EventType::parse_list("assembly4,bogus").is_err());
    }

    #[test]
    fn test_subphase_phase_mapping() {
        assert_eq!(Assembly4Phase::SolverStart.phase(), Phase::Start);
        assert_eq!(Assembly4Phase::SolverProgress.phase(), Phase::Progress);
        assert_eq!(Assembly4Phase::LcsPlacementEnd.phase(), Phase::End);
        assert_eq!(MaterialPhase::MaterialApplyEnd.phase(), Phase::End);
        assert_eq!(TopologyPhase::TopoHashStart.phase(), Phase::Start);
        assert!(TopologyPhase::ExportValidation.is_milestone());
        assert!(DocumentPhase::RecomputeEnd.is_milestone());
        assert!(!DocumentPhase::RecomputeStart.is_milestone());
    }
}
