//! Worker progress reporter.
//!
//! The reporter is synchronous at the call site: every `report_*` call
//! stamps a monotonic event ID and hands the message to a dispatch task
//! over a bounded channel. Worker code never blocks on broker I/O; when the
//! buffer is full the event is dropped with a warning (progress is
//! advisory — the audit chain is the durable record).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use forge_broker::ThrottleGate;
use forge_models::progress::derived_pct;
use forge_models::{
    Assembly4Phase, DocumentPhase, EventType, ExportFormat, JobId, JobStatus, MaterialPhase,
    OcctOperation, OperationGroup, Phase, ProgressMessage, TopologyPhase,
};

use crate::sink::ProgressSink;

/// Bounded dispatch buffer between worker code and the publish task.
pub const DISPATCH_BUFFER_SIZE: usize = 256;

enum Dispatch {
    Publish { msg: ProgressMessage, force: bool },
    Flush(oneshot::Sender<()>),
}

struct ReporterInner {
    job_id: JobId,
    event_counter: AtomicU64,
    throttle: ThrottleGate,
    operation_stack: Mutex<Vec<Uuid>>,
    tx: mpsc::Sender<Dispatch>,
}

impl ReporterInner {
    /// Next monotonic event ID; each published message gets a fresh one.
    fn next_event_id(&self) -> u64 {
        self.event_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Hand a message to the dispatch task without blocking.
    fn dispatch(&self, msg: ProgressMessage, force: bool) {
        match self.tx.try_send(Dispatch::Publish { msg, force }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(job_id = %self.job_id, "progress dispatch buffer full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(job_id = %self.job_id, "progress dispatcher stopped, dropping event");
            }
        }
    }
}

/// Progress reporter for one job execution.
///
/// Must be created inside a tokio runtime; publishing runs on a spawned
/// dispatch task that drains the channel into the [`ProgressSink`].
pub struct ProgressReporter {
    inner: Arc<ReporterInner>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, sink: Arc<dyn ProgressSink>) -> Self {
        let (tx, mut rx) = mpsc::channel(DISPATCH_BUFFER_SIZE);

        tokio::spawn(async move {
            while let Some(dispatch) = rx.recv().await {
                match dispatch {
                    Dispatch::Publish { msg, force } => {
                        if let Err(e) = sink.publish(msg, force).await {
                            // Best-effort: broker unreachable means lost
                            // progress, not a failed job.
                            warn!("progress publish failed: {e}");
                        }
                    }
                    Dispatch::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self {
            inner: Arc::new(ReporterInner {
                job_id,
                event_counter: AtomicU64::new(0),
                throttle: ThrottleGate::default(),
                operation_stack: Mutex::new(Vec::new()),
                tx,
            }),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.inner.job_id
    }

    /// Number of operations currently open.
    pub fn operation_depth(&self) -> usize {
        self.inner.operation_stack.lock().expect("stack lock poisoned").len()
    }

    /// Wait until every event handed to the dispatcher so far is published.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.tx.send(Dispatch::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    fn message(&self, event_type: EventType) -> ProgressMessage {
        let mut msg = ProgressMessage::new(self.inner.job_id, event_type);
        msg.event_id = self.inner.next_event_id();
        msg
    }

    /// Generic progress update. Non-milestone updates are rate-smoothed at
    /// the reporter before they ever reach the channel.
    pub fn report(&self, progress_pct: u8, message: &str, milestone: bool) {
        if !self.inner.throttle.admit(self.inner.job_id, milestone, false) {
            debug!(job_id = %self.inner.job_id, "progress report throttled at reporter");
            return;
        }

        let mut msg = self.message(EventType::ProgressUpdate);
        msg.progress_pct = Some(progress_pct.min(100));
        msg.message = Some(message.to_string());
        msg.milestone = milestone;
        let force = milestone;
        self.inner.dispatch(msg.derive(), force);
    }

    /// Publish a job status transition. Terminal statuses are milestones
    /// and bypass every throttle.
    pub fn report_status(&self, status: JobStatus, message: Option<&str>) {
        let mut msg = self.message(EventType::StatusChange);
        msg.status = Some(status);
        msg.message = message.map(str::to_string);
        msg.milestone = status.is_terminal();
        let force = msg.milestone;
        self.inner.dispatch(msg.derive(), force);
    }

    /// Begin a named operation. The returned handle emits the
    /// `phase=start` milestone now and guarantees a `phase=end` milestone
    /// on every exit path: explicit finish, early drop, or panic.
    pub fn begin_operation(
        &self,
        name: &str,
        group: OperationGroup,
        total_steps: Option<u64>,
    ) -> OperationHandle {
        let operation_id = Uuid::new_v4();
        self.inner
            .operation_stack
            .lock()
            .expect("stack lock poisoned")
            .push(operation_id);

        let mut msg = self.message(EventType::Phase);
        msg.phase = Some(Phase::Start);
        msg.operation_id = Some(operation_id);
        msg.operation_name = Some(name.to_string());
        msg.operation_group = Some(group);
        msg.step_total = total_steps;
        msg.milestone = true;
        msg.message = Some(format!("Starting {name}"));
        self.inner.dispatch(msg.derive(), true);

        OperationHandle {
            inner: Arc::clone(&self.inner),
            operation_id,
            name: name.to_string(),
            group,
            total_steps,
            current_step: 0,
            started: Instant::now(),
            finished: false,
        }
    }

    // ========================================================================
    // Domain helpers
    // ========================================================================

    /// Report document lifecycle progress.
    pub fn report_document(
        &self,
        phase: DocumentPhase,
        document_id: Option<&str>,
        document_label: Option<&str>,
        message: Option<&str>,
    ) {
        let mut msg = self.message(EventType::Document);
        msg.subphase = Some(phase.as_str().to_string());
        msg.document_id = document_id.map(str::to_string);
        msg.document_label = document_label.map(str::to_string);
        msg.message = Some(
            message
                .map(str::to_string)
                .unwrap_or_else(|| format!("Document {}", phase.as_str())),
        );
        msg.milestone = phase.is_milestone();
        let force = msg.milestone;
        self.inner.dispatch(msg.derive(), force);
    }

    /// Report Assembly4 solver progress.
    pub fn report_assembly4(
        &self,
        phase: Assembly4Phase,
        constraints_resolved: Option<u64>,
        constraints_total: Option<u64>,
        lcs_name: Option<&str>,
        iteration: Option<u64>,
        residual: Option<f64>,
    ) {
        let mut msg = self.message(EventType::Assembly4);
        msg.phase = Some(phase.phase());
        msg.subphase = Some(phase.as_str().to_string());
        msg.constraints_resolved = constraints_resolved;
        msg.constraints_total = constraints_total;
        msg.lcs_name = lcs_name.map(str::to_string);
        msg.iteration = iteration;
        msg.residual = residual;
        if let (Some(done), Some(total)) = (constraints_resolved, constraints_total) {
            if total > 0 {
                msg.progress_pct = Some(derived_pct(done, total));
            }
        }
        msg.milestone = matches!(phase.phase(), Phase::Start | Phase::End);
        let force = msg.milestone;
        self.inner.dispatch(msg.derive(), force);
    }

    /// Report material framework progress.
    pub fn report_material(
        &self,
        phase: MaterialPhase,
        library_name: Option<&str>,
        material_key: Option<&str>,
        mat_uid: Option<&str>,
        objects_done: Option<u64>,
        objects_total: Option<u64>,
        appearance_bake: Option<bool>,
    ) {
        let mut msg = self.message(EventType::Material);
        msg.phase = Some(phase.phase());
        msg.subphase = Some(phase.as_str().to_string());
        msg.library_name = library_name.map(str::to_string);
        msg.material_key = material_key.map(str::to_string);
        msg.mat_uid = mat_uid.map(str::to_string);
        msg.objects_done = objects_done;
        msg.objects_total = objects_total;
        msg.appearance_bake = appearance_bake;
        if let (Some(done), Some(total)) = (objects_done, objects_total) {
            if total > 0 {
                msg.progress_pct = Some(derived_pct(done, total));
            }
        }
        msg.milestone = matches!(phase.phase(), Phase::Start | Phase::End);
        let force = msg.milestone;
        self.inner.dispatch(msg.derive(), force);
    }

    /// Report OCCT operation progress.
    #[allow(clippy::too_many_arguments)]
    pub fn report_occt(
        &self,
        operation: OcctOperation,
        phase: Phase,
        shapes_done: Option<u64>,
        shapes_total: Option<u64>,
        edges_done: Option<u64>,
        edges_total: Option<u64>,
        default_radius: Option<f64>,
    ) {
        let mut msg = self.message(EventType::Occt);
        msg.phase = Some(phase);
        msg.occt_op = Some(operation);
        msg.shapes_done = shapes_done;
        msg.shapes_total = shapes_total;
        msg.edges_done = edges_done;
        msg.edges_total = edges_total;
        msg.default_radius = default_radius;
        if let (Some(done), Some(total)) = (shapes_done, shapes_total) {
            if total > 0 {
                msg.progress_pct = Some(derived_pct(done, total));
            }
        } else if let (Some(done), Some(total)) = (edges_done, edges_total) {
            if total > 0 {
                msg.progress_pct = Some(derived_pct(done, total));
            }
        }
        msg.milestone = matches!(phase, Phase::Start | Phase::End);
        let force = msg.milestone;
        self.inner.dispatch(msg.derive(), force);
    }

    /// Report topology hash computation progress.
    #[allow(clippy::too_many_arguments)]
    pub fn report_topology(
        &self,
        phase: TopologyPhase,
        faces_done: Option<u64>,
        faces_total: Option<u64>,
        vertices_done: Option<u64>,
        vertices_total: Option<u64>,
        computed_hash: Option<&str>,
        expected_hash: Option<&str>,
    ) {
        let mut msg = self.message(EventType::TopologyHash);
        msg.phase = Some(phase.phase());
        msg.subphase = Some(phase.as_str().to_string());
        msg.faces_done = faces_done;
        msg.faces_total = faces_total;
        msg.vertices_done = vertices_done;
        msg.vertices_total = vertices_total;
        msg.computed_hash = computed_hash.map(str::to_string);
        msg.expected_hash = expected_hash.map(str::to_string);
        msg.hash_match = match (computed_hash, expected_hash) {
            (Some(computed), Some(expected)) => Some(computed == expected),
            _ => None,
        };
        let done = faces_done.unwrap_or(0) + vertices_done.unwrap_or(0);
        let total = faces_total.unwrap_or(0) + vertices_total.unwrap_or(0);
        if total > 0 {
            msg.progress_pct = Some(derived_pct(done, total));
        }
        msg.milestone = phase.is_milestone();
        let force = msg.milestone;
        self.inner.dispatch(msg.derive(), force);
    }

    /// Report export progress.
    pub fn report_export(
        &self,
        format: ExportFormat,
        phase: Phase,
        bytes_written: Option<u64>,
        bytes_total: Option<u64>,
    ) {
        let mut msg = self.message(EventType::Export);
        msg.phase = Some(phase);
        msg.export_format = Some(format);
        msg.bytes_written = bytes_written;
        msg.bytes_total = bytes_total;
        msg.message = Some(format!("Exporting to {}", format.as_str()));
        if let (Some(written), Some(total)) = (bytes_written, bytes_total) {
            if total > 0 {
                msg.progress_pct = Some(derived_pct(written, total));
            }
        }
        msg.milestone = matches!(phase, Phase::Start | Phase::End);
        let force = msg.milestone;
        self.inner.dispatch(msg.derive(), force);
    }
}

/// Scoped handle for one operation.
///
/// Dropping an unfinished handle emits the failure end event, so the
/// begin/end pairing holds through early returns and panics.
pub struct OperationHandle {
    inner: Arc<ReporterInner>,
    operation_id: Uuid,
    name: String,
    group: OperationGroup,
    total_steps: Option<u64>,
    current_step: u64,
    started: Instant,
    finished: bool,
}

impl OperationHandle {
    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Emit a `phase=progress` event for the given step.
    pub fn update(&mut self, step_index: u64, message: Option<&str>) {
        self.current_step = step_index;
        let elapsed_ms = self.started.elapsed().as_millis() as u64;

        let mut msg = self.phase_message(Phase::Progress);
        msg.step_index = Some(step_index);
        msg.elapsed_ms = Some(elapsed_ms);
        msg.message = message.map(str::to_string);

        if let Some(total) = self.total_steps {
            if step_index > 0 && total >= step_index {
                // Linear extrapolation from the average step duration.
                msg.eta_ms = Some(elapsed_ms * (total - step_index) / step_index);
            }
            if total > 0 {
                msg.progress_pct = Some(derived_pct(step_index, total));
            }
        }

        self.inner.dispatch(msg.derive(), false);
    }

    /// Emit the terminal `phase=end` milestone and consume the handle.
    pub fn finish(mut self, success: bool) {
        self.emit_end(success, None);
        self.finished = true;
    }

    fn phase_message(&self, phase: Phase) -> ProgressMessage {
        let mut msg = ProgressMessage::new(self.inner.job_id, EventType::Phase);
        msg.event_id = self.inner.next_event_id();
        msg.phase = Some(phase);
        msg.operation_id = Some(self.operation_id);
        msg.operation_name = Some(self.name.clone());
        msg.operation_group = Some(self.group);
        msg.step_total = self.total_steps;
        msg
    }

    fn emit_end(&mut self, success: bool, error_code: Option<&str>) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;

        let mut msg = self.phase_message(Phase::End);
        msg.step_index = if success {
            self.total_steps.or(Some(self.current_step))
        } else {
            Some(self.current_step)
        };
        msg.elapsed_ms = Some(elapsed_ms);
        msg.milestone = true;
        msg.message = Some(if success {
            format!("Completed {}", self.name)
        } else {
            format!("Failed {}", self.name)
        });
        msg.error_code = error_code.map(str::to_string);
        self.inner.dispatch(msg.derive(), true);

        let mut stack = self.inner.operation_stack.lock().expect("stack lock poisoned");
        if let Some(pos) = stack.iter().rposition(|id| *id == self.operation_id) {
            stack.remove(pos);
        }
    }
}

impl Drop for OperationHandle {
    fn drop(&mut self) {
        if !self.finished {
            let error_code = if std::thread::panicking() {
                Some("panic")
            } else {
                Some("aborted")
            };
            self.emit_end(false, error_code);
            self.finished = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_broker::{BrokerResult, PublishOutcome};
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(ProgressMessage, bool)>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn publish(&self, msg: ProgressMessage, force: bool) -> BrokerResult<PublishOutcome> {
            let event_id = msg.event_id;
            self.events.lock().unwrap().push((msg, force));
            Ok(PublishOutcome::Published { event_id })
        }
    }

    fn setup() -> (ProgressReporter, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(JobId(42), sink.clone());
        (reporter, sink)
    }

    #[tokio::test]
    async fn test_event_ids_strictly_increase() {
        let (reporter, sink) = setup();

        let mut op = reporter.begin_operation("boolean_fuse", OperationGroup::Occt, Some(3));
        op.update(1, None);
        op.update(2, None);
        op.finish(true);
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        let ids: Vec<u64> = events.iter().map(|(m, _)| m.event_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_simple_stream_scenario() {
        // start + 2 progress + end: 3 milestones, 1 isolated non-milestone
        let (reporter, sink) = setup();

        let mut op = reporter.begin_operation("boolean_fuse", OperationGroup::Occt, Some(3));
        op.update(1, Some("step 1"));
        op.update(2, Some("step 2"));
        op.finish(true);
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].0.phase, Some(Phase::Start));
        assert!(events[0].0.milestone);
        assert!(events[0].1, "start must be forced past the throttle");
        assert_eq!(events[1].0.phase, Some(Phase::Progress));
        assert_eq!(events[1].0.step_index, Some(1));
        assert_eq!(events[3].0.phase, Some(Phase::End));
        assert!(events[3].0.milestone);
        assert_eq!(events[3].0.step_index, Some(3));
    }

    #[tokio::test]
    async fn test_update_derives_eta_and_pct() {
        let (reporter, sink) = setup();

        let mut op = reporter.begin_operation("fillet", OperationGroup::Occt, Some(4));
        op.update(2, None);
        op.finish(true);
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        let progress = &events[1].0;
        assert_eq!(progress.progress_pct, Some(50));
        assert!(progress.elapsed_ms.is_some());
        // eta = elapsed * (4-2)/2 = elapsed
        assert_eq!(progress.eta_ms, Some(progress.elapsed_ms.unwrap()));
    }

    #[tokio::test]
    async fn test_dropped_handle_emits_failure_end() {
        let (reporter, sink) = setup();

        {
            let mut op = reporter.begin_operation("chamfer", OperationGroup::Occt, Some(5));
            op.update(2, None);
            // Early return path: handle dropped without finish()
        }
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        let end = &events.last().unwrap().0;
        assert_eq!(end.phase, Some(Phase::End));
        assert!(end.milestone);
        assert_eq!(end.step_index, Some(2));
        assert_eq!(end.error_code.as_deref(), Some("aborted"));
        assert_eq!(reporter.operation_depth(), 0);
    }

    #[tokio::test]
    async fn test_panic_emits_failure_end() {
        let (reporter, sink) = setup();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _op = reporter.begin_operation("solve", OperationGroup::Assembly4, Some(2));
            panic!("solver exploded");
        }));
        assert!(result.is_err());
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        let end = &events.last().unwrap().0;
        assert_eq!(end.phase, Some(Phase::End));
        assert_eq!(end.error_code.as_deref(), Some("panic"));
        assert_eq!(reporter.operation_depth(), 0);
    }

    #[tokio::test]
    async fn test_generic_report_throttled_at_reporter() {
        let (reporter, sink) = setup();

        reporter.report(10, "step", false);
        reporter.report(20, "step", false);
        reporter.report(30, "step", false);
        reporter.flush().await;

        // One admitted inside the 500 ms window
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_milestones_not_throttled() {
        let (reporter, sink) = setup();

        reporter.report(10, "m", true);
        reporter.report(20, "m", true);
        reporter.report(30, "m", true);
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|(_, force)| *force));
    }

    #[tokio::test]
    async fn test_terminal_status_is_forced_milestone() {
        let (reporter, sink) = setup();

        reporter.report_status(JobStatus::Completed, Some("done"));
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        let (msg, force) = &events[0];
        assert!(msg.milestone);
        assert!(force);
        assert!(msg.is_terminal());
        assert_eq!(msg.event_type, EventType::StatusChange);
    }

    #[tokio::test]
    async fn test_assembly4_helper_fields() {
        let (reporter, sink) = setup();

        reporter.report_assembly4(
            Assembly4Phase::SolverProgress,
            Some(6),
            Some(8),
            Some("LCS_Origin"),
            Some(3),
            Some(0.004),
        );
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        let msg = &events[0].0;
        assert_eq!(msg.event_type, EventType::Assembly4);
        assert_eq!(msg.phase, Some(Phase::Progress));
        assert_eq!(msg.subphase.as_deref(), Some("solver_progress"));
        assert_eq!(msg.progress_pct, Some(75));
        assert_eq!(msg.operation_group, Some(OperationGroup::Assembly4));
        assert!(!msg.milestone);
    }

    #[tokio::test]
    async fn test_topology_helper_hash_match() {
        let (reporter, sink) = setup();

        reporter.report_topology(
            TopologyPhase::TopoHashEnd,
            Some(10),
            Some(10),
            Some(4),
            Some(4),
            Some("abc123"),
            Some("abc123"),
        );
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        let msg = &events[0].0;
        assert_eq!(msg.hash_match, Some(true));
        assert_eq!(msg.progress_pct, Some(100));
        assert!(msg.milestone);
    }

    #[tokio::test]
    async fn test_export_helper_fields() {
        let (reporter, sink) = setup();

        reporter.report_export(ExportFormat::Step, Phase::Progress, Some(512), Some(2048));
        reporter.flush().await;

        let events = sink.events.lock().unwrap();
        let msg = &events[0].0;
        assert_eq!(msg.export_format, Some(ExportFormat::Step));
        assert_eq!(msg.progress_pct, Some(25));
        assert_eq!(msg.message.as_deref(), Some("Exporting to STEP"));
    }

    #[tokio::test]
    async fn test_nested_operations_tracked() {
        let (reporter, _sink) = setup();

        let outer = reporter.begin_operation("recompute", OperationGroup::Document, None);
        let inner = reporter.begin_operation("fuse", OperationGroup::Occt, Some(2));
        assert_eq!(reporter.operation_depth(), 2);
        inner.finish(true);
        assert_eq!(reporter.operation_depth(), 1);
        outer.finish(true);
        assert_eq!(reporter.operation_depth(), 0);
    }
}
