//! Row iteration driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use super::config::{DriverConfig, FailurePolicy};
use super::pipeline::Pipeline;
use super::plan::Plan;
use super::report::{RowFailure, RunId, RunReport};
use crate::error::{PipelineError, PipelineResult};
use crate::node::{Interrupt, RowContext};
use crate::sink::{Binding, BindingKind, Record, Sink};

/// Tracing target for driver operations.
const TRACING_TARGET: &str = "nvisy_pipeline::engine";

/// Shared flag requesting that a run stop before its next row.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one row that did not fail.
enum RowOutcome {
    Records(Vec<Record>),
    Skipped,
    Stopped,
}

/// Failure of one row, before the policy is applied.
struct RowError {
    binding: usize,
    field: Option<String>,
    node: String,
    cause: Arc<PipelineError>,
}

impl RowError {
    fn new(position: usize, binding: &Binding, cause: impl Into<Arc<PipelineError>>) -> Self {
        Self {
            binding: position,
            field: binding.field().map(str::to_owned),
            node: binding.node().label(),
            cause: cause.into(),
        }
    }
}

/// Resolved value of one binding within a row.
enum Cell {
    Single(Value),
    Each(Vec<Value>),
    Omitted,
}

/// Drives a pipeline over its origin, one row at a time.
///
/// For every row the driver opens a fresh [`RowContext`], resolves the
/// bindings in registration order, fans out repeaters, writes the records
/// and drops the context before the next row is pulled. The consumer is
/// finalized exactly once when the run completes.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    config: DriverConfig,
    cancel: CancelFlag,
}

impl Driver {
    /// Creates a driver with the given configuration.
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Creates a driver with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(DriverConfig::default())
    }

    /// Replaces the cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the driver configuration.
    #[inline]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns a handle to the cancellation flag.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Runs the pipeline to completion.
    ///
    /// Returns the run report, or the error that aborted the run. An aborted
    /// run does not finalize its consumer.
    pub fn run(&self, pipeline: Pipeline) -> PipelineResult<RunReport> {
        let (mut origin, sink, mut consumer) = pipeline.into_parts()?;
        let plan = Plan::build(&sink)?;
        let mut report = RunReport::start(RunId::new());

        tracing::info!(
            target: TRACING_TARGET,
            run_id = %report.run_id,
            nodes = plan.node_count(),
            bindings = sink.len(),
            policy = %self.config.failure_policy,
            size_hint = ?origin.producer().size_hint(),
            "Pipeline run started"
        );

        let mut ordinal = 0;
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    target: TRACING_TARGET,
                    run_id = %report.run_id,
                    ordinal,
                    "Pipeline run cancelled"
                );
                report.cancelled = true;
                break;
            }

            if self.config.row_limit.is_some_and(|limit| ordinal >= limit) {
                break;
            }

            let handle = match origin.next_row() {
                Ok(Some(handle)) => handle,
                Ok(None) => break,
                Err(source) => return Err(PipelineError::Origin { ordinal, source }),
            };
            report.rows_read += 1;

            let outcome = {
                let mut ctx = RowContext::new(ordinal, &handle, &origin);
                let outcome = resolve_row(&sink, &mut ctx);
                tracing::trace!(
                    target: TRACING_TARGET,
                    ordinal,
                    evaluations = ctx.evaluations(),
                    "Row resolved"
                );
                outcome
            };

            match outcome {
                Ok(RowOutcome::Records(records)) => {
                    for record in records {
                        consumer.write(record).map_err(PipelineError::Consumer)?;
                        report.records_written += 1;
                    }
                }
                Ok(RowOutcome::Skipped) => {
                    tracing::trace!(target: TRACING_TARGET, ordinal, "Row skipped");
                    report.rows_skipped += 1;
                }
                Ok(RowOutcome::Stopped) => {
                    tracing::info!(
                        target: TRACING_TARGET,
                        run_id = %report.run_id,
                        ordinal,
                        "Pipeline run stopped by signal"
                    );
                    report.stopped = true;
                    break;
                }
                Err(error) => self.record_failure(ordinal, error, &mut report)?,
            }

            ordinal += 1;
            if ordinal % self.config.progress_interval.max(1) == 0 {
                tracing::debug!(
                    target: TRACING_TARGET,
                    run_id = %report.run_id,
                    rows_read = report.rows_read,
                    records_written = report.records_written,
                    failures = report.failures.len(),
                    "Pipeline progress"
                );
            }
        }

        consumer.finalize().map_err(PipelineError::Consumer)?;
        report.finish();

        tracing::info!(
            target: TRACING_TARGET,
            run_id = %report.run_id,
            rows_read = report.rows_read,
            records_written = report.records_written,
            rows_skipped = report.rows_skipped,
            failures = report.failures.len(),
            duration = %report.duration(),
            "Pipeline run completed"
        );

        Ok(report)
    }

    /// Applies the failure policy to a failed row.
    fn record_failure(
        &self,
        ordinal: usize,
        error: RowError,
        report: &mut RunReport,
    ) -> PipelineResult<()> {
        let failure = RowFailure {
            ordinal,
            binding: error.binding,
            field: error.field,
            node: error.node,
            cause: error.cause,
        };

        if !failure.cause.is_row_scoped() {
            return Err(match Arc::try_unwrap(failure.cause) {
                Ok(cause) => cause,
                Err(cause) => RowFailure { cause, ..failure }.into_error(),
            });
        }

        if self.config.failure_policy == FailurePolicy::Abort {
            tracing::error!(
                target: TRACING_TARGET,
                run_id = %report.run_id,
                ordinal,
                binding = failure.binding,
                field = ?failure.field,
                node = %failure.node,
                error = %failure.cause,
                "Row failed, aborting run"
            );
            return Err(failure.into_error());
        }

        tracing::warn!(
            target: TRACING_TARGET,
            run_id = %report.run_id,
            ordinal,
            binding = failure.binding,
            field = ?failure.field,
            node = %failure.node,
            kind = failure.cause.kind_str(),
            error = %failure.cause,
            "Row failed, continuing"
        );

        report.failures.push(failure);
        if self.config.exceeds_failures(report.failures.len()) {
            if let Some(last) = report.failures.last() {
                return Err(last.clone().into_error());
            }
        }
        Ok(())
    }
}

/// Resolves every binding of one row and assembles its records.
fn resolve_row(sink: &Sink, ctx: &mut RowContext<'_>) -> Result<RowOutcome, RowError> {
    let bindings = sink.bindings();
    let mut cells: Vec<Cell> = Vec::with_capacity(bindings.len());
    cells.resize_with(bindings.len(), || Cell::Omitted);

    // Plain bindings first, then repeaters, each in registration order.
    let plain = bindings.iter().enumerate().filter(|(_, b)| b.kind() != BindingKind::Repeat);
    for (position, binding) in plain {
        match (binding.kind(), binding.node().resolve(ctx)) {
            (BindingKind::Field, Ok(value)) => cells[position] = Cell::Single(value),
            (_, Ok(_)) => {}
            (BindingKind::Gate, Err(Interrupt::Skip)) => return Ok(RowOutcome::Skipped),
            (_, Err(Interrupt::Skip)) => {}
            (_, Err(Interrupt::Stop)) => return Ok(RowOutcome::Stopped),
            (_, Err(Interrupt::Error(cause))) => {
                return Err(RowError::new(position, binding, cause));
            }
        }
    }

    let mut fan_out: Option<(&str, usize)> = None;
    let repeaters = bindings.iter().enumerate().filter(|(_, b)| b.kind() == BindingKind::Repeat);
    for (position, binding) in repeaters {
        let field = binding.field().unwrap_or_default();
        let items = match binding.node().resolve(ctx) {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                let cause = PipelineError::arity(
                    ctx.ordinal(),
                    format!("repeater `{field}` expected a sequence, got {other}"),
                );
                return Err(RowError::new(position, binding, cause));
            }
            Err(Interrupt::Skip) => continue,
            Err(Interrupt::Stop) => return Ok(RowOutcome::Stopped),
            Err(Interrupt::Error(cause)) => {
                return Err(RowError::new(position, binding, cause));
            }
        };

        match fan_out {
            Some((first, len)) if len != items.len() => {
                let cause = PipelineError::arity(
                    ctx.ordinal(),
                    format!(
                        "repeater `{field}` has {} items but `{first}` has {len}",
                        items.len()
                    ),
                );
                return Err(RowError::new(position, binding, cause));
            }
            Some(_) => {}
            None => fan_out = Some((field, items.len())),
        }
        cells[position] = Cell::Each(items);
    }

    let count = fan_out.map_or(1, |(_, len)| len);
    let records = (0..count)
        .map(|index| {
            let mut record = Record::with_capacity(bindings.len());
            for (binding, cell) in bindings.iter().zip(&cells) {
                let Some(field) = binding.field() else {
                    continue;
                };
                match cell {
                    Cell::Single(value) => record.push(field, value.clone()),
                    Cell::Each(items) => record.push(field, items[index].clone()),
                    Cell::Omitted => {}
                }
            }
            record
        })
        .collect();

    Ok(RowOutcome::Records(records))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::ErrorKind;
    use crate::collect::Collector;
    use crate::error::BoxedError;
    use crate::sink::{MemorySink, RecordSink};
    use crate::source::{IterSource, Origin};
    use crate::transform::{Flow, OnFail, Transform, builtin};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    fn parse_int() -> Transform {
        Transform::new("parse_int", |value| {
            let text = value.as_str().ok_or("expected a string")?;
            Ok(json!(text.parse::<i64>()?))
        })
    }

    fn run(
        config: DriverConfig,
        origin: Origin,
        sink: Sink,
    ) -> (PipelineResult<RunReport>, MemorySink) {
        let memory = MemorySink::new();
        let pipeline = Pipeline::new(origin)
            .with_sink(sink)
            .and_then(|p| p.with_consumer(memory.clone()));
        let result = pipeline.and_then(|p| Driver::new(config).run(p));
        (result, memory)
    }

    fn values(records: &[Record]) -> Vec<Value> {
        records.iter().cloned().map(Record::into_value).collect()
    }

    #[test]
    fn test_continue_policy_records_failure() {
        init_tracing();
        let origin = Origin::new(IterSource::from_records(vec![
            json!({"a": "1"}),
            json!({"a": "x"}),
        ]));
        let mut sink = Sink::new();
        sink.put("a").attach(origin.take("a").then(parse_int())).unwrap();

        let (result, memory) = run(DriverConfig::continue_on_error(), origin, sink);
        let report = result.unwrap();

        assert_eq!(values(&memory.records()), vec![json!({"a": 1})]);
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.records_written, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].ordinal, 1);
        assert_eq!(report.failures[0].field.as_deref(), Some("a"));
        assert_eq!(report.failures[0].cause.kind(), ErrorKind::Resolution);
        assert_eq!(memory.finalize_count(), 1);
    }

    #[test]
    fn test_abort_policy_returns_row_failure() {
        let origin = Origin::new(IterSource::from_records(vec![
            json!({"a": "x"}),
            json!({"a": "2"}),
        ]));
        let mut sink = Sink::new();
        sink.put("a").attach(origin.take("a").then(parse_int())).unwrap();

        let (result, memory) = run(DriverConfig::default(), origin, sink);
        let error = result.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Row);
        assert_eq!(error.ordinal(), Some(0));
        assert!(memory.is_empty());
        assert_eq!(memory.finalize_count(), 0);
    }

    #[test]
    fn test_max_failures_bounds_continue() {
        let origin = Origin::new(IterSource::from_records(vec![
            json!({"a": "x"}),
            json!({"a": "y"}),
            json!({"a": "3"}),
        ]));
        let mut sink = Sink::new();
        sink.put("a").attach(origin.take("a").then(parse_int())).unwrap();

        let config = DriverConfig {
            max_failures: Some(1),
            ..DriverConfig::continue_on_error()
        };
        let (result, _) = run(config, origin, sink);
        assert_eq!(result.unwrap_err().ordinal(), Some(1));
    }

    #[test]
    fn test_repeater_fans_out_records() {
        let origin = Origin::new(IterSource::from_records(vec![json!({
            "id": 7,
            "phones": ["555-0100", "555-0101", "555-0102"],
            "types": ["home", "work", "cell"],
        })]));
        let mut sink = Sink::new();
        sink.put("id").attach(origin.take("id")).unwrap();
        sink.put_each("phone").attach(origin.take("phones")).unwrap();
        sink.put_each("type").attach(origin.take("types")).unwrap();

        let (result, memory) = run(DriverConfig::default(), origin, sink);
        assert_eq!(result.unwrap().records_written, 3);

        let records = memory.records();
        assert_eq!(records[0].fields().collect::<Vec<_>>(), ["id", "phone", "type"]);
        assert_eq!(
            values(&records),
            vec![
                json!({"id": 7, "phone": "555-0100", "type": "home"}),
                json!({"id": 7, "phone": "555-0101", "type": "work"}),
                json!({"id": 7, "phone": "555-0102", "type": "cell"}),
            ]
        );
    }

    #[test]
    fn test_repeater_length_mismatch_is_arity_failure() {
        let origin = Origin::new(IterSource::from_records(vec![
            json!({"x": [1, 2], "y": [1, 2, 3]}),
            json!({"x": [1], "y": [2]}),
        ]));
        let mut sink = Sink::new();
        sink.put_each("x").attach(origin.take("x")).unwrap();
        sink.put_each("y").attach(origin.take("y")).unwrap();

        let (result, memory) = run(DriverConfig::continue_on_error(), origin, sink);
        let report = result.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].cause.kind(), ErrorKind::Arity);
        assert_eq!(report.failures[0].field.as_deref(), Some("y"));
        assert_eq!(values(&memory.records()), vec![json!({"x": 1, "y": 2})]);
    }

    #[test]
    fn test_non_sequence_repeater_is_arity_failure() {
        let origin = Origin::new(IterSource::from_records(vec![json!({"x": 5})]));
        let mut sink = Sink::new();
        sink.put_each("x").attach(origin.take("x")).unwrap();

        let (result, _) = run(DriverConfig::default(), origin, sink);
        let error = result.unwrap_err();
        let PipelineError::RowFailed { cause, .. } = &error else {
            panic!("expected a row failure, got {error}");
        };
        assert_eq!(cause.kind(), ErrorKind::Arity);
    }

    #[test]
    fn test_empty_sequences_yield_no_records() {
        let origin = Origin::new(IterSource::from_records(vec![json!({"id": 1, "tags": []})]));
        let mut sink = Sink::new();
        sink.put("id").attach(origin.take("id")).unwrap();
        sink.put_each("tag").attach(origin.take("tags")).unwrap();

        let (result, memory) = run(DriverConfig::default(), origin, sink);
        assert_eq!(result.unwrap().records_written, 0);
        assert_eq!(memory.finalize_count(), 1);
    }

    #[test]
    fn test_skip_omits_field_and_gate_drops_row() {
        let origin = Origin::new(IterSource::from_records(vec![
            json!({"name": "Rey", "email": "", "active": true}),
            json!({"name": "Finn", "email": "f@example.com", "active": false}),
        ]));
        let mut sink = Sink::new();
        sink.put("name").attach(origin.take("name")).unwrap();
        sink.put("email")
            .attach(
                origin
                    .take("email")
                    .then(builtin::skip_if("skip_empty", |v| v.as_str() == Some(""))),
            )
            .unwrap();
        sink.gate()
            .attach(
                origin
                    .take("active")
                    .then(builtin::skip_if("skip_inactive", |v| v == &json!(false))),
            )
            .unwrap();

        let (result, memory) = run(DriverConfig::default(), origin, sink);
        let report = result.unwrap();

        assert_eq!(values(&memory.records()), vec![json!({"name": "Rey"})]);
        assert_eq!(report.rows_skipped, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_stop_ends_run_and_finalizes() {
        let origin = Origin::new(IterSource::from_records(vec![
            json!({"n": 1}),
            json!({"n": 2}),
            json!({"n": 3}),
        ]));
        let mut sink = Sink::new();
        sink.put("n")
            .attach(origin.take("n").then(builtin::stop_if("stop_at_two", |v| v == &json!(2))))
            .unwrap();

        let (result, memory) = run(DriverConfig::default(), origin, sink);
        let report = result.unwrap();

        assert!(report.stopped);
        assert_eq!(report.rows_read, 2);
        assert_eq!(values(&memory.records()), vec![json!({"n": 1})]);
        assert_eq!(memory.finalize_count(), 1);
    }

    #[test]
    fn test_shared_node_runs_once_per_row() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let origin = Origin::new(IterSource::from_records(vec![json!({"a": 1}), json!({"a": 2})]));
        let shared = origin.take("a").then(Transform::new("count", move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(v)
        }));

        let collector = Collector::list();
        collector.push(&shared).unwrap();
        collector.push(shared.then(Transform::new("neg", |v| {
            Ok(json!(-v.as_i64().unwrap_or_default()))
        })))
        .unwrap();
        collector.close().unwrap();

        let mut sink = Sink::new();
        sink.put("a").attach(&shared).unwrap();
        sink.put("pair").attach(&collector).unwrap();
        sink.put_nowhere().attach(&shared).unwrap();

        let (result, memory) = run(DriverConfig::default(), origin, sink);
        result.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            values(&memory.records()),
            vec![json!({"a": 1, "pair": [1, -1]}), json!({"a": 2, "pair": [2, -2]})]
        );
    }

    #[test]
    fn test_guarded_failure_is_ignored() {
        let origin = Origin::new(IterSource::from_records(vec![json!({"a": "x"})]));
        let mut sink = Sink::new();
        sink.put("a")
            .attach(origin.take("a").then(parse_int()).guard(OnFail::LogAndIgnore))
            .unwrap();

        let (result, memory) = run(DriverConfig::default(), origin, sink);
        assert!(result.unwrap().is_clean());
        assert_eq!(values(&memory.records()), vec![json!({"a": null})]);
    }

    #[test]
    fn test_usage_error_aborts_under_continue() {
        let origin = Origin::new(IterSource::from_records(vec![json!({"a": 1})]));
        let foreign = Origin::new(IterSource::from_records(vec![json!({"a": 2})]));
        let mut sink = Sink::new();
        sink.put("a").attach(foreign.take("a")).unwrap();

        let (result, memory) = run(DriverConfig::continue_on_error(), origin, sink);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(memory.finalize_count(), 0);
    }

    #[test]
    fn test_open_collector_aborts_before_first_row() {
        let origin = Origin::new(IterSource::from_records(vec![
            json!({"a": 1}),
            json!({"a": 2}),
            json!({"a": 3}),
        ]));
        let collector = Collector::list();
        collector.push(origin.take("a")).unwrap();
        let mut sink = Sink::new();
        sink.put("c").attach(&collector).unwrap();

        let (result, memory) = run(DriverConfig::continue_on_error(), origin, sink);
        let error = result.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Usage);
        assert_eq!(error.ordinal(), None);
        assert!(memory.is_empty());
        assert_eq!(memory.finalize_count(), 0);
    }

    #[test]
    fn test_unnamed_binding_failure_records_position() {
        let origin = Origin::new(IterSource::from_records(vec![
            json!({"a": "1", "b": "2"}),
            json!({"a": "2", "b": "x"}),
        ]));
        let mut sink = Sink::new();
        sink.put("a").attach(origin.take("a")).unwrap();
        sink.put_nowhere().attach(origin.take("b").then(parse_int())).unwrap();

        let (result, memory) = run(DriverConfig::continue_on_error(), origin, sink);
        let report = result.unwrap();

        assert_eq!(memory.len(), 1);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.binding, 1);
        assert_eq!(failure.field, None);
        assert_eq!(failure.node, "then(parse_int)");
        assert!(failure.clone().into_error().to_string().contains("binding #1"));
    }

    #[test]
    fn test_row_limit_and_cancellation() {
        let origin = Origin::new(IterSource::new((0..100).map(|n| json!({"n": n}))));
        let mut sink = Sink::new();
        sink.put("n").attach(origin.take("n")).unwrap();

        let config = DriverConfig {
            row_limit: Some(5),
            ..DriverConfig::default()
        };
        let (result, memory) = run(config, origin, sink);
        assert_eq!(result.unwrap().rows_read, 5);
        assert_eq!(memory.len(), 5);

        let origin = Origin::new(IterSource::from_records(vec![json!({"n": 1})]));
        let mut sink = Sink::new();
        sink.put("n").attach(origin.take("n")).unwrap();
        let pipeline = Pipeline::new(origin)
            .with_sink(sink)
            .and_then(|p| p.with_consumer(MemorySink::new()))
            .unwrap();

        let driver = Driver::with_defaults();
        driver.cancel_flag().cancel();
        let report = driver.run(pipeline).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.rows_read, 0);
    }

    #[test]
    fn test_consumer_failure_aborts() {
        struct Rejecting;

        impl RecordSink for Rejecting {
            fn write(&mut self, _record: Record) -> Result<(), BoxedError> {
                Err("disk full".into())
            }
        }

        let origin = Origin::new(IterSource::from_records(vec![json!({"a": 1})]));
        let mut sink = Sink::new();
        sink.put("a").attach(origin.take("a")).unwrap();
        let pipeline = Pipeline::new(origin)
            .with_sink(sink)
            .and_then(|p| p.with_consumer(Rejecting))
            .unwrap();

        let error = Driver::with_defaults().run(pipeline).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Consumer);
    }

    #[test]
    fn test_signal_transform_in_collector_slot() {
        let origin = Origin::new(IterSource::from_records(vec![json!({"a": 1, "b": null})]));
        let collector = Collector::map();
        collector.insert("a", origin.take("a")).unwrap();
        collector
            .insert_optional(
                "b",
                origin
                    .take("b")
                    .then(Transform::signal("skip_null", |v| {
                        Ok(if v.is_null() { Flow::Skip } else { Flow::Emit(v) })
                    })),
            )
            .unwrap();
        collector.close().unwrap();

        let mut sink = Sink::new();
        sink.put("merged").attach(&collector).unwrap();

        let (result, memory) = run(DriverConfig::default(), origin, sink);
        result.unwrap();
        assert_eq!(
            values(&memory.records()),
            vec![json!({"merged": {"a": 1, "b": null}})]
        );
    }
}
