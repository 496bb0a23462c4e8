//! End-to-end tests of the actualizer engine.
//!
//! Tests: CommandWriter / PLog → AsyncActualizer → Projector → ViewStorage
//!
//! Verifies:
//! - Projections converge to the log, resuming from stored offsets
//! - Bundles are flushed by size, by timer, or after every event
//! - Failed runs are retried from the last flushed offset
//! - Synchronous projections are all-or-nothing per command

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;

    use strata_core::{AppName, Offset, PartitionId, QName, WorkspaceId};
    use strata_events::idempotency::{should_apply, stamp};
    use strata_events::{
        AppDefinition, InMemoryBroker, LogEvent, NewEvent, NotificationBroker, ProjectionKey,
        Projector, ProjectorDescriptor, ProjectorRegistry, ProjectorState, StorageKind,
        TriggerKind, ViewKey,
    };
    use strata_observability::metrics::{
        FLUSHES_TOTAL, InMemoryActualizerMetrics, MetricKey, PROJECTORS_IN_ERROR, STORED_OFFSET,
    };

    use crate::actualizers::{
        ActualizerError, ActualizerPipeline, ActualizerServices, AsyncActualizer, AsyncErrorHandler,
        AsyncProjector, ErrorSink, RunState,
    };
    use crate::command::{CommandError, CommandWriter};
    use crate::config::ActualizerConfig;
    use crate::partitions::{
        AppState, InMemoryAppPartitions, PartitionBorrower, PartitionEngines, ProcessorKind,
    };
    use crate::plog::{EventCallback, InMemoryPLog, LogReader, LogWriter, PLogError, ReadLimit};
    use crate::supervisor::{ActualizerKey, ActualizerSupervisor, SupervisorError};
    use crate::views::{
        InMemoryViewStorage, ViewStorage, actualizer_offset, create_workspace,
        store_actualizer_offset,
    };

    const PARTITION: PartitionId = PartitionId::new(1);
    const WAIT: Duration = Duration::from_secs(10);

    fn qname(raw: &str) -> QName {
        raw.parse().unwrap()
    }

    fn app() -> AppName {
        "test/app".parse().unwrap()
    }

    fn cmd() -> QName {
        qname("test.abc")
    }

    fn ws_kind() -> QName {
        qname("test.ws")
    }

    fn incrementor() -> QName {
        qname("test.incrementor")
    }

    fn decrementor() -> QName {
        qname("test.decrementor")
    }

    fn inc_view() -> QName {
        qname("test.IncrementorView")
    }

    fn dec_view() -> QName {
        qname("test.DecrementorView")
    }

    fn fast_config() -> ActualizerConfig {
        ActualizerConfig::default()
            .with_flush_interval(Duration::from_millis(10))
            .with_retry_delays(Duration::from_millis(10), Duration::from_millis(50))
    }

    fn counter_key() -> ViewKey {
        ViewKey::new().with("pk", 0)
    }

    /// Adds `delta` to a per-workspace counter; replays are skipped by offset.
    struct Counter {
        view: QName,
        delta: i64,
    }

    #[async_trait]
    impl Projector for Counter {
        async fn project(&self, event: &LogEvent, state: &mut dyn ProjectorState) -> anyhow::Result<()> {
            let key = counter_key();
            let existing = state.read_view(&self.view, event.workspace(), &key).await?;
            if !should_apply(existing.as_ref(), event.offset()) {
                return Ok(());
            }
            let current = existing
                .as_ref()
                .and_then(|v| v.get("value"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            state.put_view(
                &self.view,
                event.workspace(),
                key,
                stamp(json!({ "value": current + self.delta }), event.offset()),
            )?;
            Ok(())
        }
    }

    /// Fails the first event of `workspace`, then behaves like `inner`.
    struct FailOnce {
        inner: Counter,
        workspace: WorkspaceId,
        failed: AtomicBool,
    }

    #[async_trait]
    impl Projector for FailOnce {
        async fn project(&self, event: &LogEvent, state: &mut dyn ProjectorState) -> anyhow::Result<()> {
            if event.workspace() == self.workspace && !self.failed.swap(true, Ordering::SeqCst) {
                anyhow::bail!("injected failure");
            }
            self.inner.project(event, state).await
        }
    }

    /// Fails every event of `workspace`.
    struct FailIn {
        workspace: WorkspaceId,
    }

    #[async_trait]
    impl Projector for FailIn {
        async fn project(&self, event: &LogEvent, _: &mut dyn ProjectorState) -> anyhow::Result<()> {
            if event.workspace() == self.workspace {
                anyhow::bail!("rejected in workspace {}", self.workspace);
            }
            Ok(())
        }
    }

    /// Records the start offset of every read.
    struct RecordingLog {
        inner: Arc<InMemoryPLog>,
        reads: Mutex<Vec<Offset>>,
    }

    #[async_trait]
    impl LogReader for RecordingLog {
        async fn read_plog(
            &self,
            partition: PartitionId,
            from: Offset,
            limit: ReadLimit,
            callback: &mut EventCallback<'_>,
        ) -> Result<(), PLogError> {
            self.reads.lock().unwrap().push(from);
            self.inner.read_plog(partition, from, limit, callback).await
        }
    }

    /// Delivers one event and then fails, once.
    struct HiccupLog {
        inner: Arc<InMemoryPLog>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl LogReader for HiccupLog {
        async fn read_plog(
            &self,
            partition: PartitionId,
            from: Offset,
            limit: ReadLimit,
            callback: &mut EventCallback<'_>,
        ) -> Result<(), PLogError> {
            if self.failed.swap(true, Ordering::SeqCst) {
                return self.inner.read_plog(partition, from, limit, callback).await;
            }
            self.inner
                .read_plog(partition, from, ReadLimit::Count(1), callback)
                .await?;
            Err(PLogError::Storage("disk hiccup".to_string()))
        }
    }

    /// Rejects the first put, then writes through.
    struct RejectFirstPut {
        inner: Arc<InMemoryPLog>,
        rejected: AtomicBool,
    }

    #[async_trait]
    impl LogWriter for RejectFirstPut {
        async fn last_offset(&self, partition: PartitionId) -> Result<Offset, PLogError> {
            self.inner.last_offset(partition).await
        }

        async fn put(&self, event: Arc<LogEvent>) -> Result<(), PLogError> {
            if !self.rejected.swap(true, Ordering::SeqCst) {
                return Err(PLogError::Storage("put failed".to_string()));
            }
            self.inner.put(event).await
        }
    }

    fn counting_definition(projectors: &[(QName, QName)]) -> AppDefinition {
        let mut builder = AppDefinition::builder(app());
        let mut members = vec![cmd()];
        for (name, view) in projectors {
            builder = builder.add_projector(
                ProjectorDescriptor::new(name.clone())
                    .on(cmd(), [TriggerKind::Execute])
                    .writes_view(view.clone()),
            );
            members.push(name.clone());
        }
        builder.add_workspace(ws_kind(), members).build()
    }

    fn counters() -> ProjectorRegistry {
        ProjectorRegistry::new()
            .register(incrementor(), Counter { view: inc_view(), delta: 1 })
            .register(decrementor(), Counter { view: dec_view(), delta: -1 })
    }

    struct Harness {
        partitions: Arc<InMemoryAppPartitions>,
        log: Arc<InMemoryPLog>,
        views: Arc<InMemoryViewStorage>,
        broker: Arc<InMemoryBroker>,
        metrics: Arc<InMemoryActualizerMetrics>,
    }

    impl Harness {
        async fn new(definition: AppDefinition, registry: ProjectorRegistry) -> Self {
            let log = Arc::new(InMemoryPLog::new());
            Self::with_reader(definition, registry, log.clone(), log).await
        }

        async fn with_reader(
            definition: AppDefinition,
            registry: ProjectorRegistry,
            log: Arc<InMemoryPLog>,
            reader: Arc<dyn LogReader>,
        ) -> Self {
            Self::build(definition, registry, log, reader, PartitionEngines::default()).await
        }

        /// Workspaces 1001 and 1002 exist; their creation occupies offsets 1 and 2.
        async fn build(
            definition: AppDefinition,
            registry: ProjectorRegistry,
            log: Arc<InMemoryPLog>,
            reader: Arc<dyn LogReader>,
            engines: PartitionEngines,
        ) -> Self {
            strata_observability::tracing::init_for_tests();

            let views = Arc::new(InMemoryViewStorage::new());
            for ws in [1001, 1002] {
                create_workspace(&*views, WorkspaceId::new(ws), &ws_kind())
                    .await
                    .unwrap();
                log.append(
                    PARTITION,
                    NewEvent::new(WorkspaceId::new(ws), QName::sys("CreateWorkspace")),
                )
                .unwrap();
            }

            let partitions = Arc::new(InMemoryAppPartitions::new());
            partitions.deploy(
                AppState::new(Arc::new(definition), reader, views.clone(), registry),
                [PARTITION],
                engines,
            );

            Self {
                partitions,
                log,
                views,
                broker: Arc::new(InMemoryBroker::new()),
                metrics: Arc::new(InMemoryActualizerMetrics::new()),
            }
        }

        fn services(&self) -> ActualizerServices {
            ActualizerServices {
                partitions: self.partitions.clone(),
                broker: self.broker.clone(),
                metrics: self.metrics.clone(),
            }
        }

        fn actualizer(&self, projector: QName, config: ActualizerConfig) -> AsyncActualizer {
            AsyncActualizer::new(app(), PARTITION, projector, self.services(), config)
        }

        fn fill(&self, ws: u64) -> Offset {
            self.log
                .append(PARTITION, NewEvent::new(WorkspaceId::new(ws), cmd()))
                .unwrap()
                .offset()
        }

        /// Offsets 3..=12: eight events in 1001, two in 1002 (offsets 4 and 8).
        fn fill_standard(&self) -> Offset {
            let mut top = Offset::NULL;
            for ws in [1001, 1002, 1001, 1001, 1001, 1002, 1001, 1001, 1001, 1001] {
                top = self.fill(ws);
            }
            top
        }

        async fn stored_offset(&self, projector: &QName) -> Offset {
            actualizer_offset(&*self.views, PARTITION, projector).await.unwrap()
        }

        async fn wait_for_offset(&self, projector: &QName, target: Offset) {
            tokio::time::timeout(WAIT, async {
                while self.stored_offset(projector).await < target {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await
            .unwrap_or_else(|_| panic!("{projector} did not reach offset {target}"));
        }

        async fn counter(&self, view: &QName, ws: u64) -> i64 {
            self.views
                .get(view, WorkspaceId::new(ws), &counter_key())
                .await
                .unwrap()
                .and_then(|v| v.get("value").and_then(Value::as_i64))
                .unwrap_or(0)
        }

        fn actualizer_metric(&self, metric: &'static str, projector: &QName) -> i64 {
            self.metrics
                .value(metric, &MetricKey::actualizer(app(), PARTITION, projector.clone()))
        }
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    struct Running {
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    impl Running {
        fn start(actualizer: AsyncActualizer) -> Self {
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let task = tokio::spawn(async move { actualizer.run(token).await });
            Self { cancel, task }
        }

        async fn stop(self) {
            self.cancel.cancel();
            self.task.await.unwrap();
        }
    }

    fn collecting_sink() -> (ErrorSink, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink_errors = errors.clone();
        let sink: ErrorSink = Arc::new(move |_: &str, err: &ActualizerError| {
            sink_errors.lock().unwrap().push(err.to_string());
        });
        (sink, errors)
    }

    #[tokio::test]
    async fn projections_converge_and_resume_from_stored_offsets() {
        let h = Harness::new(
            counting_definition(&[(incrementor(), inc_view()), (decrementor(), dec_view())]),
            counters(),
        )
        .await;

        // The decrementor already processed everything up to offset 6.
        store_actualizer_offset(&*h.views, PARTITION, &decrementor(), Offset::new(6))
            .await
            .unwrap();
        let top = h.fill_standard();

        let supervisor = ActualizerSupervisor::new(h.services(), fast_config());
        let started = supervisor.deploy(&app(), PARTITION).await.unwrap();
        assert_eq!(started.len(), 2);

        h.wait_for_offset(&incrementor(), top).await;
        h.wait_for_offset(&decrementor(), top).await;
        supervisor.shutdown().await;

        assert_eq!(h.counter(&inc_view(), 1001).await, 8);
        assert_eq!(h.counter(&inc_view(), 1002).await, 2);
        assert_eq!(h.counter(&dec_view(), 1001).await, -5);
        assert_eq!(h.counter(&dec_view(), 1002).await, -1);
    }

    #[tokio::test]
    async fn decrementor_from_scratch_mirrors_the_incrementor() {
        let h = Harness::new(counting_definition(&[(decrementor(), dec_view())]), counters()).await;
        let top = h.fill_standard();

        let running = Running::start(h.actualizer(decrementor(), fast_config()));
        h.wait_for_offset(&decrementor(), top).await;
        running.stop().await;

        assert_eq!(h.counter(&dec_view(), 1001).await, -8);
        assert_eq!(h.counter(&dec_view(), 1002).await, -2);
    }

    #[tokio::test]
    async fn full_bundle_is_flushed_without_waiting_for_the_timer() {
        let h = Harness::new(counting_definition(&[(incrementor(), inc_view())]), counters()).await;
        let top = h.fill_standard();

        let config = ActualizerConfig::default()
            .with_intents_limit(1)
            .with_bundles_limit(1)
            .with_flush_interval(Duration::from_secs(60));
        let running = Running::start(h.actualizer(incrementor(), config));

        h.wait_for_offset(&incrementor(), top).await;
        running.stop().await;

        assert_eq!(h.actualizer_metric(FLUSHES_TOTAL, &incrementor()), 10);
        assert_eq!(h.actualizer_metric(STORED_OFFSET, &incrementor()), top.get() as i64);
    }

    #[tokio::test]
    async fn partial_bundle_is_flushed_by_the_timer() {
        let h = Harness::new(counting_definition(&[(incrementor(), inc_view())]), counters()).await;
        let top = h.fill_standard();

        let config = ActualizerConfig::default().with_flush_interval(Duration::from_millis(20));
        let running = Running::start(h.actualizer(incrementor(), config));

        h.wait_for_offset(&incrementor(), top).await;
        running.stop().await;

        let flushes = h.actualizer_metric(FLUSHES_TOTAL, &incrementor());
        assert!((1..10).contains(&flushes), "expected batched flushes, got {flushes}");
        assert_eq!(h.counter(&inc_view(), 1001).await, 8);
    }

    #[tokio::test]
    async fn non_buffered_projector_flushes_after_every_event() {
        let definition = AppDefinition::builder(app())
            .add_projector(
                ProjectorDescriptor::new(incrementor())
                    .on(cmd(), [TriggerKind::Execute])
                    .writes_view(inc_view())
                    .writes(StorageKind::Http),
            )
            .add_workspace(ws_kind(), [cmd(), incrementor()])
            .build();
        let h = Harness::new(definition, counters()).await;
        h.fill(1001);
        let top = h.fill(1002);

        let running = Running::start(h.actualizer(incrementor(), ActualizerConfig::default()));
        h.wait_for_offset(&incrementor(), top).await;
        running.stop().await;

        assert_eq!(h.actualizer_metric(FLUSHES_TOTAL, &incrementor()), 2);
    }

    #[tokio::test]
    async fn failed_event_is_retried_and_the_error_gauge_cleared() {
        let registry = ProjectorRegistry::new().register(
            incrementor(),
            FailOnce {
                inner: Counter { view: inc_view(), delta: 1 },
                workspace: WorkspaceId::new(1002),
                failed: AtomicBool::new(false),
            },
        );
        let h = Harness::new(counting_definition(&[(incrementor(), inc_view())]), registry).await;
        let top = h.fill_standard();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink: ErrorSink = {
            let observed = observed.clone();
            let metrics = h.metrics.clone();
            Arc::new(move |name: &str, err: &ActualizerError| {
                observed.lock().unwrap().push((
                    name.to_string(),
                    err.to_string(),
                    metrics.value(PROJECTORS_IN_ERROR, &MetricKey::app(app())),
                    metrics.value(
                        STORED_OFFSET,
                        &MetricKey::actualizer(app(), PARTITION, incrementor()),
                    ),
                ));
            })
        };
        let running = Running::start(
            h.actualizer(incrementor(), fast_config()).with_error_sink(sink),
        );

        h.wait_for_offset(&incrementor(), top).await;
        let metrics = h.metrics.clone();
        eventually("error gauge to clear", || {
            metrics.value(PROJECTORS_IN_ERROR, &MetricKey::app(app())) == 0
        })
        .await;
        running.stop().await;

        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 1);
        let (name, message, gauge, stored) = &observed[0];
        assert_eq!(name, "test.incrementor [1]");
        assert!(message.contains("wsid[1002] offset[4]"), "{message}");
        assert!(message.contains("injected failure"), "{message}");
        assert_eq!(*gauge, 1);
        assert!(*stored < 4);

        assert_eq!(h.counter(&inc_view(), 1001).await, 8);
        assert_eq!(h.counter(&inc_view(), 1002).await, 2);
    }

    #[tokio::test]
    async fn notification_resumes_reading_after_the_known_offset() {
        let log = Arc::new(InMemoryPLog::new());
        let reader = Arc::new(RecordingLog {
            inner: log.clone(),
            reads: Mutex::new(Vec::new()),
        });
        let h = Harness::with_reader(
            counting_definition(&[(incrementor(), inc_view())]),
            counters(),
            log,
            reader.clone(),
        )
        .await;
        let caught_up = h.fill_standard();

        let running = Running::start(h.actualizer(incrementor(), fast_config()));
        h.wait_for_offset(&incrementor(), caught_up).await;
        let reads_before = reader.reads.lock().unwrap().len();

        h.fill(1002);
        let top = h.fill(1002);
        h.broker
            .update(ProjectionKey::plog_updates(app(), PARTITION), top);

        h.wait_for_offset(&incrementor(), top).await;
        running.stop().await;

        let reads = reader.reads.lock().unwrap();
        assert!(reads.len() > reads_before);
        assert!(reads[reads_before..].iter().all(|from| *from > caught_up));
        drop(reads);
        assert_eq!(h.counter(&inc_view(), 1002).await, 4);
    }

    #[tokio::test]
    async fn replay_from_an_older_offset_does_not_change_projections() {
        let h = Harness::new(counting_definition(&[(incrementor(), inc_view())]), counters()).await;
        let top = h.fill_standard();

        let running = Running::start(h.actualizer(incrementor(), fast_config()));
        h.wait_for_offset(&incrementor(), top).await;
        running.stop().await;

        store_actualizer_offset(&*h.views, PARTITION, &incrementor(), Offset::new(6))
            .await
            .unwrap();
        let running = Running::start(h.actualizer(incrementor(), fast_config()));
        h.wait_for_offset(&incrementor(), top).await;
        running.stop().await;

        assert_eq!(h.counter(&inc_view(), 1001).await, 8);
        assert_eq!(h.counter(&inc_view(), 1002).await, 2);
    }

    #[tokio::test]
    async fn read_error_after_a_partial_batch_surfaces_on_the_next_read() {
        let log = Arc::new(InMemoryPLog::new());
        let reader = Arc::new(HiccupLog {
            inner: log.clone(),
            failed: AtomicBool::new(false),
        });
        let h = Harness::with_reader(
            counting_definition(&[(incrementor(), inc_view())]),
            counters(),
            log,
            reader,
        )
        .await;
        let top = h.fill_standard();

        let (sink, errors) = collecting_sink();
        let running = Running::start(
            h.actualizer(incrementor(), fast_config()).with_error_sink(sink),
        );
        h.wait_for_offset(&incrementor(), top).await;
        running.stop().await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("disk hiccup"), "{}", errors[0]);
        drop(errors);
        assert_eq!(h.counter(&inc_view(), 1001).await, 8);
    }

    #[tokio::test]
    async fn removed_projector_fails_the_run() {
        let h = Harness::new(counting_definition(&[(incrementor(), inc_view())]), counters()).await;
        let actualizer = h.actualizer(qname("test.removed"), fast_config());

        let result = actualizer.run_once(&CancellationToken::new()).await;

        assert_eq!(
            result,
            Err(ActualizerError::ProjectorNotDefined(qname("test.removed")))
        );
    }

    #[tokio::test]
    async fn projector_outside_the_workspace_kind_skips_events() {
        let definition = AppDefinition::builder(app())
            .add_projector(
                ProjectorDescriptor::new(incrementor())
                    .on(cmd(), [TriggerKind::Execute])
                    .writes_view(inc_view()),
            )
            .add_workspace(ws_kind(), [cmd()])
            .build();
        let h = Harness::new(definition, counters()).await;
        let top = h.fill_standard();

        let running = Running::start(h.actualizer(incrementor(), fast_config()));
        let metrics = h.metrics.clone();
        eventually("the last event to be handled", || {
            metrics.value(
                strata_observability::metrics::CURRENT_OFFSET,
                &MetricKey::actualizer(app(), PARTITION, incrementor()),
            ) == top.get() as i64
        })
        .await;
        running.stop().await;

        assert_eq!(h.counter(&inc_view(), 1001).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_are_projected_exactly_once_net() {
        let h = Harness::new(counting_definition(&[(incrementor(), inc_view())]), counters()).await;
        let writer = Arc::new(CommandWriter::new(
            app(),
            h.partitions.clone(),
            h.log.clone(),
            h.broker.clone(),
            ActualizerConfig::default(),
        ));

        let supervisor = ActualizerSupervisor::new(h.services(), fast_config());
        supervisor.deploy(&app(), PARTITION).await.unwrap();

        let producers: Vec<_> = (0..8u64)
            .map(|producer| {
                let writer = writer.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        let ws = WorkspaceId::new(1001 + producer % 2);
                        writer.write(PARTITION, NewEvent::new(ws, cmd())).await.unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let top = Offset::new(2 + 200);
        h.wait_for_offset(&incrementor(), top).await;
        supervisor.shutdown().await;

        let mut offsets = Vec::new();
        h.log
            .read_plog(PARTITION, Offset::new(1), ReadLimit::ToEnd, &mut |event: Arc<LogEvent>| {
                offsets.push(event.offset().get());
                std::ops::ControlFlow::Continue(())
            })
            .await
            .unwrap();
        assert_eq!(offsets, (1..=202).collect::<Vec<u64>>());
        assert_eq!(h.counter(&inc_view(), 1001).await, 100);
        assert_eq!(h.counter(&inc_view(), 1002).await, 100);
    }

    #[tokio::test]
    async fn position_is_saved_while_no_event_is_accepted() {
        let definition = AppDefinition::builder(app())
            .add_projector(
                ProjectorDescriptor::new(incrementor())
                    .on(qname("test.never"), [TriggerKind::Execute])
                    .writes_view(inc_view()),
            )
            .add_workspace(ws_kind(), [cmd(), incrementor()])
            .build();
        let h = Harness::new(definition, counters()).await;
        let top = h.fill_standard();

        let config = fast_config().with_flush_position_interval(Duration::from_millis(20));
        let running = Running::start(h.actualizer(incrementor(), config));
        h.wait_for_offset(&incrementor(), top).await;
        running.stop().await;

        assert_eq!(h.counter(&inc_view(), 1001).await, 0);
        assert_eq!(h.actualizer_metric(STORED_OFFSET, &incrementor()), top.get() as i64);
    }

    #[tokio::test]
    async fn closing_a_cancelled_pipeline_does_not_wait_for_an_engine() {
        let definition = counting_definition(&[(incrementor(), inc_view())]);
        let log = Arc::new(InMemoryPLog::new());
        let h = Harness::build(
            definition.clone(),
            counters(),
            log.clone(),
            log,
            PartitionEngines::default().with_actualizers(1),
        )
        .await;
        let event = h.log.append(PARTITION, NewEvent::new(WorkspaceId::new(1001), cmd())).unwrap();

        let held = h
            .partitions
            .borrow(&app(), PARTITION, ProcessorKind::Actualizer)
            .await
            .unwrap();

        let parent = CancellationToken::new();
        let run_state = Arc::new(RunState::new(&parent));
        let in_error = Arc::new(AtomicBool::new(false));
        let config = ActualizerConfig::default().with_flush_interval(Duration::from_secs(60));
        let projector = AsyncProjector::new(
            PARTITION,
            definition.projector(&incrementor()).cloned().unwrap(),
            Arc::new(definition),
            h.services(),
            &config,
            in_error.clone(),
            run_state.clone(),
        );
        let errors = AsyncErrorHandler::new(run_state.clone(), h.metrics.clone(), app(), in_error);
        let mut pipeline = ActualizerPipeline::start(
            projector,
            errors,
            run_state.clone(),
            config.bundles_limit,
            config.flush_interval,
        );

        pipeline.send(event).await.unwrap();
        let metrics = h.metrics.clone();
        eventually("the stage to pick up the event", || {
            metrics.value(
                strata_observability::metrics::CURRENT_OFFSET,
                &MetricKey::actualizer(app(), PARTITION, incrementor()),
            ) == 3
        })
        .await;

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), pipeline.close())
            .await
            .expect("pipeline close waited for the held engine");

        assert_eq!(run_state.current_error(), None);
        assert_eq!(h.metrics.value(PROJECTORS_IN_ERROR, &MetricKey::app(app())), 0);
        assert_eq!(h.counter(&inc_view(), 1001).await, 0);
        drop(held);
    }

    fn sync_definition() -> AppDefinition {
        AppDefinition::builder(app())
            .add_projector(
                ProjectorDescriptor::new(incrementor())
                    .synchronous()
                    .on(cmd(), [TriggerKind::Execute])
                    .writes_view(inc_view()),
            )
            .add_projector(
                ProjectorDescriptor::new(qname("test.guard"))
                    .synchronous()
                    .on(cmd(), [TriggerKind::Execute]),
            )
            .add_workspace(ws_kind(), [cmd(), incrementor(), qname("test.guard")])
            .build()
    }

    #[tokio::test]
    async fn sync_projectors_commit_all_or_nothing() {
        let registry = ProjectorRegistry::new()
            .register(incrementor(), Counter { view: inc_view(), delta: 1 })
            .register(qname("test.guard"), FailIn { workspace: WorkspaceId::new(1002) });
        let h = Harness::new(sync_definition(), registry).await;
        let writer = CommandWriter::new(
            app(),
            h.partitions.clone(),
            h.log.clone(),
            h.broker.clone(),
            ActualizerConfig::default(),
        );

        let event = writer
            .write(PARTITION, NewEvent::new(WorkspaceId::new(1001), cmd()))
            .await
            .unwrap();
        assert_eq!(event.offset(), Offset::new(3));
        assert_eq!(h.counter(&inc_view(), 1001).await, 1);

        let err = writer
            .write(PARTITION, NewEvent::new(WorkspaceId::new(1002), cmd()))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Projection(_)), "{err}");
        assert!(err.to_string().contains("wsid[1002] offset[4]"), "{err}");
        assert_eq!(h.counter(&inc_view(), 1002).await, 0);

        // The rejected event stays logged; no projector's writes survive.
        assert_eq!(h.log.last_offset(PARTITION).await.unwrap(), Offset::new(4));
        let event = writer
            .write(PARTITION, NewEvent::new(WorkspaceId::new(1001), cmd()))
            .await
            .unwrap();
        assert_eq!(event.offset(), Offset::new(5));
        assert_eq!(h.counter(&inc_view(), 1001).await, 2);
        assert_eq!(h.counter(&inc_view(), 1002).await, 0);
    }

    #[tokio::test]
    async fn failed_log_put_leaves_sync_views_untouched() {
        let registry = ProjectorRegistry::new()
            .register(incrementor(), Counter { view: inc_view(), delta: 1 })
            .register(qname("test.guard"), FailIn { workspace: WorkspaceId::new(1002) });
        let h = Harness::new(sync_definition(), registry).await;
        let writer = CommandWriter::new(
            app(),
            h.partitions.clone(),
            Arc::new(RejectFirstPut {
                inner: h.log.clone(),
                rejected: AtomicBool::new(false),
            }),
            h.broker.clone(),
            ActualizerConfig::default(),
        );

        let err = writer
            .write(PARTITION, NewEvent::new(WorkspaceId::new(1001), cmd()))
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::PLog(PLogError::Storage("put failed".to_string())));
        assert_eq!(h.counter(&inc_view(), 1001).await, 0);

        let event = writer
            .write(PARTITION, NewEvent::new(WorkspaceId::new(1001), cmd()))
            .await
            .unwrap();
        assert_eq!(event.offset(), Offset::new(3));
        assert_eq!(h.log.last_offset(PARTITION).await.unwrap(), Offset::new(3));
        assert_eq!(h.counter(&inc_view(), 1001).await, 1);
    }

    #[tokio::test]
    async fn sync_projector_writing_an_undeclared_view_fails_the_command() {
        let definition = AppDefinition::builder(app())
            .add_projector(
                ProjectorDescriptor::new(incrementor())
                    .synchronous()
                    .on(cmd(), [TriggerKind::Execute])
                    .writes_view(dec_view()),
            )
            .build();
        let h = Harness::new(definition, counters()).await;
        let writer = CommandWriter::new(
            app(),
            h.partitions.clone(),
            h.log.clone(),
            h.broker.clone(),
            ActualizerConfig::default(),
        );

        let err = writer
            .write(PARTITION, NewEvent::new(WorkspaceId::new(1001), cmd()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CommandError::Projection(ActualizerError::Event { ref source, .. })
                if matches!(**source, ActualizerError::UndeclaredView { .. })
        ));
        assert!(h.views.get(&inc_view(), WorkspaceId::new(1001), &counter_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn supervisor_rejects_duplicates_and_stops_everything_on_shutdown() {
        let h = Harness::new(
            counting_definition(&[(incrementor(), inc_view()), (decrementor(), dec_view())]),
            counters(),
        )
        .await;
        let supervisor = ActualizerSupervisor::new(h.services(), fast_config());

        supervisor.deploy(&app(), PARTITION).await.unwrap();
        assert_eq!(supervisor.running_count(), 2);
        assert!(supervisor.is_running(&ActualizerKey {
            app: app(),
            partition: PARTITION,
            projector: incrementor(),
        }));
        assert!(matches!(
            supervisor.deploy(&app(), PARTITION).await,
            Err(SupervisorError::AlreadyRunning { .. })
        ));

        supervisor.undeploy(&app(), PARTITION).await;
        assert_eq!(supervisor.running_count(), 0);
        assert_eq!(h.broker.channel_count(), 0);

        supervisor.deploy(&app(), PARTITION).await.unwrap();
        supervisor.shutdown().await;
        assert_eq!(supervisor.running_count(), 0);
        assert_eq!(
            supervisor.deploy(&app(), PARTITION).await,
            Err(SupervisorError::ShutDown)
        );
    }
}
