//! End-to-end tests of the merge engine through its public assembly path.
//!
//! Each test wires channels, an operator and a metric registry through
//! `ProcessorFactory`, drives `process_once` and checks what the operator
//! observed.

use std::sync::Arc;

use laminar_input::checkpoint::flags;
use laminar_input::metrics;
use laminar_input::{
    channel, CheckpointBarrier, CheckpointBarrierInjector, ChannelProducer, Error, InputChannel,
    InputConfig, InputSelection, MergeConfig, MetricRegistry, MultiInputOperator,
    MultiInputProcessor, OperatorError, ProcessResult, ProcessorFactory, Record, SourceChain,
    StreamEvent, TaskInputs, Watermark,
};

/// Operator that logs everything it is handed.
struct LoggingOperator {
    inputs: usize,
    preferred: Option<usize>,
    log: Vec<String>,
    ended: Vec<usize>,
}

impl LoggingOperator {
    fn new(inputs: usize) -> Self {
        Self {
            inputs,
            preferred: None,
            log: Vec::new(),
            ended: Vec::new(),
        }
    }

    fn preferring(inputs: usize, preferred: usize) -> Self {
        Self {
            preferred: Some(preferred),
            ..Self::new(inputs)
        }
    }

    fn records(&self) -> Vec<&str> {
        self.log
            .iter()
            .filter(|e| !e.starts_with("wm") && !e.starts_with("cp"))
            .map(String::as_str)
            .collect()
    }
}

impl MultiInputOperator<u64> for LoggingOperator {
    fn input_count(&self) -> usize {
        self.inputs
    }

    fn process_record(&mut self, input: usize, record: Record<u64>) -> Result<(), OperatorError> {
        self.log.push(format!("{input}:{}", record.value));
        Ok(())
    }

    fn process_watermark(
        &mut self,
        input: usize,
        watermark: Watermark,
    ) -> Result<(), OperatorError> {
        self.log.push(format!("wm{input}:{}", watermark.timestamp()));
        Ok(())
    }

    fn snapshot_state(&mut self, barrier: &CheckpointBarrier) -> Result<(), OperatorError> {
        self.log.push(format!("cp{}", barrier.checkpoint_id));
        Ok(())
    }

    fn end_input(&mut self, input: usize) -> Result<(), OperatorError> {
        self.ended.push(input);
        Ok(())
    }

    fn is_input_selectable(&self) -> bool {
        self.preferred.is_some()
    }

    fn next_selection(&mut self) -> InputSelection {
        self.preferred.map_or(InputSelection::ALL, InputSelection::single)
    }
}

type Channels = Vec<Box<dyn InputChannel<u64>>>;

fn channels(n: usize) -> (Vec<ChannelProducer<u64>>, Channels) {
    (0..n)
        .map(|_| {
            let (tx, rx) = channel(1024);
            (tx, Box::new(rx) as Box<dyn InputChannel<u64>>)
        })
        .unzip()
}

fn assemble(
    groups: Vec<Channels>,
    operator: LoggingOperator,
    config: MergeConfig,
) -> (Arc<MetricRegistry>, MultiInputProcessor<u64, LoggingOperator>) {
    let configs = (0..groups.len()).map(InputConfig::network).collect();
    let registry = Arc::new(MetricRegistry::new());
    let processor = ProcessorFactory::new(config, registry.clone())
        .create(
            TaskInputs {
                channel_groups: groups,
                configs,
                sources: SourceChain::new(),
            },
            operator,
        )
        .unwrap();
    (registry, processor)
}

fn drain<O: MultiInputOperator<u64>>(p: &mut MultiInputProcessor<u64, O>) -> ProcessResult {
    loop {
        match p.process_once().unwrap() {
            ProcessResult::MoreAvailable => {}
            other => return other,
        }
    }
}

#[test]
fn test_two_network_inputs_alternate_fairly() {
    let (tx_a, a) = channels(1);
    let (tx_b, b) = channels(1);
    let (_, mut p) = assemble(vec![a, b], LoggingOperator::new(2), MergeConfig::default());

    tx_a[0].push_all((1..=3).map(|v| StreamEvent::record(v, 0)));
    tx_b[0].push_all((11..=13).map(|v| StreamEvent::record(v, 0)));
    drain(&mut p);

    assert_eq!(
        p.operator().records(),
        vec!["0:1", "1:11", "0:2", "1:12", "0:3", "1:13"]
    );

    drop(tx_a);
    drop(tx_b);
    assert_eq!(drain(&mut p), ProcessResult::Finished);
    let mut ended = p.operator().ended.clone();
    ended.sort_unstable();
    assert_eq!(ended, vec![0, 1]);
}

#[test]
fn test_per_input_order_preserved_under_uneven_arrival() {
    let (tx_a, a) = channels(1);
    let (tx_b, b) = channels(1);
    let (_, mut p) = assemble(vec![a, b], LoggingOperator::new(2), MergeConfig::default());

    tx_a[0].push_all((1..=5).map(|v| StreamEvent::record(v, 0)));
    tx_b[0].push_all([StreamEvent::record(100, 0)]);
    drain(&mut p);
    tx_b[0].push_all([StreamEvent::record(101, 0)]);
    drain(&mut p);

    let records = p.operator().records();
    let a_order: Vec<_> = records.iter().filter(|r| r.starts_with("0:")).collect();
    let b_order: Vec<_> = records.iter().filter(|r| r.starts_with("1:")).collect();
    assert_eq!(a_order, vec![&"0:1", &"0:2", &"0:3", &"0:4", &"0:5"]);
    assert_eq!(b_order, vec![&"1:100", &"1:101"]);
}

#[test]
fn test_operator_driven_selection_with_fallback() {
    let (tx_a, a) = channels(1);
    let (tx_b, b) = channels(1);
    let (_, mut p) = assemble(
        vec![a, b],
        LoggingOperator::preferring(2, 1),
        MergeConfig::default(),
    );

    tx_a[0].push_all((1..=2).map(|v| StreamEvent::record(v, 0)));
    tx_b[0].push_all((11..=12).map(|v| StreamEvent::record(v, 0)));
    drain(&mut p);

    assert_eq!(p.operator().records(), vec!["1:11", "1:12", "0:1", "0:2"]);
}

#[test]
fn test_watermark_is_minimum_over_reported_channels() {
    let (tx, group) = channels(2);
    let (registry, mut p) = assemble(vec![group], LoggingOperator::new(1), MergeConfig::default());

    tx[0].push_all([StreamEvent::watermark(10)]);
    drain(&mut p);
    assert!(p.operator().log.is_empty());

    tx[1].push_all([StreamEvent::watermark(5)]);
    drain(&mut p);
    tx[1].push_all([StreamEvent::watermark(20)]);
    drain(&mut p);

    assert_eq!(p.operator().log, vec!["wm0:5", "wm0:10"]);
    assert_eq!(registry.gauge_value(&metrics::input_watermark(0)), Some(10));
}

#[test]
fn test_barrier_alignment_across_channels() {
    let (tx, group) = channels(2);
    let (_, mut p) = assemble(vec![group], LoggingOperator::new(1), MergeConfig::default());

    tx[0].push_all([
        StreamEvent::record(1, 0),
        StreamEvent::Barrier(CheckpointBarrier::new(1, 1)),
        StreamEvent::record(2, 0),
    ]);
    tx[1].push_all([StreamEvent::record(3, 0)]);
    drain(&mut p);

    // Channel 0 is past the barrier; its record 2 must wait.
    assert!(!p.operator().log.contains(&"0:2".to_string()));
    assert!(p.operator().log.contains(&"0:1".to_string()));
    assert!(p.operator().log.contains(&"0:3".to_string()));

    tx[1].push_all([StreamEvent::Barrier(CheckpointBarrier::new(1, 1))]);
    drain(&mut p);

    let log = &p.operator().log;
    let cp = log.iter().position(|e| e == "cp1").unwrap();
    let after = log.iter().position(|e| e == "0:2").unwrap();
    assert!(cp < after);
    assert_eq!(tx[0].acknowledged_barriers(), vec![1]);
    assert_eq!(tx[1].acknowledged_barriers(), vec![1]);
}

#[test]
fn test_task_level_alignment_between_network_and_chained_source() {
    let (tx, group) = channels(1);
    let injector = CheckpointBarrierInjector::new();
    let (source_tx, source_rx) = channel::<u64>(16);
    let mut sources = SourceChain::new();
    let source = sources.push(Box::new(source_rx), Some(injector.handle()));

    let config = MergeConfig {
        checkpointing_enabled: true,
        ..MergeConfig::default()
    };
    let mut p = ProcessorFactory::new(config, Arc::new(MetricRegistry::new()))
        .create(
            TaskInputs {
                channel_groups: vec![group],
                configs: vec![InputConfig::network(0), InputConfig::chained_source(source)],
                sources,
            },
            LoggingOperator::new(2),
        )
        .unwrap();

    tx[0].push_all([
        StreamEvent::Barrier(CheckpointBarrier::new(7, 1)),
        StreamEvent::record(1, 0),
    ]);
    source_tx.push_all([StreamEvent::record(2, 0)]);
    drain(&mut p);
    assert_eq!(p.operator().records(), vec!["1:2"]);
    assert_eq!(p.pending_checkpoint().map(|b| b.checkpoint_id), Some(7));

    injector.trigger(7, flags::NONE);
    drain(&mut p);
    assert_eq!(p.operator().log, vec!["1:2", "cp7", "0:1"]);
}

#[test]
fn test_channel_failure_names_input_and_channel() {
    let (_tx_a, a) = channels(1);
    let (tx_b, b) = channels(2);
    let (_, mut p) = assemble(vec![a, b], LoggingOperator::new(2), MergeConfig::default());

    tx_b[1].fail("connection reset");
    let err = loop {
        match p.process_once() {
            Ok(ProcessResult::MoreAvailable) => {}
            Ok(other) => panic!("expected failure, got {other:?}"),
            Err(err) => break err,
        }
    };
    match err {
        Error::ChannelFailure {
            input,
            channel,
            reason,
        } => {
            assert_eq!((input, channel), (1, 1));
            assert!(reason.contains("connection reset"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_record_counters_split_by_boundary() {
    let (tx, group) = channels(1);
    let (source_tx, source_rx) = channel::<u64>(16);
    let mut sources = SourceChain::new();
    let source = sources.push(Box::new(source_rx), None);

    let registry = Arc::new(MetricRegistry::new());
    let mut p = ProcessorFactory::new(MergeConfig::default(), registry.clone())
        .create(
            TaskInputs {
                channel_groups: vec![group],
                configs: vec![InputConfig::network(0), InputConfig::chained_source(source)],
                sources,
            },
            LoggingOperator::new(2),
        )
        .unwrap();

    tx[0].push_all((0..3).map(|v| StreamEvent::record(v, 0)));
    source_tx.push_all((0..2).map(|v| StreamEvent::record(v, 0)));
    drain(&mut p);

    assert_eq!(registry.counter_value(metrics::RECORDS_IN), Some(5));
    assert_eq!(registry.counter_value(metrics::NETWORK_RECORDS_IN), Some(3));
    assert_eq!(registry.counter_value(&metrics::input_records_in(0)), Some(3));
    assert_eq!(registry.counter_value(&metrics::input_records_in(1)), Some(2));
}
