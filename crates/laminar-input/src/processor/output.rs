//! Per-input output adapters: route one event into the operator's slot.

use crate::event::StreamEvent;
use crate::metrics::{self, Counter, MetricsSink, WatermarkGauge};
use crate::operator::MultiInputOperator;
use crate::sort::KeySelector;
use crate::{Error, Result};

/// Record counters of one input. Chained source records never crossed the
/// network, so they only count against the operator.
enum RecordCounters {
    Network {
        records_in: Counter,
        network_records_in: Counter,
        input_records_in: Counter,
    },
    ChainedSource {
        records_in: Counter,
        input_records_in: Counter,
    },
}

impl RecordCounters {
    fn inc(&self) {
        match self {
            Self::Network {
                records_in,
                network_records_in,
                input_records_in,
            } => {
                records_in.inc();
                network_records_in.inc();
                input_records_in.inc();
            }
            Self::ChainedSource {
                records_in,
                input_records_in,
            } => {
                records_in.inc();
                input_records_in.inc();
            }
        }
    }
}

/// Delivers events of one logical input to the operator.
pub(crate) struct OutputAdapter<T> {
    input: usize,
    counters: RecordCounters,
    watermark: WatermarkGauge,
    key_selector: Option<KeySelector<T>>,
}

impl<T> OutputAdapter<T> {
    pub(crate) fn new(
        input: usize,
        network: bool,
        key_selector: Option<KeySelector<T>>,
        sink: &dyn MetricsSink,
    ) -> Self {
        let records_in = sink.counter(metrics::RECORDS_IN);
        let input_records_in = sink.counter(&metrics::input_records_in(input));
        let counters = if network {
            RecordCounters::Network {
                records_in,
                network_records_in: sink.counter(metrics::NETWORK_RECORDS_IN),
                input_records_in,
            }
        } else {
            RecordCounters::ChainedSource {
                records_in,
                input_records_in,
            }
        };
        Self {
            input,
            counters,
            watermark: sink.gauge(&metrics::input_watermark(input)),
            key_selector,
        }
    }

    /// Delivers `event`. Barriers are aligned by the driver; one reaching
    /// an adapter is rejected.
    pub(crate) fn deliver<O>(&self, event: StreamEvent<T>, operator: &mut O) -> Result<()>
    where
        O: MultiInputOperator<T> + ?Sized,
    {
        let delivered = match event {
            StreamEvent::Record(record) => {
                if let Some(selector) = &self.key_selector {
                    operator.set_key_context(self.input, &selector(&record.value));
                }
                self.counters.inc();
                operator.process_record(self.input, record)
            }
            StreamEvent::Watermark(watermark) => {
                self.watermark.set(watermark.timestamp());
                operator.process_watermark(self.input, watermark)
            }
            StreamEvent::Status(status) => operator.process_status(self.input, status),
            StreamEvent::LatencyMarker(marker) => {
                operator.process_latency_marker(self.input, marker)
            }
            StreamEvent::Barrier(_) => {
                return Err(Error::UnsupportedEventVariant {
                    input: self.input,
                    variant: "checkpoint-barrier",
                });
            }
        };
        delivered.map_err(Error::from)
    }
}
