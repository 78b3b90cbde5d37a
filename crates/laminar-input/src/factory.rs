//! Assembly: validates a task's input configuration and wires gates,
//! valves, the sorting stage, adapters and the driver.
//!
//! Every check runs before anything is built, so a failed assembly leaves
//! the channels untouched and no gate is ever constructed.

use std::sync::Arc;

use tracing::info;

use crate::channel::InputChannel;
use crate::checkpoint::CheckpointedInputGate;
use crate::config::{InputConfig, InputKind, MergeConfig};
use crate::error_codes;
use crate::event::Payload;
use crate::input::{ChainedSourceInput, NetworkInput, SourceChain, TaskInput};
use crate::metrics::MetricsSink;
use crate::operator::MultiInputOperator;
use crate::processor::{InputSlot, MultiInputProcessor, OutputAdapter};
use crate::selection::{SelectionMode, MAX_INPUTS};
use crate::sort::{FileSpillStorage, KeySelector, MemoryManager, SortingStage, SpillStorage};
use crate::{Error, Result};

/// Everything a task feeds into its logical inputs.
pub struct TaskInputs<T> {
    /// Physical channels, one group per network input gate.
    pub channel_groups: Vec<Vec<Box<dyn InputChannel<T>>>>,
    /// One entry per logical input, in operator slot order.
    pub configs: Vec<InputConfig<T>>,
    /// Outputs of the sources chained into the task.
    pub sources: SourceChain<T>,
}

impl<T> std::fmt::Debug for TaskInputs<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInputs")
            .field(
                "channel_groups",
                &self.channel_groups.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .field("configs", &self.configs)
            .field("sources", &self.sources)
            .finish()
    }
}

/// Builds [`MultiInputProcessor`]s.
pub struct ProcessorFactory {
    config: MergeConfig,
    metrics: Arc<dyn MetricsSink>,
    memory: MemoryManager,
    spill_storage: Option<Box<dyn SpillStorage>>,
}

impl ProcessorFactory {
    /// Creates a factory.
    ///
    /// The sorting stage draws from a [`MemoryManager`] over
    /// [`MergeConfig::managed_memory_bytes`] and spills to
    /// [`MergeConfig::spill_directory`] unless overridden.
    #[must_use]
    pub fn new(config: MergeConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            memory: MemoryManager::new(config.managed_memory_bytes),
            config,
            metrics,
            spill_storage: None,
        }
    }

    /// Uses the task's `memory` manager instead of one sized from the
    /// config.
    #[must_use]
    pub fn with_memory_manager(mut self, memory: MemoryManager) -> Self {
        self.memory = memory;
        self
    }

    /// Uses `storage` for sort spills.
    #[must_use]
    pub fn with_spill_storage(mut self, storage: Box<dyn SpillStorage>) -> Self {
        self.spill_storage = Some(storage);
        self
    }

    /// Validates `inputs` against `operator` and assembles the processor.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigurationMismatch`] if the input count differs from the
    ///   operator's, exceeds [`MAX_INPUTS`], a config value is out of range,
    ///   an input references a missing or already used gate or source, a
    ///   chained source requires sorting, or sorting is combined with an
    ///   operator that selects its own inputs
    /// - [`Error::UnsupportedEventVariant`] if sorting is combined with
    ///   checkpointing, since sorting inputs cannot carry barriers
    pub fn create<T, O>(
        self,
        inputs: TaskInputs<T>,
        operator: O,
    ) -> Result<MultiInputProcessor<T, O>>
    where
        T: Payload,
        O: MultiInputOperator<T>,
    {
        let TaskInputs {
            channel_groups,
            configs,
            mut sources,
        } = inputs;

        let declared = operator.input_count();
        if configs.len() != declared {
            return Err(Error::mismatch(
                error_codes::INPUT_COUNT_MISMATCH,
                format_args!(
                    "{} inputs configured but operator declares {declared}",
                    configs.len()
                ),
            ));
        }
        if configs.is_empty() || configs.len() > MAX_INPUTS {
            return Err(Error::mismatch(
                error_codes::INPUT_COUNT_MISMATCH,
                format_args!("input count must be in 1..={MAX_INPUTS}, got {}", configs.len()),
            ));
        }
        self.config.validate()?;
        resolve_inputs(&configs, &channel_groups, &sources)?;
        let sorting = validate_sorting(&configs, &operator, &self.config)?;

        let mode = if !sorting.is_empty() {
            SelectionMode::Sorted
        } else if operator.is_input_selectable() {
            SelectionMode::OperatorDriven
        } else {
            SelectionMode::AnyAvailable
        };

        let mut groups: Vec<Option<Vec<Box<dyn InputChannel<T>>>>> =
            channel_groups.into_iter().map(Some).collect();
        let mut slots = Vec::with_capacity(configs.len());
        let mut adapters = Vec::with_capacity(configs.len());
        let mut sorted_inputs: Vec<(TaskInput<T>, KeySelector<T>)> = Vec::new();
        let mut network_inputs = 0usize;

        for (index, config) in configs.into_iter().enumerate() {
            let input = match config.kind {
                InputKind::Network { gate_index } => {
                    let channels = groups[gate_index].take().ok_or_else(|| unresolved(index))?;
                    network_inputs += 1;
                    let gate = CheckpointedInputGate::new(channels, self.config.alignment.clone());
                    TaskInput::Network(NetworkInput::new(index, gate))
                }
                InputKind::ChainedSource { source_index } => {
                    let output = sources.take(source_index).ok_or_else(|| unresolved(index))?;
                    TaskInput::ChainedSource(ChainedSourceInput::new(index, output))
                }
            };
            adapters.push(OutputAdapter::new(
                index,
                input.is_network(),
                config.key_selector.clone(),
                self.metrics.as_ref(),
            ));
            match (config.requires_sorting, config.key_selector) {
                (true, Some(selector)) => {
                    sorted_inputs.push((input, selector));
                    slots.push(InputSlot::Sorted);
                }
                _ => slots.push(InputSlot::Direct(input)),
            }
        }

        let stage = if sorted_inputs.is_empty() {
            None
        } else {
            let storage: Box<dyn SpillStorage> = match self.spill_storage {
                Some(storage) => storage,
                None => Box::new(FileSpillStorage::new(self.config.spill_directory())),
            };
            let budget = self.memory.budget(self.config.sort_memory_fraction);
            Some(SortingStage::new(
                sorted_inputs,
                budget,
                storage,
                self.config.max_merge_fan_in,
            ))
        };

        info!(
            inputs = slots.len(),
            network_inputs,
            sorted_inputs = sorting.len(),
            mode = ?mode,
            "assembled multi-input processor"
        );

        Ok(MultiInputProcessor::new(
            slots,
            adapters,
            stage,
            mode,
            self.config.alignment.aligned_checkpoint_timeout,
            operator,
        ))
    }
}

impl std::fmt::Debug for ProcessorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorFactory")
            .field("config", &self.config)
            .field("memory", &self.memory)
            .field("custom_spill_storage", &self.spill_storage.is_some())
            .finish_non_exhaustive()
    }
}

fn unresolved(index: usize) -> Error {
    Error::mismatch(
        error_codes::UNRESOLVED_INPUT,
        format_args!("input {index} cannot be resolved"),
    )
}

/// Every gate and source index must exist, be non-empty and be used once.
fn resolve_inputs<T>(
    configs: &[InputConfig<T>],
    channel_groups: &[Vec<Box<dyn InputChannel<T>>>],
    sources: &SourceChain<T>,
) -> Result<()> {
    let mut gates_used = vec![false; channel_groups.len()];
    let mut sources_used = vec![false; sources.len()];
    for (index, config) in configs.iter().enumerate() {
        let (used, position, what) = match config.kind {
            InputKind::Network { gate_index } => {
                if channel_groups.get(gate_index).is_some_and(Vec::is_empty) {
                    return Err(Error::mismatch(
                        error_codes::UNRESOLVED_INPUT,
                        format_args!("input {index}: channel group {gate_index} is empty"),
                    ));
                }
                (&mut gates_used, gate_index, "channel group")
            }
            InputKind::ChainedSource { source_index } => {
                if source_index < sources.len() && !sources.contains(source_index) {
                    return Err(Error::mismatch(
                        error_codes::UNRESOLVED_INPUT,
                        format_args!("input {index}: source {source_index} was already taken"),
                    ));
                }
                (&mut sources_used, source_index, "source")
            }
        };
        match used.get_mut(position) {
            None => {
                return Err(Error::mismatch(
                    error_codes::UNRESOLVED_INPUT,
                    format_args!("input {index}: {what} {position} does not exist"),
                ))
            }
            Some(true) => {
                return Err(Error::mismatch(
                    error_codes::UNRESOLVED_INPUT,
                    format_args!("input {index}: {what} {position} is used by another input"),
                ))
            }
            Some(slot) => *slot = true,
        }
    }
    Ok(())
}

/// Returns the sorting inputs after checking they can be honored.
fn validate_sorting<T, O>(
    configs: &[InputConfig<T>],
    operator: &O,
    config: &MergeConfig,
) -> Result<Vec<usize>>
where
    O: MultiInputOperator<T>,
{
    let mut sorting = Vec::new();
    for (index, input) in configs.iter().enumerate() {
        if !input.requires_sorting {
            continue;
        }
        if input.key_selector.is_none() {
            return Err(Error::mismatch(
                error_codes::INVALID_MERGE_CONFIG,
                format_args!("input {index} requires sorting but has no key selector"),
            ));
        }
        if !input.is_network() {
            return Err(Error::mismatch(
                error_codes::INVALID_MERGE_CONFIG,
                format_args!("input {index} is a chained source and cannot be sorted"),
            ));
        }
        sorting.push(index);
    }
    if sorting.is_empty() {
        return Ok(sorting);
    }
    if operator.is_input_selectable() {
        return Err(Error::mismatch(
            error_codes::SELECTION_WITH_SORTING,
            "operator-driven input selection cannot be combined with sorted inputs",
        ));
    }
    if config.checkpointing_enabled {
        return Err(Error::UnsupportedEventVariant {
            input: sorting[0],
            variant: "checkpoint-barrier",
        });
    }
    Ok(sorting)
}
