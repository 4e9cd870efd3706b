//! Node trait for streaming processing

pub use super::errors::{WorkError, WorkResult};
pub use super::ports::{InputPort, OutputPort};
pub use super::receiver::Receiver;
pub use super::sender::Sender;

/// A processing node in a streaming graph.
///
/// Sources have 0 inputs and N outputs, sinks N inputs and 0 outputs,
/// transformers N inputs and M outputs. The scheduler spawns one thread
/// per node and calls `work()` in a loop until it errors, `should_stop()`
/// returns true, or the pipeline is stopped.
pub trait ProcessNode: Send {
    /// Debug name, also used as the scheduler thread name.
    fn name(&self) -> &str;

    /// Signals the scheduler that this node is done producing.
    fn should_stop(&self) -> bool {
        false
    }

    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;

    /// Name, type and index of each input port, in port order.
    fn input_schema(&self) -> Vec<super::ports::PortSchema>;

    /// Name, type and index of each output port, in port order.
    fn output_schema(&self) -> Vec<super::ports::PortSchema>;

    /// Process one batch: read from inputs, decode/transform, write to
    /// outputs. Returns the number of items produced. `WorkError::Shutdown`
    /// is the clean way to end when an upstream closes.
    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize>;
}
