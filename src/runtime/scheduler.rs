//! Thread-per-node scheduler
//!
//! Spawns one thread per node and drives `work()` in a loop until the
//! node signals completion, errors out, or the pipeline is stopped.
//! Threads announce completion over a channel so `wait()` joins them as
//! they finish instead of polling.

use super::node::ProcessNode;
use super::ports::{InputPort, OutputPort};
use super::watchdog::Watchdog;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

pub struct Scheduler {
    threads: Vec<(String, JoinHandle<()>)>,
    stop_signal: Arc<AtomicBool>,
    completion_tx: StdSender<String>,
    completion_rx: Option<StdReceiver<String>>,
    watchdog: Watchdog,
    watchdog_handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = channel();
        let watchdog = Watchdog::new();
        let watchdog_handle = watchdog.start_monitoring_thread();
        Self {
            threads: Vec::new(),
            stop_signal: Arc::new(AtomicBool::new(false)),
            completion_tx,
            completion_rx: Some(completion_rx),
            watchdog,
            watchdog_handle,
        }
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Spawn a node on its own thread with its wired ports.
    pub fn start_process(
        &mut self,
        mut node: Box<dyn ProcessNode>,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
    ) {
        let stop_signal = Arc::clone(&self.stop_signal);
        let completion_tx = self.completion_tx.clone();
        let name = node.name().to_string();
        let thread_name = name.clone();

        debug!("starting process node: {}", name);

        let handle = thread::spawn(move || {
            let mut items_produced = 0usize;

            loop {
                if stop_signal.load(Ordering::Relaxed) || node.should_stop() {
                    break;
                }
                match node.work(&inputs, &outputs) {
                    Ok(n) => items_produced += n,
                    Err(super::errors::WorkError::Shutdown) => {
                        debug!("[{}] upstream finished", thread_name);
                        break;
                    }
                    Err(e) => {
                        error!("[{}] work error: {}", thread_name, e);
                        break;
                    }
                }
            }

            info!("[{}] shutdown, produced {} items", thread_name, items_produced);

            // Dropping the ports closes this node's channels so the rest
            // of the graph drains.
            drop(outputs);
            drop(inputs);
            drop(node);

            let _ = completion_tx.send(thread_name);
        });

        self.threads.push((name, handle));
    }

    /// Ask every node to stop after its current batch.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Block until every node thread has finished, joining each as it
    /// announces completion.
    pub fn wait(mut self) {
        let completion_rx = self
            .completion_rx
            .take()
            .expect("completion_rx already taken");

        // Close the channel once only thread-held senders remain.
        drop(self.completion_tx);

        let total = self.threads.len();
        let mut completed = 0;
        let mut threads_by_name: HashMap<String, JoinHandle<()>> =
            self.threads.into_iter().collect();

        info!("waiting for {} threads", total);
        while completed < total {
            match completion_rx.recv() {
                Ok(thread_name) => {
                    completed += 1;
                    if let Some(handle) = threads_by_name.remove(&thread_name) {
                        match handle.join() {
                            Ok(_) => {
                                debug!("[{}] thread joined ({}/{})", thread_name, completed, total)
                            }
                            Err(e) => error!("[{}] thread panicked: {:?}", thread_name, e),
                        }
                    }
                }
                Err(_) => break,
            }
        }
        info!("all {} threads completed", total);

        self.watchdog.stop();
        let _ = self.watchdog_handle.join();
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::node::{InputPort, OutputPort, WorkError, WorkResult};
    use crate::runtime::ports::{PortDirection, PortSchema};
    use crate::runtime::sender::ChannelMessage;
    use crate::runtime::Sender;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CountSource {
        count: u32,
        max: u32,
    }

    impl ProcessNode for CountSource {
        fn name(&self) -> &str {
            "count_source"
        }
        fn should_stop(&self) -> bool {
            self.count >= self.max
        }
        fn num_inputs(&self) -> usize {
            0
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![]
        }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<u32>("out", 0, PortDirection::Output)]
        }
        fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
            let output = outputs[0]
                .get::<u32>()
                .ok_or_else(|| WorkError::NodeError("missing output channel".to_string()))?;
            if self.count < self.max {
                output.send(self.count)?;
                self.count += 1;
                if self.count == self.max {
                    output.close();
                }
                Ok(1)
            } else {
                Ok(0)
            }
        }
    }

    struct CollectingSink {
        received: Arc<Mutex<Vec<u32>>>,
    }

    impl ProcessNode for CollectingSink {
        fn name(&self) -> &str {
            "collecting_sink"
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            0
        }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<u32>("in", 0, PortDirection::Input)]
        }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![]
        }
        fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            let mut buffer = std::collections::VecDeque::new();
            let mut input = inputs[0]
                .get::<u32>(&mut buffer)
                .ok_or_else(|| WorkError::NodeError("missing input channel".to_string()))?;
            let value = input.recv()?;
            self.received.lock().unwrap().push(value);
            Ok(1)
        }
    }

    #[test]
    fn test_source_to_sink() {
        let mut scheduler = Scheduler::new();
        let (tx, rx) = bounded::<ChannelMessage<u32>>(10);
        let watchdog = scheduler.watchdog().clone();

        let received = Arc::new(Mutex::new(Vec::new()));
        let source = CountSource { count: 0, max: 5 };
        let sink = CollectingSink {
            received: Arc::clone(&received),
        };

        let source_outputs = vec![OutputPort::new_with_watchdog(
            Sender::new(vec![tx]),
            &watchdog,
            "count_source",
            "out",
        )];
        scheduler.start_process(Box::new(source), vec![], source_outputs);

        let sink_inputs = vec![InputPort::new_with_watchdog(
            rx,
            &watchdog,
            "collecting_sink",
            "in",
        )];
        scheduler.start_process(Box::new(sink), sink_inputs, vec![]);

        scheduler.wait();
        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_stop_signal_terminates_idle_source() {
        struct IdleSource;
        impl ProcessNode for IdleSource {
            fn name(&self) -> &str {
                "idle_source"
            }
            fn num_inputs(&self) -> usize {
                0
            }
            fn num_outputs(&self) -> usize {
                0
            }
            fn input_schema(&self) -> Vec<PortSchema> {
                vec![]
            }
            fn output_schema(&self) -> Vec<PortSchema> {
                vec![]
            }
            fn work(&mut self, _: &[InputPort], _: &[OutputPort]) -> WorkResult<usize> {
                thread::sleep(Duration::from_millis(5));
                Ok(0)
            }
        }

        let mut scheduler = Scheduler::new();
        scheduler.start_process(Box::new(IdleSource), vec![], vec![]);
        thread::sleep(Duration::from_millis(20));
        scheduler.stop();

        let start = std::time::Instant::now();
        scheduler.wait();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
