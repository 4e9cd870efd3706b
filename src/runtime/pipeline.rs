//! Pipeline builder for constructing node graphs
//!
//! Collects nodes and named connections, type-checks every edge against
//! the port schemas, then materializes bounded channels through the type
//! registry and hands each node to the scheduler.

use super::errors::ConnectionError;
use super::node::{InputPort, OutputPort, ProcessNode};
use super::ports::PortSchema;
use super::scheduler::Scheduler;
use super::type_registry::TYPE_REGISTRY;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use tracing::{debug, info};

pub struct Pipeline {
    nodes: Vec<(usize, Box<dyn ProcessNode>)>,
    node_names: HashMap<String, usize>,
    node_schemas: HashMap<usize, (Vec<PortSchema>, Vec<PortSchema>)>,
    connections: Vec<PendingConnection>,
    next_id: usize,
    default_buffer_size: usize,
}

struct PendingConnection {
    from_node: usize,
    from_port: usize,
    to_node: usize,
    to_port: usize,
    type_id: TypeId,
    buffer_size: usize,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_names: HashMap::new(),
            node_schemas: HashMap::new(),
            connections: Vec::new(),
            next_id: 0,
            default_buffer_size: 1000,
        }
    }

    pub fn with_default_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size;
        self
    }

    /// Add a node under a unique name. Ports are taken from the node's
    /// schemas.
    pub fn add_process<N: ProcessNode + 'static>(
        &mut self,
        name: impl Into<String>,
        node: N,
    ) -> Result<(), Box<ConnectionError>> {
        let name = name.into();
        if self.node_names.contains_key(&name) {
            return Err(Box::new(ConnectionError::DuplicateNode(name)));
        }

        let schemas = (node.input_schema(), node.output_schema());
        let id = self.next_id;
        self.next_id += 1;

        self.node_schemas.insert(id, schemas);
        self.node_names.insert(name, id);
        self.nodes.push((id, Box::new(node)));
        Ok(())
    }

    /// Connect an output port to an input port by node and port name.
    pub fn connect(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<(), Box<ConnectionError>> {
        self.connect_with_buffer(from_node, from_port, to_node, to_port, self.default_buffer_size)
    }

    /// Connect with an explicit channel capacity.
    pub fn connect_with_buffer(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
        buffer_size: usize,
    ) -> Result<(), Box<ConnectionError>> {
        let from_id = *self
            .node_names
            .get(from_node)
            .ok_or_else(|| Box::new(ConnectionError::NodeNotFound(from_node.to_string())))?;
        let to_id = *self
            .node_names
            .get(to_node)
            .ok_or_else(|| Box::new(ConnectionError::NodeNotFound(to_node.to_string())))?;

        let (_, from_outputs) = &self.node_schemas[&from_id];
        let (to_inputs, _) = &self.node_schemas[&to_id];

        let from_schema = from_outputs
            .iter()
            .find(|s| s.name == from_port)
            .ok_or_else(|| {
                Box::new(ConnectionError::PortNotFound {
                    node: from_node.to_string(),
                    port: from_port.to_string(),
                })
            })?;
        let to_schema = to_inputs.iter().find(|s| s.name == to_port).ok_or_else(|| {
            Box::new(ConnectionError::PortNotFound {
                node: to_node.to_string(),
                port: to_port.to_string(),
            })
        })?;

        if from_schema.type_id != to_schema.type_id {
            return Err(Box::new(ConnectionError::TypeMismatch {
                from_node: from_node.to_string(),
                from_port: from_port.to_string(),
                from_type: from_schema.type_id,
                to_node: to_node.to_string(),
                to_port: to_port.to_string(),
                to_type: to_schema.type_id,
            }));
        }

        // An input port accepts exactly one producer; outputs broadcast.
        if self
            .connections
            .iter()
            .any(|c| c.to_node == to_id && c.to_port == to_schema.index)
        {
            return Err(Box::new(ConnectionError::DuplicateConnection {
                node: to_node.to_string(),
                port: to_port.to_string(),
            }));
        }

        self.connections.push(PendingConnection {
            from_node: from_id,
            from_port: from_schema.index,
            to_node: to_id,
            to_port: to_schema.index,
            type_id: from_schema.type_id,
            buffer_size,
        });
        Ok(())
    }

    pub fn list_nodes(&self) -> Vec<&str> {
        self.node_names.keys().map(|s| s.as_str()).collect()
    }

    /// Materialize channels and spawn every node, returning the running
    /// scheduler.
    pub fn build(mut self) -> Result<Scheduler, Box<ConnectionError>> {
        info!(
            "building pipeline: {} nodes, {} connections",
            self.nodes.len(),
            self.connections.len()
        );

        let mut scheduler = Scheduler::new();
        let registry = TYPE_REGISTRY.lock().unwrap();

        // Create every channel up front; an output port feeding several
        // inputs accumulates one sender per destination.
        type PortKey = (usize, usize);
        let mut receivers: HashMap<PortKey, Box<dyn Any + Send>> = HashMap::new();
        let mut senders: HashMap<PortKey, (TypeId, Vec<Box<dyn Any + Send>>)> = HashMap::new();

        for conn in &self.connections {
            let (tx, rx) = registry
                .create_channel(conn.type_id, conn.buffer_size)
                .ok_or_else(|| Box::new(ConnectionError::TypeNotRegistered(conn.type_id)))?;
            receivers.insert((conn.to_node, conn.to_port), rx);
            senders
                .entry((conn.from_node, conn.from_port))
                .or_insert_with(|| (conn.type_id, Vec::new()))
                .1
                .push(tx);
        }

        let watchdog = scheduler.watchdog().clone();

        for (node_id, node) in self.nodes.drain(..) {
            let node_name = node.name().to_string();
            let input_schemas = node.input_schema();
            let output_schemas = node.output_schema();

            debug!("starting node {}: {}", node_id, node_name);

            // Unconnected ports get dummy endpoints; get::<T>() on them
            // returns None and nodes treat them as not wired.
            let input_ports: Vec<_> = (0..node.num_inputs())
                .map(|i| {
                    let port = receivers
                        .remove(&(node_id, i))
                        .map(InputPort::from_type_erased)
                        .unwrap_or_else(|| {
                            InputPort::from_type_erased(Box::new(()) as Box<dyn Any + Send>)
                        });
                    let port_name = input_schemas
                        .get(i)
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| format!("in{}", i));
                    port.with_watchdog(watchdog.clone(), node_name.clone(), port_name)
                })
                .collect();

            let output_ports: Result<Vec<_>, Box<ConnectionError>> = (0..node.num_outputs())
                .map(|i| {
                    let port = if let Some((type_id, sender_list)) = senders.remove(&(node_id, i)) {
                        let wrapped = registry
                            .wrap_output(type_id, sender_list)
                            .map_err(|_| Box::new(ConnectionError::TypeNotRegistered(type_id)))?;
                        OutputPort::from_type_erased(wrapped)
                    } else {
                        OutputPort::from_type_erased(Box::new(()) as Box<dyn Any + Send>)
                    };
                    let port_name = output_schemas
                        .get(i)
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| format!("out{}", i));
                    Ok(port.with_watchdog(watchdog.clone(), node_name.clone(), port_name))
                })
                .collect();

            scheduler.start_process(node, input_ports, output_ports?);
        }

        drop(registry);
        info!("pipeline running with {} threads", scheduler.num_threads());
        Ok(scheduler)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Sample;
    use crate::runtime::ports::PortDirection;

    struct StubSource;
    impl ProcessNode for StubSource {
        fn name(&self) -> &str {
            "stub_source"
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
            vec![PortSchema::new::<Sample>("out", 0, PortDirection::Output)]
        }
        fn work(&mut self, _: &[InputPort], _: &[OutputPort]) -> crate::runtime::WorkResult<usize> {
            Ok(0)
        }
    }

    struct StubSink;
    impl ProcessNode for StubSink {
        fn name(&self) -> &str {
            "stub_sink"
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            0
        }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<Sample>("in", 0, PortDirection::Input)]
        }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![]
        }
        fn work(&mut self, _: &[InputPort], _: &[OutputPort]) -> crate::runtime::WorkResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_connect_by_name() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", StubSource).unwrap();
        pipeline.add_process("sink", StubSink).unwrap();
        assert!(pipeline.connect("source", "out", "sink", "in").is_ok());
    }

    #[test]
    fn test_duplicate_input_connection_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source1", StubSource).unwrap();
        pipeline.add_process("source2", StubSource).unwrap();
        pipeline.add_process("sink", StubSink).unwrap();

        pipeline.connect("source1", "out", "sink", "in").unwrap();
        let err = pipeline
            .connect("source2", "out", "sink", "in")
            .unwrap_err();
        assert!(matches!(
            *err,
            ConnectionError::DuplicateConnection { .. }
        ));
    }

    #[test]
    fn test_broadcast_from_one_output() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", StubSource).unwrap();
        pipeline.add_process("sink1", StubSink).unwrap();
        pipeline.add_process("sink2", StubSink).unwrap();

        assert!(pipeline.connect("source", "out", "sink1", "in").is_ok());
        assert!(pipeline.connect("source", "out", "sink2", "in").is_ok());
    }

    #[test]
    fn test_unknown_node_and_port() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", StubSource).unwrap();
        pipeline.add_process("sink", StubSink).unwrap();

        let err = pipeline
            .connect("source", "out", "missing", "in")
            .unwrap_err();
        assert!(matches!(*err, ConnectionError::NodeNotFound(_)));
        let err = pipeline
            .connect("source", "bogus", "sink", "in")
            .unwrap_err();
        assert!(matches!(*err, ConnectionError::PortNotFound { .. }));
    }

    #[test]
    fn test_duplicate_node_name_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("node", StubSource).unwrap();
        let err = pipeline.add_process("node", StubSource).unwrap_err();
        assert!(matches!(*err, ConnectionError::DuplicateNode(_)));
    }

    #[test]
    fn test_list_nodes() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", StubSource).unwrap();
        pipeline.add_process("sink", StubSink).unwrap();
        let nodes = pipeline.list_nodes();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains(&"source"));
        assert!(nodes.contains(&"sink"));
    }
}
