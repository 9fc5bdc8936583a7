//! [`SimBus`] – in-process loopback bus.
//!
//! Implements the [`Connector`] seam without any middleware so the whole
//! bridge can run in unit tests, CI and the CLI's load runs.  Every
//! [`SimOutput`] is bound to a topic; committing a sample delivers a copy to
//! each [`SimInput`] bound to the same topic.
//!
//! # Stub behaviour
//!
//! | Operation | Behaviour |
//! |---|---|
//! | `wait_for_data` | Blocks on a condition variable until the pending queue is non-empty. |
//! | `take` | Moves the whole pending queue into the current batch. |
//! | `commit` | Delivers the staged sample to every input on the topic, then clears it. |
//! | Volatile input | Keeps only the newest pending sample. |
//!
//! Tests can push hand-built samples (including invalid slots) straight into
//! an input with [`SimInput::push`] / [`SimInput::push_batch`], and arm
//! one-shot failures with [`SimInput::fail_next_read`] and
//! [`SimOutput::fail_next_write`].  A bus built with
//! [`SimBusBuilder::recording`] also keeps every committed sample for
//! [`SimOutput::committed`]; otherwise outputs only count their commits, so
//! long load runs do not grow without bound.
//!
//! # Example
//!
//! ```rust
//! use busload_connector::{Connector, InputHandle, OutputHandle, SimBus, WaitTimeout};
//! use busload_types::EndpointRef;
//!
//! let bus = SimBus::builder()
//!     .with_input("MySubscriber::MyReader", "Square")
//!     .with_output("MyPublisher::MyWriter", "Square")
//!     .build()
//!     .unwrap();
//!
//! let writer = bus.output(&EndpointRef::parse("MyPublisher::MyWriter").unwrap()).unwrap();
//! writer.set_json(br#"{"x":1}"#).unwrap();
//! writer.commit().unwrap();
//!
//! let reader = bus.input(&EndpointRef::parse("MySubscriber::MyReader").unwrap()).unwrap();
//! reader.wait_for_data(WaitTimeout::Infinite).unwrap();
//! reader.take().unwrap();
//! assert_eq!(reader.sample_count(), 1);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use busload_types::{BridgeError, EndpointRef};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::connector::{Connector, ConnectorFactory};
use crate::endpoint::{InputHandle, OutputHandle, WaitTimeout};
use crate::profile::{self, Durability, Profile};

// ────────────────────────────────────────────────────────────────────────────
// Samples
// ────────────────────────────────────────────────────────────────────────────

/// One sample travelling through the simulated bus.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimSample {
    valid: bool,
    json: Option<Vec<u8>>,
    bytes: BTreeMap<String, u8>,
}

impl SimSample {
    /// A valid sample carrying a whole JSON body.
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self {
            valid: true,
            json: Some(body.into()),
            bytes: BTreeMap::new(),
        }
    }

    /// A valid sample carrying a single byte field.
    pub fn byte(field: &str, value: u8) -> Self {
        let mut bytes = BTreeMap::new();
        bytes.insert(field.to_string(), value);
        Self {
            valid: true,
            json: None,
            bytes,
        }
    }

    /// A stale slot: present in the batch but without live data.
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn byte_field(&self, field: &str) -> Option<u8> {
        self.bytes.get(field).copied()
    }

    /// The JSON body, or the byte fields rendered as a JSON object when the
    /// sample was built field by field.
    pub fn to_json(&self) -> Result<Vec<u8>, BridgeError> {
        match &self.json {
            Some(body) => Ok(body.clone()),
            None => serde_json::to_vec(&self.bytes)
                .map_err(|e| BridgeError::Read(format!("cannot encode sample: {e}"))),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Input
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct InputState {
    pending: VecDeque<SimSample>,
    batch: Vec<SimSample>,
    read_fault: Option<String>,
}

/// Simulated reader.
pub struct SimInput {
    name: EndpointRef,
    topic: String,
    durability: Durability,
    state: Mutex<InputState>,
    arrived: Condvar,
}

impl SimInput {
    fn new(name: EndpointRef, topic: String, durability: Durability) -> Self {
        Self {
            name,
            topic,
            durability,
            state: Mutex::new(InputState::default()),
            arrived: Condvar::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Deliver one sample as if it had arrived from the bus.
    pub fn push(&self, sample: SimSample) {
        self.push_batch(vec![sample]);
    }

    /// Deliver several samples at once; a single `take` will see them all
    /// (or only the last one on a volatile input).
    pub fn push_batch(&self, samples: Vec<SimSample>) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for sample in samples {
            if self.durability == Durability::Volatile {
                state.pending.clear();
            }
            state.pending.push_back(sample);
        }
        self.arrived.notify_all();
    }

    /// Number of samples delivered but not yet taken.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Make the next field or JSON read fail with `message`.
    pub fn fail_next_read(&self, message: impl Into<String>) {
        self.state.lock().read_fault = Some(message.into());
    }

    fn with_slot<T>(
        &self,
        index: usize,
        f: impl FnOnce(&SimSample) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let mut state = self.state.lock();
        if let Some(message) = state.read_fault.take() {
            return Err(BridgeError::Read(message));
        }
        let sample = state.batch.get(index).ok_or_else(|| {
            BridgeError::Read(format!(
                "index {index} out of range for batch of {} on {}",
                state.batch.len(),
                self.name
            ))
        })?;
        f(sample)
    }
}

impl InputHandle for SimInput {
    fn name(&self) -> &EndpointRef {
        &self.name
    }

    fn wait_for_data(&self, timeout: WaitTimeout) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        match timeout {
            WaitTimeout::Infinite => {
                while state.pending.is_empty() {
                    self.arrived.wait(&mut state);
                }
            }
            WaitTimeout::After(limit) => {
                while state.pending.is_empty() {
                    if self.arrived.wait_for(&mut state, limit).timed_out() {
                        if state.pending.is_empty() {
                            return Err(BridgeError::Read(format!(
                                "timed out after {limit:?} waiting for data on {}",
                                self.name
                            )));
                        }
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn take(&self) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        let taken: Vec<SimSample> = state.pending.drain(..).collect();
        debug!(input = %self.name, samples = taken.len(), "sim take");
        state.batch = taken;
        Ok(())
    }

    fn sample_count(&self) -> usize {
        self.state.lock().batch.len()
    }

    fn is_valid(&self, index: usize) -> bool {
        self.state
            .lock()
            .batch
            .get(index)
            .is_some_and(SimSample::is_valid)
    }

    fn read_byte_field(&self, index: usize, field: &str) -> Result<u8, BridgeError> {
        self.with_slot(index, |sample| {
            sample.byte_field(field).ok_or_else(|| {
                BridgeError::Read(format!("sample {index} has no byte field '{field}'"))
            })
        })
    }

    fn read_json(&self, index: usize) -> Result<Vec<u8>, BridgeError> {
        self.with_slot(index, SimSample::to_json)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct OutputState {
    staged: SimSample,
    committed: Vec<SimSample>,
    commits: u64,
    write_fault: Option<String>,
}

/// Simulated writer.
pub struct SimOutput {
    name: EndpointRef,
    topic: String,
    subscribers: Vec<Arc<SimInput>>,
    recording: bool,
    state: Mutex<OutputState>,
}

impl SimOutput {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Every sample committed so far, in commit order.  Always empty unless
    /// the bus was built with [`SimBusBuilder::recording`].
    pub fn committed(&self) -> Vec<SimSample> {
        self.state.lock().committed.clone()
    }

    /// The byte field of every committed sample that carries it, in order.
    pub fn committed_bytes(&self, field: &str) -> Vec<u8> {
        self.state
            .lock()
            .committed
            .iter()
            .filter_map(|s| s.byte_field(field))
            .collect()
    }

    /// Number of successful commits, recorded or not.
    pub fn commit_count(&self) -> u64 {
        self.state.lock().commits
    }

    /// Make the next setter or commit fail with `message`.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.state.lock().write_fault = Some(message.into());
    }

    fn check_fault(state: &mut OutputState) -> Result<(), BridgeError> {
        match state.write_fault.take() {
            Some(message) => Err(BridgeError::Write(message)),
            None => Ok(()),
        }
    }
}

impl OutputHandle for SimOutput {
    fn name(&self) -> &EndpointRef {
        &self.name
    }

    fn set_json(&self, json: &[u8]) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        Self::check_fault(&mut state)?;
        match serde_json::from_slice::<serde_json::Value>(json) {
            Ok(serde_json::Value::Object(_)) => {
                state.staged.json = Some(json.to_vec());
                Ok(())
            }
            Ok(other) => Err(BridgeError::Write(format!(
                "sample must be a JSON object, got {other}"
            ))),
            Err(e) => Err(BridgeError::Write(e.to_string())),
        }
    }

    fn set_byte_field(&self, field: &str, value: u8) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        Self::check_fault(&mut state)?;
        state.staged.bytes.insert(field.to_string(), value);
        Ok(())
    }

    fn commit(&self) -> Result<(), BridgeError> {
        let mut sample = {
            let mut state = self.state.lock();
            Self::check_fault(&mut state)?;
            let mut sample = std::mem::take(&mut state.staged);
            sample.valid = true;
            state.commits += 1;
            if self.recording {
                state.committed.push(sample.clone());
            }
            sample
        };
        // Deliver outside the output lock so a slow reader never stalls setters.
        if let Some((last, rest)) = self.subscribers.split_last() {
            for input in rest {
                input.push(sample.clone());
            }
            last.push(std::mem::take(&mut sample));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus
// ────────────────────────────────────────────────────────────────────────────

/// An in-process bus made of named inputs and outputs wired by topic.
pub struct SimBus {
    inputs: HashMap<EndpointRef, Arc<SimInput>>,
    outputs: HashMap<EndpointRef, Arc<SimOutput>>,
}

impl SimBus {
    pub fn builder() -> SimBusBuilder {
        SimBusBuilder::default()
    }

    /// Build a bus with exactly the endpoints a profile declares.
    pub fn from_profile(profile: &Profile) -> Result<Self, BridgeError> {
        let mut builder = SimBusBuilder::default();
        for input in &profile.inputs {
            builder.inputs.push((
                input.name.clone(),
                input.topic.clone(),
                input.durability,
            ));
        }
        for output in &profile.outputs {
            builder.outputs.push((output.name.clone(), output.topic.clone()));
        }
        builder.build_refs()
    }

    /// Concrete handle to an input, for tests that inject samples.
    pub fn sim_input(&self, name: &str) -> Option<Arc<SimInput>> {
        let name = EndpointRef::parse(name).ok()?;
        self.inputs.get(&name).cloned()
    }

    /// Concrete handle to an output, for tests that inspect commits.
    pub fn sim_output(&self, name: &str) -> Option<Arc<SimOutput>> {
        let name = EndpointRef::parse(name).ok()?;
        self.outputs.get(&name).cloned()
    }
}

impl Connector for SimBus {
    fn input(&self, name: &EndpointRef) -> Option<Arc<dyn InputHandle>> {
        self.inputs
            .get(name)
            .map(|i| Arc::clone(i) as Arc<dyn InputHandle>)
    }

    fn output(&self, name: &EndpointRef) -> Option<Arc<dyn OutputHandle>> {
        self.outputs
            .get(name)
            .map(|o| Arc::clone(o) as Arc<dyn OutputHandle>)
    }
}

/// Fluent builder for [`SimBus`].
///
/// Endpoint names are parsed in [`build`][SimBusBuilder::build], so a typo
/// surfaces as a [`BridgeError::InvalidArgument`] there.
#[derive(Default)]
pub struct SimBusBuilder {
    raw_inputs: Vec<(String, String, Durability)>,
    raw_outputs: Vec<(String, String)>,
    inputs: Vec<(EndpointRef, String, Durability)>,
    outputs: Vec<(EndpointRef, String)>,
    recording: bool,
}

impl SimBusBuilder {
    /// Keep a log of every committed sample on each output.
    pub fn recording(mut self) -> Self {
        self.recording = true;
        self
    }

    /// Add a transient input bound to `topic`.
    pub fn with_input(self, name: &str, topic: &str) -> Self {
        self.with_input_durability(name, topic, Durability::Transient)
    }

    pub fn with_input_durability(mut self, name: &str, topic: &str, durability: Durability) -> Self {
        self.raw_inputs
            .push((name.to_string(), topic.to_string(), durability));
        self
    }

    pub fn with_output(mut self, name: &str, topic: &str) -> Self {
        self.raw_outputs.push((name.to_string(), topic.to_string()));
        self
    }

    pub fn build(mut self) -> Result<SimBus, BridgeError> {
        for (name, topic, durability) in std::mem::take(&mut self.raw_inputs) {
            self.inputs.push((EndpointRef::parse(&name)?, topic, durability));
        }
        for (name, topic) in std::mem::take(&mut self.raw_outputs) {
            self.outputs.push((EndpointRef::parse(&name)?, topic));
        }
        self.build_refs()
    }

    fn build_refs(self) -> Result<SimBus, BridgeError> {
        let mut inputs = HashMap::new();
        for (name, topic, durability) in self.inputs {
            let input = Arc::new(SimInput::new(name.clone(), topic, durability));
            if inputs.insert(name.clone(), input).is_some() {
                return Err(BridgeError::Config(format!("duplicate input '{name}'")));
            }
        }

        let mut outputs = HashMap::new();
        for (name, topic) in self.outputs {
            let subscribers: Vec<Arc<SimInput>> = inputs
                .values()
                .filter(|i: &&Arc<SimInput>| i.topic == topic)
                .cloned()
                .collect();
            let output = Arc::new(SimOutput {
                name: name.clone(),
                topic,
                subscribers,
                recording: self.recording,
                state: Mutex::new(OutputState::default()),
            });
            if outputs.insert(name.clone(), output).is_some() {
                return Err(BridgeError::Config(format!("duplicate output '{name}'")));
            }
        }

        Ok(SimBus { inputs, outputs })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Factory
// ────────────────────────────────────────────────────────────────────────────

/// Creates a [`SimBus`] from a profile file on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimConnectorFactory;

impl ConnectorFactory for SimConnectorFactory {
    fn create(
        &self,
        config_path: &Path,
        config_name: &str,
    ) -> Result<Arc<dyn Connector>, BridgeError> {
        let profile = profile::load_profile(config_path, config_name)?;
        let bus = SimBus::from_profile(&profile)?;
        info!(
            profile = config_name,
            inputs = bus.inputs.len(),
            outputs = bus.outputs.len(),
            "sim bus created"
        );
        Ok(Arc::new(bus))
    }
}
