//! [`BridgeContext`] – everything one initialised bridge needs, in one value.
//!
//! Built once from a live [`Connector`] and handed by reference to every
//! operation.  It owns the [`AccessCoordinator`], resolves each configured
//! endpoint at most once (the outcome, including "not found", is cached for
//! the lifetime of the context), and exposes the four bus operations:
//!
//! | Operation | Direction | Result |
//! |---|---|---|
//! | [`read`][BridgeContext::read] | reader | JSON text of the first valid sample |
//! | [`read_fragmented`][BridgeContext::read_fragmented] | reader | reassembled bytes |
//! | [`write`][BridgeContext::write] | writer | canonical byte length written |
//! | [`write_by_rate`][BridgeContext::write_by_rate] | writer | [`WriteReport`] |
//!
//! Every operation, successful or not, goes through the coordinator so that
//! cohort accounting stays exact.  That includes argument checks: lengths,
//! rates and chunk sizes arrive as the script's signed integers and are
//! validated inside the critical section.

use std::sync::{Arc, OnceLock};

use busload_connector::{Connector, InputHandle, OutputHandle};
use busload_types::{BridgeError, DeliveryPolicy, EndpointRef, WritePlan, non_negative};
use tracing::{info, warn};

use crate::coordinator::{AccessCoordinator, CohortSizes};
use crate::rate_writer::{self, Pacer, ThreadPacer, WriteReport};
use crate::reassembler;

/// Byte field fragments travel in when nothing else is configured.
pub const DEFAULT_BYTE_FIELD: &str = "data";

/// Which endpoints the bridge drives and which field carries fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub reader: EndpointRef,
    pub writer: EndpointRef,
    pub byte_field: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            reader: EndpointRef::default_reader(),
            writer: EndpointRef::default_writer(),
            byte_field: DEFAULT_BYTE_FIELD.to_string(),
        }
    }
}

impl BridgeSettings {
    /// Defaults with `BUSLOAD_*` overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    /// Apply `BUSLOAD_*` environment variable overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `BUSLOAD_READER` | `reader` |
    /// | `BUSLOAD_WRITER` | `writer` |
    /// | `BUSLOAD_BYTE_FIELD` | `byte_field` |
    ///
    /// Malformed endpoint names are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BUSLOAD_READER") {
            match EndpointRef::parse(&v) {
                Ok(ep) => self.reader = ep,
                Err(e) => warn!(value = %v, error = %e, "ignoring BUSLOAD_READER"),
            }
        }
        if let Ok(v) = std::env::var("BUSLOAD_WRITER") {
            match EndpointRef::parse(&v) {
                Ok(ep) => self.writer = ep,
                Err(e) => warn!(value = %v, error = %e, "ignoring BUSLOAD_WRITER"),
            }
        }
        if let Ok(v) = std::env::var("BUSLOAD_BYTE_FIELD")
            && !v.is_empty()
        {
            self.byte_field = v;
        }
    }
}

/// Explicit state of one initialised bridge.
pub struct BridgeContext {
    connector: Arc<dyn Connector>,
    settings: BridgeSettings,
    coordinator: AccessCoordinator,
    pacer: Arc<dyn Pacer>,
    input: OnceLock<Option<Arc<dyn InputHandle>>>,
    output: OnceLock<Option<Arc<dyn OutputHandle>>>,
}

impl BridgeContext {
    pub fn new(connector: Arc<dyn Connector>, settings: BridgeSettings, cohorts: CohortSizes) -> Self {
        Self {
            connector,
            settings,
            coordinator: AccessCoordinator::new(cohorts),
            pacer: Arc::new(ThreadPacer),
            input: OnceLock::new(),
            output: OnceLock::new(),
        }
    }

    /// Replace the pacer used by [`write_by_rate`][Self::write_by_rate].
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn coordinator(&self) -> &AccessCoordinator {
        &self.coordinator
    }

    /// Take one batch from the reader and return the JSON text of its first
    /// valid sample.  Does not wait for data.
    pub fn read(&self) -> Result<String, BridgeError> {
        self.coordinator.with_reader_access(|| {
            let input = self.input()?;
            input.take()?;
            let valid = (0..input.sample_count()).find(|&i| input.is_valid(i));
            match valid {
                Some(index) => {
                    let json = input.read_json(index)?;
                    String::from_utf8(json)
                        .map_err(|e| BridgeError::Read(format!("sample is not UTF-8: {e}")))
                }
                None => Err(BridgeError::NoData),
            }
        })
    }

    /// Reassemble a `total_length`-byte fragmented message from the reader.
    /// A negative length fails with [`BridgeError::InvalidArgument`].
    pub fn read_fragmented(
        &self,
        total_length: i64,
        policy: DeliveryPolicy,
    ) -> Result<Vec<u8>, BridgeError> {
        self.coordinator.with_reader_access(|| {
            let total_length: usize = non_negative(total_length, "total length")?;
            let input = self.input()?;
            reassembler::reassemble(input.as_ref(), &self.settings.byte_field, total_length, policy)
        })
    }

    /// Decode `json`, publish its canonical encoding as one sample, and
    /// return the number of bytes written.
    pub fn write(&self, json: &str) -> Result<usize, BridgeError> {
        self.coordinator.with_writer_access(|| {
            let canonical = canonical_json(json)?;
            let output = self.output()?;
            output.set_json(&canonical).map_err(as_write)?;
            output.commit().map_err(as_write)?;
            Ok(canonical.len())
        })
    }

    /// Decode `json` and trickle its canonical encoding onto the writer one
    /// byte per sample.
    pub fn write_by_rate(
        &self,
        json: &str,
        rate: i64,
        chunk_size: i64,
    ) -> Result<WriteReport, BridgeError> {
        self.coordinator.with_writer_access(|| {
            let rate: u64 = non_negative(rate, "rate")?;
            let chunk_size: usize = non_negative(chunk_size, "chunk size")?;
            let canonical = canonical_json(json)?;
            let plan = WritePlan::new(canonical, chunk_size, rate)?;
            let output = self.output()?;
            rate_writer::write_by_rate(
                output.as_ref(),
                &self.settings.byte_field,
                &plan,
                self.pacer.as_ref(),
            )
        })
    }

    fn input(&self) -> Result<Arc<dyn InputHandle>, BridgeError> {
        let reader = &self.settings.reader;
        self.input
            .get_or_init(|| {
                let resolved = self.connector.input(reader);
                match &resolved {
                    Some(_) => info!(input = %reader, "input resolved"),
                    None => warn!(input = %reader, "input not found in connector profile"),
                }
                resolved
            })
            .clone()
            .ok_or_else(|| BridgeError::InputNotFound(reader.clone()))
    }

    fn output(&self) -> Result<Arc<dyn OutputHandle>, BridgeError> {
        let writer = &self.settings.writer;
        self.output
            .get_or_init(|| {
                let resolved = self.connector.output(writer);
                match &resolved {
                    Some(_) => info!(output = %writer, "output resolved"),
                    None => warn!(output = %writer, "output not found in connector profile"),
                }
                resolved
            })
            .clone()
            .ok_or_else(|| BridgeError::OutputNotFound(writer.clone()))
    }
}

/// Parse `json` and re-encode it canonically (compact, keys sorted).
pub fn canonical_json(json: &str) -> Result<Vec<u8>, BridgeError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| BridgeError::Decode(e.to_string()))?;
    serde_json::to_vec(&value).map_err(|e| BridgeError::Decode(e.to_string()))
}

fn as_write(err: BridgeError) -> BridgeError {
    match err {
        BridgeError::Write(_) => err,
        other => BridgeError::Write(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busload_connector::{SimBus, SimSample};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts lookups so tests can prove resolution happens once.
    struct CountingConnector {
        bus: SimBus,
        input_lookups: AtomicUsize,
        output_lookups: AtomicUsize,
    }

    impl Connector for CountingConnector {
        fn input(&self, name: &EndpointRef) -> Option<Arc<dyn InputHandle>> {
            self.input_lookups.fetch_add(1, Ordering::SeqCst);
            self.bus.input(name)
        }

        fn output(&self, name: &EndpointRef) -> Option<Arc<dyn OutputHandle>> {
            self.output_lookups.fetch_add(1, Ordering::SeqCst);
            self.bus.output(name)
        }
    }

    struct NoPause;

    impl Pacer for NoPause {
        fn pause(&self, _duration: Duration) {}
    }

    fn loopback() -> SimBus {
        SimBus::builder()
            .recording()
            .with_input("MySubscriber::MyReader", "Square")
            .with_output("MyPublisher::MyWriter", "Square")
            .build()
            .unwrap()
    }

    fn context(bus: SimBus) -> (Arc<CountingConnector>, BridgeContext) {
        let conn = Arc::new(CountingConnector {
            bus,
            input_lookups: AtomicUsize::new(0),
            output_lookups: AtomicUsize::new(0),
        });
        let ctx = BridgeContext::new(
            Arc::clone(&conn) as Arc<dyn Connector>,
            BridgeSettings::default(),
            CohortSizes::disabled(),
        )
        .with_pacer(Arc::new(NoPause));
        (conn, ctx)
    }

    #[test]
    fn canonical_json_sorts_and_compacts() {
        let bytes = canonical_json(r#"{ "b": 2,  "a": [1, 2] }"#).unwrap();
        assert_eq!(bytes, br#"{"a":[1,2],"b":2}"#.to_vec());
        assert!(matches!(canonical_json("{nope"), Err(BridgeError::Decode(_))));
    }

    #[test]
    fn write_returns_canonical_length() {
        let (_, ctx) = context(loopback());
        assert_eq!(ctx.write(r#"{"x":1}"#).unwrap(), br#"{"x":1}"#.len());
        assert_eq!(ctx.write(r#"{ "x" : 1 }"#).unwrap(), 7);
    }

    #[test]
    fn write_then_read_loops_back() {
        let (_, ctx) = context(loopback());
        ctx.write(r#"{"color":"BLUE","x":3}"#).unwrap();
        assert_eq!(ctx.read().unwrap(), r#"{"color":"BLUE","x":3}"#);
    }

    #[test]
    fn decode_failure_writes_nothing() {
        let bus = loopback();
        let out = bus.sim_output("MyPublisher::MyWriter").unwrap();
        let (_, ctx) = context(bus);
        assert!(matches!(ctx.write("not json"), Err(BridgeError::Decode(_))));
        assert!(matches!(
            ctx.write_by_rate("not json", 10, 2),
            Err(BridgeError::Decode(_))
        ));
        assert!(out.committed().is_empty());
    }

    #[test]
    fn read_skips_invalid_and_reports_empty() {
        let bus = loopback();
        let input = bus.sim_input("MySubscriber::MyReader").unwrap();
        let (_, ctx) = context(bus);

        assert_eq!(ctx.read().unwrap_err(), BridgeError::NoData);

        input.push_batch(vec![SimSample::invalid(), SimSample::json(r#"{"v":2}"#)]);
        assert_eq!(ctx.read().unwrap(), r#"{"v":2}"#);

        input.push(SimSample::invalid());
        assert_eq!(ctx.read().unwrap_err(), BridgeError::NoData);
    }

    #[test]
    fn endpoints_resolve_once_even_when_missing() {
        let bus = SimBus::builder()
            .with_output("MyPublisher::MyWriter", "Square")
            .build()
            .unwrap();
        let (conn, ctx) = context(bus);

        for _ in 0..3 {
            assert!(matches!(ctx.read(), Err(BridgeError::InputNotFound(_))));
            ctx.write(r#"{"n":0}"#).unwrap();
        }
        assert_eq!(conn.input_lookups.load(Ordering::SeqCst), 1);
        assert_eq!(conn.output_lookups.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.read().unwrap_err().to_string(), "Failed to get input");
    }

    #[test]
    fn missing_output_is_reported() {
        let bus = SimBus::builder()
            .with_input("MySubscriber::MyReader", "Square")
            .build()
            .unwrap();
        let (_, ctx) = context(bus);
        assert!(matches!(ctx.write("{}"), Err(BridgeError::OutputNotFound(_))));
    }

    #[test]
    fn write_by_rate_feeds_read_fragmented() {
        let (_, ctx) = context(loopback());
        let payload = r#"{"msg":"fragmented hello"}"#;
        let expected = canonical_json(payload).unwrap();

        let report = ctx.write_by_rate(payload, 8, 4).unwrap();
        assert_eq!(report.bytes_written, expected.len());
        assert_eq!(report.strides, expected.len().div_ceil(4));
        assert_eq!(report.byte_pause, Duration::from_millis(2));

        let got = ctx
            .read_fragmented(expected.len() as i64, DeliveryPolicy::Sequenced)
            .unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn write_by_rate_rejects_zero_chunk() {
        let (_, ctx) = context(loopback());
        assert!(matches!(
            ctx.write_by_rate("{}", 10, 0),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn negative_arguments_fail_inside_the_cohort() {
        let conn = Arc::new(loopback());
        let out = conn.sim_output("MyPublisher::MyWriter").unwrap();
        let ctx = Arc::new(
            BridgeContext::new(
                Arc::clone(&conn) as Arc<dyn Connector>,
                BridgeSettings::default(),
                CohortSizes::new(2, 2),
            )
            .with_pacer(Arc::new(NoPause)),
        );

        let (tx, rx) = std::sync::mpsc::channel();
        let spawn_call = |call: fn(&BridgeContext) -> bool| {
            let ctx = Arc::clone(&ctx);
            let tx = tx.clone();
            std::thread::spawn(move || {
                let _ = tx.send(call(&ctx));
            });
        };
        spawn_call(|c| {
            matches!(c.write_by_rate(r#"{"x":1}"#, -1, 1), Err(BridgeError::InvalidArgument(_)))
        });
        spawn_call(|c| {
            matches!(c.write_by_rate(r#"{"x":1}"#, 0, -1), Err(BridgeError::InvalidArgument(_)))
        });
        spawn_call(|c| {
            matches!(
                c.read_fragmented(-1, DeliveryPolicy::Sequenced),
                Err(BridgeError::InvalidArgument(_))
            )
        });
        spawn_call(|c| c.read_fragmented(0, DeliveryPolicy::LatestOnly).is_ok());

        // Each pair completes its cohort, so every call returns.
        for _ in 0..4 {
            assert!(rx.recv_timeout(Duration::from_secs(5)).expect("cohort released"));
        }
        assert!(out.committed().is_empty());
    }

    #[test]
    fn set_json_rejection_is_a_write_error() {
        let (_, ctx) = context(loopback());
        // Valid JSON, but not an object the sample type can hold.
        let err = ctx.write("[1,2,3]").unwrap_err();
        assert!(matches!(err, BridgeError::Write(_)));
        assert!(err.to_string().starts_with("Failed to write data: "));
    }

    #[test]
    fn settings_default_to_conventional_names() {
        let s = BridgeSettings::default();
        assert_eq!(s.reader.to_string(), "MySubscriber::MyReader");
        assert_eq!(s.writer.to_string(), "MyPublisher::MyWriter");
        assert_eq!(s.byte_field, "data");
    }

    #[test]
    fn settings_env_overrides() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("BUSLOAD_READER", "LoadSub::FastReader");
            std::env::set_var("BUSLOAD_WRITER", "not-a-name");
            std::env::set_var("BUSLOAD_BYTE_FIELD", "octet");
        }
        let s = BridgeSettings::from_env();
        unsafe {
            std::env::remove_var("BUSLOAD_READER");
            std::env::remove_var("BUSLOAD_WRITER");
            std::env::remove_var("BUSLOAD_BYTE_FIELD");
        }
        assert_eq!(s.reader.to_string(), "LoadSub::FastReader");
        assert_eq!(s.writer, EndpointRef::default_writer());
        assert_eq!(s.byte_field, "octet");
    }
}
