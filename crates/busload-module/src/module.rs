//! [`ScriptModule`] – the surface load scripts call.
//!
//! Every script-facing method returns exactly one string, success or
//! failure, and never panics into the scripting runtime.  Failures are the
//! `Display` text of [`BridgeError`], so scripts can keep pattern-matching on
//! the historical messages (`"RTI Connector not initialized"`,
//! `"Failed to get input"`, …).
//!
//! The module holds no ambient globals: the [`BridgeContext`] is created by
//! [`ScriptModule::init`] and lives inside the module value the embedding
//! runtime registers.
//!
//! # Exported names
//!
//! | Script name | Method |
//! |---|---|
//! | `init` | [`ScriptModule::init_or_exit`] |
//! | `read` / `getRealTimeData` | [`ScriptModule::read`] |
//! | `readFragmented` | [`ScriptModule::read_fragmented`] |
//! | `write` | [`ScriptModule::write`] |
//! | `writeByRate` | [`ScriptModule::write_by_rate`] |

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use busload_connector::ConnectorFactory;
use busload_core::{BridgeContext, BridgeSettings, CohortSizes, Pacer};
use busload_types::{BridgeError, DeliveryPolicy, non_negative};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Import path the module registers under in the load-test runtime.
pub const MODULE_PATH: &str = "k6/x/rti";

/// Result text of a successful [`ScriptModule::write_by_rate`].
pub const WRITE_BY_RATE_OK: &str = "All Data Has Been Written Successfully";

/// Names [`ScriptModule::invoke`] dispatches on.
pub const EXPORTS: [&str; 6] = [
    "init",
    "read",
    "getRealTimeData",
    "readFragmented",
    "write",
    "writeByRate",
];

/// Script-facing facade over one [`BridgeContext`].
pub struct ScriptModule {
    factory: Box<dyn ConnectorFactory>,
    settings: BridgeSettings,
    pacer: Option<Arc<dyn Pacer>>,
    context: OnceLock<BridgeContext>,
}

impl ScriptModule {
    /// Create an uninitialised module.  Endpoint settings come from the
    /// defaults plus `BUSLOAD_*` overrides.
    pub fn new(factory: impl ConnectorFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            settings: BridgeSettings::from_env(),
            pacer: None,
            context: OnceLock::new(),
        }
    }

    pub fn with_settings(mut self, settings: BridgeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Pacer handed to the context at init time.
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.context.get().is_some()
    }

    /// The live context, once [`init`][Self::init] has succeeded.
    pub fn context(&self) -> Option<&BridgeContext> {
        self.context.get()
    }

    /// Create the connector for `config_name` in `config_path` and build the
    /// bridge context.  A second successful call is ignored.
    ///
    /// # Errors
    ///
    /// Propagates the factory's [`BridgeError::Connector`] /
    /// [`BridgeError::Config`].  Script runtimes should use
    /// [`init_or_exit`][Self::init_or_exit] instead, since no later call can
    /// succeed without a connector.
    #[tracing::instrument(skip(self))]
    pub fn init(
        &self,
        config_path: &str,
        config_name: &str,
        cohorts: CohortSizes,
    ) -> Result<(), BridgeError> {
        if self.is_initialized() {
            warn!("bridge already initialised; ignoring init");
            return Ok(());
        }

        let connector = self.factory.create(Path::new(config_path), config_name)?;
        let mut context = BridgeContext::new(connector, self.settings.clone(), cohorts);
        if let Some(pacer) = &self.pacer {
            context = context.with_pacer(Arc::clone(pacer));
        }

        if self.context.set(context).is_err() {
            warn!("concurrent init won the race; dropping this connector");
            return Ok(());
        }
        info!(
            reader = %self.settings.reader,
            writer = %self.settings.writer,
            writer_cohort = cohorts.writer,
            reader_cohort = cohorts.reader,
            "bridge initialised"
        );
        Ok(())
    }

    /// [`init`][Self::init], terminating the process on failure.
    pub fn init_or_exit(&self, config_path: &str, config_name: &str, cohorts: CohortSizes) {
        if let Err(e) = self.init(config_path, config_name, cohorts) {
            error!(error = %e, config_path, config_name, "failed to create connector");
            std::process::exit(1);
        }
    }

    /// JSON text of one valid sample.
    pub fn read(&self) -> String {
        render(self.call("read", BridgeContext::read))
    }

    /// Reassemble a `total_length`-byte fragmented message, as text.
    pub fn read_fragmented(&self, total_length: i64, policy: DeliveryPolicy) -> String {
        render(self.call("readFragmented", |ctx| {
            let bytes = ctx.read_fragmented(total_length, policy)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }))
    }

    /// Publish one JSON sample; returns the canonical byte count as text.
    pub fn write(&self, json: &str) -> String {
        render(self.call("write", |ctx| ctx.write(json).map(|n| n.to_string())))
    }

    /// Trickle a JSON payload onto the bus one byte per sample.
    pub fn write_by_rate(&self, json: &str, rate: i64, chunk_size: i64) -> String {
        render(self.call("writeByRate", |ctx| {
            ctx.write_by_rate(json, rate, chunk_size)?;
            Ok(WRITE_BY_RATE_OK.to_string())
        }))
    }

    /// Dispatch a call marshaled by the scripting runtime.
    ///
    /// `init` returns an empty string (or exits the process on failure);
    /// unknown names and malformed arguments produce a descriptive string.
    pub fn invoke(&self, method: &str, args: &[Value]) -> String {
        let outcome = match method {
            "init" => self.invoke_init(args),
            "read" | "getRealTimeData" => Ok(self.read()),
            "readFragmented" => self.invoke_read_fragmented(args),
            "write" => str_arg(args, 0, "jsonPayload").map(|json| self.write(json)),
            "writeByRate" => self.invoke_write_by_rate(args),
            other => Err(BridgeError::InvalidArgument(format!("unknown method '{other}'"))),
        };
        render(outcome)
    }

    fn invoke_init(&self, args: &[Value]) -> Result<String, BridgeError> {
        let path = str_arg(args, 0, "configPath")?;
        let name = str_arg(args, 1, "configName")?;
        let writer = opt_count_arg(args, 2, "writerCohort")?;
        let reader = opt_count_arg(args, 3, "readerCohort")?;
        self.init_or_exit(path, name, CohortSizes::new(writer, reader));
        Ok(String::new())
    }

    fn invoke_read_fragmented(&self, args: &[Value]) -> Result<String, BridgeError> {
        let total = int_arg(args, 0, "totalLength")?;
        let policy = policy_arg(args, 1)?;
        Ok(self.read_fragmented(total, policy))
    }

    fn invoke_write_by_rate(&self, args: &[Value]) -> Result<String, BridgeError> {
        let json = str_arg(args, 0, "jsonPayload")?;
        let rate = int_arg(args, 1, "rate")?;
        let chunk_size = int_arg(args, 2, "chunkSize")?;
        Ok(self.write_by_rate(json, rate, chunk_size))
    }

    fn call<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&BridgeContext) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let call_id = Uuid::new_v4();
        let span = info_span!("script_call", op, %call_id);
        let _entered = span.enter();

        let Some(context) = self.context.get() else {
            debug!("call before init");
            return Err(BridgeError::NotInitialized);
        };

        let started = Instant::now();
        let result = f(context);
        let elapsed_ms = whole_millis(started.elapsed());
        match &result {
            Ok(_) => debug!(elapsed_ms, "call completed"),
            Err(e) => warn!(elapsed_ms, error = %e, "call failed"),
        }
        result
    }
}

/// Milliseconds in `d`, saturating at `u64::MAX`.
fn whole_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn render(result: Result<String, BridgeError>) -> String {
    result.unwrap_or_else(|e| e.to_string())
}

fn str_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, BridgeError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::InvalidArgument(format!("{name} must be a string")))
}

fn int_arg(args: &[Value], index: usize, name: &str) -> Result<i64, BridgeError> {
    args.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| BridgeError::InvalidArgument(format!("{name} must be an integer")))
}

fn opt_count_arg(args: &[Value], index: usize, name: &str) -> Result<usize, BridgeError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(0),
        Some(_) => non_negative(int_arg(args, index, name)?, name),
    }
}

/// Accepts a policy name, or the legacy `reliable` boolean.  Missing means
/// [`DeliveryPolicy::Sequenced`].
fn policy_arg(args: &[Value], index: usize) -> Result<DeliveryPolicy, BridgeError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(DeliveryPolicy::default()),
        Some(Value::Bool(reliable)) => Ok(DeliveryPolicy::from_reliable(*reliable)),
        Some(Value::String(name)) => name.parse(),
        Some(other) => Err(BridgeError::InvalidArgument(format!(
            "deliveryPolicy must be a string or boolean, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busload_connector::{Connector, SimBus, SimSample};
    use serde_json::json;

    struct NoPause;

    impl Pacer for NoPause {
        fn pause(&self, _duration: Duration) {}
    }

    fn sim_module() -> (Arc<SimBus>, ScriptModule) {
        let bus = Arc::new(
            SimBus::builder()
                .recording()
                .with_input("MySubscriber::MyReader", "Square")
                .with_output("MyPublisher::MyWriter", "Square")
                .build()
                .unwrap(),
        );
        let factory_bus = Arc::clone(&bus);
        let module = ScriptModule::new(
            move |_: &Path, _: &str| -> Result<Arc<dyn Connector>, BridgeError> {
                Ok(Arc::clone(&factory_bus) as Arc<dyn Connector>)
            },
        )
        .with_settings(BridgeSettings::default())
        .with_pacer(Arc::new(NoPause));
        (bus, module)
    }

    #[test]
    fn calls_before_init_report_not_initialized() {
        let (bus, module) = sim_module();
        let not_init = "RTI Connector not initialized";
        assert_eq!(module.read(), not_init);
        assert_eq!(module.read_fragmented(5, DeliveryPolicy::Sequenced), not_init);
        assert_eq!(module.write(r#"{"x":1}"#), not_init);
        assert_eq!(module.write_by_rate(r#"{"x":1}"#, 10, 2), not_init);
        // No bus access happened.
        assert!(bus.sim_output("MyPublisher::MyWriter").unwrap().committed().is_empty());
    }

    #[test]
    fn init_failure_is_returned_by_init() {
        let module = ScriptModule::new(|_: &Path, name: &str| -> Result<Arc<dyn Connector>, BridgeError> {
            Err(BridgeError::Config(format!("profile '{name}' not found")))
        });
        let err = module.init("cfg.xml", "Missing", CohortSizes::disabled()).unwrap_err();
        assert!(err.is_fatal());
        assert!(!module.is_initialized());
    }

    #[test]
    fn second_init_is_ignored() {
        let (_, module) = sim_module();
        module.init("cfg.xml", "MyProfile", CohortSizes::disabled()).unwrap();
        module.init("other.xml", "Other", CohortSizes::new(4, 4)).unwrap();
        assert_eq!(
            module.context().unwrap().coordinator().cohort(busload_types::Direction::Writer).parties(),
            0
        );
    }

    #[test]
    fn write_reports_byte_count_and_read_returns_json() {
        let (_, module) = sim_module();
        module.init("cfg.xml", "MyProfile", CohortSizes::disabled()).unwrap();
        assert_eq!(module.write(r#"{"x":1}"#), "7");
        assert_eq!(module.read(), r#"{"x":1}"#);
        assert_eq!(module.read(), "No data available");
    }

    #[test]
    fn failures_surface_as_strings() {
        let (bus, module) = sim_module();
        module.init("cfg.xml", "MyProfile", CohortSizes::disabled()).unwrap();

        assert!(module.write("{broken").starts_with("Failed to UnMarshal data: "));
        assert!(module.write_by_rate("{broken", 1, 1).starts_with("Failed to UnMarshal data: "));

        bus.sim_output("MyPublisher::MyWriter").unwrap().fail_next_write("link down");
        assert_eq!(module.write(r#"{"x":1}"#), "Failed to write data: link down");

        assert!(module.read_fragmented(-1, DeliveryPolicy::Sequenced).contains("non-negative"));
        assert!(module.write_by_rate("{}", 10, 0).contains("chunk size"));
    }

    #[test]
    fn fragmented_round_trip_through_facade() {
        let (bus, module) = sim_module();
        module.init("cfg.xml", "MyProfile", CohortSizes::disabled()).unwrap();
        assert_eq!(module.write_by_rate(r#"{"k":"v"}"#, 10, 3), WRITE_BY_RATE_OK);
        let input = bus.sim_input("MySubscriber::MyReader").unwrap();
        assert_eq!(input.pending(), 9);
        assert_eq!(module.read_fragmented(9, DeliveryPolicy::Sequenced), r#"{"k":"v"}"#);
    }

    #[test]
    fn invoke_dispatches_marshaled_calls() {
        let (bus, module) = sim_module();
        assert_eq!(module.invoke("read", &[]), "RTI Connector not initialized");

        assert_eq!(module.invoke("init", &[json!("cfg.xml"), json!("MyProfile")]), "");
        assert_eq!(module.invoke("write", &[json!(r#"{"x":1}"#)]), "7");
        assert_eq!(module.invoke("getRealTimeData", &[]), r#"{"x":1}"#);

        let input = bus.sim_input("MySubscriber::MyReader").unwrap();
        input.push_batch(b"hi".iter().map(|b| SimSample::byte("data", *b)).collect());
        assert_eq!(module.invoke("readFragmented", &[json!(2), json!(true)]), "hi");

        assert_eq!(
            module.invoke("writeByRate", &[json!("{}"), json!(0), json!(1)]),
            WRITE_BY_RATE_OK
        );
        assert!(module.invoke("write", &[json!(5)]).contains("jsonPayload"));
        assert!(module.invoke("explode", &[]).contains("unknown method"));
    }

    #[test]
    fn call_latency_saturates_instead_of_wrapping() {
        assert_eq!(whole_millis(Duration::from_micros(2_500)), 2);
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn policy_argument_forms() {
        assert_eq!(policy_arg(&[], 0).unwrap(), DeliveryPolicy::Sequenced);
        assert_eq!(policy_arg(&[json!(false)], 0).unwrap(), DeliveryPolicy::LatestOnly);
        assert_eq!(policy_arg(&[json!("latest_only")], 0).unwrap(), DeliveryPolicy::LatestOnly);
        assert!(policy_arg(&[json!(3)], 0).is_err());
    }

    #[test]
    fn exports_cover_every_dispatched_name() {
        let (_, module) = sim_module();
        for name in EXPORTS.iter().filter(|n| **n != "init") {
            assert!(!module.invoke(name, &[]).contains("unknown method"), "{name}");
        }
    }
}
