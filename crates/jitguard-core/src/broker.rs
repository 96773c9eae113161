//! Compile broker: compiler acquisition and request dispatch.
//!
//! The broker resolves a provider, creates its compiler on first use and
//! routes every provider failure through the fault classifier. Construction
//! failures and panics never escape [`CompileBroker::acquire`] or
//! [`CompileBroker::compile_method`]: they end in a skip or in process
//! termination.
//!
//! ```text
//! compile_method ── get_compiler ── factory.create_compiler
//!                        │
//!                        └── failure ── classify ──┬── Skip  ── log, continue
//!                                                  └── Fatal ── report, exit
//! ```

use std::borrow::Cow;
use std::panic::Location;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::classify::{Classification, FailureRecord, FailureStage, RequestState, classify};
use crate::config::BrokerConfig;
use crate::diagnostics::DiagnosticEmitter;
use crate::error::{Error, Result};
use crate::events::{EventLog, current_thread_name};
use crate::frames::{StackFrame, catch_provider_panic};
use crate::provider::{AcquireContext, CompileRequest, CompiledMethod, Compiler};
use crate::registry::ProviderRegistry;

const ACQUIRE: &str = concat!(module_path!(), "::CompileBroker::acquire");
const GET_COMPILER: &str = concat!(module_path!(), "::CompileBroker::get_compiler");
const COMPILE_METHOD: &str = concat!(module_path!(), "::CompileBroker::compile_method");

/// Frame for `symbol` at the caller's line.
#[track_caller]
fn call_site(symbol: &'static str) -> StackFrame {
    StackFrame::new(symbol, Location::caller())
}

/// Why a request was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReason {
    pub provider: String,
    pub attempt: u32,
    pub stage: FailureStage,
    /// Type name of the failure.
    pub kind: String,
    pub message: String,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "uncaught exception in compile_method [{}: {}: {}] (attempt {})",
            self.provider,
            self.kind,
            single_line(&self.message),
            self.attempt
        )
    }
}

/// Escape line breaks so a skip is logged on one line.
fn single_line(text: &str) -> Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        Cow::Owned(text.replace('\r', "\\r").replace('\n', "\\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Result of [`CompileBroker::acquire`].
pub enum Acquisition {
    /// The provider's active compiler.
    Ready(Arc<dyn Compiler>),
    /// Creation failed and was classified as recoverable.
    Skipped(SkipReason),
}

impl Acquisition {
    pub fn compiler(&self) -> Option<&Arc<dyn Compiler>> {
        match self {
            Self::Ready(compiler) => Some(compiler),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(compiler) => f.debug_tuple("Ready").field(&compiler.name()).finish(),
            Self::Skipped(reason) => f.debug_tuple("Skipped").field(reason).finish(),
        }
    }
}

/// Result of [`CompileBroker::compile_method`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Compiled(CompiledMethod),
    Skipped(SkipReason),
}

/// Counters over the broker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub compiled: u64,
    pub skipped: u64,
}

/// A factory attempt: the compiler, or the failure to classify.
pub type Attempt = std::result::Result<Arc<dyn Compiler>, FailureRecord>;

/// Per-provider broker state.
#[derive(Default)]
struct ProviderSlot {
    /// Factory invocations so far.
    attempts: AtomicU32,
    /// Compile calls on the active compiler so far.
    compiles: AtomicU32,
    /// At most one active compiler per provider.
    active: Mutex<Option<Arc<dyn Compiler>>>,
}

/// Dispatches compile requests to pluggable compiler providers.
pub struct CompileBroker {
    registry: ProviderRegistry,
    slots: FxHashMap<String, ProviderSlot>,
    config: BrokerConfig,
    events: Arc<EventLog>,
    emitter: DiagnosticEmitter,
    compiled: AtomicU64,
    skipped: AtomicU64,
}

impl CompileBroker {
    /// Create a broker over a fully populated registry.
    ///
    /// Fails with [`Error::ProviderNotFound`] if the configured compiler is
    /// not registered.
    pub fn new(registry: ProviderRegistry, config: BrokerConfig) -> Result<Self> {
        if let Some(name) = config.compiler.as_deref() {
            registry.lookup(name)?;
        }

        let slots = registry
            .names()
            .map(|name| (name.to_string(), ProviderSlot::default()))
            .collect();
        let events = Arc::new(EventLog::new(config.event_capacity));
        let emitter = DiagnosticEmitter::new(config.report_dir.clone(), events.clone());

        Ok(Self {
            registry,
            slots,
            config,
            events,
            emitter,
            compiled: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Emitter used on the fatal path; register termination hooks here.
    pub fn emitter(&self) -> &DiagnosticEmitter {
        &self.emitter
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            compiled: self.compiled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// Number of factory invocations made for a provider.
    pub fn attempts(&self, name: &str) -> Result<u32> {
        Ok(self.slot(name)?.attempts.load(Ordering::SeqCst))
    }

    /// The provider's active compiler, if one was created.
    pub fn active_compiler(&self, name: &str) -> Result<Option<Arc<dyn Compiler>>> {
        let slot = self.slot(name)?;
        let active = match slot.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(active.clone())
    }

    /// Acquire the compiler of a named provider.
    ///
    /// A construction failure is classified: on skip this returns
    /// [`Acquisition::Skipped`]; on fatal the process terminates.
    pub fn acquire(&self, name: &str) -> Result<Acquisition> {
        let state = RequestState::Idle.transition(RequestState::Invoking)?;
        let caller = call_site(ACQUIRE);

        match self.get_compiler(name, &[caller])? {
            Ok(compiler) => Ok(Acquisition::Ready(compiler)),
            Err(record) => self.handle_failure(record, state).map(Acquisition::Skipped),
        }
    }

    /// Acquire without classifying construction failures.
    ///
    /// The returned [`FailureRecord`] must be passed to
    /// [`CompileBroker::handle_failure`] or dropped deliberately.
    pub fn acquire_unclassified(&self, name: &str) -> Result<Attempt> {
        let caller = call_site(ACQUIRE);
        self.get_compiler(name, &[caller])
    }

    /// Compile a method with the configured compiler.
    pub fn compile_method(&self, request: &CompileRequest) -> Result<CompileOutcome> {
        let name = self
            .config
            .compiler
            .as_deref()
            .ok_or_else(|| Error::Config("no compiler selected".to_string()))?;

        let state = RequestState::Idle.transition(RequestState::Invoking)?;
        self.print_compilation(request, None);

        let compiler = match self.get_compiler(name, &[call_site(COMPILE_METHOD)])? {
            Ok(compiler) => compiler,
            Err(record) => {
                let reason = self.handle_failure(record, state)?;
                self.print_compilation(request, Some(&reason));
                return Ok(CompileOutcome::Skipped(reason));
            }
        };

        match self.invoke_compiler(name, &compiler, request, call_site(COMPILE_METHOD))? {
            Ok(method) => {
                state.transition(RequestState::Compiled)?;
                self.compiled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "compiled {} with {} ({} bytes)",
                    method.method,
                    compiler.name(),
                    method.code_size
                );
                Ok(CompileOutcome::Compiled(method))
            }
            Err(record) => {
                let reason = self.handle_failure(record, state)?;
                self.print_compilation(request, Some(&reason));
                Ok(CompileOutcome::Skipped(reason))
            }
        }
    }

    /// Classify a failure and act on it.
    ///
    /// Returns the skip reason on the recoverable branch; the fatal branch
    /// writes the diagnostic report and terminates the process.
    pub fn handle_failure(
        &self,
        mut record: FailureRecord,
        state: RequestState,
    ) -> Result<SkipReason> {
        let classification = classify(&record, &self.config);
        state.transition(RequestState::after(classification))?;

        match classification {
            Classification::Skip => {
                let reason = SkipReason {
                    provider: record.provider,
                    attempt: record.attempt,
                    stage: record.stage,
                    kind: record.cause.kind().to_string(),
                    message: record.cause.message().to_string(),
                };
                tracing::warn!("COMPILE SKIPPED: {}", reason);
                self.events.record(format!("skipped: {reason}"));
                self.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(reason)
            }
            Classification::Fatal => {
                record.fatal = true;
                self.events.record(format!(
                    "fatal: {} attempt {}: {}",
                    record.provider, record.attempt, record.cause
                ));
                self.emitter.emit_fatal(record)
            }
        }
    }

    /// Return the active compiler or run the factory once.
    ///
    /// `callers` are the broker frames above this call, innermost first.
    fn get_compiler(&self, name: &str, callers: &[StackFrame]) -> Result<Attempt> {
        let descriptor = self.registry.lookup(name)?;
        let slot = self.slot(name)?;

        // Held across the factory call so only one instance can become active.
        let mut active = match slot.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(compiler) = active.as_ref() {
            return Ok(Ok(compiler.clone()));
        }

        let attempt = slot.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = AcquireContext {
            provider: name,
            attempt,
        };
        let factory = descriptor.factory();
        tracing::debug!("creating compiler {} (attempt {})", name, attempt);
        self.events
            .record(format!("create compiler {name} attempt {attempt}"));

        let invoke = call_site(GET_COMPILER);
        match catch_provider_panic(|| factory.create_compiler(&ctx)) {
            Ok(compiler) => {
                self.events
                    .record(format!("created compiler {}", compiler.name()));
                *active = Some(compiler.clone());
                Ok(Ok(compiler))
            }
            Err(cause) => {
                self.events.record(cause.to_string());

                let mut stack = Vec::with_capacity(callers.len() + 2);
                stack.push(cause.frame(factory.call_site()));
                stack.push(invoke);
                stack.extend_from_slice(callers);

                Ok(Err(FailureRecord {
                    provider: name.to_string(),
                    attempt,
                    stage: FailureStage::CreateCompiler,
                    cause,
                    stack,
                    thread: current_thread_name(),
                    fatal: false,
                }))
            }
        }
    }

    /// Run `compiler` on a request behind the panic boundary.
    ///
    /// `invoke` is the dispatcher frame above the compile call.
    fn invoke_compiler(
        &self,
        name: &str,
        compiler: &Arc<dyn Compiler>,
        request: &CompileRequest,
        invoke: StackFrame,
    ) -> Result<std::result::Result<CompiledMethod, FailureRecord>> {
        let attempt = self.slot(name)?.compiles.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(catch_provider_panic(|| compiler.compile(request)).map_err(|cause| {
            self.events.record(cause.to_string());
            let stack = vec![cause.frame(compiler.call_site()), invoke];
            FailureRecord {
                provider: name.to_string(),
                attempt,
                stage: FailureStage::Compile,
                cause,
                stack,
                thread: current_thread_name(),
                fatal: false,
            }
        }))
    }

    fn slot(&self, name: &str) -> Result<&ProviderSlot> {
        self.slots
            .get(name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    fn print_compilation(&self, request: &CompileRequest, skipped: Option<&SkipReason>) {
        if !self.config.print_compilation {
            return;
        }

        let elapsed = self.events.start().elapsed().as_millis();
        match skipped {
            None => println!("{:>8} {:>5}    {}", elapsed, request.id, request.method),
            Some(reason) => println!(
                "{:>8} {:>5}    {}   COMPILE SKIPPED: {}",
                elapsed, request.id, request.method, reason
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticReport;
    use crate::frames::ProviderError;
    use crate::provider::CompilerFactory;

    struct Echo;

    impl Compiler for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        fn compile(
            &self,
            request: &CompileRequest,
        ) -> std::result::Result<CompiledMethod, ProviderError> {
            Ok(CompiledMethod {
                id: request.id,
                method: request.method.clone(),
                code_size: request.method.len(),
            })
        }
    }

    /// Fails until `succeed_on`, then returns `Echo`.
    struct Flaky {
        succeed_on: u32,
    }

    impl CompilerFactory for Flaky {
        fn compiler_name(&self) -> &str {
            "Flaky"
        }

        fn create_compiler(
            &self,
            ctx: &AcquireContext<'_>,
        ) -> std::result::Result<Arc<dyn Compiler>, ProviderError> {
            if ctx.attempt < self.succeed_on {
                return Err(ProviderError::msg(
                    "NotYet",
                    format!("attempt {}", ctx.attempt),
                ));
            }
            Ok(Arc::new(Echo))
        }
    }

    /// Compiler whose every compile call fails.
    struct Bailing;

    impl Compiler for Bailing {
        fn name(&self) -> &str {
            "Bailing"
        }

        fn compile(
            &self,
            request: &CompileRequest,
        ) -> std::result::Result<CompiledMethod, ProviderError> {
            Err(ProviderError::msg(
                "Bailout",
                format!("cannot compile {}", request.method),
            ))
        }
    }

    struct Bails;

    impl CompilerFactory for Bails {
        fn compiler_name(&self) -> &str {
            "Bails"
        }

        fn create_compiler(
            &self,
            _ctx: &AcquireContext<'_>,
        ) -> std::result::Result<Arc<dyn Compiler>, ProviderError> {
            Ok(Arc::new(Bailing))
        }
    }

    fn bailing_broker() -> CompileBroker {
        let mut registry = ProviderRegistry::new();
        registry.register_factory(Arc::new(Bails)).unwrap();
        let config = BrokerConfig {
            compiler: Some("Bails".to_string()),
            ..Default::default()
        };
        CompileBroker::new(registry, config).unwrap()
    }

    fn broker(succeed_on: u32) -> CompileBroker {
        let mut registry = ProviderRegistry::new();
        registry
            .register_factory(Arc::new(Flaky { succeed_on }))
            .unwrap();
        let config = BrokerConfig {
            compiler: Some("Flaky".to_string()),
            ..Default::default()
        };
        CompileBroker::new(registry, config).unwrap()
    }

    #[test]
    fn test_unknown_selected_compiler() {
        let config = BrokerConfig {
            compiler: Some("Missing".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            CompileBroker::new(ProviderRegistry::new(), config),
            Err(Error::ProviderNotFound(_))
        ));
    }

    #[test]
    fn test_skip_until_factory_succeeds() {
        let broker = broker(3);

        for expected_attempt in 1..=2 {
            match broker.acquire("Flaky").unwrap() {
                Acquisition::Skipped(reason) => {
                    assert_eq!(reason.attempt, expected_attempt);
                    assert_eq!(reason.kind, "NotYet");
                }
                other => panic!("expected skip, got {other:?}"),
            }
        }

        let first = broker.acquire("Flaky").unwrap();
        let second = broker.acquire("Flaky").unwrap();
        assert!(Arc::ptr_eq(
            first.compiler().unwrap(),
            second.compiler().unwrap()
        ));
        assert_eq!(broker.attempts("Flaky").unwrap(), 3);
    }

    #[test]
    fn test_compile_method_counts() {
        let broker = broker(2);
        let request = CompileRequest::new(1, "demo::Main::hot");

        assert!(matches!(
            broker.compile_method(&request).unwrap(),
            CompileOutcome::Skipped(_)
        ));
        match broker.compile_method(&request).unwrap() {
            CompileOutcome::Compiled(method) => assert_eq!(method.method, "demo::Main::hot"),
            other => panic!("expected compiled, got {other:?}"),
        }
        assert_eq!(
            broker.stats(),
            BrokerStats {
                compiled: 1,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_unclassified_failure_stack() {
        let broker = broker(u32::MAX);
        let record = match broker.acquire_unclassified("Flaky").unwrap() {
            Err(record) => record,
            Ok(_) => panic!("factory should have failed"),
        };

        assert_eq!(record.stage, FailureStage::CreateCompiler);
        let symbols: Vec<&str> = record.stack.iter().map(|f| f.symbol.as_ref()).collect();
        assert!(symbols[0].ends_with("Flaky::create_compiler"), "{symbols:?}");
        assert_eq!(symbols[1], GET_COMPILER);
        assert_eq!(symbols[2], ACQUIRE);
        assert!(record.stack[1].file.ends_with("broker.rs"));
    }

    #[test]
    fn test_compile_failure_is_classified() {
        let broker = bailing_broker();

        for n in 1..=3u32 {
            let request = CompileRequest::new(n.into(), format!("demo::Main::hot{n}"));
            match broker.compile_method(&request).unwrap() {
                CompileOutcome::Skipped(reason) => {
                    assert_eq!(reason.stage, FailureStage::Compile);
                    assert_eq!(reason.attempt, n);
                    assert_eq!(reason.kind, "Bailout");
                    assert_eq!(reason.message, format!("cannot compile demo::Main::hot{n}"));
                }
                other => panic!("expected skip, got {other:?}"),
            }
        }

        // The compiler itself was created once and stays active.
        assert_eq!(broker.attempts("Bails").unwrap(), 1);
        assert!(broker.active_compiler("Bails").unwrap().is_some());
        assert_eq!(
            broker.stats(),
            BrokerStats {
                compiled: 0,
                skipped: 3
            }
        );
    }

    #[test]
    fn test_compile_failure_report_frames() {
        let broker = bailing_broker();
        let compiler = match broker.acquire("Bails").unwrap() {
            Acquisition::Ready(compiler) => compiler,
            other => panic!("expected compiler, got {other:?}"),
        };

        let request = CompileRequest::new(7, "demo::Main::hot");
        let record = match broker
            .invoke_compiler("Bails", &compiler, &request, call_site(COMPILE_METHOD))
            .unwrap()
        {
            Err(record) => record,
            Ok(method) => panic!("compile should have failed, got {method:?}"),
        };

        assert_eq!(record.stage, FailureStage::Compile);
        assert_eq!(record.attempt, 1);
        let symbols: Vec<&str> = record.stack.iter().map(|f| f.symbol.as_ref()).collect();
        assert!(symbols[0].ends_with("Bailing::compile"), "{symbols:?}");
        assert_eq!(symbols[1], COMPILE_METHOD);

        let text = DiagnosticReport::capture(&record, broker.events()).render();
        let compile = text.find("Bailing::compile(").expect("compile frame missing");
        let dispatch = text
            .find("at jitguard_core::broker::CompileBroker::compile_method(")
            .expect("dispatcher frame missing");
        assert!(compile < dispatch, "{text}");
        assert!(text.contains("Bailout: cannot compile demo::Main::hot"));
    }

    #[test]
    fn test_skip_reason_is_one_line() {
        let reason = SkipReason {
            provider: "PanicCompiler".to_string(),
            attempt: 2,
            stage: FailureStage::CreateCompiler,
            kind: "panic".to_string(),
            message: "first\r\nsecond\nthird".to_string(),
        };

        let line = reason.to_string();
        assert!(!line.contains('\n') && !line.contains('\r'), "{line}");
        assert!(line.contains("first\\r\\nsecond\\nthird"), "{line}");
        assert!(line.ends_with("(attempt 2)"));
    }

    #[test]
    fn test_missing_provider_propagates() {
        let broker = broker(1);
        assert!(matches!(
            broker.acquire("Nope"),
            Err(Error::ProviderNotFound(_))
        ));
        assert!(matches!(broker.attempts("Nope"), Err(Error::ProviderNotFound(_))));
    }

    #[test]
    fn test_compile_without_selection() {
        let mut registry = ProviderRegistry::new();
        registry
            .register_factory(Arc::new(Flaky { succeed_on: 1 }))
            .unwrap();
        let broker = CompileBroker::new(registry, BrokerConfig::default()).unwrap();
        assert!(matches!(
            broker.compile_method(&CompileRequest::new(1, "m")),
            Err(Error::Config(_))
        ));
    }
}
