//! Call-site frames and provider failure values.
//!
//! Frames are recorded from `#[track_caller]` locations rather than parsed out
//! of a native backtrace, so a report names the factory and dispatcher call
//! sites even in optimized builds without debug info. The native backtrace is
//! still captured and attached for post-mortem use.

use std::any::Any;
use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::Once;

/// One entry of a triggering stack, rendered as `at symbol(file:line)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub symbol: Cow<'static, str>,
    pub file: String,
    pub line: u32,
}

impl StackFrame {
    /// Create a frame for `symbol` at the given source location.
    pub fn new(symbol: impl Into<Cow<'static, str>>, location: &Location<'_>) -> Self {
        Self {
            symbol: symbol.into(),
            file: location.file().to_string(),
            line: location.line(),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}({}:{})", self.symbol, self.file, self.line)
    }
}

/// Failure raised by a provider while building a compiler instance.
///
/// Construct it inside the factory so the recorded location is the factory's
/// own call site:
///
/// ```
/// use jitguard_core::ProviderError;
///
/// let err = ProviderError::msg("OutOfCodeCache", "no room for stubs");
/// assert_eq!(err.to_string(), "OutOfCodeCache: no room for stubs");
/// ```
#[derive(Debug)]
pub struct ProviderError {
    kind: Cow<'static, str>,
    message: String,
    file: String,
    line: u32,
    backtrace: Backtrace,
}

impl ProviderError {
    /// Wrap an error value. The error's type name becomes the failure kind.
    #[track_caller]
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self::at(
            Cow::Borrowed(std::any::type_name::<E>()),
            error.to_string(),
            Location::caller(),
        )
    }

    /// Build a failure from a kind label and message.
    #[track_caller]
    pub fn msg(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::at(kind.into(), message.into(), Location::caller())
    }

    fn at(kind: Cow<'static, str>, message: String, location: &Location<'_>) -> Self {
        Self {
            kind,
            message,
            file: location.file().to_string(),
            line: location.line(),
            backtrace: Backtrace::force_capture(),
        }
    }

    fn from_panic(payload: Box<dyn Any + Send>, capture: Option<PanicCapture>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        let (file, line, backtrace) = match capture {
            Some(c) => (c.file, c.line, c.backtrace),
            None => ("<unknown>".to_string(), 0, Backtrace::disabled()),
        };

        Self {
            kind: Cow::Borrowed("panic"),
            message,
            file,
            line,
            backtrace,
        }
    }

    /// Type name of the underlying error, or `panic`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human readable failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source file where the failure was raised.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Source line where the failure was raised.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Native backtrace captured when the failure was raised.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Frame for the failure site, attributed to `symbol`.
    pub fn frame(&self, symbol: impl Into<Cow<'static, str>>) -> StackFrame {
        StackFrame {
            symbol: symbol.into(),
            file: self.file.clone(),
            line: self.line,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ProviderError {}

struct PanicCapture {
    file: String,
    line: u32,
    backtrace: Backtrace,
}

thread_local! {
    static GUARDED: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicCapture>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install a panic hook that records panics raised inside a provider boundary
/// and defers to the previous hook everywhere else.
fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if GUARDED.with(Cell::get) {
                let capture = PanicCapture {
                    file: info
                        .location()
                        .map(|l| l.file().to_string())
                        .unwrap_or_else(|| "<unknown>".to_string()),
                    line: info.location().map(|l| l.line()).unwrap_or(0),
                    backtrace: Backtrace::force_capture(),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(capture));
            } else {
                previous(info);
            }
        }));
    });
}

/// Run a factory call, converting a panic into a [`ProviderError`].
pub(crate) fn catch_provider_panic<T>(
    f: impl FnOnce() -> Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    install_panic_hook();

    let was_guarded = GUARDED.with(|g| g.replace(true));
    let result = std::panic::catch_unwind(AssertUnwindSafe(f));
    GUARDED.with(|g| g.set(was_guarded));

    match result {
        Ok(inner) => inner,
        Err(payload) => {
            let capture = LAST_PANIC.with(|slot| slot.borrow_mut().take());
            Err(ProviderError::from_panic(payload, capture))
        }
    }
}
