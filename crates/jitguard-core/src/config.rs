//! Broker configuration.
//!
//! Configuration is resolved once at process start: environment variables
//! first, then `key=value` properties on top. `BrokerConfig` has no setters;
//! the broker takes it by value and never changes it afterwards.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Property selecting the compiler provider by name.
pub const PROP_COMPILER: &str = "compiler";
/// Property choosing the fatal branch of the fault classifier.
pub const PROP_EXCEPTION_IS_FATAL: &str = "compileMethodExceptionIsFatal";
/// Property enabling the per-request compilation log on stdout.
pub const PROP_PRINT_COMPILATION: &str = "printCompilation";

/// Environment variable for [`PROP_COMPILER`].
pub const ENV_COMPILER: &str = "JITGUARD_COMPILER";
/// Environment variable for [`PROP_EXCEPTION_IS_FATAL`].
pub const ENV_EXCEPTION_IS_FATAL: &str = "JITGUARD_COMPILE_METHOD_EXCEPTION_IS_FATAL";

/// Default number of broker events retained for diagnostic reports.
pub const DEFAULT_EVENT_CAPACITY: usize = 20;

/// Configuration for the compile broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Name of the provider used for compile requests.
    pub compiler: Option<String>,

    /// Terminate the process when a provider fails to create a compiler.
    pub compile_method_exception_is_fatal: bool,

    /// Print one line per compile request on stdout.
    pub print_compilation: bool,

    /// Directory where diagnostic reports are written.
    pub report_dir: PathBuf,

    /// Number of broker events kept for diagnostic reports.
    pub event_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            compiler: None,
            compile_method_exception_is_fatal: false,
            print_compilation: false,
            report_dir: PathBuf::from("."),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl BrokerConfig {
    /// Build a config from `key=value` property strings.
    pub fn from_properties<I, S>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::default().with_properties(properties)
    }

    /// Apply `key=value` property strings on top of this config.
    ///
    /// Later properties override earlier ones. Unknown keys are rejected so a
    /// misspelled flag cannot silently select the non-fatal branch.
    pub fn with_properties<I, S>(mut self, properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for property in properties {
            let property = property.as_ref();
            let (key, value) = property.split_once('=').ok_or_else(|| {
                Error::Config(format!("expected key=value, got '{property}'"))
            })?;
            self.set(key.trim(), value.trim())?;
        }
        Ok(self)
    }

    /// Apply values from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply values from an arbitrary variable source.
    pub fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(compiler) = lookup(ENV_COMPILER) {
            self.set(PROP_COMPILER, &compiler)?;
        }
        if let Some(fatal) = lookup(ENV_EXCEPTION_IS_FATAL) {
            self.set(PROP_EXCEPTION_IS_FATAL, &fatal)?;
        }
        Ok(self)
    }

    /// Set the report directory.
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            PROP_COMPILER => {
                if value.is_empty() {
                    return Err(Error::Config(format!("{PROP_COMPILER} must not be empty")));
                }
                self.compiler = Some(value.to_string());
            }
            PROP_EXCEPTION_IS_FATAL => {
                self.compile_method_exception_is_fatal = parse_bool(key, value)?;
            }
            PROP_PRINT_COMPILATION => {
                self.print_compilation = parse_bool(key, value)?;
            }
            other => return Err(Error::Config(format!("unknown property '{other}'"))),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::Config(format!(
            "{key} expects true or false, got '{value}'"
        ))),
    }
}
