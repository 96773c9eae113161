//! Compiler provider traits.
//!
//! A provider is a [`CompilerFactory`] registered under a compiler name. The
//! broker asks the factory for a [`Compiler`] the first time a request needs
//! one and keeps the instance for later requests.

use std::borrow::Cow;
use std::sync::Arc;

use crate::frames::ProviderError;

/// A method submitted for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Monotonic request id assigned by the submitter.
    pub id: u64,
    /// Fully qualified method name.
    pub method: String,
}

impl CompileRequest {
    pub fn new(id: u64, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
        }
    }
}

/// Result of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMethod {
    pub id: u64,
    pub method: String,
    /// Size of the generated code in bytes.
    pub code_size: usize,
}

/// A compiler instance produced by a provider.
pub trait Compiler: Send + Sync {
    /// Name reported in compilation logs.
    fn name(&self) -> &str;

    /// Compile one method.
    fn compile(&self, request: &CompileRequest) -> Result<CompiledMethod, ProviderError>;

    /// Symbol used for this compiler's frame in diagnostic reports.
    fn call_site(&self) -> Cow<'static, str> {
        Cow::Owned(format!("{}::compile", std::any::type_name::<Self>()))
    }
}

/// Information handed to a factory on each creation attempt.
#[derive(Debug, Clone, Copy)]
pub struct AcquireContext<'a> {
    /// Provider name the broker resolved.
    pub provider: &'a str,
    /// 1-based attempt number for this provider.
    pub attempt: u32,
}

/// Factory for compiler instances.
pub trait CompilerFactory: Send + Sync {
    /// Name the provider is registered and selected under.
    fn compiler_name(&self) -> &str;

    /// Build a compiler instance.
    ///
    /// May fail, or panic, any number of times. Failures are handed to the
    /// fault classifier and never reach the broker's caller.
    fn create_compiler(
        &self,
        ctx: &AcquireContext<'_>,
    ) -> Result<Arc<dyn Compiler>, ProviderError>;

    /// Symbol used for this factory's frame in diagnostic reports.
    fn call_site(&self) -> Cow<'static, str> {
        Cow::Owned(format!(
            "{}::create_compiler",
            std::any::type_name::<Self>()
        ))
    }
}

/// Supplies provider factories for discovery at startup.
pub trait ProviderLocator {
    fn providers(&self) -> Vec<Arc<dyn CompilerFactory>>;
}

/// A registered provider. Immutable once registered.
#[derive(Clone)]
pub struct ProviderDescriptor {
    name: String,
    factory: Arc<dyn CompilerFactory>,
}

impl ProviderDescriptor {
    /// Describe a factory under its own compiler name.
    pub fn new(factory: Arc<dyn CompilerFactory>) -> Self {
        Self {
            name: factory.compiler_name().to_string(),
            factory,
        }
    }

    /// Describe a factory under an explicit name.
    pub fn with_name(name: impl Into<String>, factory: Arc<dyn CompilerFactory>) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &Arc<dyn CompilerFactory> {
        &self.factory
    }
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFactory;

    impl CompilerFactory for NullFactory {
        fn compiler_name(&self) -> &str {
            "Null"
        }

        fn create_compiler(
            &self,
            _ctx: &AcquireContext<'_>,
        ) -> Result<Arc<dyn Compiler>, ProviderError> {
            Err(ProviderError::msg("Unsupported", "null compiler"))
        }
    }

    #[test]
    fn test_default_call_site_names_concrete_type() {
        let factory: Arc<dyn CompilerFactory> = Arc::new(NullFactory);
        let site = factory.call_site();
        assert!(site.ends_with("NullFactory::create_compiler"), "{site}");
    }

    #[test]
    fn test_descriptor_names() {
        let factory: Arc<dyn CompilerFactory> = Arc::new(NullFactory);
        assert_eq!(ProviderDescriptor::new(factory.clone()).name(), "Null");
        assert_eq!(
            ProviderDescriptor::with_name("Alias", factory).name(),
            "Alias"
        );
    }
}
