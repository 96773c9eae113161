//! Built-in compiler providers for the host process.
//!
//! - `ErrorCompiler` - factory fails on every attempt
//! - `PanicCompiler` - factory panics on every attempt
//! - `BaselineCompiler` - factory succeeds; compiles trivially
//!
//! Each provider notifies the host's completion signal once it has seen
//! `signal_after` attempts (or compilations), which ends the host loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use jitguard_core::{
    AcquireContext, CompileRequest, CompiledMethod, Compiler, CompilerFactory, CompletionSignal,
    ProviderError, ProviderLocator,
};

/// Failure raised by `ErrorCompiler` on every creation attempt.
#[derive(Debug, thiserror::Error)]
#[error("attempt {attempt}")]
pub struct CompilerCreationError {
    pub attempt: u32,
}

/// Factory whose compiler creation always fails.
pub struct ErrorCompilerFactory {
    signal_after: u32,
    signal: CompletionSignal,
}

impl ErrorCompilerFactory {
    pub fn new(signal_after: u32, signal: CompletionSignal) -> Self {
        Self {
            signal_after,
            signal,
        }
    }
}

impl CompilerFactory for ErrorCompilerFactory {
    fn compiler_name(&self) -> &str {
        "ErrorCompiler"
    }

    fn create_compiler(
        &self,
        ctx: &AcquireContext<'_>,
    ) -> Result<Arc<dyn Compiler>, ProviderError> {
        let error = ProviderError::new(CompilerCreationError {
            attempt: ctx.attempt,
        });
        tracing::debug!("ErrorCompiler failing attempt {}", ctx.attempt);

        if ctx.attempt == self.signal_after {
            tracing::debug!("ErrorCompiler reached attempt {}, signalling", ctx.attempt);
            self.signal.notify();
        }
        Err(error)
    }
}

/// Factory whose compiler creation always panics.
pub struct PanicCompilerFactory {
    signal_after: u32,
    signal: CompletionSignal,
}

impl PanicCompilerFactory {
    pub fn new(signal_after: u32, signal: CompletionSignal) -> Self {
        Self {
            signal_after,
            signal,
        }
    }
}

impl CompilerFactory for PanicCompilerFactory {
    fn compiler_name(&self) -> &str {
        "PanicCompiler"
    }

    fn create_compiler(
        &self,
        ctx: &AcquireContext<'_>,
    ) -> Result<Arc<dyn Compiler>, ProviderError> {
        if ctx.attempt == self.signal_after {
            self.signal.notify();
        }
        panic!("compiler creation panicked (attempt {})", ctx.attempt);
    }
}

/// Factory producing a compiler that always succeeds.
pub struct BaselineCompilerFactory {
    signal_after: u32,
    signal: CompletionSignal,
}

impl BaselineCompilerFactory {
    pub fn new(signal_after: u32, signal: CompletionSignal) -> Self {
        Self {
            signal_after,
            signal,
        }
    }
}

impl CompilerFactory for BaselineCompilerFactory {
    fn compiler_name(&self) -> &str {
        "BaselineCompiler"
    }

    fn create_compiler(
        &self,
        _ctx: &AcquireContext<'_>,
    ) -> Result<Arc<dyn Compiler>, ProviderError> {
        Ok(Arc::new(BaselineCompiler {
            compiled: AtomicU32::new(0),
            signal_after: self.signal_after,
            signal: self.signal.clone(),
        }))
    }
}

/// Emits a fixed-size stub per method.
pub struct BaselineCompiler {
    compiled: AtomicU32,
    signal_after: u32,
    signal: CompletionSignal,
}

impl Compiler for BaselineCompiler {
    fn name(&self) -> &str {
        "BaselineCompiler"
    }

    fn compile(&self, request: &CompileRequest) -> Result<CompiledMethod, ProviderError> {
        let count = self.compiled.fetch_add(1, Ordering::SeqCst) + 1;
        if count == self.signal_after {
            self.signal.notify();
        }

        Ok(CompiledMethod {
            id: request.id,
            method: request.method.clone(),
            code_size: 32 + 4 * request.method.len(),
        })
    }
}

/// Locator for the providers bundled with the host.
pub struct BuiltinProviders {
    signal_after: u32,
    signal: CompletionSignal,
}

impl BuiltinProviders {
    pub fn new(signal_after: u32, signal: CompletionSignal) -> Self {
        Self {
            signal_after,
            signal,
        }
    }
}

impl ProviderLocator for BuiltinProviders {
    fn providers(&self) -> Vec<Arc<dyn CompilerFactory>> {
        vec![
            Arc::new(ErrorCompilerFactory::new(
                self.signal_after,
                self.signal.clone(),
            )),
            Arc::new(PanicCompilerFactory::new(
                self.signal_after,
                self.signal.clone(),
            )),
            Arc::new(BaselineCompilerFactory::new(
                self.signal_after,
                self.signal.clone(),
            )),
        ]
    }
}
