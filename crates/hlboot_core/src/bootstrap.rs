//! Bootstrap orchestrator.
//!
//! # Responsibility
//! - Run the load → link → setup → entrypoint → teardown sequence once.
//! - Write one human-readable diagnostic for every failure.
//!
//! # Invariants
//! - Teardown only covers what was initialized; drop order of the context
//!   guards makes partial teardown automatic on early return.
//! - The extension library stays loaded until GlobalVMState is released.
//! - The entrypoint is never invoked unless `setup` returned normally.
//! - `setup` and the entrypoint both run under the fault trap.

use crate::config::BootConfig;
use crate::context::ExecutionContext;
use crate::error::{BootError, BootResult};
use crate::extension::{ExtensionResolver, SetupHook};
use crate::runtime::{HostOptions, VmRuntime};
use crate::trap::{report_fault, FaultTrap, TrapOutcome};
use log::{error, info};
use std::io::Write;
use std::time::Instant;

/// One-shot bootstrap over a VM and an extension resolver.
pub struct Bootstrap<'a, V: VmRuntime, R: ExtensionResolver> {
    vm: &'a V,
    resolver: &'a R,
    config: &'a BootConfig,
    diagnostics: Box<dyn Write + 'a>,
}

impl<'a, V: VmRuntime, R: ExtensionResolver> Bootstrap<'a, V, R> {
    /// Creates a bootstrap that writes diagnostics to stdout.
    pub fn new(vm: &'a V, resolver: &'a R, config: &'a BootConfig) -> Self {
        Self {
            vm,
            resolver,
            config,
            diagnostics: Box::new(std::io::stdout()),
        }
    }

    /// Redirects diagnostics to `out`.
    pub fn with_diagnostics(mut self, out: impl Write + 'a) -> Self {
        self.diagnostics = Box::new(out);
        self
    }

    /// Runs the full sequence.
    ///
    /// # Errors
    /// Any [`BootError`]. Resources acquired before the failure are released
    /// before this returns.
    pub fn run(&mut self, options: HostOptions) -> BootResult<()> {
        let started_at = Instant::now();
        info!(
            "event=bootstrap module=bootstrap status=start image={} extension={}",
            self.config.image_path.display(),
            self.config.extension_library
        );

        let result = self.run_sequence(options);
        match &result {
            Ok(()) => info!(
                "event=bootstrap module=bootstrap status=ok duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) => {
                error!(
                    "event=bootstrap module=bootstrap status=error duration_ms={} error_code={} error={}",
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                // Faults were already reported with their stack.
                if !matches!(err, BootError::UncaughtFault(_)) {
                    let written = writeln!(self.diagnostics, "{err}")
                        .and_then(|()| self.diagnostics.flush());
                    if let Err(write_err) = written {
                        error!(
                            "event=diagnostics module=bootstrap status=error error_code={} error={write_err}",
                            err.code()
                        );
                    }
                }
            }
        }
        result
    }

    fn run_sequence(&mut self, options: HostOptions) -> BootResult<()> {
        // Declared first so it is dropped after the context.
        let hook: SetupHook;

        let ctx = ExecutionContext::global_init(self.vm)?;
        let code = ctx.load_code(&self.config.image_path)?;
        let mut module = ctx.allocate_module(code)?;
        module.init_module(options)?;
        module.compact_code();

        let trap = FaultTrap::arm(self.vm);
        hook = self
            .resolver
            .resolve(&self.config.extension_library, &self.config.setup_symbol)?;
        let outcome = match trap.invoke_setup(&hook, options) {
            TrapOutcome::Disarmed => {
                let closure = module.entry_closure()?;
                trap.run(&closure)
            }
            triggered => triggered,
        };

        if let TrapOutcome::Triggered(record) = &outcome {
            report_fault(self.vm, record, &mut self.diagnostics);
        }
        module.free_module();
        ctx.global_teardown();

        match outcome {
            TrapOutcome::Disarmed => Ok(()),
            TrapOutcome::Triggered(record) => Err(BootError::UncaughtFault(record)),
        }
    }
}
