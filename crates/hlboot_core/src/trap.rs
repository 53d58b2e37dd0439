//! Fault trap around entrypoint dispatch.
//!
//! # Responsibility
//! - Turn an uncaught VM fault into a [`FaultRecord`] instead of a crash.
//! - Report the fault and its call stack on the diagnostics stream.
//!
//! # Invariants
//! - Every VM call made through an armed trap is guarded, including the
//!   extension `setup` hook.
//! - `Triggered` is only produced when the guarded call faulted.

use crate::extension::SetupHook;
use crate::runtime::{Closure, HostOptions, VmRuntime};
use log::{error, info};
use std::io::{self, Write};

/// Uncaught fault captured at the trap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    pub message: String,
    /// Call-site labels, innermost first.
    pub stack: Vec<String>,
}

impl FaultRecord {
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Writes the fault line followed by one `Called from` line per frame.
    pub fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Uncaught exception: {}", self.message)?;
        for label in &self.stack {
            writeln!(out, "Called from {label}")?;
        }
        out.flush()
    }
}

/// Result of a guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapOutcome {
    /// The call returned normally.
    Disarmed,
    /// The call raised a fault.
    Triggered(FaultRecord),
}

/// Armed trap over the VM calls of one bootstrap run.
pub struct FaultTrap<'vm, V: VmRuntime> {
    vm: &'vm V,
}

impl<'vm, V: VmRuntime> FaultTrap<'vm, V> {
    pub fn arm(vm: &'vm V) -> Self {
        Self { vm }
    }

    /// Runs the extension `setup` hook under the trap.
    pub fn invoke_setup(&self, hook: &SetupHook, options: HostOptions) -> TrapOutcome {
        match self.vm.call_setup(hook, options) {
            Ok(()) => {
                info!(
                    "event=extension_setup module=trap status=ok library={} symbol={}",
                    hook.library(),
                    hook.symbol()
                );
                TrapOutcome::Disarmed
            }
            Err(fault) => self.capture("extension_setup", &fault),
        }
    }

    /// Runs `closure` under the trap.
    pub fn run(&self, closure: &Closure<V>) -> TrapOutcome {
        match self.vm.call(closure) {
            Ok(()) => {
                info!("event=entrypoint module=trap status=ok");
                TrapOutcome::Disarmed
            }
            Err(fault) => self.capture("entrypoint", &fault),
        }
    }

    fn capture(&self, event: &str, fault: &V::Fault) -> TrapOutcome {
        let record = FaultRecord {
            message: self.vm.describe_fault(fault),
            stack: self.vm.exception_stack(),
        };
        error!(
            "event={event} module=trap status=error error_code=uncaught_fault depth={} error={}",
            record.depth(),
            record.message
        );
        TrapOutcome::Triggered(record)
    }
}

/// Prints `record` to `out`, then gives an attached debugger a chance to
/// stop. The break hook only fires in debug builds.
pub fn report_fault<V: VmRuntime>(vm: &V, record: &FaultRecord, out: &mut dyn Write) {
    if let Err(err) = record.write_report(out) {
        error!("event=fault_report module=trap status=error error={err}");
    }
    if cfg!(debug_assertions) {
        vm.debug_break();
    }
}
