//! Native function registry
//!
//! CALL_NATIVE indexes a small fixed table. Handlers are plain function
//! pointers over the VM state: they read their arguments off the operand
//! stack and write human-visible output to the VM's output sink. Tests (and
//! embedders) substitute entries at construction time.

use super::VM;
use crate::error::RuntimeError;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Prints the top 8 stack bytes as an unsigned decimal.
pub const NATIVE_PRINT: u64 = 0;
/// As PRINT, followed by a newline.
pub const NATIVE_PRINTLN: u64 = 1;
/// Loads a dynamic library (host-defined; unsupported in the core build).
pub const NATIVE_LOAD_DLL: u64 = 2;
/// Resolves a function in a loaded library (host-defined; unsupported).
pub const NATIVE_LOAD_FN: u64 = 3;

/// A native handler: full access to the machine, returns into the dispatch
/// loop.
pub type NativeHandler = fn(&mut VM) -> Result<(), RuntimeError>;

#[derive(Clone)]
struct NativeEntry {
    name: &'static str,
    handler: NativeHandler,
}

/// The CALL_NATIVE dispatch table.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    entries: Vec<Option<NativeEntry>>,
}

impl NativeRegistry {
    pub fn empty() -> NativeRegistry {
        NativeRegistry::default()
    }

    /// The standard table: print, println, load-dll, load-fn.
    pub fn standard() -> NativeRegistry {
        let mut registry = NativeRegistry::empty();
        registry.register(NATIVE_PRINT, "print", native_print);
        registry.register(NATIVE_PRINTLN, "println", native_println);
        registry.register(NATIVE_LOAD_DLL, "load-dll", native_load_dll);
        registry.register(NATIVE_LOAD_FN, "load-fn", native_load_fn);
        registry
    }

    /// Install (or replace) a handler under `id`.
    pub fn register(&mut self, id: u64, name: &'static str, handler: NativeHandler) {
        let index = id as usize;
        if index >= self.entries.len() {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(NativeEntry { name, handler });
    }

    pub(super) fn lookup(&self, id: u64) -> Result<NativeHandler, RuntimeError> {
        self.entries
            .get(id as usize)
            .and_then(|e| e.as_ref())
            .map(|e| e.handler)
            .ok_or(RuntimeError::UnknownNative(id))
    }

    pub fn name_of(&self, id: u64) -> Option<&'static str> {
        self.entries
            .get(id as usize)
            .and_then(|e| e.as_ref())
            .map(|e| e.name)
    }
}

fn native_print(vm: &mut VM) -> Result<(), RuntimeError> {
    let value = vm.pop_native_u64()?;
    vm.write_output(format_args!("{value}"))
}

fn native_println(vm: &mut VM) -> Result<(), RuntimeError> {
    let value = vm.pop_native_u64()?;
    vm.write_output(format_args!("{value}\n"))
}

fn native_load_dll(_vm: &mut VM) -> Result<(), RuntimeError> {
    Err(RuntimeError::UnsupportedNative("load-dll"))
}

fn native_load_fn(_vm: &mut VM) -> Result<(), RuntimeError> {
    Err(RuntimeError::UnsupportedNative("load-fn"))
}

/// Where native output goes. Defaults to stdout; swap in a
/// [`CaptureBuffer`] to observe output from tests.
pub type OutputSink = Box<dyn Write>;

pub fn stdout_sink() -> OutputSink {
    Box::new(std::io::stdout())
}

/// A clonable, shareable in-memory sink. Keep one clone, give the other to
/// the VM, read the contents after the run.
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> CaptureBuffer {
        CaptureBuffer::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().unwrap()).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
