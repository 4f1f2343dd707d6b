//! Kernel execution context
//!
//! Instantiates the guest module against the shared memory on a dedicated
//! thread, reports its register table, then calls the entry point and blocks
//! there until the guest returns, traps or is terminated.

use crate::error::KernelError;
use crate::memory::SharedMemoryRegion;
use crate::registers::{exports, RegisterTable};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use wasmtime::{Config, Engine, Instance, Linker, Module, Store, TypedFunc};

/// Reason reported when the entry point comes back for any reason.
pub const KERNEL_ABORTED: &str = "Kernel aborted";

/// Events a kernel context sends to the host.
#[derive(Debug, Clone)]
pub enum KernelEvent {
    /// Instantiated; the entry point is about to run.
    Ready {
        registers: RegisterTable,
        memory: SharedMemoryRegion,
    },
    Error { reason: String },
}

/// Engine with the threads proposal and epoch interruption enabled.
pub fn engine() -> Result<Engine, KernelError> {
    let mut config = Config::new();
    config.wasm_threads(true).epoch_interruption(true);
    Engine::new(&config).map_err(KernelError::Engine)
}

struct Instantiated {
    store: Store<()>,
    registers: RegisterTable,
    entry: TypedFunc<(), ()>,
}

fn instantiate(
    engine: &Engine,
    binary: &[u8],
    memory: &SharedMemoryRegion,
) -> Result<Instantiated, KernelError> {
    let module = Module::new(engine, binary).map_err(KernelError::Instantiate)?;

    let mut store = Store::new(engine, ());
    // Any epoch bump past this point interrupts the guest.
    store.set_epoch_deadline(1);

    let mut linker = Linker::new(engine);
    linker
        .define(
            &store,
            exports::MEMORY_MODULE,
            exports::MEMORY_NAME,
            memory.handle().clone(),
        )
        .map_err(KernelError::Instantiate)?;
    let instance = linker
        .instantiate(&mut store, &module)
        .map_err(KernelError::Instantiate)?;

    let registers = RegisterTable {
        buffer_address: read_export(&mut store, &instance, exports::BUFFER_ADDRESS)?,
        buffer_size: read_export(&mut store, &instance, exports::BUFFER_SIZE)?,
        push_register: read_export(&mut store, &instance, exports::PUSH_REGISTER)?,
        swap_register: read_export(&mut store, &instance, exports::SWAP_REGISTER)?,
        clear_register: read_export(&mut store, &instance, exports::CLEAR_REGISTER)?,
    };
    registers.validate(memory.size())?;

    let entry = instance
        .get_typed_func::<(), ()>(&mut store, exports::ENTRY_POINT)
        .map_err(|cause| KernelError::MissingExport {
            name: exports::ENTRY_POINT,
            cause,
        })?;

    Ok(Instantiated {
        store,
        registers,
        entry,
    })
}

fn read_export(
    store: &mut Store<()>,
    instance: &Instance,
    name: &'static str,
) -> Result<u32, KernelError> {
    let func = instance
        .get_typed_func::<(), u32>(&mut *store, name)
        .map_err(|cause| KernelError::MissingExport { name, cause })?;
    func.call(&mut *store, ()).map_err(KernelError::Instantiate)
}

/// Read and validate the register table of `binary` without running its
/// entry point.
///
/// Instantiation still applies the module's data segments to `memory`, so
/// pass a scratch region rather than the one a live kernel is using.
pub fn probe_registers(
    engine: &Engine,
    binary: &[u8],
    memory: &SharedMemoryRegion,
) -> Result<RegisterTable, KernelError> {
    instantiate(engine, binary, memory).map(|instantiated| instantiated.registers)
}

/// Handle to a kernel running on its own thread.
pub struct KernelContext {
    engine: Engine,
    terminated: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl KernelContext {
    /// Start `binary` against `memory`. Load failures and the end of the
    /// entry point arrive on `events`; only a failure to start the thread is
    /// returned here.
    pub fn spawn(
        engine: Engine,
        binary: Vec<u8>,
        memory: SharedMemoryRegion,
        events: Sender<KernelEvent>,
    ) -> Result<Self, KernelError> {
        let terminated = Arc::new(AtomicBool::new(false));
        let context = KernelThread {
            engine: engine.clone(),
            terminated: terminated.clone(),
            events,
        };

        let thread = thread::Builder::new()
            .name("hvm-kernel".to_string())
            .spawn(move || context.run(&binary, &memory))
            .map_err(KernelError::Spawn)?;

        Ok(Self {
            engine,
            terminated,
            thread: Some(thread),
        })
    }

    /// True once the kernel thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Interrupt the guest and wait for its thread.
    ///
    /// The guest traps at its next epoch check (function entry or loop
    /// back-edge). A guest parked in `memory.atomic.wait` is only interrupted
    /// once it wakes.
    pub fn terminate(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.terminated.store(true, Ordering::SeqCst);
        self.engine.increment_epoch();

        if thread.join().is_err() {
            log::error!("Kernel thread panicked");
        }
        log::info!("Kernel terminated");
    }
}

impl Drop for KernelContext {
    fn drop(&mut self) {
        self.terminate();
    }
}

struct KernelThread {
    engine: Engine,
    terminated: Arc<AtomicBool>,
    events: Sender<KernelEvent>,
}

impl KernelThread {
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn report(&self, event: KernelEvent) -> bool {
        if self.events.send(event).is_err() {
            log::debug!("Kernel host channel closed");
            return false;
        }
        true
    }

    fn run(self, binary: &[u8], memory: &SharedMemoryRegion) {
        let Instantiated {
            mut store,
            registers,
            entry,
        } = match instantiate(&self.engine, binary, memory) {
            Ok(instantiated) => instantiated,
            Err(e) => {
                if !self.is_terminated() {
                    log::error!("{}", e);
                    self.report(KernelEvent::Error { reason: e.to_string() });
                }
                return;
            }
        };

        if self.is_terminated() {
            return;
        }

        log::info!(
            "Kernel instantiated: buffer {:#x}+{}, push={:#x} swap={:#x} clear={:#x}",
            registers.buffer_address,
            registers.buffer_size,
            registers.push_register,
            registers.swap_register,
            registers.clear_register
        );
        if !self.report(KernelEvent::Ready {
            registers,
            memory: memory.clone(),
        }) {
            return;
        }

        let result = entry.call(&mut store, ());

        if self.is_terminated() {
            log::debug!("Kernel interrupted by host");
            return;
        }
        match result {
            Ok(()) => log::warn!("Kernel returned from {}", exports::ENTRY_POINT),
            Err(e) => log::error!("Kernel trapped: {:#}", e),
        }
        self.report(KernelEvent::Error {
            reason: KERNEL_ABORTED.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use std::time::Duration;

    const EXPORTS: &str = r#"
        (func (export "_textmode_transfer_buffer_addr") (result i32) i32.const 2048)
        (func (export "_textmode_transfer_buffer_size") (result i32) i32.const 8)
        (func (export "_textmode_transfer_push_register_addr") (result i32) i32.const 1024)
        (func (export "_textmode_transfer_swap_register_addr") (result i32) i32.const 1025)
        (func (export "_textmode_transfer_clear_register_addr") (result i32) i32.const 1026)
    "#;

    fn kernel(body: &str) -> Vec<u8> {
        format!(
            r#"(module
                (import "env" "memory" (memory 2 2 shared))
                (data (i32.const 2048) "hello, h")
                {EXPORTS}
                {body})"#
        )
        .into_bytes()
    }

    fn start(binary: Vec<u8>) -> (KernelContext, Receiver<KernelEvent>, SharedMemoryRegion) {
        let engine = engine().unwrap();
        let memory = SharedMemoryRegion::new(&engine, 2, 2).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let context = KernelContext::spawn(engine, binary, memory.clone(), tx).unwrap();
        (context, rx, memory)
    }

    fn next(rx: &Receiver<KernelEvent>) -> KernelEvent {
        rx.recv_timeout(Duration::from_secs(10)).unwrap()
    }

    fn error_reason(event: KernelEvent) -> String {
        match event {
            KernelEvent::Error { reason } => reason,
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn reports_registers_then_aborts_when_entry_returns() {
        let (mut context, rx, memory) = start(kernel(r#"(func (export "_start"))"#));

        match next(&rx) {
            KernelEvent::Ready { registers, .. } => {
                assert_eq!(registers.buffer_address, 2048);
                assert_eq!(registers.buffer_size, 8);
                assert_eq!(registers.push_register, 1024);
                assert_eq!(registers.swap_register, 1025);
                assert_eq!(registers.clear_register, 1026);
            }
            other => panic!("expected ready event, got {other:?}"),
        }
        assert_eq!(error_reason(next(&rx)), KERNEL_ABORTED);
        assert_eq!(memory.read_bytes(2048, 8).unwrap(), b"hello, h");

        context.terminate();
        assert!(context.is_finished());
    }

    #[test]
    fn trap_is_reported_as_abort() {
        let (_context, rx, _memory) = start(kernel(r#"(func (export "_start") unreachable)"#));

        assert!(matches!(next(&rx), KernelEvent::Ready { .. }));
        assert_eq!(error_reason(next(&rx)), KERNEL_ABORTED);
    }

    #[test]
    fn invalid_binary_is_an_instantiation_error() {
        let (_context, rx, _memory) = start(b"\0asm\x01\0\0\0garbage".to_vec());

        let reason = error_reason(next(&rx));
        assert!(reason.starts_with("Failed to instantiate kernel"), "{reason}");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn missing_accessor_names_the_export() {
        let binary = br#"(module
            (import "env" "memory" (memory 2 2 shared))
            (func (export "_textmode_transfer_buffer_addr") (result i32) i32.const 2048)
            (func (export "_start")))"#;
        let (_context, rx, _memory) = start(binary.to_vec());

        let reason = error_reason(next(&rx));
        assert!(reason.contains("_textmode_transfer_buffer_size"), "{reason}");
    }

    #[test]
    fn out_of_range_registers_fail_the_load() {
        let binary = br#"(module
            (import "env" "memory" (memory 2 2 shared))
            (func (export "_textmode_transfer_buffer_addr") (result i32) i32.const 2048)
            (func (export "_textmode_transfer_buffer_size") (result i32) i32.const 8)
            (func (export "_textmode_transfer_push_register_addr") (result i32) i32.const 200000)
            (func (export "_textmode_transfer_swap_register_addr") (result i32) i32.const 1025)
            (func (export "_textmode_transfer_clear_register_addr") (result i32) i32.const 1026)
            (func (export "_start") unreachable))"#;
        let (_context, rx, _memory) = start(binary.to_vec());

        let reason = error_reason(next(&rx));
        assert!(reason.contains("invalid register table"), "{reason}");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn terminate_stops_an_infinite_loop_silently() {
        let (mut context, rx, _memory) = start(kernel(
            r#"(func (export "_start") (loop $forever (br $forever)))"#,
        ));

        assert!(matches!(next(&rx), KernelEvent::Ready { .. }));
        assert!(!context.is_finished());

        context.terminate();

        assert!(context.is_finished());
        assert!(rx.try_recv().is_err());
        context.terminate();
    }

    #[test]
    fn probe_reads_table_without_running_entry() {
        let engine = engine().unwrap();
        let memory = SharedMemoryRegion::new(&engine, 2, 2).unwrap();
        let binary = kernel(
            r#"(func (export "_start") (i32.atomic.store8 (i32.const 1025) (i32.const 1)))"#,
        );

        let registers = probe_registers(&engine, &binary, &memory).unwrap();

        assert_eq!(registers.buffer_range(), 2048..2056);
        assert_eq!(memory.load_u8(1025).unwrap(), 0);
    }

    #[test]
    fn probe_rejects_mismatched_memory() {
        let engine = engine().unwrap();
        let memory = SharedMemoryRegion::new(&engine, 1, 1).unwrap();
        let binary = kernel(r#"(func (export "_start"))"#);

        assert!(matches!(
            probe_registers(&engine, &binary, &memory),
            Err(KernelError::Instantiate(_))
        ));
    }
}
