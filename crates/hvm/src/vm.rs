//! VM orchestrator
//!
//! A [`Vm`] owns one kernel instance and everything around it: the shared
//! memory, the kernel and relay contexts, the system router and the display.
//! The host drives it from its frame clock through [`Vm::frame`].

use crate::config::HvmConfig;
use crate::display::{Display, Surface};
use crate::error::{HvmError, RouterError};
use crate::fetcher::KernelFetcher;
use crate::kernel::{self, KernelContext, KernelEvent};
use crate::memory::SharedMemoryRegion;
use crate::registers::RegisterTable;
use crate::relay::{Relay, RelayHandle};
use crate::systems::{System, SystemMessage, SystemRouter, DISPLAY_SYSTEM};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use wasmtime::Engine;

/// Lifecycle of a [`Vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Constructed, no kernel loaded yet
    Idle,
    /// Kernel spawned, waiting for its register table
    Loading,
    /// Relay running
    Running,
    /// Load failed or the kernel aborted
    Failed,
    Terminated,
}

pub struct Vm {
    config: HvmConfig,
    engine: Engine,
    router: SystemRouter,
    display: Arc<Display>,
    memory: Option<SharedMemoryRegion>,
    registers: Option<RegisterTable>,
    kernel: Option<KernelContext>,
    relay: Option<RelayHandle>,
    kernel_tx: Sender<KernelEvent>,
    kernel_rx: Receiver<KernelEvent>,
    message_tx: Sender<SystemMessage>,
    message_rx: Receiver<SystemMessage>,
    state: VmState,
}

impl Vm {
    /// Create an idle VM with the display registered as `"display"`.
    pub fn new(config: HvmConfig) -> Result<Self, HvmError> {
        config.validate()?;
        let engine = kernel::engine()?;

        let display = Arc::new(Display::new());
        let mut router = SystemRouter::new();
        router.register(DISPLAY_SYSTEM, display.clone())?;

        let (kernel_tx, kernel_rx) = crossbeam_channel::unbounded();
        let (message_tx, message_rx) = crossbeam_channel::unbounded();

        Ok(Self {
            config,
            engine,
            router,
            display,
            memory: None,
            registers: None,
            kernel: None,
            relay: None,
            kernel_tx,
            kernel_rx,
            message_tx,
            message_rx,
            state: VmState::Idle,
        })
    }

    pub fn config(&self) -> &HvmConfig {
        &self.config
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn display(&self) -> &Arc<Display> {
        &self.display
    }

    /// Register table reported by the kernel, once it is running.
    pub fn registers(&self) -> Option<&RegisterTable> {
        self.registers.as_ref()
    }

    /// Add another host system to the router.
    pub fn register_system(
        &mut self,
        name: impl Into<String>,
        system: Arc<dyn System>,
    ) -> Result<(), RouterError> {
        self.router.register(name, system)
    }

    /// Allocate memory, fetch the kernel and start it.
    ///
    /// A kernel that cannot be fetched is reported on the display and leaves
    /// the VM in [`VmState::Failed`]; that is not an error for the caller.
    /// Instantiation problems arrive later through [`Vm::pump`].
    pub fn init(&mut self, fetcher: &dyn KernelFetcher) -> Result<(), HvmError> {
        if self.state != VmState::Idle {
            return Err(HvmError::AlreadyInitialized(format!("{:?}", self.state)));
        }
        self.state = VmState::Loading;
        log::info!("Loading kernel from {}", fetcher.source());

        let memory = SharedMemoryRegion::new(
            &self.engine,
            self.config.memory.initial_pages,
            self.config.memory.max_pages,
        )
        .inspect_err(|_| self.state = VmState::Failed)?;

        let binary = match fetcher.fetch() {
            Ok(binary) => binary,
            Err(e) => {
                log::error!("Failed to load kernel: {}", e);
                self.display.report(&format!("Failed to load kernel: {e}"));
                self.state = VmState::Failed;
                return Ok(());
            }
        };
        log::debug!("Fetched kernel: {} bytes", binary.len());

        let context = KernelContext::spawn(
            self.engine.clone(),
            binary,
            memory.clone(),
            self.kernel_tx.clone(),
        )
        .inspect_err(|_| self.state = VmState::Failed)?;

        self.memory = Some(memory);
        self.kernel = Some(context);
        Ok(())
    }

    /// Handle pending kernel events and route pending relay messages.
    /// Returns the number of messages delivered to a system.
    pub fn pump(&mut self) -> usize {
        // Events are taken first so every message the relay queued before an
        // event was raised is routed ahead of it.
        let events: Vec<KernelEvent> = self.kernel_rx.try_iter().collect();

        let mut routed = self.route_pending();
        for event in events {
            routed += self.handle_kernel_event(event);
        }
        routed
    }

    fn route_pending(&self) -> usize {
        self.message_rx
            .try_iter()
            .filter(|message| self.router.dispatch(message))
            .count()
    }

    /// Stop the relay, then route what it had queued plus one last cycle
    /// over the registers, so requests the guest raised just before it
    /// stopped still reach their systems.
    fn flush_relay(&mut self) -> usize {
        let Some(mut relay) = self.relay.take() else {
            return 0;
        };
        relay.cancel();

        let mut routed = self.route_pending();
        if let (Some(memory), Some(registers)) = (&self.memory, self.registers) {
            Relay::new(memory.clone(), registers).poll_once(|message| {
                if self.router.dispatch(&message) {
                    routed += 1;
                }
            });
        }
        log::debug!("Relay stopped after {} final messages", routed);
        routed
    }

    fn handle_kernel_event(&mut self, event: KernelEvent) -> usize {
        if self.state != VmState::Loading && self.state != VmState::Running {
            log::debug!("Ignoring kernel event in state {:?}", self.state);
            return 0;
        }

        match event {
            KernelEvent::Ready { registers, memory } => {
                let relay = Relay::new(memory, registers);
                match relay.spawn(self.message_tx.clone(), self.config.relay.poll_interval()) {
                    Ok(handle) => {
                        self.relay = Some(handle);
                        self.registers = Some(registers);
                        self.state = VmState::Running;
                        log::info!("Kernel running");
                    }
                    Err(e) => {
                        log::error!("Failed to start relay: {}", e);
                        self.display.report(&format!("Failed to start relay: {e}"));
                        self.state = VmState::Failed;
                    }
                }
                0
            }
            KernelEvent::Error { reason } => {
                log::error!("Kernel error: {}", reason);
                // The notice goes on the visible buffer, so the guest's last
                // swap has to land first.
                let routed = self.flush_relay();
                self.display.report(&reason);
                self.state = VmState::Failed;
                routed
            }
        }
    }

    /// Whether a relay thread is polling this VM's registers.
    pub fn is_relay_running(&self) -> bool {
        self.relay.as_ref().is_some_and(RelayHandle::is_running)
    }

    /// One display tick. Returns whether the surface changed.
    pub fn render(&self, surface: &mut dyn Surface) -> bool {
        self.display.render(surface)
    }

    /// Pump then render.
    pub fn frame(&mut self, surface: &mut dyn Surface) -> bool {
        self.pump();
        self.render(surface)
    }

    /// Stop the kernel and relay and release the shared memory.
    pub fn terminate(&mut self) {
        if self.state == VmState::Terminated {
            return;
        }

        if let Some(mut kernel) = self.kernel.take() {
            kernel.terminate();
        }
        if let Some(mut relay) = self.relay.take() {
            relay.cancel();
        }
        self.memory = None;
        self.state = VmState::Terminated;
        log::info!("VM terminated");
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::BufferSurface;
    use crate::fetcher::BytesFetcher;
    use std::time::{Duration, Instant};

    fn frame_until(vm: &mut Vm, surface: &mut BufferSurface, done: impl Fn(&Vm) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(vm) {
            assert!(Instant::now() < deadline, "timed out in state {:?}", vm.state());
            vm.frame(surface);
            std::thread::sleep(Duration::from_millis(1));
        }
        vm.frame(surface);
    }

    #[test]
    fn starts_idle_with_display_registered() {
        let mut vm = Vm::new(HvmConfig::default()).unwrap();

        assert_eq!(vm.state(), VmState::Idle);
        assert!(vm.registers().is_none());
        assert_eq!(
            vm.register_system(DISPLAY_SYSTEM, Arc::new(Display::new())),
            Err(RouterError::DuplicateSystem(DISPLAY_SYSTEM.to_string()))
        );
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = HvmConfig::default();
        config.memory.initial_pages = 0;
        assert!(matches!(Vm::new(config), Err(HvmError::Config(_))));
    }

    #[test]
    fn fetch_failure_is_shown_on_display() {
        let mut vm = Vm::new(HvmConfig::default()).unwrap();
        let mut surface = BufferSurface::new(16.0, 160.0);

        vm.init(&BytesFetcher::new(Vec::new())).unwrap();

        assert_eq!(vm.state(), VmState::Failed);
        assert!(vm.frame(&mut surface));
        assert_eq!(surface.markup(), "Failed to load kernel: kernel binary is empty\n");
    }

    #[test]
    fn instantiation_failure_is_shown_on_display() {
        let mut vm = Vm::new(HvmConfig::default()).unwrap();
        let mut surface = BufferSurface::new(16.0, 160.0);

        vm.init(&BytesFetcher::new(&b"(module (func (export \"_start\")))"[..])).unwrap();
        frame_until(&mut vm, &mut surface, |vm| vm.state() == VmState::Failed);

        assert!(surface.markup().starts_with("Failed to instantiate kernel"));
        assert!(vm.registers().is_none());
    }

    #[test]
    fn init_twice_is_an_error() {
        let mut vm = Vm::new(HvmConfig::default()).unwrap();
        vm.init(&BytesFetcher::new(Vec::new())).unwrap();

        assert!(matches!(
            vm.init(&BytesFetcher::new(Vec::new())),
            Err(HvmError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut vm = Vm::new(HvmConfig::default()).unwrap();
        vm.terminate();
        vm.terminate();

        assert_eq!(vm.state(), VmState::Terminated);
        assert!(matches!(
            vm.init(&BytesFetcher::new(Vec::new())),
            Err(HvmError::AlreadyInitialized(_))
        ));
    }
}
