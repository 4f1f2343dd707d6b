//! Communication relay
//!
//! Watches the guest's trigger registers in shared memory and turns each
//! observed transition into a [`SystemMessage`] for the host. The relay never
//! touches the display itself.
//!
//! Per cycle the registers are checked in the order clear, push, swap, so a
//! frame issued as clear → push → swap reaches the display in that order.
//! A message is handed to the host before its register is reset: once the
//! guest sees the register back at zero, the request is already queued and
//! the transfer buffer has been copied out.

use crate::error::MemoryError;
use crate::memory::SharedMemoryRegion;
use crate::registers::{RegisterTable, Trigger};
use crate::systems::{Operation, SystemMessage};
use crossbeam_channel::Sender;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Relay {
    memory: SharedMemoryRegion,
    registers: RegisterTable,
}

impl Relay {
    pub fn new(memory: SharedMemoryRegion, registers: RegisterTable) -> Self {
        Self { memory, registers }
    }

    pub fn registers(&self) -> &RegisterTable {
        &self.registers
    }

    /// Run one polling cycle, handing each message to `emit`.
    ///
    /// Faults are logged and the affected register is skipped; the next
    /// cycle tries again. Returns the number of messages emitted.
    pub fn poll_once(&self, mut emit: impl FnMut(SystemMessage)) -> usize {
        let mut emitted = 0;
        for trigger in Trigger::POLL_ORDER {
            match self.check(trigger, &mut emit) {
                Ok(true) => emitted += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Relay fault on {} register: {}", trigger.name(), e),
            }
        }
        emitted
    }

    fn check(
        &self,
        trigger: Trigger,
        emit: &mut impl FnMut(SystemMessage),
    ) -> Result<bool, MemoryError> {
        let address = self.registers.address(trigger) as usize;
        if self.memory.load_u8(address)? == 0 {
            return Ok(false);
        }

        let operation = match trigger {
            Trigger::Clear => Operation::TextModeClear,
            Trigger::Push => {
                let range = self.registers.buffer_range();
                Operation::TextModePushChars(self.memory.read_bytes(range.start, range.len())?)
            }
            Trigger::Swap => Operation::TextModeSwap,
        };

        log::trace!("Relay observed {} request", trigger.name());
        emit(SystemMessage::display(operation));
        self.memory.store_u8(address, 0)?;
        Ok(true)
    }

    /// Move the relay onto its own thread, forwarding messages to `tx`.
    ///
    /// The loop sleeps `poll_interval` between cycles (or just yields when it
    /// is zero) and runs until the handle is cancelled or the host side of
    /// the channel is gone.
    pub fn spawn(
        self,
        tx: Sender<SystemMessage>,
        poll_interval: Duration,
    ) -> io::Result<RelayHandle> {
        let cancel = Arc::new(AtomicBool::new(false));
        let stop = cancel.clone();

        let thread = thread::Builder::new()
            .name("hvm-relay".to_string())
            .spawn(move || {
                log::info!(
                    "Relay polling registers (push={:#x} swap={:#x} clear={:#x})",
                    self.registers.push_register,
                    self.registers.swap_register,
                    self.registers.clear_register
                );

                let mut hung_up = false;
                while !stop.load(Ordering::Acquire) && !hung_up {
                    self.poll_once(|message| {
                        if tx.send(message).is_err() {
                            hung_up = true;
                        }
                    });

                    if poll_interval.is_zero() {
                        thread::yield_now();
                    } else {
                        thread::sleep(poll_interval);
                    }
                }

                if hung_up {
                    log::debug!("Relay host channel closed, stopping");
                } else {
                    log::debug!("Relay cancelled");
                }
            })?;

        Ok(RelayHandle {
            cancel,
            thread: Some(thread),
        })
    }
}

/// Owner of a running relay thread. Dropping it cancels the relay.
pub struct RelayHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Relay thread panicked");
            }
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
