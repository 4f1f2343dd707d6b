//! Text-mode register table
//!
//! The guest exposes five accessor exports that report where its transfer
//! buffer and trigger registers live in shared memory. The host reads them
//! once after instantiation and validates them against the memory size.

use crate::error::RegisterError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Names of the exports a kernel binary must provide.
pub mod exports {
    pub const BUFFER_ADDRESS: &str = "_textmode_transfer_buffer_addr";
    pub const BUFFER_SIZE: &str = "_textmode_transfer_buffer_size";
    pub const PUSH_REGISTER: &str = "_textmode_transfer_push_register_addr";
    pub const SWAP_REGISTER: &str = "_textmode_transfer_swap_register_addr";
    pub const CLEAR_REGISTER: &str = "_textmode_transfer_clear_register_addr";
    pub const ENTRY_POINT: &str = "_start";

    /// Import slot the shared memory is provided under
    pub const MEMORY_MODULE: &str = "env";
    pub const MEMORY_NAME: &str = "memory";
}

/// One of the three trigger registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Clear,
    Push,
    Swap,
}

impl Trigger {
    /// Order in which the relay inspects the registers every cycle.
    pub const POLL_ORDER: [Trigger; 3] = [Trigger::Clear, Trigger::Push, Trigger::Swap];

    pub fn name(self) -> &'static str {
        match self {
            Trigger::Clear => "clear",
            Trigger::Push => "push",
            Trigger::Swap => "swap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTable {
    pub buffer_address: u32,
    pub buffer_size: u32,
    pub push_register: u32,
    pub swap_register: u32,
    pub clear_register: u32,
}

impl RegisterTable {
    pub fn address(&self, trigger: Trigger) -> u32 {
        match trigger {
            Trigger::Clear => self.clear_register,
            Trigger::Push => self.push_register,
            Trigger::Swap => self.swap_register,
        }
    }

    pub fn buffer_range(&self) -> Range<usize> {
        let start = self.buffer_address as usize;
        start..start + self.buffer_size as usize
    }

    /// Check the table against a shared memory of `size` bytes.
    pub fn validate(&self, size: usize) -> Result<(), RegisterError> {
        let end = (self.buffer_address as usize).checked_add(self.buffer_size as usize);
        if self.buffer_address as usize >= size || end.map_or(true, |end| end > size) {
            return Err(RegisterError::BufferOutOfRange {
                address: self.buffer_address,
                len: self.buffer_size,
                size,
            });
        }

        for trigger in Trigger::POLL_ORDER {
            let address = self.address(trigger);
            if address as usize >= size {
                return Err(RegisterError::AddressOutOfRange {
                    register: trigger.name(),
                    address,
                    size,
                });
            }
            if self.buffer_range().contains(&(address as usize)) {
                return Err(RegisterError::InsideBuffer {
                    register: trigger.name(),
                    address,
                });
            }
        }

        for (i, first) in Trigger::POLL_ORDER.iter().enumerate() {
            for second in &Trigger::POLL_ORDER[i + 1..] {
                if self.address(*first) == self.address(*second) {
                    return Err(RegisterError::SharedAddress {
                        first: first.name(),
                        second: second.name(),
                        address: self.address(*first),
                    });
                }
            }
        }

        Ok(())
    }
}
