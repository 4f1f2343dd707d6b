//! # HoneyOS HVM
//!
//! Host runtime for HoneyOS kernels. A kernel is a WebAssembly module that
//! runs on its own thread against a shared linear memory and talks to the
//! host through a handful of byte registers in that memory:
//!
//! - the kernel fills a transfer buffer and raises the push register,
//! - a relay thread polls the registers and turns each raise into a
//!   [`SystemMessage`],
//! - the [`SystemRouter`] delivers messages to the [`Display`], which keeps a
//!   double-buffered text model and renders it as HTML on every frame.
//!
//! [`Vm`] wires all of this together.

pub mod config;
pub mod display;
pub mod error;
pub mod fetcher;
pub mod kernel;
pub mod memory;
pub mod registers;
pub mod relay;
pub mod systems;
pub mod vm;

pub use config::HvmConfig;
pub use display::{Display, DisplayMode, Surface};
pub use error::{HvmError, Result};
pub use fetcher::{BytesFetcher, FileFetcher, KernelFetcher};
pub use kernel::{KernelContext, KernelEvent, KERNEL_ABORTED};
pub use memory::SharedMemoryRegion;
pub use registers::RegisterTable;
pub use relay::{Relay, RelayHandle};
pub use systems::{Operation, System, SystemMessage, SystemRouter};
pub use vm::{Vm, VmState};
