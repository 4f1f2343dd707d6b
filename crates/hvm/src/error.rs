//! Error types for the HVM host runtime

use std::path::PathBuf;
use thiserror::Error;

/// Failures while touching the shared kernel memory.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to allocate shared memory ({initial_pages}..{max_pages} pages): {reason}")]
    Allocate {
        initial_pages: u32,
        max_pages: u32,
        reason: String,
    },

    #[error("shared memory access out of bounds: {addr:#x}+{len} exceeds {size:#x}")]
    OutOfBounds { addr: usize, len: usize, size: usize },

    #[error("failed to grow shared memory by {delta_pages} pages: {reason}")]
    Grow { delta_pages: u64, reason: String },
}

/// A register table that does not fit the memory it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("{register} register at {address:#x} is outside shared memory of {size:#x} bytes")]
    AddressOutOfRange {
        register: &'static str,
        address: u32,
        size: usize,
    },

    #[error("transfer buffer {address:#x}+{len} does not fit shared memory of {size:#x} bytes")]
    BufferOutOfRange { address: u32, len: u32, size: usize },

    #[error("{first} and {second} registers share address {address:#x}")]
    SharedAddress {
        first: &'static str,
        second: &'static str,
        address: u32,
    },

    #[error("{register} register at {address:#x} lies inside the transfer buffer")]
    InsideBuffer { register: &'static str, address: u32 },
}

/// Failure to obtain the kernel binary.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel binary is empty")]
    Empty,
}

/// Failures while bringing a kernel up.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("failed to create wasm engine: {0:#}")]
    Engine(wasmtime::Error),

    #[error("Failed to instantiate kernel: {0:#}")]
    Instantiate(wasmtime::Error),

    #[error("Failed to instantiate kernel: missing export `{name}`: {cause:#}")]
    MissingExport {
        name: &'static str,
        cause: wasmtime::Error,
    },

    #[error("Failed to instantiate kernel: invalid register table: {0}")]
    Registers(#[from] RegisterError),

    #[error("failed to spawn kernel thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Routing table misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("System of type {0} already registered")]
    DuplicateSystem(String),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Any error surfaced by the HVM library.
#[derive(Debug, Error)]
pub enum HvmError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Registers(#[from] RegisterError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("VM already initialized (state {0})")]
    AlreadyInitialized(String),
}

pub type Result<T, E = HvmError> = std::result::Result<T, E>;
