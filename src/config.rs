//! Runtime configuration.
//!
//! A [`Config`] fixes everything a [`Runtime`](crate::Runtime) needs to know before it is
//! initialized: how many regions may be open at once, whether faults are recorded for later
//! inspection, whether the trap-signalled boundary protocol is honoured, and where the
//! storage comes from.
//!
//! # Configuration Presets
//!
//! - [`Config::default()`] - 64 slots, diagnostics off, trap protocol on, virtual memory
//! - [`Config::diagnostic()`] - as default, with the diagnostic record buffer enabled
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use faultline::{memory::HeapMemory, Config};
//!
//! // Use a preset
//! let config = Config::diagnostic();
//!
//! // Or customize
//! let config = Config::default()
//!     .with_capacity(256)
//!     .with_trap_protocol(false)
//!     .with_provider(Arc::new(HeapMemory::default()));
//! assert!(config.validate().is_ok());
//! ```

use std::sync::Arc;

use crate::{
    memory::{Provider, VirtualMemory},
    Error::InvalidCapacity,
    Result,
};

/// Number of pool slots used when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 64;

/// Configuration of a [`Runtime`](crate::Runtime).
///
/// The provider decides the privilege-dependent part of the runtime: a process hosts the
/// engine on [`VirtualMemory`], while environments without an address-space API plug in
/// their own [`Provider`] (for example one handing out non-paged pool memory).
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of entry pool slots, and of diagnostic records when enabled.
    ///
    /// Bounds the number of protected regions open at the same time across all threads.
    pub capacity: usize,

    /// Whether intercepted faults are recorded per thread.
    pub diagnostics: bool,

    /// Whether breakpoint traps carrying a boundary sentinel are decoded as region
    /// transitions.
    ///
    /// Disable when regions are only entered through the direct calls, so every breakpoint
    /// is treated as an ordinary fault.
    pub trap_protocol: bool,

    /// Source of the pool and record storage.
    pub provider: Arc<dyn Provider>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            capacity: DEFAULT_CAPACITY,
            diagnostics: false,
            trap_protocol: true,
            provider: Arc::new(VirtualMemory::new()),
        }
    }
}

impl Config {
    /// Creates a configuration that records every intercepted fault.
    ///
    /// # Settings
    ///
    /// - **Capacity**: [`DEFAULT_CAPACITY`]
    /// - **Diagnostics**: Enabled
    /// - **Trap protocol**: Enabled
    /// - **Provider**: [`VirtualMemory`]
    #[must_use]
    pub fn diagnostic() -> Self {
        Config {
            diagnostics: true,
            ..Default::default()
        }
    }

    /// Sets the pool capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of slots; must be non-zero
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enables or disables the diagnostic record buffer.
    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Enables or disables the trap-signalled boundary protocol.
    #[must_use]
    pub fn with_trap_protocol(mut self, enabled: bool) -> Self {
        self.trap_protocol = enabled;
        self
    }

    /// Sets the storage provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = provider;
        self
    }

    /// Checks the configuration for values that can never initialize.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCapacity`] if the capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(InvalidCapacity(self.capacity));
        }
        Ok(())
    }
}
