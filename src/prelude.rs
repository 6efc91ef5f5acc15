//! # faultline Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the
//! faultline library. Import it to get quick access to everything needed to set up a runtime,
//! open protected regions and drive the interceptor.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all faultline operations
pub use crate::Error;

/// The result type used throughout faultline
pub use crate::Result;

/// Runtime configuration
pub use crate::Config;

// ================================================================================================
// Runtime and Region Protocol
// ================================================================================================

/// The engine
pub use crate::Runtime;

/// Scoped regions and entry helper description
pub use crate::{EntryFrame, RegionGuard};

/// Trap-signalled transitions
pub use crate::{Request, ENTER_REGION_SENTINEL, EXIT_REGION_SENTINEL};

// ================================================================================================
// Pool and Diagnostics
// ================================================================================================

/// Saved region entries
pub use crate::{Entry, EntryPool, Ticket};

/// Recorded faults
pub use crate::{DiagnosticRecord, RecordBuffer};

// ================================================================================================
// Exceptions and Register State
// ================================================================================================

/// Exception descriptions handed to the interceptor
pub use crate::{AccessKind, Disposition, ExceptionCode, ExceptionFlags, ExceptionRecord};

/// Register snapshots
pub use crate::{Architecture, Arm64Context, CpuContext, X64Context, X86Context};

/// Thread identity
pub use crate::ThreadId;

// ================================================================================================
// Storage
// ================================================================================================

/// Storage providers
pub use crate::memory::{HeapMemory, Provider, VirtualMemory};
