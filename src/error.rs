use thiserror::Error;

/// The generic Error type, which covers every failure this library reports through a
/// [`Result`](crate::Result).
///
/// Only the setup and teardown surface of the crate is fallible in this sense: creating
/// storage for the entry pool and the diagnostic buffer, and registering a runtime with the
/// platform dispatcher. Everything that runs on the fault path ([`crate::Runtime::handle_exception`],
/// pushing and popping entries, recording diagnostics) communicates failure through `bool`,
/// [`Option`] or [`crate::Disposition`] instead, because raising anything from inside
/// fault-handling context would itself be fatal.
///
/// # Error Categories
///
/// ## Initialization Errors
/// - [`Error::Allocation`] - The memory provider returned nothing
/// - [`Error::Io`] - The operating system refused a virtual memory mapping
/// - [`Error::Misaligned`] - The provider returned storage that cannot hold the slot type
/// - [`Error::InvalidCapacity`] - The configured capacity is zero or overflows
/// - [`Error::AlreadyInitialized`] - Storage is already present
///
/// ## Dispatcher Errors
/// - [`Error::AlreadyInstalled`] - Another runtime is already registered
/// - [`Error::NotInstalled`] - No runtime is registered
/// - [`Error::Unsupported`] - No dispatcher adapter exists for this target
/// - [`Error::Install`] - The platform rejected the registration
///
/// # Examples
///
/// ```rust
/// use faultline::{Config, Error, Runtime};
///
/// let runtime = Runtime::new(Config::default().with_capacity(0));
/// match runtime.initialize() {
///     Err(Error::InvalidCapacity(capacity)) => assert_eq!(capacity, 0),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The memory provider could not supply the requested storage.
    ///
    /// Returned by [`crate::Runtime::initialize`] when the provider returns nothing. No partial
    /// state is left behind: storage allocated for the entry pool is released again if the
    /// diagnostic buffer cannot be allocated.
    #[error("Memory provider '{provider}' could not allocate {len} bytes")]
    Allocation {
        /// Name of the provider that failed
        provider: &'static str,
        /// The granularity-rounded request size
        len: usize,
    },

    /// Operating system error while creating or releasing a virtual memory mapping.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The provider returned storage that is too small or misaligned for the slot type.
    #[error("Memory provider '{provider}' returned unusable storage - {len} bytes at {address:#x}")]
    Misaligned {
        /// Name of the provider that returned the storage
        provider: &'static str,
        /// Start address of the storage
        address: usize,
        /// Length of the storage in bytes
        len: usize,
    },

    /// The configured table capacity is zero, or the table size overflows `usize`.
    #[error("Invalid table capacity - {0}")]
    InvalidCapacity(usize),

    /// The runtime already owns storage; it must be shut down before it can be initialized again.
    #[error("Runtime is already initialized")]
    AlreadyInitialized,

    /// A runtime is already registered with the platform dispatcher.
    #[error("A runtime is already registered with the exception dispatcher")]
    AlreadyInstalled,

    /// No runtime is registered with the platform dispatcher.
    #[error("No runtime is registered with the exception dispatcher")]
    NotInstalled,

    /// There is no dispatcher adapter for the current target.
    #[error("Exception dispatch is not supported on this target")]
    Unsupported,

    /// The platform refused to register the dispatcher callback.
    #[error("Failed to register exception dispatcher - {0}")]
    Install(String),
}
