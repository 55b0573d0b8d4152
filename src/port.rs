//! Contracts the core requires of its external collaborators (§2, §6):
//! the NIC adapter that owns Ethernet I/O and per-slot storage, a
//! monotonic clock for timeouts, and the master's wall clock for DC time
//! propagation. The core is generic over these traits and never assumes a
//! concrete socket, OS, or allocator.

use crate::error::CoreError;
use crate::index_table::SlotState;

/// A monotonic clock reporting microseconds. Used only to bound suspension
/// points (§5); never consulted for wall-clock semantics.
pub trait MonotonicClock {
    fn now_us(&self) -> u64;
}

/// The master's wall clock, reporting whole seconds and the microsecond
/// remainder since the POSIX epoch. The core derives EtherCAT-epoch
/// nanoseconds from this (§6).
pub trait MasterClock {
    fn now_unix(&self) -> (u64, u32);
}

/// The NIC adapter contract (§6). Implementations own Ethernet-frame I/O,
/// index allocation, and the storage behind each slot's `txbuf`/`rxbuf`;
/// the core only ever reaches them through this trait.
///
/// `alloc_index`/`release_index` and the buffer/length accessors are
/// expected to be backed by an [`crate::index_table::IndexTable`], but the
/// trait does not require it — an adapter may wrap hardware DMA buffers
/// directly as long as the same exclusivity contract holds.
pub trait NicPort {
    /// Allocates a currently-EMPTY slot and transitions it to ALLOC.
    /// Fails with [`CoreError::NoFreeIndex`] if none is free within the
    /// implementation's retry bound.
    fn alloc_index(&self) -> Result<u8, CoreError>;

    /// Returns a slot to EMPTY. Idempotent for a slot that is already
    /// EMPTY.
    fn release_index(&self, index: u8);

    /// Explicit state transition, used by the engine to record ALLOC→TX
    /// and RCVD→COMPLETE without going through `send`/`recv`.
    fn set_state(&self, index: u8, state: SlotState);

    /// The transmit buffer for `index`, sized to hold one Ethernet frame.
    /// Exclusive to whoever currently holds `index` (§5).
    fn tx_buffer(&self, index: u8) -> &mut [u8];

    /// The bytes most recently received for `index` (Ethernet header
    /// already stripped).
    fn rx_buffer(&self, index: u8) -> &[u8];

    /// Current length of the built TX frame in `tx_buffer(index)`.
    fn tx_len(&self, index: u8) -> usize;

    /// Records the length of the built TX frame after `setup`/`append`.
    fn set_tx_len(&self, index: u8, len: usize);

    /// Transmits the frame currently built in `tx_buffer(index)`.
    fn send(&self, index: u8) -> Result<(), CoreError>;

    /// Blocks up to `timeout_us` for a reply whose embedded index matches
    /// `index`. Returns the datagram chain's aggregate WKC, or `None` on
    /// timeout / an unmatched reply (the engine maps this to
    /// [`crate::engine::NO_FRAME`]).
    fn recv(&self, index: u8, timeout_us: u32) -> Option<u16>;
}
