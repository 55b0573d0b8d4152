//! Error taxonomy for the framing/transaction core.
//!
//! `NoFrame` (timeout or unmatched reply) is deliberately absent here: the
//! engine reports it as a value of [`crate::engine::Wkc`], not as an `Err`,
//! so a caller cannot `?`-away a timeout while treating it like a protocol
//! fault.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// The index table has no EMPTY slot within the allocator's retry bound.
    NoFreeIndex,
    /// A frame-builder invariant was violated; indicates a caller bug.
    FrameCorrupt,
    /// The requested payload would not fit in one Ethernet frame.
    BufferTooLarge,
}
