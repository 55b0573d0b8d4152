//! The transaction-index table (§3 "Index slot", §4.2).
//!
//! Grounded on the donor crate's `util::ArraySet`: a fixed-size array plus a
//! singly-linked free list of not-currently-used slots. `ArraySet` mutates
//! that list through `&mut self`, which is fine for a structure only one
//! owner touches; this table is shared between the thread allocating
//! indices and the NIC receive path writing into `rxbuf`, so the free list
//! here is a lock-free Treiber stack of `AtomicU8` links instead, and slot
//! occupancy is a per-slot `AtomicU8` state word rather than an enum behind
//! `&mut`.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::CoreError;

/// Sentinel "no next slot" value for the free-list links; also used as the
/// initial value of the free-list head once every slot has been linked in.
const NIL: u8 = u8::MAX;

/// How many times `alloc_index` retries a contended pop before giving up
/// with [`CoreError::NoFreeIndex`]. The table never spins unboundedly
/// (§4.2, §5).
const ALLOC_RETRY_BOUND: u32 = 64;

/// Lifecycle state of one index slot (§4.4 "State machine of a slot").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Empty = 0,
    Alloc = 1,
    Tx = 2,
    Rcvd = 3,
    Complete = 4,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SlotState::Empty,
            1 => SlotState::Alloc,
            2 => SlotState::Tx,
            3 => SlotState::Rcvd,
            _ => SlotState::Complete,
        }
    }
}

/// One transaction slot: a TX buffer, an RX buffer, their lengths, and a
/// lifecycle state. `N` is the per-buffer capacity in bytes (one Ethernet
/// frame).
struct Slot<const N: usize> {
    state: AtomicU8,
    next_free: AtomicU8,
    txbuf: UnsafeCell<[u8; N]>,
    txlen: AtomicLen,
    rxbuf: UnsafeCell<[u8; N]>,
    rxlen: AtomicLen,
}

// `txbuf`/`rxbuf` are only ever read or written by the thread that holds
// the slot between `alloc_index` and `release` (§5: "owned by whichever
// thread currently holds that slot; no other reader/writer is permitted").
// That exclusivity is the invariant making the `UnsafeCell` access in
// `tx_buffer`/`rx_buffer` sound; it is enforced by the free-list protocol,
// not by the borrow checker.
unsafe impl<const N: usize> Sync for Slot<N> {}

/// `AtomicUsize` isn't available on every target `core::sync::atomic`
/// supports, but the table only ever stores lengths up to one Ethernet
/// frame; a 32-bit atomic is ample and keeps the table portable.
struct AtomicLen(core::sync::atomic::AtomicU32);

impl AtomicLen {
    const fn new(v: usize) -> Self {
        Self(core::sync::atomic::AtomicU32::new(v as u32))
    }
    fn load(&self) -> usize {
        self.0.load(Ordering::Acquire) as usize
    }
    fn store(&self, v: usize) {
        self.0.store(v as u32, Ordering::Release);
    }
}

/// A bounded pool of `N_SLOTS` transaction slots, each with `BUF_LEN`-byte
/// TX/RX buffers.
pub struct IndexTable<const N_SLOTS: usize, const BUF_LEN: usize> {
    slots: [Slot<BUF_LEN>; N_SLOTS],
    free_head: AtomicU8,
}

impl<const N_SLOTS: usize, const BUF_LEN: usize> IndexTable<N_SLOTS, BUF_LEN> {
    /// Builds a table with every slot EMPTY and linked into the free list
    /// in index order.
    pub fn new() -> Self {
        assert!(N_SLOTS >= 1 && N_SLOTS < NIL as usize, "index table must fit in a u8 handle");
        let slots = core::array::from_fn(|i| {
            let next = if i + 1 < N_SLOTS { (i + 1) as u8 } else { NIL };
            Slot {
                state: AtomicU8::new(SlotState::Empty as u8),
                next_free: AtomicU8::new(next),
                txbuf: UnsafeCell::new([0u8; BUF_LEN]),
                txlen: AtomicLen::new(0),
                rxbuf: UnsafeCell::new([0u8; BUF_LEN]),
                rxlen: AtomicLen::new(0),
            }
        });
        Self {
            slots,
            free_head: AtomicU8::new(0),
        }
    }

    /// Pops a free index off the lock-free free-list stack and transitions
    /// it to ALLOC. Retries a bounded number of times under contention
    /// before failing.
    pub fn alloc_index(&self) -> Result<u8, CoreError> {
        for _ in 0..ALLOC_RETRY_BOUND {
            let head = self.free_head.load(Ordering::Acquire);
            if head == NIL {
                return Err(CoreError::NoFreeIndex);
            }
            let slot = &self.slots[head as usize];
            let next = slot.next_free.load(Ordering::Acquire);
            if self
                .free_head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.state.store(SlotState::Alloc as u8, Ordering::Release);
                return Ok(head);
            }
            // Lost the race to another allocator; retry.
        }
        Err(CoreError::NoFreeIndex)
    }

    /// Returns `index` to EMPTY and pushes it back onto the free-list
    /// stack. Idempotent: releasing an already-EMPTY slot is a no-op push
    /// that simply relinks it (harmless, since nothing else can be holding
    /// it while it's EMPTY).
    pub fn release(&self, index: u8) {
        let slot = &self.slots[index as usize];
        slot.state.store(SlotState::Empty as u8, Ordering::Release);
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            slot.next_free.store(head, Ordering::Release);
            if self
                .free_head
                .compare_exchange(head, index, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Explicit state transition. The table does not itself enforce the
    /// §4.4 transition table — that discipline lives in the transaction
    /// engine, which is the only caller with enough context to know
    /// whether a transition is legal.
    pub fn set_state(&self, index: u8, state: SlotState) {
        self.slots[index as usize].state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self, index: u8) -> SlotState {
        SlotState::from_u8(self.slots[index as usize].state.load(Ordering::Acquire))
    }

    /// # Safety-by-protocol
    /// Sound because of the exclusivity invariant documented on
    /// `impl Sync for Slot` above: only the holder of `index` calls this.
    pub fn tx_buffer(&self, index: u8) -> &mut [u8] {
        unsafe { &mut *self.slots[index as usize].txbuf.get() }
    }

    pub fn rx_buffer(&self, index: u8) -> &[u8] {
        let len = self.rx_len(index);
        unsafe { &(&*self.slots[index as usize].rxbuf.get())[..len] }
    }

    /// # Safety-by-protocol
    /// Same invariant as [`Self::tx_buffer`]; used by the NIC receive path
    /// to copy an incoming reply into the matching slot.
    pub fn rx_buffer_mut(&self, index: u8) -> &mut [u8] {
        unsafe { &mut *self.slots[index as usize].rxbuf.get() }
    }

    pub fn tx_len(&self, index: u8) -> usize {
        self.slots[index as usize].txlen.load()
    }

    pub fn set_tx_len(&self, index: u8, len: usize) {
        self.slots[index as usize].txlen.store(len);
    }

    pub fn rx_len(&self, index: u8) -> usize {
        self.slots[index as usize].rxlen.load()
    }

    pub fn set_rx_len(&self, index: u8, len: usize) {
        self.slots[index as usize].rxlen.store(len);
    }
}

impl<const N_SLOTS: usize, const BUF_LEN: usize> Default for IndexTable<N_SLOTS, BUF_LEN> {
    fn default() -> Self {
        Self::new()
    }
}
