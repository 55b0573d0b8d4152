//! End-to-end scenarios against a loopback `NicPort`: build a frame, echo it
//! back with every WKC filled in, and check what the engine hands back.

use std::cell::RefCell;

use ecat_core::{index_table::SlotState, CoreError, MasterClock, NicPort};
use ecat_core::engine;
use ecat_core::frame;
use ecat_core::index_table::IndexTable;
use ecat_core::wire;

const ECAT_TYPE_LEN_WORD_LEN: usize = 2;
const SUBFRAME_HEADER_LEN: usize = 10;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A loopback adapter: `send` copies the built frame straight into the
/// slot's receive buffer (as if every addressed slave had serviced it),
/// optionally overwriting one datagram's payload to simulate a slave
/// response, and fills every chained WKC with a fixed value.
struct LoopbackPort {
    table: IndexTable<8, 256>,
    wkc_fill: u16,
    drop_next_recv: RefCell<bool>,
    overwrite: RefCell<Option<(usize, Vec<u8>)>>,
}

impl LoopbackPort {
    fn new(wkc_fill: u16) -> Self {
        Self {
            table: IndexTable::new(),
            wkc_fill,
            drop_next_recv: RefCell::new(false),
            overwrite: RefCell::new(None),
        }
    }

    /// Next `send` will overwrite the reply bytes at `rx_offset` with
    /// `bytes`, simulating a slave writing into a specific datagram's
    /// payload (e.g. the DC reference slave stamping its system time).
    fn overwrite_at(&self, rx_offset: usize, bytes: &[u8]) {
        *self.overwrite.borrow_mut() = Some((rx_offset, bytes.to_vec()));
    }

    fn fail_next_recv(&self) {
        *self.drop_next_recv.borrow_mut() = true;
    }
}

impl NicPort for LoopbackPort {
    fn alloc_index(&self) -> Result<u8, CoreError> {
        self.table.alloc_index()
    }
    fn release_index(&self, index: u8) {
        self.table.release(index)
    }
    fn set_state(&self, index: u8, state: SlotState) {
        self.table.set_state(index, state)
    }
    fn tx_buffer(&self, index: u8) -> &mut [u8] {
        self.table.tx_buffer(index)
    }
    fn rx_buffer(&self, index: u8) -> &[u8] {
        self.table.rx_buffer(index)
    }
    fn tx_len(&self, index: u8) -> usize {
        self.table.tx_len(index)
    }
    fn set_tx_len(&self, index: u8, len: usize) {
        self.table.set_tx_len(index, len)
    }
    fn send(&self, index: u8) -> Result<(), CoreError> {
        let len = self.table.tx_len(index);
        let frame_bytes = self.table.tx_buffer(index)[..len].to_vec();
        let body = &frame_bytes[frame::ETH_HEADER_LEN..];
        self.table.rx_buffer_mut(index)[..body.len()].copy_from_slice(body);
        self.table.set_rx_len(index, body.len());

        fill_every_wkc(self.table.rx_buffer_mut(index), self.wkc_fill);

        if let Some((off, bytes)) = self.overwrite.borrow_mut().take() {
            self.table.rx_buffer_mut(index)[off..off + bytes.len()].copy_from_slice(&bytes);
        }
        Ok(())
    }
    fn recv(&self, index: u8, _timeout_us: u32) -> Option<u16> {
        if *self.drop_next_recv.borrow() {
            *self.drop_next_recv.borrow_mut() = false;
            return None;
        }
        let rx = self.table.rx_buffer(index);
        let (_, _, _, _, length, _) = wire::decode_subframe_header(&rx[ECAT_TYPE_LEN_WORD_LEN..]);
        let wkc_off = ECAT_TYPE_LEN_WORD_LEN + SUBFRAME_HEADER_LEN + length as usize;
        Some(wire::read_wkc(rx, wkc_off))
    }
}

fn fill_every_wkc(buf: &mut [u8], wkc: u16) {
    let mut off = ECAT_TYPE_LEN_WORD_LEN;
    loop {
        let dlength = u16::from_le_bytes([buf[off + 6], buf[off + 7]]);
        let length = wire::length_bits(dlength) as usize;
        let wkc_off = off + SUBFRAME_HEADER_LEN + length;
        buf[wkc_off] = wkc as u8;
        buf[wkc_off + 1] = (wkc >> 8) as u8;
        if !wire::more_bit(dlength) {
            break;
        }
        off = wkc_off + 2;
    }
}

struct FixedClock(u64, u32);
impl MasterClock for FixedClock {
    fn now_unix(&self) -> (u64, u32) {
        (self.0, self.1)
    }
}

#[test]
fn s1_brd_read_of_al_status() {
    init_logging();
    let port = LoopbackPort::new(1);
    let mut out = [0u8; 2];
    let wkc = engine::brd(&port, 0x0130, 2, &mut out, 1000).unwrap();
    assert_eq!(wkc, 1);
    assert_eq!(out, [0x00, 0x00]);
}

#[test]
fn s2_apwr_then_aprd() {
    init_logging();
    let port = LoopbackPort::new(1);
    let wkc = engine::apwr(&port, 0, 0x0120, &[0x11, 0x00], 1000).unwrap();
    assert_eq!(wkc, 1);

    let mut out = [0u8; 2];
    let wkc = engine::aprd(&port, 0, 0x0130, 2, &mut out, 1000).unwrap();
    assert_eq!(wkc, 1);
    assert_eq!(out, [0x00, 0x00]);
}

#[test]
fn s3_lrwdc_composite() {
    init_logging();
    let port = LoopbackPort::new(3);
    let clock = FixedClock(1_700_000_000, 0);

    let (adp, ado) = (0u16, 0x0100u16);
    let log_adr = ((ado as u32) << 16) | adp as u32;
    let payload = [0u8; 10];
    let mut out = [0u8; 10];
    let mut dc_time = [0u8; 8];

    let slave_time: u64 = 0x0102_0304_0506_0708;
    // The DC datagram is appended second, right after the LRW; its reply
    // payload lands at ETH-stripped offset EC_HEADERSIZE + (10 + 2).
    let dc_rx_off = frame::EC_HEADERSIZE + payload.len() + SUBFRAME_HEADER_LEN;
    port.overwrite_at(dc_rx_off, &slave_time.to_le_bytes());

    let wkc = engine::lrwdc(&port, &clock, log_adr, &payload, &mut out, 0x1001, &mut dc_time, 1000).unwrap();
    assert_eq!(wkc, 3);
    assert_eq!(out, payload);
    assert_eq!(u64::from_le_bytes(dc_time), slave_time);
}

#[test]
fn s4_timeout_releases_slot() {
    init_logging();
    let port = LoopbackPort::new(1);
    port.fail_next_recv();
    let mut out = [0u8; 2];
    let wkc = engine::fprd(&port, 0x1001, 0x0130, 2, &mut out, 1000).unwrap();
    assert_eq!(wkc, engine::NO_FRAME);
    assert_eq!(out, [0u8; 2], "caller buffer must be untouched on timeout");
}

#[test]
fn s5_index_reuse_after_timeout_ignores_stale_reply() {
    init_logging();
    let port = LoopbackPort::new(1);

    port.fail_next_recv();
    let mut stale_out = [0xFFu8; 2];
    let wkc = engine::brd(&port, 0x0130, 2, &mut stale_out, 1000).unwrap();
    assert_eq!(wkc, engine::NO_FRAME);
    assert_eq!(stale_out, [0xFF, 0xFF], "timed-out call must not touch the caller buffer");

    // A fresh transaction reusing the same (now-recycled) index must get
    // its own reply, not whatever the dropped one would have delivered.
    let mut fresh_out = [0u8; 2];
    let wkc = engine::brd(&port, 0x0130, 2, &mut fresh_out, 1000).unwrap();
    assert_eq!(wkc, 1);
    assert_eq!(fresh_out, [0x00, 0x00]);
}

#[test]
fn s6_process_data_composite_is_five_chained_datagrams() {
    init_logging();
    let port = LoopbackPort::new(1);
    let clock = FixedClock(1_700_000_000, 0);
    let outputs = [1u8, 2, 3, 4];
    let mut inputs = [0u8; 4];
    let mut status = 0u8;
    let mut al_status = [0u8; 2];

    engine::process_data_exchange(&port, &clock, &outputs, &mut inputs, &mut status, &mut al_status, 1000).unwrap();

    let tx_len = port.tx_len(0);
    let buf = port.tx_buffer(0);
    let ecat_len = wire::ecat_type_length(&buf[frame::ETH_HEADER_LEN..]) as usize;
    assert_eq!(frame::ETH_HEADER_LEN + ECAT_TYPE_LEN_WORD_LEN + ecat_len, tx_len);

    let mut commands = Vec::new();
    let mut off = frame::ETH_HEADER_LEN + ECAT_TYPE_LEN_WORD_LEN;
    let mut more_flags = Vec::new();
    loop {
        let (command, _, _, _, length, more) = wire::decode_subframe_header(&buf[off..]);
        commands.push(command);
        more_flags.push(more);
        off += SUBFRAME_HEADER_LEN + length as usize + 2;
        if !more {
            break;
        }
    }

    assert_eq!(commands.len(), 5);
    assert_eq!(&more_flags[..4], &[true, true, true, true]);
    assert_eq!(more_flags[4], false);
    assert_eq!(inputs, outputs);
}
