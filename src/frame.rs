//! Frame builder (§4.3): composes one or more EtherCAT subframes into the
//! buffer a [`crate::port::NicPort`] holds for a slot.
//!
//! Grounded on the donor crate's `frame::ethercat_frame::EtherCATFrame`,
//! which offers the same `init`/`add_command` shape over a caller-owned
//! byte buffer; here `init`/`add_command` become the spec's `setup`/
//! `append`, generalized to report the reply-side offset each appended
//! datagram will land at (needed by the LRWDC composite to find its piggy-
//! backed DC timestamp) and to validate frame consistency before writing.

use crate::command::CommandType;
use crate::error::CoreError;
use crate::port::NicPort;
use crate::wire::{
    self, ECAT_TYPE_LEN_WORD_LEN, MAX_DATAGRAM_PAYLOAD, SUBFRAME_HEADER_LEN, WKC_LEN,
};

/// Bytes of Ethernet source/destination/ethertype preceding the EtherCAT
/// payload. Preset by the port when it opens the NIC; the frame builder
/// never reads or writes these bytes, only skips past them.
pub const ETH_HEADER_LEN: usize = 14;

/// Offset, within a reply buffer that has already had its Ethernet header
/// stripped, at which the first datagram's payload begins.
pub const EC_HEADERSIZE: usize = ECAT_TYPE_LEN_WORD_LEN + SUBFRAME_HEADER_LEN;

/// Starts a frame in `port`'s slot `index` with a single datagram.
///
/// `payload` is copied verbatim unless `command.is_no_data()`, in which
/// case the datagram's payload region is zero-filled regardless of what
/// `payload` contains (§4.1).
pub fn setup(
    port: &impl NicPort,
    index: u8,
    command: CommandType,
    adp: u16,
    ado: u16,
    payload: &[u8],
    more_follows: bool,
) -> Result<(), CoreError> {
    if payload.len() > MAX_DATAGRAM_PAYLOAD {
        return Err(CoreError::BufferTooLarge);
    }
    let header_off = ETH_HEADER_LEN + ECAT_TYPE_LEN_WORD_LEN;
    let datagram_total = SUBFRAME_HEADER_LEN + payload.len() + WKC_LEN;
    let tx_len = header_off + datagram_total;

    let buf = port.tx_buffer(index);
    if tx_len > buf.len() {
        return Err(CoreError::BufferTooLarge);
    }

    wire::encode_subframe_header(
        &mut buf[header_off..],
        command,
        index,
        adp,
        ado,
        payload.len() as u16,
        more_follows,
    );
    let payload_off = header_off + SUBFRAME_HEADER_LEN;
    if command.is_no_data() {
        buf[payload_off..payload_off + payload.len()].fill(0);
    } else {
        buf[payload_off..payload_off + payload.len()].copy_from_slice(payload);
    }
    wire::write_wkc_zero(buf, payload_off + payload.len());
    wire::set_ecat_type_length(&mut buf[ETH_HEADER_LEN..], datagram_total as u16);

    port.set_tx_len(index, tx_len);
    Ok(())
}

/// Appends a datagram to a frame `setup` already started.
///
/// Returns the byte offset, within the slot's receive buffer (which lacks
/// the Ethernet header — §3 "Index slot"), at which this datagram's reply
/// payload will appear.
pub fn append(
    port: &impl NicPort,
    index: u8,
    command: CommandType,
    adp: u16,
    ado: u16,
    payload: &[u8],
    more_follows: bool,
) -> Result<usize, CoreError> {
    if payload.len() > MAX_DATAGRAM_PAYLOAD {
        return Err(CoreError::BufferTooLarge);
    }
    let first_off = ETH_HEADER_LEN + ECAT_TYPE_LEN_WORD_LEN;
    let tx_len = port.tx_len(index);

    let ecat_len = {
        let buf = port.tx_buffer(index);
        wire::ecat_type_length(&buf[ETH_HEADER_LEN..]) as usize
    };
    if first_off + ecat_len != tx_len {
        return Err(CoreError::FrameCorrupt);
    }

    let last_header_off = {
        let buf = port.tx_buffer(index);
        last_datagram_offset(buf, first_off, ecat_len)?
    };

    let new_header_off = first_off + ecat_len - WKC_LEN;
    let new_datagram_total = SUBFRAME_HEADER_LEN + payload.len() + WKC_LEN;
    let new_tx_len = new_header_off + new_datagram_total;

    let buf = port.tx_buffer(index);
    if new_tx_len > buf.len() {
        return Err(CoreError::BufferTooLarge);
    }

    wire::set_more_follows(&mut buf[last_header_off + 6..last_header_off + 8]);

    wire::encode_subframe_header(
        &mut buf[new_header_off..],
        command,
        index,
        adp,
        ado,
        payload.len() as u16,
        more_follows,
    );
    let payload_off = new_header_off + SUBFRAME_HEADER_LEN;
    if command.is_no_data() {
        buf[payload_off..payload_off + payload.len()].fill(0);
    } else {
        buf[payload_off..payload_off + payload.len()].copy_from_slice(payload);
    }
    wire::write_wkc_zero(buf, payload_off + payload.len());

    let new_ecat_len = ecat_len + SUBFRAME_HEADER_LEN + payload.len();
    wire::set_ecat_type_length(&mut buf[ETH_HEADER_LEN..], new_ecat_len as u16);
    port.set_tx_len(index, new_tx_len);

    let rx_payload_off = (new_header_off - ETH_HEADER_LEN) + SUBFRAME_HEADER_LEN;
    Ok(rx_payload_off)
}

/// Walks the chain of already-encoded datagrams starting at `first_off`,
/// validating that their lengths sum to exactly `ecat_len`, and returns the
/// offset of the one datagram whose "more follows" bit is clear.
fn last_datagram_offset(buf: &[u8], first_off: usize, ecat_len: usize) -> Result<usize, CoreError> {
    let mut off = first_off;
    let mut consumed = 0usize;
    loop {
        if off + SUBFRAME_HEADER_LEN > buf.len() {
            return Err(CoreError::FrameCorrupt);
        }
        let dlength = u16::from_le_bytes([buf[off + 6], buf[off + 7]]);
        let payload_len = wire::length_bits(dlength) as usize;
        let datagram_total = SUBFRAME_HEADER_LEN + payload_len + WKC_LEN;
        consumed += datagram_total;
        if !wire::more_bit(dlength) {
            if consumed != ecat_len {
                return Err(CoreError::FrameCorrupt);
            }
            return Ok(off);
        }
        if consumed >= ecat_len {
            return Err(CoreError::FrameCorrupt);
        }
        off += datagram_total;
    }
}
