// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Identification and process-data layout of the Beckhoff terminal we drive.

use crate::types::SlaveId;

pub const BECKHOFF_VENDOR_ID: u32 = 0x0000_0002;

/// EL4001, single-channel 0..10 V analog output.
pub const EL4001_PRODUCT_CODE: u32 = 0x0017_f017;

pub const EL4001: SlaveId = SlaveId {
    vendor_id: BECKHOFF_VENDOR_ID,
    product_code: EL4001_PRODUCT_CODE,
};

/// Byte offset of the AO.1 output register inside the slave's output image.
pub const AO1_OUTPUT_OFFSET: usize = 0;

/// The output register is a 16-bit signed value, little-endian on the wire.
pub const AO1_OUTPUT_SIZE: usize = 2;

/// Raw value corresponding to full scale (10 V) on the output.
pub const AO_FULL_SCALE: i16 = 32767;
