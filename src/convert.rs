// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Conversion between fan speed, output voltage and the raw register value.

use byteorder::{ByteOrder, LE};

use crate::beckhoff::{AO1_OUTPUT_SIZE, AO_FULL_SCALE};

/// Maximum fan speed the operator may request.
pub const MAX_KMH: f64 = 10.0;

/// Full-scale output voltage of the EL4001.
pub const MAX_VOLTAGE: f64 = 10.0;

/// Clamp a requested speed into the valid range.
///
/// Out-of-range input is silently clamped, never an error.
pub fn clamp_speed(kmh: f64) -> f64 {
    kmh.max(0.0).min(MAX_KMH)
}

/// Linear mapping of a (clamped) speed to the output voltage.
pub fn speed_to_voltage(kmh: f64) -> f64 {
    clamp_speed(kmh) / MAX_KMH * MAX_VOLTAGE
}

/// Quantize a voltage to the raw 16-bit register value.
///
/// The voltage is clamped to `[0, MAX_VOLTAGE]`, scaled to full scale,
/// rounded, and clamped again to `[0, 32767]`.
pub fn voltage_to_raw(voltage: f64) -> i16 {
    let volts = voltage.max(0.0).min(MAX_VOLTAGE);
    let raw = (volts / MAX_VOLTAGE * f64::from(AO_FULL_SCALE)).round();
    raw.max(0.0).min(f64::from(AO_FULL_SCALE)) as i16
}

/// Encode a raw register value as it appears in the process-data image.
pub fn encode_output(raw: i16) -> [u8; AO1_OUTPUT_SIZE] {
    let mut frame = [0; AO1_OUTPUT_SIZE];
    LE::write_i16(&mut frame, raw);
    frame
}

#[test]
fn test_speed_mapping_bounds() {
    assert_eq!(speed_to_voltage(0.0), 0.0);
    assert_eq!(speed_to_voltage(MAX_KMH), MAX_VOLTAGE);
    assert_eq!(speed_to_voltage(MAX_KMH + 5.0), MAX_VOLTAGE);
    assert_eq!(speed_to_voltage(-3.0), 0.0);

    let mut prev = 0.0;
    for i in -100..=100 {
        let v = speed_to_voltage(f64::from(i));
        assert!(v >= 0.0 && v <= MAX_VOLTAGE);
        assert!(v >= prev);
        prev = v;
    }
}

#[test]
fn test_quantization() {
    assert_eq!(voltage_to_raw(0.0), 0);
    assert_eq!(voltage_to_raw(MAX_VOLTAGE), AO_FULL_SCALE);
    assert_eq!(voltage_to_raw(MAX_VOLTAGE + 1.0), AO_FULL_SCALE);
    assert_eq!(voltage_to_raw(-1.0), 0);
    assert_eq!(voltage_to_raw(5.0), 16384); // round(0.5 * 32767)
}

#[test]
fn test_encoding_round_trip() {
    for &volts in &[0.0, 0.01, 2.5, 5.0, 7.77, 9.99, 10.0] {
        let raw = voltage_to_raw(volts);
        let frame = encode_output(raw);
        assert_eq!(LE::read_i16(&frame), raw);
    }
    assert_eq!(encode_output(AO_FULL_SCALE), [0xff, 0x7f]);
    assert_eq!(encode_output(0), [0x00, 0x00]);
}
