//! The status payload schedule.
//!
//! The "read 1" response payload is a packed big-endian structure. Its layout
//! lives here as data: an ordered list of [`Entry`] values, each naming a
//! field, its wire width and how to turn the raw integer into a physical
//! quantity. Offsets follow from the order; arrays take their length from a
//! count field decoded earlier in the same payload.
//!
//! Supporting another pack model means writing another schedule.

use crate::Error;
use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

pub mod names {
    pub const ONLINE_STATUS: &str = "online_status";
    pub const CELL_COUNT: &str = "cell_count";
    pub const CELL_VOLTAGE: &str = "cell_voltage";
    pub const MAX_CELL_INDEX: &str = "max_cell_index";
    pub const MAX_CELL_VOLTAGE: &str = "max_cell_voltage";
    pub const MIN_CELL_INDEX: &str = "min_cell_index";
    pub const MIN_CELL_VOLTAGE: &str = "min_cell_voltage";
    pub const PACK_CURRENT: &str = "pack_current";
    pub const SOC: &str = "soc";
    pub const SOH: &str = "soh";
    pub const FULL_CAPACITY: &str = "full_capacity";
    pub const REMAINING_CAPACITY: &str = "remaining_capacity";
    pub const NOMINAL_CAPACITY: &str = "nominal_capacity";
    pub const TEMPERATURE_COUNT: &str = "temperature_count";
    pub const TEMPERATURE: &str = "temperature";
    pub const ENVIRONMENT_TEMPERATURE: &str = "environment_temperature";
    pub const PCB_TEMPERATURE: &str = "pcb_temperature";
    pub const MAX_TEMPERATURE_INDEX: &str = "max_temperature_index";
    pub const MAX_TEMPERATURE: &str = "max_temperature";
    pub const MIN_TEMPERATURE_INDEX: &str = "min_temperature_index";
    pub const MIN_TEMPERATURE: &str = "min_temperature";
    pub const FAULT1: &str = "fault1";
    pub const FAULT2: &str = "fault2";
    pub const ALERT1: &str = "alert1";
    pub const ALERT2: &str = "alert2";
    pub const ALERT3: &str = "alert3";
    pub const ALERT4: &str = "alert4";
    pub const CYCLE_COUNT: &str = "cycle_count";
    pub const PACK_VOLTAGE: &str = "pack_voltage";
    pub const STATUS: &str = "status";
    pub const TOTAL_CHARGE: &str = "total_charge";
    pub const TOTAL_DISCHARGE: &str = "total_discharge";
    pub const TOTAL_CHARGE_TIME: &str = "total_charge_time";
    pub const TOTAL_DISCHARGE_TIME: &str = "total_discharge_time";
    pub const BATTERY_TYPE: &str = "battery_type";
}

use names::*;

/// Raw offset the BMS adds to the pack current (0.01 A units).
pub const CURRENT_RAW_OFFSET: i32 = -30_000;
/// Raw offset the BMS adds to every temperature (°C).
pub const TEMPERATURE_RAW_OFFSET: i32 = -50;
/// Bit 15 of a cell voltage word flags the cell as balancing.
pub const CELL_BALANCING_BIT: u16 = 0x8000;
const VALUE_MASK: u16 = 0x7fff;

pub const CELL_VOLTAGE_RANGE_MV: (f32, f32) = (1000.0, 5000.0);
pub const SOC_RANGE_PERCENT: (f32, f32) = (0.0, 100.0);
pub const TEMPERATURE_RANGE_C: (f32, f32) = (-40.0, 100.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
}

impl Width {
    pub const fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
        }
    }

    fn read(self, bytes: &[u8]) -> u16 {
        match self {
            Width::U8 => u16::from(bytes[0]),
            Width::U16 => u16::from_be_bytes([bytes[0], bytes[1]]),
        }
    }
}

/// How one field is laid out and scaled.
///
/// `physical = ((raw & mask) + raw_offset) * scale`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub width: Width,
    pub mask: u16,
    pub raw_offset: i32,
    pub scale: f32,
    pub unit: &'static str,
    /// Documented physical range, inclusive.
    pub range: Option<(f32, f32)>,
}

impl FieldSpec {
    pub const fn new(name: &'static str, width: Width) -> Self {
        Self {
            name,
            width,
            mask: u16::MAX,
            raw_offset: 0,
            scale: 1.0,
            unit: "",
            range: None,
        }
    }

    pub const fn scaled(self, scale: f32, unit: &'static str) -> Self {
        Self {
            scale,
            unit,
            ..self
        }
    }

    pub const fn offset(self, raw_offset: i32) -> Self {
        Self { raw_offset, ..self }
    }

    pub const fn masked(self, mask: u16) -> Self {
        Self { mask, ..self }
    }

    pub const fn range(self, range: (f32, f32)) -> Self {
        Self {
            range: Some(range),
            ..self
        }
    }

    pub fn physical(&self, raw: u16) -> f32 {
        (i32::from(raw & self.mask) + self.raw_offset) as f32 * self.scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entry {
    Scalar(FieldSpec),
    /// `count` names a scalar decoded earlier that holds the element count.
    Array {
        count: &'static str,
        element: FieldSpec,
    },
}

const fn byte(name: &'static str) -> Entry {
    Entry::Scalar(FieldSpec::new(name, Width::U8))
}

const fn word(name: &'static str) -> Entry {
    Entry::Scalar(FieldSpec::new(name, Width::U16))
}

const fn scalar(spec: FieldSpec) -> Entry {
    Entry::Scalar(spec)
}

const fn temperature(name: &'static str, width: Width) -> FieldSpec {
    FieldSpec::new(name, width)
        .scaled(1.0, "°C")
        .offset(TEMPERATURE_RAW_OFFSET)
}

/// Layout of the "read 1" status payload of the 100 Ah pack.
pub const STATUS_SCHEDULE: &[Entry] = &[
    byte(ONLINE_STATUS),
    byte(CELL_COUNT),
    Entry::Array {
        count: CELL_COUNT,
        element: FieldSpec::new(CELL_VOLTAGE, Width::U16)
            .masked(VALUE_MASK)
            .scaled(1.0, "mV")
            .range(CELL_VOLTAGE_RANGE_MV),
    },
    byte(MAX_CELL_INDEX),
    scalar(FieldSpec::new(MAX_CELL_VOLTAGE, Width::U16).scaled(1.0, "mV")),
    byte(MIN_CELL_INDEX),
    scalar(FieldSpec::new(MIN_CELL_VOLTAGE, Width::U16).scaled(1.0, "mV")),
    scalar(
        FieldSpec::new(PACK_CURRENT, Width::U16)
            .offset(CURRENT_RAW_OFFSET)
            .scaled(0.01, "A"),
    ),
    scalar(
        FieldSpec::new(SOC, Width::U16)
            .scaled(0.01, "%")
            .range(SOC_RANGE_PERCENT),
    ),
    scalar(
        FieldSpec::new(SOH, Width::U16)
            .scaled(0.01, "%")
            .range(SOC_RANGE_PERCENT),
    ),
    scalar(FieldSpec::new(FULL_CAPACITY, Width::U16).scaled(0.01, "Ah")),
    scalar(FieldSpec::new(REMAINING_CAPACITY, Width::U16).scaled(0.01, "Ah")),
    scalar(FieldSpec::new(NOMINAL_CAPACITY, Width::U16).scaled(0.01, "Ah")),
    byte(TEMPERATURE_COUNT),
    Entry::Array {
        count: TEMPERATURE_COUNT,
        element: temperature(TEMPERATURE, Width::U16)
            .masked(VALUE_MASK)
            .range(TEMPERATURE_RANGE_C),
    },
    scalar(temperature(ENVIRONMENT_TEMPERATURE, Width::U16).range(TEMPERATURE_RANGE_C)),
    scalar(temperature(PCB_TEMPERATURE, Width::U16).range(TEMPERATURE_RANGE_C)),
    byte(MAX_TEMPERATURE_INDEX),
    scalar(temperature(MAX_TEMPERATURE, Width::U8).range(TEMPERATURE_RANGE_C)),
    byte(MIN_TEMPERATURE_INDEX),
    scalar(temperature(MIN_TEMPERATURE, Width::U8).range(TEMPERATURE_RANGE_C)),
    byte(FAULT1),
    byte(FAULT2),
    byte(ALERT1),
    byte(ALERT2),
    byte(ALERT3),
    byte(ALERT4),
    word(CYCLE_COUNT),
    scalar(FieldSpec::new(PACK_VOLTAGE, Width::U16).scaled(0.01, "V")),
    byte(STATUS),
    word(TOTAL_CHARGE),
    word(TOTAL_DISCHARGE),
    word(TOTAL_CHARGE_TIME),
    word(TOTAL_DISCHARGE_TIME),
    byte(BATTERY_TYPE),
];

/// A decoded field: the wire integer and its physical value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Value {
    pub raw: u16,
    pub physical: f32,
}

/// A field whose physical value lies outside its documented range.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RangeViolation {
    pub field: &'static str,
    /// Element index for array fields.
    pub index: Option<usize>,
    pub value: f32,
    pub min: f32,
    pub max: f32,
}

impl fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{}]", self.field, index)?,
            None => write!(f, "{}", self.field)?,
        }
        write!(f, "={} outside {}..={}", self.value, self.min, self.max)
    }
}

/// Result of walking a schedule over a payload.
#[derive(Debug, Default)]
pub struct Decoded {
    scalars: HashMap<&'static str, Value>,
    arrays: HashMap<&'static str, Vec<Value>>,
    pub violations: Vec<RangeViolation>,
    /// Bytes consumed by the schedule.
    pub consumed: usize,
}

impl Decoded {
    pub fn scalar(&self, name: &str) -> Value {
        self.scalars.get(name).copied().unwrap_or_default()
    }

    pub fn array(&self, name: &str) -> &[Value] {
        self.arrays.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    fn check_range(&mut self, spec: &FieldSpec, index: Option<usize>, value: f32) {
        if let Some((min, max)) = spec.range {
            if !(min..=max).contains(&value) {
                self.violations.push(RangeViolation {
                    field: spec.name,
                    index,
                    value,
                    min,
                    max,
                });
            }
        }
    }
}

fn read_field(payload: &[u8], cursor: usize, spec: &FieldSpec) -> Value {
    let raw = spec.width.read(&payload[cursor..cursor + spec.width.bytes()]);
    Value {
        raw,
        physical: spec.physical(raw),
    }
}

/// Walk `schedule` over `payload`.
///
/// Fails with [`Error::ShortPayload`] as soon as an entry would run past the
/// end of the payload. Range violations are collected, not returned as errors.
pub fn decode(schedule: &[Entry], payload: &[u8]) -> std::result::Result<Decoded, Error> {
    let mut decoded = Decoded::default();
    let mut cursor = 0;

    for entry in schedule {
        match entry {
            Entry::Scalar(spec) => {
                let required = cursor + spec.width.bytes();
                if payload.len() < required {
                    return Err(Error::ShortPayload {
                        required,
                        received: payload.len(),
                    });
                }
                let value = read_field(payload, cursor, spec);
                log::trace!("{}={} {} (raw={:#06X})", spec.name, value.physical, spec.unit, value.raw);
                decoded.check_range(spec, None, value.physical);
                decoded.scalars.insert(spec.name, value);
                cursor = required;
            }
            Entry::Array { count, element } => {
                let count = usize::from(decoded.scalar(count).raw);
                let required = cursor + count * element.width.bytes();
                if payload.len() < required {
                    return Err(Error::ShortPayload {
                        required,
                        received: payload.len(),
                    });
                }
                let mut values = Vec::with_capacity(count);
                for index in 0..count {
                    let value = read_field(payload, cursor, element);
                    log::trace!(
                        "{}[{index}]={} {} (raw={:#06X})",
                        element.name,
                        value.physical,
                        element.unit,
                        value.raw
                    );
                    decoded.check_range(element, Some(index), value.physical);
                    values.push(value);
                    cursor += element.width.bytes();
                }
                decoded.arrays.insert(element.name, values);
            }
        }
    }

    if payload.len() > cursor {
        log::debug!("Ignoring {} trailing payload bytes", payload.len() - cursor);
    }
    decoded.consumed = cursor;
    Ok(decoded)
}
