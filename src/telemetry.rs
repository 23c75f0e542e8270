//! Typed telemetry decoded from a status response.

use crate::protocol::{Frame, Opcode};
use crate::schedule::{self, names::*, RangeViolation, CELL_BALANCING_BIT, STATUS_SCHEDULE};
use crate::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Allowed disagreement between derived and reported cell extremes.
pub const CELL_CROSS_CHECK_TOLERANCE_MV: u16 = 5;
/// Allowed disagreement between the cell sum and the reported pack voltage.
pub const PACK_CROSS_CHECK_TOLERANCE_MV: u32 = 500;

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StatusFlag {
    Charging,
    Discharging,
    Balancing,
    CellOvervoltage,
    CellUndervoltage,
    PackOvervoltage,
    PackUndervoltage,
    ChargeOvercurrent,
    DischargeOvercurrent,
    ChargeOvertemperature,
    ChargeUndertemperature,
    DischargeOvertemperature,
    DischargeUndertemperature,
    ShortCircuit,
}

/// Bitmap bytes in the order they are packed into [`Telemetry::raw_flags`],
/// most significant first.
const FLAG_BYTES: [&str; 7] = [FAULT1, FAULT2, ALERT1, ALERT2, ALERT3, ALERT4, STATUS];

/// Every bit with a known meaning, as `(bitmap byte, bit, flag)`.
const FLAG_BITS: &[(&str, u8, StatusFlag)] = &[
    (STATUS, 0, StatusFlag::Charging),
    (STATUS, 1, StatusFlag::Discharging),
    (STATUS, 2, StatusFlag::Balancing),
    (ALERT1, 0, StatusFlag::CellOvervoltage),
    (ALERT1, 1, StatusFlag::CellUndervoltage),
    (ALERT1, 2, StatusFlag::PackOvervoltage),
    (ALERT1, 3, StatusFlag::PackUndervoltage),
    (ALERT2, 0, StatusFlag::ChargeOvercurrent),
    (ALERT2, 1, StatusFlag::DischargeOvercurrent),
    (ALERT3, 0, StatusFlag::ChargeOvertemperature),
    (ALERT3, 1, StatusFlag::ChargeUndertemperature),
    (ALERT3, 2, StatusFlag::DischargeOvertemperature),
    (ALERT3, 3, StatusFlag::DischargeUndertemperature),
    (FAULT1, 0, StatusFlag::ShortCircuit),
];

fn flag_shift(byte_name: &str, bit: u8) -> u32 {
    let position = FLAG_BYTES
        .iter()
        .position(|name| *name == byte_name)
        .unwrap_or(0);
    ((FLAG_BYTES.len() - 1 - position) * 8) as u32 + u32::from(bit)
}

impl StatusFlag {
    /// Pack the bitmap bytes into one integer, see [`FLAG_BYTES`].
    pub fn pack(bitmaps: [u8; 7]) -> u64 {
        bitmaps
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }

    /// Named flags set in `raw_flags`, in table order.
    pub fn decode(raw_flags: u64) -> Vec<Self> {
        FLAG_BITS
            .iter()
            .filter(|(byte_name, bit, _)| read_bit!(raw_flags, flag_shift(byte_name, *bit)))
            .map(|(_, _, flag)| *flag)
            .collect()
    }

    /// Mask of all bits that map to a named flag.
    pub fn known_mask() -> u64 {
        FLAG_BITS
            .iter()
            .fold(0u64, |acc, (byte_name, bit, _)| {
                acc | (1 << flag_shift(byte_name, *bit))
            })
    }

    pub fn name(&self) -> &'static str {
        match self {
            StatusFlag::Charging => "charging",
            StatusFlag::Discharging => "discharging",
            StatusFlag::Balancing => "balancing",
            StatusFlag::CellOvervoltage => "cell_overvoltage",
            StatusFlag::CellUndervoltage => "cell_undervoltage",
            StatusFlag::PackOvervoltage => "pack_overvoltage",
            StatusFlag::PackUndervoltage => "pack_undervoltage",
            StatusFlag::ChargeOvercurrent => "charge_overcurrent",
            StatusFlag::DischargeOvercurrent => "discharge_overcurrent",
            StatusFlag::ChargeOvertemperature => "charge_overtemperature",
            StatusFlag::ChargeUndertemperature => "charge_undertemperature",
            StatusFlag::DischargeOvertemperature => "discharge_overtemperature",
            StatusFlag::DischargeUndertemperature => "discharge_undertemperature",
            StatusFlag::ShortCircuit => "short_circuit",
        }
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatusFlag::Charging => write!(f, "Charging"),
            StatusFlag::Discharging => write!(f, "Discharging"),
            StatusFlag::Balancing => write!(f, "Balancing"),
            StatusFlag::CellOvervoltage => write!(f, "Cell voltage too high alarm"),
            StatusFlag::CellUndervoltage => write!(f, "Cell voltage too low alarm"),
            StatusFlag::PackOvervoltage => write!(f, "Total voltage too high alarm"),
            StatusFlag::PackUndervoltage => write!(f, "Total voltage too low alarm"),
            StatusFlag::ChargeOvercurrent => write!(f, "Charge over current alarm"),
            StatusFlag::DischargeOvercurrent => write!(f, "Discharge over current alarm"),
            StatusFlag::ChargeOvertemperature => {
                write!(f, "Charging temperature too high alarm")
            }
            StatusFlag::ChargeUndertemperature => {
                write!(f, "Charging temperature too low alarm")
            }
            StatusFlag::DischargeOvertemperature => {
                write!(f, "Discharging temperature too high alarm")
            }
            StatusFlag::DischargeUndertemperature => {
                write!(f, "Discharging temperature too low alarm")
            }
            StatusFlag::ShortCircuit => write!(f, "Short circuit protection"),
        }
    }
}

#[cfg(feature = "serde")]
fn serialize_hex<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// One decoded status snapshot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Telemetry {
    pub online_status: u8,
    /// Volts.
    pub pack_voltage: f32,
    /// Amperes, positive while charging, negative while discharging.
    pub pack_current: f32,
    pub soc_percent: f32,
    pub soh_percent: f32,
    pub remaining_capacity_ah: f32,
    pub full_capacity_ah: f32,
    pub nominal_capacity_ah: f32,
    pub cycle_count: u16,
    pub cell_count: u8,
    /// Millivolts, one per cell.
    pub cell_voltages: Vec<u16>,
    pub cell_balancing: Vec<bool>,
    pub cell_min_mv: u16,
    pub cell_max_mv: u16,
    pub cell_delta_mv: u16,
    pub cell_avg_mv: u16,
    /// Cell numbers the BMS reports for its own voltage extremes.
    pub max_cell_index: u8,
    pub min_cell_index: u8,
    /// Degrees Celsius, one per sensor.
    pub temperatures: Vec<i16>,
    /// Degrees Celsius. Readings outside the sensor range saturate here and
    /// are listed in `range_violations`.
    pub environment_temperature: i16,
    pub pcb_temperature: i16,
    pub max_temperature: i16,
    pub max_temperature_index: u8,
    pub min_temperature: i16,
    pub min_temperature_index: u8,
    pub status_flags: Vec<StatusFlag>,
    pub raw_flags: u64,
    pub battery_type: u8,
    pub total_charge: u16,
    pub total_discharge: u16,
    pub total_charge_time: u16,
    pub total_discharge_time: u16,
    /// Set when any value lies outside its documented range.
    pub suspect: bool,
    pub range_violations: Vec<RangeViolation>,
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_hex"))]
    pub raw_frame: Vec<u8>,
}

impl Telemetry {
    /// Decode a status response frame and keep its bytes for diagnostics.
    pub fn from_frame(frame: &Frame) -> std::result::Result<Self, Error> {
        let expected = Opcode::Status as u16;
        if frame.opcode != expected {
            return Err(Error::UnexpectedOpcode {
                expected,
                received: frame.opcode,
            });
        }
        let mut telemetry = decode_status(&frame.payload)?;
        telemetry.raw_frame = frame.raw.clone();
        Ok(telemetry)
    }

    pub fn has_flag(&self, flag: StatusFlag) -> bool {
        self.status_flags.contains(&flag)
    }

    /// Bits set in [`Self::raw_flags`] that have no named flag.
    pub fn unknown_flags(&self) -> u64 {
        self.raw_flags & !StatusFlag::known_mask()
    }
}

struct CellStats {
    min: u16,
    max: u16,
    avg: u16,
    sum: u32,
}

fn cell_stats(cells: &[u16]) -> CellStats {
    let sum: u32 = cells.iter().map(|mv| u32::from(*mv)).sum();
    CellStats {
        min: cells.iter().copied().min().unwrap_or_default(),
        max: cells.iter().copied().max().unwrap_or_default(),
        // Floor of the mean, so min <= avg <= max holds exactly.
        avg: (sum / cells.len().max(1) as u32) as u16,
        sum,
    }
}

fn cross_check(decoded: &schedule::Decoded, stats: &CellStats, pack_voltage: f32) {
    let reported_max = decoded.scalar(MAX_CELL_VOLTAGE).raw;
    let reported_min = decoded.scalar(MIN_CELL_VOLTAGE).raw;
    if stats.max.abs_diff(reported_max) > CELL_CROSS_CHECK_TOLERANCE_MV {
        log::warn!(
            "Cell maximum mismatch - derived={}mV reported={}mV (cell #{})",
            stats.max,
            reported_max,
            decoded.scalar(MAX_CELL_INDEX).raw
        );
    }
    if stats.min.abs_diff(reported_min) > CELL_CROSS_CHECK_TOLERANCE_MV {
        log::warn!(
            "Cell minimum mismatch - derived={}mV reported={}mV (cell #{})",
            stats.min,
            reported_min,
            decoded.scalar(MIN_CELL_INDEX).raw
        );
    }
    let pack_mv = (pack_voltage * 1000.0).round() as u32;
    if stats.sum.abs_diff(pack_mv) > PACK_CROSS_CHECK_TOLERANCE_MV {
        log::warn!(
            "Pack voltage mismatch - cell sum={}mV reported={}mV",
            stats.sum,
            pack_mv
        );
    }
}

/// Decode a status payload into a [`Telemetry`] record.
///
/// `raw_frame` is left empty; use [`Telemetry::from_frame`] to keep it.
/// Values outside their documented range mark the record `suspect` instead of
/// failing.
pub fn decode_status(payload: &[u8]) -> std::result::Result<Telemetry, Error> {
    let decoded = schedule::decode(STATUS_SCHEDULE, payload)?;

    let cells = decoded.array(CELL_VOLTAGE);
    if cells.is_empty() {
        return Err(Error::EmptyCellArray);
    }
    let cell_voltages: Vec<u16> = cells.iter().map(|v| v.physical as u16).collect();
    let cell_balancing: Vec<bool> = cells
        .iter()
        .map(|v| v.raw & CELL_BALANCING_BIT != 0)
        .collect();
    let temperatures: Vec<i16> = decoded
        .array(TEMPERATURE)
        .iter()
        .map(|v| v.physical as i16)
        .collect();

    let stats = cell_stats(&cell_voltages);
    let pack_voltage = decoded.scalar(PACK_VOLTAGE).physical;
    cross_check(&decoded, &stats, pack_voltage);

    let bitmaps = FLAG_BYTES.map(|name| decoded.scalar(name).raw as u8);
    let raw_flags = StatusFlag::pack(bitmaps);

    for violation in &decoded.violations {
        log::warn!("Suspect value: {violation}");
    }

    Ok(Telemetry {
        online_status: decoded.scalar(ONLINE_STATUS).raw as u8,
        pack_voltage,
        pack_current: decoded.scalar(PACK_CURRENT).physical,
        soc_percent: decoded.scalar(SOC).physical,
        soh_percent: decoded.scalar(SOH).physical,
        remaining_capacity_ah: decoded.scalar(REMAINING_CAPACITY).physical,
        full_capacity_ah: decoded.scalar(FULL_CAPACITY).physical,
        nominal_capacity_ah: decoded.scalar(NOMINAL_CAPACITY).physical,
        cycle_count: decoded.scalar(CYCLE_COUNT).raw,
        cell_count: cell_voltages.len() as u8,
        cell_min_mv: stats.min,
        cell_max_mv: stats.max,
        cell_delta_mv: stats.max - stats.min,
        cell_avg_mv: stats.avg,
        max_cell_index: decoded.scalar(MAX_CELL_INDEX).raw as u8,
        min_cell_index: decoded.scalar(MIN_CELL_INDEX).raw as u8,
        cell_voltages,
        cell_balancing,
        temperatures,
        environment_temperature: decoded.scalar(ENVIRONMENT_TEMPERATURE).physical as i16,
        pcb_temperature: decoded.scalar(PCB_TEMPERATURE).physical as i16,
        max_temperature: decoded.scalar(MAX_TEMPERATURE).physical as i16,
        max_temperature_index: decoded.scalar(MAX_TEMPERATURE_INDEX).raw as u8,
        min_temperature: decoded.scalar(MIN_TEMPERATURE).physical as i16,
        min_temperature_index: decoded.scalar(MIN_TEMPERATURE_INDEX).raw as u8,
        status_flags: StatusFlag::decode(raw_flags),
        raw_flags,
        battery_type: decoded.scalar(BATTERY_TYPE).raw as u8,
        total_charge: decoded.scalar(TOTAL_CHARGE).raw,
        total_discharge: decoded.scalar(TOTAL_DISCHARGE).raw,
        total_charge_time: decoded.scalar(TOTAL_CHARGE_TIME).raw,
        total_discharge_time: decoded.scalar(TOTAL_DISCHARGE_TIME).raw,
        suspect: !decoded.violations.is_empty(),
        range_violations: decoded.violations,
        raw_frame: Vec::new(),
    })
}
