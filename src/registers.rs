//! Register maps for the compressor digital panel and the drive inverter.
//!
//! Both device families went through an address-layout revision at some point,
//! and units in the field run either one. The layouts are incompatible, so the
//! map is a required construction parameter everywhere -- there is no implicit
//! default.

/// How a register (or register pair) is to be interpreted.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Plain unsigned 16-bit quantity in a single register.
    U16,
    /// Signed 32-bit warning/error accumulator spanning two registers.
    I32,
    /// Unsigned 32-bit quantity spanning two registers.
    U32,
    /// IEEE-754 single-precision float spanning two registers.
    F32,
    /// Two independent bytes packed into a single register.
    Bytes,
}

impl Kind {
    pub const fn words(self) -> u16 {
        match self {
            Kind::U16 | Kind::Bytes => 1,
            Kind::I32 | Kind::U32 | Kind::F32 => 2,
        }
    }
}

/// Which register space the quantity lives in, and therefore which modbus
/// function is used to access it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    Input,
    Holding,
}

/// Word ordering of two-register quantities.
///
/// The two compressor layouts disagree on this, so the map carries it instead
/// of the codec assuming one.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// The register at the lower address holds the most significant word.
    HighFirst,
    /// The register at the lower address holds the least significant word.
    LowFirst,
}

#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct Register {
    pub name: &'static str,
    pub address: u16,
    pub kind: Kind,
    pub space: Space,
}

impl Register {
    pub const fn words(&self) -> u16 {
        self.kind.words()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
pub enum CompressorLayout {
    /// Absolute 3xxxx input-register numbering used by current panels.
    V1,
    /// Zero-based offsets used by early panel firmware.
    V2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
pub enum InverterLayout {
    /// Frequency holding at 0x0001, monitor registers scattered at 0x10xx.
    V1,
    /// Early drive firmware with a contiguous monitor block at 0x1001.
    V2,
}

macro_rules! compressor_registers {
    ($($field:ident: $kind:ident/$space:ident @ $v1:literal | $v2:literal, $name:literal;)*) => {
        /// The full compressor register map for one layout.
        pub struct CompressorMap {
            pub layout: CompressorLayout,
            pub word_order: WordOrder,
            $(pub $field: Register,)*
        }

        impl CompressorMap {
            pub const fn new(layout: CompressorLayout) -> Self {
                Self {
                    layout,
                    word_order: match layout {
                        CompressorLayout::V1 => WordOrder::HighFirst,
                        CompressorLayout::V2 => WordOrder::LowFirst,
                    },
                    $($field: Register {
                        name: $name,
                        address: match layout {
                            CompressorLayout::V1 => $v1,
                            CompressorLayout::V2 => $v2,
                        },
                        kind: Kind::$kind,
                        space: Space::$space,
                    },)*
                }
            }

            pub fn registers(&self) -> impl Iterator<Item = &Register> {
                [$(&self.$field),*].into_iter()
            }
        }
    };
}

compressor_registers! {
    operating_state: U16/Input    @ 30001 | 1,  "OPERATING_STATE";
    energized:       U16/Input    @ 30002 | 2,  "ENERGIZED";
    warnings:        I32/Input    @ 30003 | 3,  "WARNINGS";
    errors:          I32/Input    @ 30005 | 5,  "ERRORS";
    coolant_in:      F32/Input    @ 30007 | 7,  "COOLANT_IN_TEMP";
    coolant_out:     F32/Input    @ 30009 | 9,  "COOLANT_OUT_TEMP";
    oil_temp:        F32/Input    @ 30011 | 11, "OIL_TEMP";
    helium_temp:     F32/Input    @ 30013 | 13, "HELIUM_TEMP";
    low_press:       F32/Input    @ 30015 | 15, "LOW_PRESSURE";
    low_press_avg:   F32/Input    @ 30017 | 17, "LOW_PRESSURE_AVG";
    high_press:      F32/Input    @ 30019 | 19, "HIGH_PRESSURE";
    high_press_avg:  F32/Input    @ 30021 | 21, "HIGH_PRESSURE_AVG";
    delta_press_avg: F32/Input    @ 30023 | 23, "DELTA_PRESSURE_AVG";
    motor_current:   F32/Input    @ 30025 | 25, "MOTOR_CURRENT";
    hours:           F32/Input    @ 30027 | 27, "OPERATING_HOURS";
    press_unit:      U16/Input    @ 30029 | 29, "PRESSURE_UNIT";
    temp_unit:       U16/Input    @ 30030 | 30, "TEMPERATURE_UNIT";
    serial:          U32/Input    @ 30031 | 31, "PANEL_SERIAL";
    model:           Bytes/Input  @ 30033 | 33, "MODEL_CODE";
    software_rev:    Bytes/Input  @ 30034 | 34, "SOFTWARE_REV";
    enable:          U16/Holding  @ 40001 | 1,  "ENABLE";
}

/// Value written to the enable register to start the compressor.
pub const ENABLE_ON: u16 = 0x0001;
/// Value written to the enable register to stop the compressor.
pub const ENABLE_OFF: u16 = 0x00FF;

macro_rules! inverter_registers {
    ($($field:ident: $kind:ident/$space:ident @ $v1:literal | $v2:literal, $name:literal;)*) => {
        /// The drive inverter register map for one layout.
        pub struct InverterMap {
            pub layout: InverterLayout,
            $(pub $field: Register,)*
        }

        impl InverterMap {
            pub const fn new(layout: InverterLayout) -> Self {
                Self {
                    layout,
                    $($field: Register {
                        name: $name,
                        address: match layout {
                            InverterLayout::V1 => $v1,
                            InverterLayout::V2 => $v2,
                        },
                        kind: Kind::$kind,
                        space: Space::$space,
                    },)*
                }
            }

            pub fn registers(&self) -> impl Iterator<Item = &Register> {
                [$(&self.$field),*].into_iter()
            }
        }
    };
}

inverter_registers! {
    frequency: U16/Holding @ 0x0001 | 0x0002, "FREQUENCY";
    current:   U16/Holding @ 0x1002 | 0x1001, "OUTPUT_CURRENT";
    voltage:   U16/Holding @ 0x1011 | 0x1002, "OUTPUT_VOLTAGE";
    power:     U16/Holding @ 0x1012 | 0x1003, "OUTPUT_POWER";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_disagree_on_addresses() {
        let v1 = CompressorMap::new(CompressorLayout::V1);
        let v2 = CompressorMap::new(CompressorLayout::V2);
        assert_eq!(v1.operating_state.address, 30001);
        assert_eq!(v2.operating_state.address, 1);
        assert_eq!(v1.word_order, WordOrder::HighFirst);
        assert_eq!(v2.word_order, WordOrder::LowFirst);
    }

    #[test]
    fn two_register_quantities_span_two_words() {
        let map = CompressorMap::new(CompressorLayout::V1);
        assert_eq!(map.warnings.words(), 2);
        assert_eq!(map.errors.address - map.warnings.address, 2);
        assert_eq!(map.coolant_in.words(), 2);
        assert_eq!(map.operating_state.words(), 1);
    }

    #[test]
    fn enable_register_is_a_holding() {
        let map = CompressorMap::new(CompressorLayout::V1);
        assert_eq!(map.enable.space, Space::Holding);
        assert!(map.registers().count() >= 21);
    }
}
