//! State model for the compressor digital panel.
//!
//! One `Compressor` owns one link to one physical unit. All calls are
//! sequential request/response; sharing an instance across tasks needs
//! external mutual exclusion.

use crate::device::{self, Error, Transport};
use crate::faults::{self, FaultList};
use crate::registers::{CompressorLayout, CompressorMap, ENABLE_OFF, ENABLE_ON, Register};
use crate::values;
use std::time::Duration;
use tracing::{debug, info};

/// How long the panel needs to act on an enable/disable write before the
/// state register is worth re-reading.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Contents of the operating state register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum OperatingState {
    Idle,
    Starting,
    Running,
    Stopping,
    ErrorLockout,
    Error,
    HeliumCooldown,
    PowerError,
    RecoveredFromError,
    Unknown(u16),
}

impl From<u16> for OperatingState {
    fn from(code: u16) -> Self {
        match code {
            0 => OperatingState::Idle,
            2 => OperatingState::Starting,
            3 => OperatingState::Running,
            5 => OperatingState::Stopping,
            6 => OperatingState::ErrorLockout,
            7 => OperatingState::Error,
            8 => OperatingState::HeliumCooldown,
            9 => OperatingState::PowerError,
            15 => OperatingState::RecoveredFromError,
            other => OperatingState::Unknown(other),
        }
    }
}

impl std::fmt::Display for OperatingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingState::Idle => f.write_str("Idle"),
            OperatingState::Starting => f.write_str("Starting"),
            OperatingState::Running => f.write_str("Running"),
            OperatingState::Stopping => f.write_str("Stopping"),
            OperatingState::ErrorLockout => f.write_str("Error lockout"),
            OperatingState::Error => f.write_str("Error"),
            OperatingState::HeliumCooldown => f.write_str("Helium cooldown"),
            OperatingState::PowerError => f.write_str("Power related error"),
            OperatingState::RecoveredFromError => f.write_str("Recovered from error"),
            OperatingState::Unknown(code) => write!(f, "Unknown state {code}"),
        }
    }
}

/// Contents of the pressure unit scale register.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::FromRepr, strum::IntoStaticStr, serde::Serialize,
)]
#[repr(u16)]
pub enum PressureUnit {
    #[strum(serialize = "PSI")]
    Psi = 0,
    Bar = 1,
    #[strum(serialize = "kPa")]
    Kpa = 2,
}

/// Contents of the temperature unit scale register.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::FromRepr, strum::IntoStaticStr, serde::Serialize,
)]
#[repr(u16)]
pub enum TemperatureUnit {
    Fahrenheit = 0,
    Celsius = 1,
    Kelvin = 2,
}

/// Fields that are physically static for the lifetime of a connection. Read
/// once at construction; re-reading them in a polling loop is wasted I/O.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Identity {
    pub serial: u32,
    pub model: String,
    pub software_rev: String,
    pub pressure_unit: PressureUnit,
    pub temperature_unit: TemperatureUnit,
}

pub struct Compressor<T: Transport> {
    transport: T,
    map: CompressorMap,
    identity: Identity,
    state: OperatingState,
    enabled: bool,
    warnings: i32,
    errors: i32,
    coolant_in: f32,
    coolant_out: f32,
    oil_temp: f32,
    helium_temp: f32,
    low_press: f32,
    low_press_avg: f32,
    high_press: f32,
    high_press_avg: f32,
    delta_press_avg: f32,
    motor_current: f32,
    hours: f32,
}

impl<T: Transport> Compressor<T> {
    /// Connect to one panel: read the identity registers once, then perform a
    /// full poll. Either everything is populated or this fails, so a caller
    /// never observes a half-initialized compressor.
    pub async fn connect(transport: T, layout: CompressorLayout) -> Result<Self, Error> {
        let map = CompressorMap::new(layout);
        let serial = device::read_u32(&transport, &map.serial, map.word_order).await?;
        let model_word = device::read_u16(&transport, &map.model).await?;
        let rev_word = device::read_u16(&transport, &map.software_rev).await?;
        let press_code = device::read_u16(&transport, &map.press_unit).await?;
        let pressure_unit = PressureUnit::from_repr(press_code).ok_or_else(|| {
            Error::decode(&map.press_unit, values::DecodeError::UnknownUnitCode(press_code))
        })?;
        let temp_code = device::read_u16(&transport, &map.temp_unit).await?;
        let temperature_unit = TemperatureUnit::from_repr(temp_code).ok_or_else(|| {
            Error::decode(&map.temp_unit, values::DecodeError::UnknownUnitCode(temp_code))
        })?;
        let identity = Identity {
            serial,
            model: values::decode_model_bytes(model_word),
            software_rev: values::format_software_rev(rev_word),
            pressure_unit,
            temperature_unit,
        };
        info!(
            message = "connected to compressor panel",
            model = %identity.model,
            serial = identity.serial,
        );
        let mut compressor = Self {
            transport,
            map,
            identity,
            state: OperatingState::Idle,
            enabled: false,
            warnings: 0,
            errors: 0,
            coolant_in: 0.0,
            coolant_out: 0.0,
            oil_temp: 0.0,
            helium_temp: 0.0,
            low_press: 0.0,
            low_press_avg: 0.0,
            high_press: 0.0,
            high_press_avg: 0.0,
            delta_press_avg: 0.0,
            motor_current: 0.0,
            hours: 0.0,
        };
        compressor.refresh().await?;
        Ok(compressor)
    }

    /// Re-read every monitored register.
    ///
    /// The first failure aborts the whole refresh; registers the failing read
    /// never got to keep their previously cached values.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        self.read_state().await?;
        self.read_enabled().await?;
        self.read_warnings().await?;
        self.read_errors().await?;
        self.coolant_in = self.read_f32(|m| &m.coolant_in).await?;
        self.coolant_out = self.read_f32(|m| &m.coolant_out).await?;
        self.oil_temp = self.read_f32(|m| &m.oil_temp).await?;
        self.helium_temp = self.read_f32(|m| &m.helium_temp).await?;
        self.low_press = self.read_f32(|m| &m.low_press).await?;
        self.low_press_avg = self.read_f32(|m| &m.low_press_avg).await?;
        self.high_press = self.read_f32(|m| &m.high_press).await?;
        self.high_press_avg = self.read_f32(|m| &m.high_press_avg).await?;
        self.delta_press_avg = self.read_f32(|m| &m.delta_press_avg).await?;
        self.motor_current = self.read_f32(|m| &m.motor_current).await?;
        self.hours = self.read_f32(|m| &m.hours).await?;
        Ok(())
    }

    async fn read_f32(
        &self,
        register: impl FnOnce(&CompressorMap) -> &Register,
    ) -> Result<f32, Error> {
        device::read_f32(&self.transport, register(&self.map), self.map.word_order).await
    }

    /// Read the operating state register and update the cache.
    pub async fn read_state(&mut self) -> Result<OperatingState, Error> {
        let code = device::read_u16(&self.transport, &self.map.operating_state).await?;
        self.state = OperatingState::from(code);
        Ok(self.state)
    }

    pub async fn read_enabled(&mut self) -> Result<bool, Error> {
        let raw = device::read_u16(&self.transport, &self.map.energized).await?;
        self.enabled = raw != 0;
        Ok(self.enabled)
    }

    pub async fn read_warnings(&mut self) -> Result<i32, Error> {
        self.warnings =
            device::read_i32(&self.transport, &self.map.warnings, self.map.word_order).await?;
        Ok(self.warnings)
    }

    pub async fn read_errors(&mut self) -> Result<i32, Error> {
        self.errors =
            device::read_i32(&self.transport, &self.map.errors, self.map.word_order).await?;
        Ok(self.errors)
    }

    /// Command the compressor on.
    ///
    /// The panel takes a while to act, so the state register is re-read after
    /// a settle delay, and once more after a second delay if the first
    /// re-read still shows no movement. Verification only; the enable write
    /// is never re-sent.
    pub async fn turn_on(&mut self) -> Result<(), Error> {
        device::write_u16(&self.transport, &self.map.enable, ENABLE_ON).await?;
        let moving = |state| matches!(state, OperatingState::Starting | OperatingState::Running);
        tokio::time::sleep(SETTLE_DELAY).await;
        let mut state = self.read_state().await?;
        if !moving(state) {
            debug!(%state, "compressor has not started yet, waiting once more");
            tokio::time::sleep(SETTLE_DELAY).await;
            state = self.read_state().await?;
        }
        if !moving(state) {
            let errors = self.read_errors().await?;
            return Err(Error::CommandFailed {
                expected: "Starting or Running",
                state,
                errors: Some(faults::decompose(errors, &faults::ERROR_FLAGS)),
            });
        }
        self.refresh().await
    }

    /// Command the compressor off. Same two-phase verification as
    /// [`Self::turn_on`], but the panel reports no error accumulator worth
    /// reading when a stop is ignored, so the failure carries none.
    pub async fn turn_off(&mut self) -> Result<(), Error> {
        device::write_u16(&self.transport, &self.map.enable, ENABLE_OFF).await?;
        let halting = |state| matches!(state, OperatingState::Stopping | OperatingState::Idle);
        tokio::time::sleep(SETTLE_DELAY).await;
        let mut state = self.read_state().await?;
        if !halting(state) {
            debug!(%state, "compressor has not begun stopping yet, waiting once more");
            tokio::time::sleep(SETTLE_DELAY).await;
            state = self.read_state().await?;
        }
        if !halting(state) {
            return Err(Error::CommandFailed { expected: "Stopping or Idle", state, errors: None });
        }
        self.refresh().await
    }

    pub fn layout(&self) -> CompressorLayout {
        self.map.layout
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> OperatingState {
        self.state
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Active warnings decoded from the cached accumulator.
    pub fn warnings(&self) -> FaultList {
        faults::decompose(self.warnings, &faults::WARNING_FLAGS)
    }

    /// Active errors decoded from the cached accumulator.
    pub fn errors(&self) -> FaultList {
        faults::decompose(self.errors, &faults::ERROR_FLAGS)
    }

    /// A serializable snapshot of everything cached, for presentation layers.
    /// Values carry whatever unit the panel's unit scale registers report;
    /// nothing is converted.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            model: self.identity.model.clone(),
            serial: self.identity.serial,
            software_rev: self.identity.software_rev.clone(),
            state: self.state,
            enabled: self.enabled,
            warnings: self.warnings(),
            errors: self.errors(),
            temperature_unit: self.identity.temperature_unit,
            coolant_in: self.coolant_in,
            coolant_out: self.coolant_out,
            oil_temp: self.oil_temp,
            helium_temp: self.helium_temp,
            pressure_unit: self.identity.pressure_unit,
            low_press: self.low_press,
            low_press_avg: self.low_press_avg,
            high_press: self.high_press,
            high_press_avg: self.high_press_avg,
            delta_press_avg: self.delta_press_avg,
            motor_current: self.motor_current,
            hours: self.hours,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct Snapshot {
    pub model: String,
    pub serial: u32,
    pub software_rev: String,
    pub state: OperatingState,
    pub enabled: bool,
    pub warnings: FaultList,
    pub errors: FaultList,
    pub temperature_unit: TemperatureUnit,
    pub coolant_in: f32,
    pub coolant_out: f32,
    pub oil_temp: f32,
    pub helium_temp: f32,
    pub pressure_unit: PressureUnit,
    pub low_press: f32,
    pub low_press_avg: f32,
    pub high_press: f32,
    pub high_press_avg: f32,
    pub delta_press_avg: f32,
    pub motor_current: f32,
    pub hours: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;
    use crate::registers::Space;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// A scripted register bank standing in for the link.
    ///
    /// Each word address holds a sequence of values; a read pops the next one
    /// and the last value repeats forever. Addresses in `failing` produce a
    /// transport error instead.
    struct FakeTransport {
        inputs: RefCell<BTreeMap<u16, Vec<u16>>>,
        failing: RefCell<Vec<u16>>,
        writes: RefCell<Vec<(u16, u16)>>,
        reject_writes: bool,
    }

    impl FakeTransport {
        /// A bank with every V1 input register present and zeroed, state
        /// Idle, units PSI/Kelvin, model CPA08A1, software rev 1.5.
        fn idle_v1() -> Self {
            let fake = Self {
                inputs: RefCell::new(BTreeMap::new()),
                failing: RefCell::new(Vec::new()),
                writes: RefCell::new(Vec::new()),
                reject_writes: false,
            };
            {
                let mut inputs = fake.inputs.borrow_mut();
                for register in CompressorMap::new(CompressorLayout::V1).registers() {
                    if register.space == Space::Input {
                        for word in 0..register.words() {
                            inputs.insert(register.address + word, vec![0]);
                        }
                    }
                }
                inputs.insert(30030, vec![2]); // Kelvin
                inputs.insert(30033, vec![0x0101]); // CPA08A1
                inputs.insert(30034, vec![0x0105]);
            }
            fake
        }

        fn script(&self, address: u16, values: Vec<u16>) {
            self.inputs.borrow_mut().insert(address, values);
        }

        fn pop(&self, address: u16) -> u16 {
            let mut inputs = self.inputs.borrow_mut();
            let values = inputs
                .get_mut(&address)
                .unwrap_or_else(|| panic!("read of unscripted register {address}"));
            if values.len() > 1 { values.remove(0) } else { values[0] }
        }
    }

    impl Transport for &FakeTransport {
        async fn read_inputs(
            &self,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>, connection::Error> {
            if self.failing.borrow().contains(&address) {
                return Err(connection::Error::Timeout);
            }
            Ok((address..address + count).map(|word| self.pop(word)).collect())
        }

        async fn read_holdings(
            &self,
            _address: u16,
            _count: u16,
        ) -> Result<Vec<u16>, connection::Error> {
            panic!("compressor flows never read holding registers");
        }

        async fn write_holding(&self, address: u16, value: u16) -> Result<(), connection::Error> {
            if self.reject_writes {
                return Err(connection::Error::Exception(2));
            }
            self.writes.borrow_mut().push((address, value));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reads_identity_and_polls_everything() {
        let fake = FakeTransport::idle_v1();
        let compressor = Compressor::connect(&fake, CompressorLayout::V1).await.unwrap();
        assert_eq!(compressor.identity().model, "CPA08A1");
        assert_eq!(compressor.identity().software_rev, "1.5");
        assert_eq!(compressor.identity().temperature_unit, TemperatureUnit::Kelvin);
        assert_eq!(compressor.identity().pressure_unit, PressureUnit::Psi);
        assert_eq!(compressor.state(), OperatingState::Idle);
        assert!(!compressor.enabled());
        assert_eq!(compressor.warnings().to_string(), "None");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_rejects_unknown_unit_codes() {
        let fake = FakeTransport::idle_v1();
        fake.script(30029, vec![4]);
        let result = Compressor::connect(&fake, CompressorLayout::V1).await;
        assert!(
            matches!(result.as_ref(), Err(Error::Decode { register: "PRESSURE_UNIT", .. })),
            "{:?}",
            result.err(),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn turn_on_succeeds_when_state_moves() {
        let fake = FakeTransport::idle_v1();
        let mut compressor = Compressor::connect(&fake, CompressorLayout::V1).await.unwrap();
        // Running by the time of the settle re-read.
        fake.script(30001, vec![3]);
        compressor.turn_on().await.unwrap();
        assert_eq!(compressor.state(), OperatingState::Running);
        assert_eq!(fake.writes.borrow()[..], [(40001, ENABLE_ON)]);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_on_retries_the_state_read_once() {
        let fake = FakeTransport::idle_v1();
        let mut compressor = Compressor::connect(&fake, CompressorLayout::V1).await.unwrap();
        // Still Idle on the first re-read, Starting on the second.
        fake.script(30001, vec![0, 2, 2]);
        let before = tokio::time::Instant::now();
        compressor.turn_on().await.unwrap();
        assert_eq!(before.elapsed(), 2 * SETTLE_DELAY);
        assert_eq!(compressor.state(), OperatingState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_on_reports_decoded_errors_when_state_never_moves() {
        let fake = FakeTransport::idle_v1();
        let mut compressor = Compressor::connect(&fake, CompressorLayout::V1).await.unwrap();
        fake.script(30001, vec![7]);
        // -1024 in the error accumulator, high word first.
        fake.script(30005, vec![0xFFFF]);
        fake.script(30006, vec![0xFC00]);
        let result = compressor.turn_on().await;
        let Err(Error::CommandFailed { state, errors, .. }) = result else {
            panic!("expected CommandFailed");
        };
        assert_eq!(state, OperatingState::Error);
        assert_eq!(errors.unwrap().to_string(), "High Pressure running High");
        // The cache holds the last state actually read back.
        assert_eq!(compressor.state(), OperatingState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_off_failure_carries_no_errors() {
        let fake = FakeTransport::idle_v1();
        fake.script(30001, vec![3]);
        let mut compressor = Compressor::connect(&fake, CompressorLayout::V1).await.unwrap();
        // Stays Running through both re-reads.
        let result = compressor.turn_off().await;
        let Err(Error::CommandFailed { errors, .. }) = result else {
            panic!("expected CommandFailed");
        };
        assert!(errors.is_none());
        assert_eq!(fake.writes.borrow()[..], [(40001, ENABLE_OFF)]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_enable_write_fails_before_any_wait() {
        let mut fake = FakeTransport::idle_v1();
        fake.reject_writes = true;
        let mut compressor = Compressor::connect(&fake, CompressorLayout::V1).await.unwrap();
        let before = tokio::time::Instant::now();
        let result = compressor.turn_on().await;
        assert!(matches!(result.as_ref(), Err(Error::Write { .. })), "{:?}", result.err());
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_aborts_on_first_failure_and_keeps_later_fields() {
        let fake = FakeTransport::idle_v1();
        let mut compressor = Compressor::connect(&fake, CompressorLayout::V1).await.unwrap();
        fake.script(30001, vec![3]);
        fake.script(30002, vec![1]);
        fake.failing.borrow_mut().push(30003);
        fake.script(30013, vec![0x4248]); // would-be helium temp change
        fake.script(30014, vec![0x8000]);
        let result = compressor.refresh().await;
        assert!(
            matches!(result.as_ref(), Err(Error::Read { register: "WARNINGS", .. })),
            "{:?}",
            result.err(),
        );
        // Reads before the failure landed; everything after kept its old
        // value.
        assert_eq!(compressor.state(), OperatingState::Running);
        assert!(compressor.enabled());
        assert_eq!(compressor.snapshot().helium_temp, 0.0);
    }
}
