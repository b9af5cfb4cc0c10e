//! State model for the drive inverter (VFD) feeding the compressor motor.
//!
//! The drive exposes fixed-point holding registers only. Raw words are
//! cached; accessors apply the scale factors.

use crate::device::{self, Error, Transport};
use crate::registers::{InverterLayout, InverterMap};
use crate::values;
use std::time::Duration;
use tracing::{debug, info};

/// How long the drive needs to apply a frequency write before the register
/// reads back the new setpoint.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

pub struct Inverter<T: Transport> {
    transport: T,
    map: InverterMap,
    // Raw register words: centihertz, deciamps, decivolts, deci-kilowatts.
    frequency: u16,
    current: u16,
    voltage: u16,
    power: u16,
}

impl<T: Transport> Inverter<T> {
    /// Connect to one drive and perform an initial poll.
    pub async fn connect(transport: T, layout: InverterLayout) -> Result<Self, Error> {
        let mut inverter = Self {
            transport,
            map: InverterMap::new(layout),
            frequency: 0,
            current: 0,
            voltage: 0,
            power: 0,
        };
        inverter.update().await?;
        info!(
            message = "connected to inverter",
            frequency_hz = inverter.frequency(),
        );
        Ok(inverter)
    }

    /// Re-read all four monitor registers. The first failure aborts the
    /// update and later registers keep their previously cached words.
    pub async fn update(&mut self) -> Result<(), Error> {
        self.frequency = device::read_u16(&self.transport, &self.map.frequency).await?;
        self.current = device::read_u16(&self.transport, &self.map.current).await?;
        self.voltage = device::read_u16(&self.transport, &self.map.voltage).await?;
        self.power = device::read_u16(&self.transport, &self.map.power).await?;
        Ok(())
    }

    /// Commanded output frequency in hertz.
    pub fn frequency(&self) -> f64 {
        values::decode_frequency(self.frequency)
    }

    /// Output current in amps.
    pub fn current(&self) -> f64 {
        f64::from(self.current) * 0.1
    }

    /// Output voltage in volts.
    pub fn voltage(&self) -> f64 {
        f64::from(self.voltage) * 0.1
    }

    /// Output power in kilowatts.
    pub fn power(&self) -> f64 {
        f64::from(self.power) * 0.1
    }

    /// Command a new output frequency and return the value the drive reads
    /// back once it has settled.
    ///
    /// The requested frequency is validated against the drive's operating
    /// band before anything is written. The write is sent once; the single
    /// read-back is confirmation, not a retry loop, and a drive that clamps
    /// or ignores the setpoint shows up as a mismatched return value.
    pub async fn set_frequency(&mut self, hertz: f64) -> Result<f64, Error> {
        let setpoint = values::encode_frequency(hertz)?;
        debug!(hertz, setpoint, "writing frequency setpoint");
        device::write_u16(&self.transport, &self.map.frequency, setpoint).await?;
        tokio::time::sleep(SETTLE_DELAY).await;
        self.frequency = device::read_u16(&self.transport, &self.map.frequency).await?;
        Ok(self.frequency())
    }

    pub fn layout(&self) -> InverterLayout {
        self.map.layout
    }

    /// A serializable snapshot of the cached readings, for presentation
    /// layers.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            frequency_hz: self.frequency(),
            current_a: self.current(),
            voltage_v: self.voltage(),
            power_kw: self.power(),
        }
    }
}

#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct Snapshot {
    pub frequency_hz: f64,
    pub current_a: f64,
    pub voltage_v: f64,
    pub power_kw: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// Scripted holding-register bank; see the compressor tests for the
    /// popping discipline.
    struct FakeDrive {
        holdings: RefCell<BTreeMap<u16, Vec<u16>>>,
        writes: RefCell<Vec<(u16, u16)>>,
    }

    impl FakeDrive {
        fn running_v1() -> Self {
            let drive = Self {
                holdings: RefCell::new(BTreeMap::new()),
                writes: RefCell::new(Vec::new()),
            };
            {
                let mut holdings = drive.holdings.borrow_mut();
                holdings.insert(0x0001, vec![5000]); // 50.00 Hz
                holdings.insert(0x1002, vec![123]); // 12.3 A
                holdings.insert(0x1011, vec![4005]); // 400.5 V
                holdings.insert(0x1012, vec![85]); // 8.5 kW
            }
            drive
        }

        fn script(&self, address: u16, values: Vec<u16>) {
            self.holdings.borrow_mut().insert(address, values);
        }
    }

    impl Transport for &FakeDrive {
        async fn read_inputs(
            &self,
            _address: u16,
            _count: u16,
        ) -> Result<Vec<u16>, connection::Error> {
            panic!("inverter flows never read input registers");
        }

        async fn read_holdings(
            &self,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>, connection::Error> {
            assert_eq!(count, 1);
            let mut holdings = self.holdings.borrow_mut();
            let values = holdings
                .get_mut(&address)
                .unwrap_or_else(|| panic!("read of unscripted register {address:#06x}"));
            Ok(vec![if values.len() > 1 { values.remove(0) } else { values[0] }])
        }

        async fn write_holding(&self, address: u16, value: u16) -> Result<(), connection::Error> {
            self.writes.borrow_mut().push((address, value));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn readings_apply_scale_factors() {
        let drive = FakeDrive::running_v1();
        let inverter = Inverter::connect(&drive, InverterLayout::V1).await.unwrap();
        assert_eq!(inverter.frequency(), 50.0);
        assert_eq!(inverter.current(), 12.3);
        assert_eq!(inverter.voltage(), 400.5);
        assert_eq!(inverter.power(), 8.5);
    }

    #[tokio::test(start_paused = true)]
    async fn set_frequency_writes_once_and_reads_back_after_settling() {
        let drive = FakeDrive::running_v1();
        let mut inverter = Inverter::connect(&drive, InverterLayout::V1).await.unwrap();
        drive.script(0x0001, vec![6025]);
        let before = tokio::time::Instant::now();
        let confirmed = inverter.set_frequency(60.25).await.unwrap();
        assert_eq!(confirmed, 60.25);
        assert_eq!(inverter.frequency(), 60.25);
        assert_eq!(before.elapsed(), SETTLE_DELAY);
        assert_eq!(drive.writes.borrow()[..], [(0x0001, 6025)]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_frequency_reports_a_clamping_drive() {
        let drive = FakeDrive::running_v1();
        let mut inverter = Inverter::connect(&drive, InverterLayout::V1).await.unwrap();
        // The drive ignores the setpoint and stays where it was.
        let confirmed = inverter.set_frequency(70.0).await.unwrap();
        assert_eq!(confirmed, 50.0);
        assert_eq!(drive.writes.borrow()[..], [(0x0001, 7000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_band_frequency_never_reaches_the_wire() {
        let drive = FakeDrive::running_v1();
        let mut inverter = Inverter::connect(&drive, InverterLayout::V1).await.unwrap();
        for hertz in [39.99, 70.01, -50.0, f64::NAN] {
            let result = inverter.set_frequency(hertz).await;
            assert!(matches!(result, Err(Error::FrequencyOutOfRange(_))), "{hertz}");
        }
        assert!(drive.writes.borrow().is_empty());
    }
}
