fn runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub mod status {
    use crate::compressor::Compressor;
    use crate::registers::CompressorLayout;
    use crate::{connection, device, output};

    /// Read and display everything the compressor panel reports.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// Register layout the panel firmware uses.
        #[arg(long, value_enum)]
        layout: CompressorLayout,
        /// Also show every sensor reading, not just the state summary.
        #[arg(long, short = 'v')]
        verbose: bool,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not connect to the compressor")]
        Connect(#[source] connection::Error),
        #[error("could not talk to the compressor")]
        Device(#[source] device::Error),
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let snapshot = runtime.block_on(async {
            let link = connection::Connection::new(args.connection).await.map_err(Error::Connect)?;
            let compressor =
                Compressor::connect(link, args.layout).await.map_err(Error::Device)?;
            Ok::<_, Error>(compressor.snapshot())
        })?;

        let press = <&str>::from(snapshot.pressure_unit);
        let temp = <&str>::from(snapshot.temperature_unit);
        let mut output = args.output.to_output()?;
        output.headers(vec!["Field", "Value"])?;
        let mut rows: Vec<(&str, String)> = vec![
            ("Model", snapshot.model.clone()),
            ("Serial", snapshot.serial.to_string()),
            ("Software rev", snapshot.software_rev.clone()),
            ("State", snapshot.state.to_string()),
            ("Energized", if snapshot.enabled { "yes".into() } else { "no".into() }),
            ("Warnings", snapshot.warnings.to_string()),
            ("Errors", snapshot.errors.to_string()),
        ];
        if args.verbose {
            rows.extend([
                ("Coolant in", format!("{:.2} {temp}", snapshot.coolant_in)),
                ("Coolant out", format!("{:.2} {temp}", snapshot.coolant_out)),
                ("Oil", format!("{:.2} {temp}", snapshot.oil_temp)),
                ("Helium", format!("{:.2} {temp}", snapshot.helium_temp)),
                ("Low pressure", format!("{:.2} {press}", snapshot.low_press)),
                ("Low pressure avg", format!("{:.2} {press}", snapshot.low_press_avg)),
                ("High pressure", format!("{:.2} {press}", snapshot.high_press)),
                ("High pressure avg", format!("{:.2} {press}", snapshot.high_press_avg)),
                ("Delta pressure avg", format!("{:.2} {press}", snapshot.delta_press_avg)),
                ("Motor current", format!("{:.2} A", snapshot.motor_current)),
                ("Operating hours", format!("{:.1}", snapshot.hours)),
            ]);
        }
        for (field, value) in rows {
            output.record(
                || vec![field.to_string(), value.clone()],
                || serde_json::json!({ "field": field, "value": value }),
            )?;
        }
        output.commit()?;
        Ok(())
    }
}

pub mod power {
    use crate::compressor::{Compressor, OperatingState};
    use crate::registers::CompressorLayout;
    use crate::{connection, device};

    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// Register layout the panel firmware uses.
        #[arg(long, value_enum)]
        layout: CompressorLayout,
        /// Print the full panel status after the command settles.
        #[arg(long, short = 'v')]
        verbose: bool,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not connect to the compressor")]
        Connect(#[source] connection::Error),
        #[error("could not talk to the compressor")]
        Device(#[source] device::Error),
        #[error("the command did not take effect")]
        Failed,
    }

    pub fn on(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        runtime.block_on(async {
            let mut compressor = connect(args.connection, args.layout).await?;
            let identity = compressor.identity().clone();
            match compressor.state() {
                OperatingState::Starting | OperatingState::Running => {
                    println!("{} compressor {} is already on", identity.model, identity.serial);
                }
                OperatingState::Idle => {
                    println!("turning {} compressor {} on", identity.model, identity.serial);
                    report(compressor.turn_on().await)?;
                }
                state => {
                    println!(
                        "{} compressor {} is {state}, it cannot start at this time",
                        identity.model, identity.serial
                    );
                }
            }
            finish(&compressor, args.verbose);
            Ok(())
        })
    }

    pub fn off(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        runtime.block_on(async {
            let mut compressor = connect(args.connection, args.layout).await?;
            let identity = compressor.identity().clone();
            match compressor.state() {
                OperatingState::Idle => {
                    println!("{} compressor {} is already off", identity.model, identity.serial);
                }
                OperatingState::Stopping => {
                    println!(
                        "{} compressor {} is already stopping",
                        identity.model, identity.serial
                    );
                }
                OperatingState::Starting => {
                    println!(
                        "{} compressor {} is still starting, try again later",
                        identity.model, identity.serial
                    );
                }
                _ => {
                    println!("turning {} compressor {} off", identity.model, identity.serial);
                    report(compressor.turn_off().await)?;
                }
            }
            finish(&compressor, args.verbose);
            Ok(())
        })
    }

    async fn connect(
        connection: connection::Args,
        layout: CompressorLayout,
    ) -> Result<Compressor<connection::Connection>, Error> {
        let link = connection::Connection::new(connection).await.map_err(Error::Connect)?;
        Compressor::connect(link, layout).await.map_err(Error::Device)
    }

    /// A refused command is operator-facing news, not a bare error chain: the
    /// decoded panel errors are printed here, and the exit code still goes
    /// non-zero.
    fn report(result: Result<(), device::Error>) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(device::Error::CommandFailed { expected, state, errors }) => {
                println!("compressor did not reach {expected}");
                println!("state: {state}");
                if let Some(errors) = errors {
                    println!("errors:");
                    for label in errors.labels() {
                        println!("  {label}");
                    }
                }
                Err(Error::Failed)
            }
            Err(e) => Err(Error::Device(e)),
        }
    }

    fn finish(compressor: &Compressor<connection::Connection>, verbose: bool) {
        if !verbose {
            return;
        }
        let snapshot = compressor.snapshot();
        println!();
        println!("state: {}", snapshot.state);
        println!("warnings: {}", snapshot.warnings);
        println!("errors: {}", snapshot.errors);
        println!("low/high pressure avg: {:.2}/{:.2}", snapshot.low_press_avg, snapshot.high_press_avg);
        println!("motor current: {:.2} A", snapshot.motor_current);
    }
}

pub mod frequency {
    use crate::inverter::Inverter;
    use crate::registers::InverterLayout;
    use crate::{connection, device, output};

    /// Read the inverter's output readings, or command a new frequency.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// Register layout the drive firmware uses.
        #[arg(long, value_enum)]
        layout: InverterLayout,
        /// New output frequency in hertz, 40.00 through 70.00.
        #[arg(long)]
        set: Option<f64>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not connect to the inverter")]
        Connect(#[source] connection::Error),
        #[error("could not talk to the inverter")]
        Device(#[source] device::Error),
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let snapshot = runtime.block_on(async {
            let link = connection::Connection::new(args.connection).await.map_err(Error::Connect)?;
            let mut inverter =
                Inverter::connect(link, args.layout).await.map_err(Error::Device)?;
            if let Some(hertz) = args.set {
                let confirmed = inverter.set_frequency(hertz).await.map_err(Error::Device)?;
                // Compare at the drive's centihertz granularity.
                if (confirmed * 100.0).round() != (hertz * 100.0).round() {
                    println!("drive settled at {confirmed:.2} Hz instead of {hertz:.2} Hz");
                }
            }
            Ok::<_, Error>(inverter.snapshot())
        })?;

        let mut output = args.output.to_output()?;
        output.headers(vec!["Field", "Value"])?;
        for (field, value) in [
            ("Frequency", format!("{:.2} Hz", snapshot.frequency_hz)),
            ("Current", format!("{:.1} A", snapshot.current_a)),
            ("Voltage", format!("{:.1} V", snapshot.voltage_v)),
            ("Power", format!("{:.1} kW", snapshot.power_kw)),
        ] {
            output.record(
                || vec![field.to_string(), value.clone()],
                || serde_json::json!({ "field": field, "value": value }),
            )?;
        }
        output.commit()?;
        Ok(())
    }
}

pub mod registers {
    use crate::output;
    use crate::registers::{CompressorLayout, CompressorMap, InverterLayout, InverterMap, Register};

    #[derive(clap::ValueEnum, Clone, Copy, Debug)]
    pub enum Family {
        Compressor,
        Inverter,
    }

    #[derive(clap::ValueEnum, Clone, Copy, Debug)]
    pub enum Version {
        V1,
        V2,
    }

    /// Print the register map for one device family and layout.
    #[derive(clap::Parser)]
    pub struct Args {
        #[arg(value_enum)]
        family: Family,
        /// Register layout revision.
        #[arg(long, value_enum)]
        layout: Version,
        /// Only registers whose name contains this pattern.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let registers: Vec<Register> = match (args.family, args.layout) {
            (Family::Compressor, Version::V1) => {
                CompressorMap::new(CompressorLayout::V1).registers().copied().collect()
            }
            (Family::Compressor, Version::V2) => {
                CompressorMap::new(CompressorLayout::V2).registers().copied().collect()
            }
            (Family::Inverter, Version::V1) => {
                InverterMap::new(InverterLayout::V1).registers().copied().collect()
            }
            (Family::Inverter, Version::V2) => {
                InverterMap::new(InverterLayout::V2).registers().copied().collect()
            }
        };

        let mut output = args.output.to_output()?;
        output.headers(vec!["Address", "Name", "Kind", "Space", "Words"])?;
        for register in registers {
            if let Some(pattern) = &args.filter {
                let pattern = pattern.to_uppercase();
                if !register.name.contains(&pattern)
                    && !register.address.to_string().contains(&pattern)
                {
                    continue;
                }
            }
            output.record(
                || {
                    vec![
                        register.address.to_string(),
                        register.name.to_string(),
                        format!("{:?}", register.kind).to_lowercase(),
                        format!("{:?}", register.space).to_lowercase(),
                        register.words().to_string(),
                    ]
                },
                || register,
            )?;
        }
        output.commit()?;
        Ok(())
    }
}
