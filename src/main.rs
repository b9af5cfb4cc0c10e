use clap::Parser as _;
use cryomech_cpa_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    /// Read and display everything the compressor panel reports.
    Status(commands::status::Args),
    /// Turn the compressor on and verify it starts.
    On(commands::power::Args),
    /// Turn the compressor off and verify it stops.
    Off(commands::power::Args),
    /// Read the inverter, or command a new output frequency.
    Frequency(commands::frequency::Args),
    /// Print the register map for one device family and layout.
    Registers(commands::registers::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter = std::env::var("CRYOMECH_CPA_TOOLS_LOG")
        .unwrap_or_default()
        .parse::<tracing_subscriber::filter::targets::Targets>()
        .unwrap_or_default();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Status(args) => end(commands::status::run(args)),
        Commands::On(args) => end(commands::power::on(args)),
        Commands::Off(args) => end(commands::power::off(args)),
        Commands::Frequency(args) => end(commands::frequency::run(args)),
        Commands::Registers(args) => end(commands::registers::run(args)),
    }
}
