use std::ffi::OsString;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;
use crate::pair::Pair;

pub mod list;
pub mod run;
pub mod version;

/// Client and virtual port name used when `--name` is not given.
pub const DEFAULT_CLIENT_NAME: &str = "midipipe";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bridge MIDI between the service and a byte pipe or child process.
    Run(RunArgs),
    /// List MIDI sources and destinations.
    List(ListArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args),
        Command::List(args) => list::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Read MIDI from the service and write it as bytes.
    #[arg(short = 'r', long = "read")]
    pub read: bool,

    /// Read bytes and write them as MIDI to the service.
    #[arg(short = 'w', long = "write")]
    pub write: bool,

    /// Byte descriptors RFD,WFD. With CMD these are the child's MIDI-in and
    /// MIDI-out slots; without CMD the bridge reads RFD and writes WFD.
    #[arg(short = 'f', long = "fds", value_name = "RFD,WFD")]
    pub fds: Option<Pair<i32>>,

    /// Endpoint indices IN,OUT. An omitted side publishes a virtual port.
    #[arg(short = 'p', long = "ports", value_name = "IN,OUT")]
    pub ports: Option<Pair<usize>>,

    /// Client and virtual port name.
    #[arg(short = 'n', long = "name", default_value = DEFAULT_CLIENT_NAME)]
    pub name: String,

    /// Program to spawn, with its arguments.
    #[arg(value_name = "CMD", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<OsString>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Client name used to query the service.
    #[arg(short = 'n', long = "name", default_value = DEFAULT_CLIENT_NAME)]
    pub name: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
