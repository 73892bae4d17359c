use crate::cmd::RunArgs;
use crate::exit::CliResult;

#[cfg(unix)]
pub fn run(args: RunArgs) -> CliResult<i32> {
    imp::run(args)
}

#[cfg(not(unix))]
pub fn run(_args: RunArgs) -> CliResult<i32> {
    Err(crate::exit::CliError::failure(
        "run is only supported on unix platforms",
    ))
}

#[cfg(unix)]
mod imp {
    use std::io;
    use std::os::fd::RawFd;
    use std::process::{Command, ExitStatus};
    use std::thread::{self, JoinHandle};

    use midipipe_bridge::{
        BridgeError, DuplexBridge, EndpointKind, MidiService, MidirService, Shutdown, StopHandle,
    };
    use midipipe_transport::{
        adopt_shared, ChildSlots, ChildWiring, Directions, ReadEnd, WriteEnd,
    };
    use tracing::{info, warn};

    use crate::cmd::RunArgs;
    use crate::exit::{bridge_error, transport_error, CliError, CliResult, SUCCESS};

    /// Environment variable naming the selected endpoint for a spawned child.
    const MIDIPORT_ENV: &str = "MIDIPORT";

    /// Resolved options for one bridge run.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(super) struct RunPlan {
        /// Service-to-pipe is enabled (`-r`).
        pub read: bool,
        /// Pipe-to-service is enabled (`-w`).
        pub write: bool,
        pub read_fd: RawFd,
        pub write_fd: RawFd,
        pub source: Option<usize>,
        pub destination: Option<usize>,
    }

    impl RunPlan {
        pub fn from_args(args: &RunArgs) -> Self {
            let (read, write) = if args.read || args.write {
                (args.read, args.write)
            } else {
                (true, true)
            };
            let fds = args.fds.unwrap_or_default();
            let ports = args.ports.unwrap_or_default();
            Self {
                read,
                write,
                read_fd: fds.first_or(0),
                write_fd: fds.second_or(1),
                source: ports.first,
                destination: ports.second,
            }
        }
    }

    pub fn run(args: RunArgs) -> CliResult<i32> {
        let plan = RunPlan::from_args(&args);
        let service = MidirService::new(args.name.as_str());
        let bridge = DuplexBridge::new(service)
            .with_source_endpoint(plan.source)
            .with_destination_endpoint(plan.destination);
        install_ctrlc_handler(bridge.stop_handle())?;

        if args.command.is_empty() {
            let (source, sink) = adopt_descriptors(&plan)?;
            let shutdown = bridge.run(source, sink).map_err(bridge_error)?;
            log_shutdown(&shutdown);
            return Ok(SUCCESS);
        }

        let midiport = midiport_name(bridge.service(), &plan).map_err(bridge_error)?;
        let wiring = ChildWiring::new(
            Directions {
                child_reads: plan.read,
                child_writes: plan.write,
            },
            ChildSlots {
                input: plan.read_fd,
                output: plan.write_fd,
            },
        )
        .map_err(|err| transport_error("descriptor setup failed", err))?;

        let mut command = Command::new(&args.command[0]);
        command.args(&args.command[1..]);
        if let Some(name) = &midiport {
            command.env(MIDIPORT_ENV, name);
        }
        let (child, ends) = wiring
            .spawn(&mut command)
            .map_err(|err| transport_error("spawn failed", err))?;

        // Without a byte source nothing else tells the bridge the child is gone.
        let stop_on_exit = (!plan.write).then(|| bridge.stop_handle());
        let waiter = thread::Builder::new()
            .name("midipipe-child".to_string())
            .spawn(move || {
                let mut child = child;
                let status = child.wait();
                if let Some(stop) = stop_on_exit {
                    stop.stop();
                }
                status
            })
            .map_err(|err| CliError::failure(format!("child wait failed: {err}")))?;

        let result = bridge.run(ends.from_child, ends.to_child);
        let ended_with_stream = matches!(result, Ok(Shutdown::EndOfStream));
        if ended_with_stream || waiter.is_finished() {
            report_child(waiter);
        } else {
            info!("leaving child running");
        }

        let shutdown = result.map_err(bridge_error)?;
        log_shutdown(&shutdown);
        Ok(SUCCESS)
    }

    fn adopt_descriptors(plan: &RunPlan) -> CliResult<(Option<ReadEnd>, Option<WriteEnd>)> {
        let context = "inherited descriptor";
        // SAFETY: the descriptors were inherited from our parent and nothing
        // else in this process wraps them; `run` never touches the standard
        // stdin/stdout handles.
        unsafe {
            if plan.read && plan.write && plan.read_fd == plan.write_fd {
                let (source, sink) =
                    adopt_shared(plan.read_fd).map_err(|err| transport_error(context, err))?;
                return Ok((Some(source), Some(sink)));
            }
            let source = if plan.write {
                Some(ReadEnd::adopt_raw(plan.read_fd).map_err(|err| transport_error(context, err))?)
            } else {
                None
            };
            let sink = if plan.read {
                Some(
                    WriteEnd::adopt_raw(plan.write_fd)
                        .map_err(|err| transport_error(context, err))?,
                )
            } else {
                None
            };
            Ok((source, sink))
        }
    }

    /// Name of the endpoint a spawned child should be told about.
    fn midiport_name<S: MidiService>(
        service: &S,
        plan: &RunPlan,
    ) -> Result<Option<String>, BridgeError> {
        let selected = match (plan.read, plan.source, plan.write, plan.destination) {
            (true, Some(index), _, _) => Some((EndpointKind::Source, index)),
            (_, _, true, Some(index)) => Some((EndpointKind::Destination, index)),
            _ => None,
        };
        let Some((kind, index)) = selected else {
            return Ok(None);
        };
        service
            .endpoints(kind)?
            .into_iter()
            .find(|endpoint| endpoint.index == index)
            .map(|endpoint| Some(endpoint.name))
            .ok_or(BridgeError::NoSuchEndpoint { kind, index })
    }

    fn install_ctrlc_handler(stop: StopHandle) -> CliResult<()> {
        ctrlc::set_handler(move || stop.stop())
            .map_err(|err| CliError::failure(format!("signal handler setup failed: {err}")))
    }

    fn report_child(waiter: JoinHandle<io::Result<ExitStatus>>) {
        match waiter.join() {
            Ok(Ok(status)) if status.success() => info!(%status, "child exited"),
            Ok(Ok(status)) => warn!(%status, "child exited unsuccessfully"),
            Ok(Err(err)) => warn!(error = %err, "waiting for child failed"),
            Err(_) => warn!("child waiter panicked"),
        }
    }

    fn log_shutdown(shutdown: &Shutdown) {
        match shutdown {
            Shutdown::EndOfStream => info!("bridge finished: end of stream"),
            Shutdown::EndpointRemoved(endpoint) => {
                info!(name = %endpoint.name, "bridge finished: endpoint removed")
            }
            Shutdown::Stopped => info!("bridge finished: stopped"),
        }
    }

}
