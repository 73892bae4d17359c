use midipipe_bridge::{EndpointKind, MidiService, MidirService};

use crate::cmd::ListArgs;
use crate::exit::{bridge_error, CliResult, SUCCESS};
use crate::output::{render_endpoints, OutputFormat};

pub fn run(args: ListArgs, format: OutputFormat) -> CliResult<i32> {
    let service = MidirService::new(args.name);
    let sources = service
        .endpoints(EndpointKind::Source)
        .map_err(bridge_error)?;
    let destinations = service
        .endpoints(EndpointKind::Destination)
        .map_err(bridge_error)?;

    println!(
        "{}",
        render_endpoints(service.client_name(), &sources, &destinations, format)
    );
    Ok(SUCCESS)
}
