use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use midipipe_bridge::Endpoint;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EndpointListing<'a> {
    client: &'a str,
    sources: &'a [Endpoint],
    destinations: &'a [Endpoint],
}

pub fn render_endpoints(
    client: &str,
    sources: &[Endpoint],
    destinations: &[Endpoint],
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Json => {
            let out = EndpointListing {
                client,
                sources,
                destinations,
            };
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "INDEX", "NAME"]);
            for endpoint in sources.iter().chain(destinations) {
                table.add_row(vec![
                    endpoint.kind.to_string(),
                    endpoint.index.to_string(),
                    endpoint.name.clone(),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Pretty => {
            let mut out = String::new();
            for (title, endpoints) in [("Sources", sources), ("Destinations", destinations)] {
                out.push_str(title);
                out.push_str(":\n");
                if endpoints.is_empty() {
                    out.push_str("  (none)\n");
                }
                for endpoint in endpoints {
                    out.push_str(&format!("  {:>3}: {}\n", endpoint.index, endpoint.name));
                }
            }
            out.trim_end().to_string()
        }
        OutputFormat::Raw => sources
            .iter()
            .chain(destinations)
            .map(|e| format!("{}\t{}\t{}", e.kind, e.index, e.name))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
