//! [`MidiService`] backed by `midir` (ALSA sequencer, CoreMIDI, WinMM).
//!
//! Output connections live on their own thread: the connection is created
//! there and batches are handed over a channel, so the byte-side worker only
//! ever holds a `Send` handle. Endpoint removal is detected by polling the
//! port lists, since midir has no notification API.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use midipipe_codec::{Batch, BatchSink, CodecError, Message};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::service::{
    Endpoint, EndpointKind, InputCallback, MidiService, Notification, NotificationCallback, Opened,
    Subscription,
};

/// How often the watcher re-reads the port lists.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct MidirService {
    client_name: String,
    poll_interval: Duration,
}

impl MidirService {
    /// `client_name` names the client and any virtual port it publishes.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    fn midi_input(&self, op: &'static str) -> Result<MidiInput> {
        MidiInput::new(&self.client_name).map_err(|e| BridgeError::service(op, e))
    }

    fn midi_output(&self, op: &'static str) -> Result<MidiOutput> {
        MidiOutput::new(&self.client_name).map_err(|e| BridgeError::service(op, e))
    }
}

/// Open input connection; closed on drop.
pub struct MidirInput {
    _connection: MidiInputConnection<()>,
}

/// Batch sink feeding the output thread.
pub struct MidirOutput {
    requests: Sender<Vec<Message>>,
    replies: Receiver<std::result::Result<(), String>>,
}

impl BatchSink for MidirOutput {
    fn send_batch(&mut self, batch: &Batch) -> midipipe_codec::Result<()> {
        let messages = batch.messages().cloned().collect();
        self.requests
            .send(messages)
            .map_err(|_| CodecError::delivery("MIDI output thread stopped"))?;
        match self.replies.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(CodecError::Delivery(message)),
            Err(_) => Err(CodecError::delivery("MIDI output thread stopped")),
        }
    }
}

impl MidiService for MidirService {
    type Input = MidirInput;
    type Output = MidirOutput;

    fn endpoints(&self, kind: EndpointKind) -> Result<Vec<Endpoint>> {
        let names = match kind {
            EndpointKind::Source => {
                let input = self.midi_input("list sources")?;
                input
                    .ports()
                    .iter()
                    .map(|port| input.port_name(port))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| BridgeError::service("list sources", e))?
            }
            EndpointKind::Destination => {
                let output = self.midi_output("list destinations")?;
                output
                    .ports()
                    .iter()
                    .map(|port| output.port_name(port))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| BridgeError::service("list destinations", e))?
            }
        };
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(index, name)| Endpoint { index, name, kind })
            .collect())
    }

    fn open_input(
        &self,
        index: Option<usize>,
        mut callback: InputCallback,
    ) -> Result<Opened<MidirInput>> {
        let mut input = self.midi_input("open input")?;
        // Sysex, clock and active sensing are all part of the byte stream.
        input.ignore(Ignore::None);
        let forward = move |_stamp: u64, bytes: &[u8], _: &mut ()| callback(bytes);

        let Some(index) = index else {
            return virtual_input(input, &self.client_name, forward);
        };

        let ports = input.ports();
        let port = ports.get(index).ok_or(BridgeError::NoSuchEndpoint {
            kind: EndpointKind::Source,
            index,
        })?;
        let name = input
            .port_name(port)
            .map_err(|e| BridgeError::service("open input", e))?;
        let connection = input
            .connect(port, &self.client_name, forward, ())
            .map_err(|e| BridgeError::service("open input", e))?;
        info!(index, name = %name, "connected to MIDI source");

        Ok(Opened {
            handle: MidirInput {
                _connection: connection,
            },
            endpoint: Some(Endpoint {
                index,
                name,
                kind: EndpointKind::Source,
            }),
        })
    }

    fn open_output(&self, index: Option<usize>) -> Result<Opened<MidirOutput>> {
        let (setup_tx, setup_rx) = bounded(1);
        let (requests_tx, requests_rx) = bounded::<Vec<Message>>(1);
        let (replies_tx, replies_rx) = bounded(1);
        let client_name = self.client_name.clone();

        thread::Builder::new()
            .name("midipipe-output".to_string())
            .spawn(move || {
                let mut connection = match connect_output(&client_name, index) {
                    Ok((connection, endpoint)) => {
                        let _ = setup_tx.send(Ok(endpoint));
                        connection
                    }
                    Err(err) => {
                        let _ = setup_tx.send(Err(err));
                        return;
                    }
                };
                for messages in requests_rx {
                    let sent = messages
                        .iter()
                        .try_for_each(|message| connection.send(message.as_bytes()))
                        .map_err(|e| format!("send to MIDI destination failed: {e}"));
                    if replies_tx.send(sent).is_err() {
                        break;
                    }
                }
                debug!("MIDI output thread finished");
            })
            .map_err(BridgeError::Worker)?;

        let endpoint = setup_rx
            .recv()
            .map_err(|_| BridgeError::service("open output", "output thread exited"))??;

        Ok(Opened {
            handle: MidirOutput {
                requests: requests_tx,
                replies: replies_rx,
            },
            endpoint,
        })
    }

    fn subscribe(
        &self,
        watched: Vec<Endpoint>,
        mut notify: NotificationCallback,
    ) -> Result<Subscription> {
        let subscription = Subscription::new();
        let cancelled = subscription.clone();
        let client_name = self.client_name.clone();
        let interval = self.poll_interval;

        thread::Builder::new()
            .name("midipipe-watch".to_string())
            .spawn(move || {
                let (input, output) =
                    match (MidiInput::new(&client_name), MidiOutput::new(&client_name)) {
                        (Ok(input), Ok(output)) => (input, output),
                        _ => {
                            warn!("endpoint watcher could not attach to the MIDI service");
                            return;
                        }
                    };

                while !cancelled.is_cancelled() {
                    thread::sleep(interval);
                    let sources = source_names(&input);
                    let destinations = destination_names(&output);

                    let gone = watched.iter().find(|endpoint| {
                        let names = match endpoint.kind {
                            EndpointKind::Source => &sources,
                            EndpointKind::Destination => &destinations,
                        };
                        !names.contains(&endpoint.name)
                    });
                    if let Some(endpoint) = gone {
                        info!(kind = %endpoint.kind, name = %endpoint.name, "endpoint removed");
                        if !cancelled.is_cancelled() {
                            notify(Notification::EndpointRemoved(endpoint.clone()));
                        }
                        return;
                    }
                }
            })
            .map_err(BridgeError::Worker)?;

        Ok(subscription)
    }
}

fn connect_output(
    client_name: &str,
    index: Option<usize>,
) -> Result<(MidiOutputConnection, Option<Endpoint>)> {
    let output = MidiOutput::new(client_name).map_err(|e| BridgeError::service("open output", e))?;

    let Some(index) = index else {
        return virtual_output(output, client_name).map(|connection| (connection, None));
    };

    let ports = output.ports();
    let port = ports.get(index).ok_or(BridgeError::NoSuchEndpoint {
        kind: EndpointKind::Destination,
        index,
    })?;
    let name = output
        .port_name(port)
        .map_err(|e| BridgeError::service("open output", e))?;
    let connection = output
        .connect(port, client_name)
        .map_err(|e| BridgeError::service("open output", e))?;
    info!(index, name = %name, "connected to MIDI destination");

    Ok((
        connection,
        Some(Endpoint {
            index,
            name,
            kind: EndpointKind::Destination,
        }),
    ))
}

#[cfg(unix)]
fn virtual_input<F>(input: MidiInput, name: &str, forward: F) -> Result<Opened<MidirInput>>
where
    F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
{
    use midir::os::unix::VirtualInput;

    let connection = input
        .create_virtual(name, forward, ())
        .map_err(|e| BridgeError::service("create virtual destination", e))?;
    info!(name, "published virtual MIDI destination");
    Ok(Opened {
        handle: MidirInput {
            _connection: connection,
        },
        endpoint: None,
    })
}

#[cfg(not(unix))]
fn virtual_input<F>(_input: MidiInput, _name: &str, _forward: F) -> Result<Opened<MidirInput>>
where
    F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
{
    Err(BridgeError::VirtualUnsupported(EndpointKind::Destination))
}

#[cfg(unix)]
fn virtual_output(output: MidiOutput, name: &str) -> Result<MidiOutputConnection> {
    use midir::os::unix::VirtualOutput;

    let connection = output
        .create_virtual(name)
        .map_err(|e| BridgeError::service("create virtual source", e))?;
    info!(name, "published virtual MIDI source");
    Ok(connection)
}

#[cfg(not(unix))]
fn virtual_output(_output: MidiOutput, _name: &str) -> Result<MidiOutputConnection> {
    Err(BridgeError::VirtualUnsupported(EndpointKind::Source))
}

fn source_names(input: &MidiInput) -> Vec<String> {
    input
        .ports()
        .iter()
        .filter_map(|port| input.port_name(port).ok())
        .collect()
}

fn destination_names(output: &MidiOutput) -> Vec<String> {
    output
        .ports()
        .iter()
        .filter_map(|port| output.port_name(port).ok())
        .collect()
}
