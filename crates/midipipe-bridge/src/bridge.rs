//! Duplex bridge between a [`MidiService`] and a raw MIDI byte stream.
//!
//! Service-to-pipe runs inside the service's input callback: each received
//! message is written to the byte sink before the callback returns.
//! Pipe-to-service runs on a dedicated worker that reads chunks, decodes
//! them, and sends one batch per chunk. The calling thread waits for the
//! first terminal event (end of stream, endpoint removal, fatal error or an
//! explicit stop) and tears both directions down.

use std::fmt;
use std::io::{Read, Write};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use midipipe_codec::{
    BatchConfig, BatchSink, DecoderConfig, Message, MessageBatcher, MessageReader, MessageWriter,
    DEFAULT_READ_CHUNK,
};
use tracing::{debug, error, info};

use crate::error::{BridgeError, Result};
use crate::service::{Endpoint, MidiService, Notification};

/// Tunables for both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Bytes requested per read from the byte source. Default: 1024.
    pub read_chunk_size: usize,
    pub decoder: DecoderConfig,
    pub batch: BatchConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK,
            decoder: DecoderConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Messages from the service are written to the byte sink.
    ServiceToPipe,
    /// Bytes from the byte source are decoded and sent to the service.
    PipeToService,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceToPipe => f.write_str("service-to-pipe"),
            Self::PipeToService => f.write_str("pipe-to-service"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionState {
    Idle,
    Active,
    Closed,
}

/// Why [`DuplexBridge::run`] returned without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    /// The byte source reached end of stream.
    EndOfStream,
    /// A connected endpoint disappeared from the service.
    EndpointRemoved(Endpoint),
    /// [`StopHandle::stop`] was called.
    Stopped,
}

enum Event {
    Closed(Direction),
    EndpointRemoved(Endpoint),
    Fatal(Direction, BridgeError),
    Stop,
}

/// Requests a graceful stop from any thread.
#[derive(Clone)]
pub struct StopHandle {
    events: Sender<Event>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.events.send(Event::Stop);
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle").finish_non_exhaustive()
    }
}

struct Lanes {
    service_to_pipe: DirectionState,
    pipe_to_service: DirectionState,
}

impl Lanes {
    fn new() -> Self {
        Self {
            service_to_pipe: DirectionState::Idle,
            pipe_to_service: DirectionState::Idle,
        }
    }

    fn set(&mut self, direction: Direction, state: DirectionState) {
        let lane = match direction {
            Direction::ServiceToPipe => &mut self.service_to_pipe,
            Direction::PipeToService => &mut self.pipe_to_service,
        };
        if *lane == state || *lane == DirectionState::Closed {
            return;
        }
        info!(%direction, from = ?*lane, to = ?state, "direction state changed");
        *lane = state;
    }

    fn close_all(&mut self) {
        for direction in [Direction::ServiceToPipe, Direction::PipeToService] {
            let lane = match direction {
                Direction::ServiceToPipe => self.service_to_pipe,
                Direction::PipeToService => self.pipe_to_service,
            };
            if lane == DirectionState::Active {
                self.set(direction, DirectionState::Closed);
            }
        }
    }
}

/// Owns both directional pipelines for one service and one byte stream.
pub struct DuplexBridge<S> {
    service: S,
    config: BridgeConfig,
    source_endpoint: Option<usize>,
    destination_endpoint: Option<usize>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl<S: MidiService> DuplexBridge<S> {
    pub fn new(service: S) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            service,
            config: BridgeConfig::default(),
            source_endpoint: None,
            destination_endpoint: None,
            events_tx,
            events_rx,
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Read from service source `index`; `None` publishes a virtual endpoint.
    pub fn with_source_endpoint(mut self, index: Option<usize>) -> Self {
        self.source_endpoint = index;
        self
    }

    /// Write to service destination `index`; `None` publishes a virtual endpoint.
    pub fn with_destination_endpoint(mut self, index: Option<usize>) -> Self {
        self.destination_endpoint = index;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Bridge until the first terminal event.
    ///
    /// `sink` enables service-to-pipe and `source` enables pipe-to-service;
    /// at least one must be given. Both ends are closed before returning,
    /// except a source whose worker is still blocked in a read.
    pub fn run<R, W>(self, source: Option<R>, sink: Option<W>) -> Result<Shutdown>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        if source.is_none() && sink.is_none() {
            return Err(BridgeError::NothingToBridge);
        }

        let mut lanes = Lanes::new();
        let mut watched = Vec::new();

        let input = match sink {
            Some(sink) => {
                let callback = service_to_pipe(sink, self.events_tx.clone());
                let opened = self.service.open_input(self.source_endpoint, callback)?;
                watched.extend(opened.endpoint);
                lanes.set(Direction::ServiceToPipe, DirectionState::Active);
                Some(opened.handle)
            }
            None => None,
        };

        let worker = match source {
            Some(source) => {
                let opened = self.service.open_output(self.destination_endpoint)?;
                watched.extend(opened.endpoint);
                let worker = spawn_pipe_to_service(
                    source,
                    opened.handle,
                    self.config.clone(),
                    self.events_tx.clone(),
                )?;
                lanes.set(Direction::PipeToService, DirectionState::Active);
                Some(worker)
            }
            None => None,
        };

        let subscription = if watched.is_empty() {
            None
        } else {
            let events = self.events_tx.clone();
            let notify = Box::new(move |notification: Notification| match notification {
                Notification::EndpointRemoved(endpoint) => {
                    let _ = events.send(Event::EndpointRemoved(endpoint));
                }
            });
            Some(self.service.subscribe(watched, notify)?)
        };

        let outcome = match self.events_rx.recv() {
            Ok(Event::Closed(direction)) => {
                lanes.set(direction, DirectionState::Closed);
                Ok(Shutdown::EndOfStream)
            }
            Ok(Event::EndpointRemoved(endpoint)) => {
                info!(kind = %endpoint.kind, name = %endpoint.name, "stopping: endpoint removed");
                Ok(Shutdown::EndpointRemoved(endpoint))
            }
            Ok(Event::Fatal(direction, err)) => {
                error!(%direction, error = %err, "direction failed");
                lanes.set(direction, DirectionState::Closed);
                Err(err)
            }
            Ok(Event::Stop) | Err(_) => {
                info!("stop requested");
                Ok(Shutdown::Stopped)
            }
        };

        if let Some(subscription) = subscription {
            subscription.cancel();
        }
        // Closes the service input, which drops the callback and its sink.
        drop(input);
        if let Some(worker) = worker {
            if lanes.pipe_to_service == DirectionState::Closed {
                let _ = worker.join();
            } else {
                debug!("leaving pipe-to-service worker blocked on its source");
            }
        }
        lanes.close_all();

        outcome
    }
}

/// Build the input callback that encodes service messages onto `sink`.
///
/// After the first write failure the callback reports it once and ignores
/// further messages.
fn service_to_pipe<W>(sink: W, events: Sender<Event>) -> Box<dyn FnMut(&[u8]) + Send>
where
    W: Write + Send + 'static,
{
    let mut writer = MessageWriter::new(sink);
    let mut failed = false;
    Box::new(move |bytes: &[u8]| {
        if failed || bytes.is_empty() {
            return;
        }
        let message = Message::copy_from_slice(bytes);
        if let Err(err) = writer.write_message(&message) {
            failed = true;
            let _ = events.send(Event::Fatal(Direction::ServiceToPipe, err.into()));
        }
    })
}

fn spawn_pipe_to_service<R, O>(
    source: R,
    output: O,
    config: BridgeConfig,
    events: Sender<Event>,
) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    O: BatchSink + Send + 'static,
{
    thread::Builder::new()
        .name("midipipe-pipe-to-service".to_string())
        .spawn(move || {
            let event = match pipe_to_service(source, output, &config) {
                Ok(()) => Event::Closed(Direction::PipeToService),
                Err(err) => Event::Fatal(Direction::PipeToService, err),
            };
            let _ = events.send(event);
        })
        .map_err(BridgeError::Worker)
}

fn pipe_to_service<R: Read, O: BatchSink>(
    source: R,
    output: O,
    config: &BridgeConfig,
) -> Result<()> {
    // Every sysex fragment must fit in an empty batch on its own.
    let decoder = DecoderConfig {
        max_sysex_fragment: config
            .decoder
            .max_sysex_fragment
            .min(config.batch.max_message_len()),
    };
    let mut reader = MessageReader::with_config(source, config.read_chunk_size, decoder);
    let mut batcher = MessageBatcher::with_config(output, config.batch.clone());

    while let Some(messages) = reader.read_messages()? {
        debug!(messages = messages.len(), "decoded chunk");
        for message in messages {
            batcher.append(message)?;
        }
        batcher.flush()?;
    }

    debug!("byte source reached end of stream");
    batcher.finish()?;
    Ok(())
}
