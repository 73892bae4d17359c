#![cfg(unix)]

use std::io::{Read, Write};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use midipipe_bridge::{
    BridgeConfig, BridgeError, DuplexBridge, Endpoint, EndpointKind, InputCallback, MidiService,
    Notification, NotificationCallback, Opened, Result, Shutdown, Subscription,
};
use midipipe_codec::{Batch, BatchSink, CodecError};
use midipipe_transport::{pipe, ChildSlots, ChildWiring, Directions, ReadEnd, WriteEnd};

type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

/// In-memory service: hands its callbacks to the test and records batches.
struct FakeService {
    sent: Sent,
    fail_sends: bool,
    inputs: Sender<InputCallback>,
    notifiers: Sender<NotificationCallback>,
}

struct Handles {
    sent: Sent,
    inputs: Receiver<InputCallback>,
    notifiers: Receiver<NotificationCallback>,
}

fn fake_service(fail_sends: bool) -> (FakeService, Handles) {
    let sent = Sent::default();
    let (inputs_tx, inputs_rx) = unbounded();
    let (notifiers_tx, notifiers_rx) = unbounded();
    (
        FakeService {
            sent: Arc::clone(&sent),
            fail_sends,
            inputs: inputs_tx,
            notifiers: notifiers_tx,
        },
        Handles {
            sent,
            inputs: inputs_rx,
            notifiers: notifiers_rx,
        },
    )
}

fn endpoint(index: usize, kind: EndpointKind) -> Endpoint {
    Endpoint {
        index,
        name: format!("fake {kind} {index}"),
        kind,
    }
}

struct FakeOutput {
    sent: Sent,
    fail: bool,
}

impl BatchSink for FakeOutput {
    fn send_batch(&mut self, batch: &Batch) -> midipipe_codec::Result<()> {
        if self.fail {
            return Err(CodecError::delivery("destination vanished"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.extend(batch.messages().map(|m| m.as_bytes().to_vec()));
        Ok(())
    }
}

impl MidiService for FakeService {
    type Input = ();
    type Output = FakeOutput;

    fn endpoints(&self, kind: EndpointKind) -> Result<Vec<Endpoint>> {
        Ok(vec![endpoint(0, kind)])
    }

    fn open_input(&self, index: Option<usize>, callback: InputCallback) -> Result<Opened<()>> {
        if let Some(index @ 1..) = index {
            return Err(BridgeError::NoSuchEndpoint {
                kind: EndpointKind::Source,
                index,
            });
        }
        self.inputs.send(callback).unwrap();
        Ok(Opened {
            handle: (),
            endpoint: index.map(|i| endpoint(i, EndpointKind::Source)),
        })
    }

    fn open_output(&self, index: Option<usize>) -> Result<Opened<FakeOutput>> {
        Ok(Opened {
            handle: FakeOutput {
                sent: Arc::clone(&self.sent),
                fail: self.fail_sends,
            },
            endpoint: index.map(|i| endpoint(i, EndpointKind::Destination)),
        })
    }

    fn subscribe(
        &self,
        _watched: Vec<Endpoint>,
        notify: NotificationCallback,
    ) -> Result<Subscription> {
        self.notifiers.send(notify).unwrap();
        Ok(Subscription::new())
    }
}

fn run_in_background(
    bridge: DuplexBridge<FakeService>,
    source: Option<ReadEnd>,
    sink: Option<WriteEnd>,
) -> thread::JoinHandle<Result<Shutdown>> {
    thread::spawn(move || bridge.run(source, sink))
}

#[test]
fn pipe_to_service_delivers_decoded_messages_in_order() {
    let (service, handles) = fake_service(false);
    let (read, mut write) = pipe().unwrap();

    write
        .write_all(&[0x90, 0x40, 0x7F, 0x41, 0x7F, 0xF8, 0xF0, 0x01, 0x02, 0xF7, 0xC0, 0x05])
        .unwrap();
    drop(write);

    let shutdown = DuplexBridge::new(service)
        .run(Some(read), None::<WriteEnd>)
        .unwrap();
    assert_eq!(shutdown, Shutdown::EndOfStream);

    let sent = handles.sent.lock().unwrap();
    assert_eq!(
        *sent,
        vec![
            vec![0x90, 0x40, 0x7F],
            vec![0x90, 0x41, 0x7F],
            vec![0xF8],
            vec![0xF0, 0x01, 0x02, 0xF7],
            vec![0xC0, 0x05],
        ]
    );
}

#[test]
fn trailing_partial_message_is_dropped_without_error() {
    let (service, handles) = fake_service(false);
    let (read, mut write) = pipe().unwrap();
    write.write_all(&[0xC0, 0x05, 0x90, 0x40]).unwrap();
    drop(write);

    let shutdown = DuplexBridge::new(service)
        .run(Some(read), None::<WriteEnd>)
        .unwrap();
    assert_eq!(shutdown, Shutdown::EndOfStream);
    assert_eq!(*handles.sent.lock().unwrap(), vec![vec![0xC0, 0x05]]);
}

#[test]
fn small_reads_produce_same_messages() {
    let (service, handles) = fake_service(false);
    let (read, mut write) = pipe().unwrap();
    let bytes = [0xB0, 0x07, 0x64, 0x0A, 0x40, 0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];

    let writer = thread::spawn(move || {
        for byte in bytes {
            write.write_all(&[byte]).unwrap();
        }
    });

    let config = BridgeConfig {
        read_chunk_size: 2,
        ..BridgeConfig::default()
    };
    let shutdown = DuplexBridge::new(service)
        .with_config(config)
        .run(Some(read), None::<WriteEnd>)
        .unwrap();
    writer.join().unwrap();

    assert_eq!(shutdown, Shutdown::EndOfStream);
    assert_eq!(
        *handles.sent.lock().unwrap(),
        vec![
            vec![0xB0, 0x07, 0x64],
            vec![0xB0, 0x0A, 0x40],
            vec![0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7],
        ]
    );
}

#[test]
fn delivery_failure_is_fatal() {
    let (service, _handles) = fake_service(true);
    let (read, mut write) = pipe().unwrap();
    write.write_all(&[0x90, 0x40, 0x7F]).unwrap();

    let err = DuplexBridge::new(service)
        .run(Some(read), None::<WriteEnd>)
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Codec(CodecError::Delivery(ref msg)) if msg == "destination vanished"
    ));
}

#[test]
fn service_to_pipe_writes_messages_until_stopped() {
    let (service, handles) = fake_service(false);
    let (mut read, write) = pipe().unwrap();

    let bridge = DuplexBridge::new(service);
    let stop = bridge.stop_handle();
    let running = run_in_background(bridge, None, Some(write));

    let mut callback = handles.inputs.recv().unwrap();
    callback(&[0x90, 0x40, 0x7F]);
    callback(&[0xF0, 0x7D, 0x01, 0xF7]);
    callback(&[0x90, 0x40, 0x00]);

    stop.stop();
    assert_eq!(running.join().unwrap().unwrap(), Shutdown::Stopped);
    drop(callback);

    let mut out = Vec::new();
    read.read_to_end(&mut out).unwrap();
    assert_eq!(
        out,
        vec![0x90, 0x40, 0x7F, 0xF0, 0x7D, 0x01, 0xF7, 0x90, 0x40, 0x00]
    );
}

#[test]
fn closed_byte_sink_is_fatal() {
    let (service, handles) = fake_service(false);
    let (read, write) = pipe().unwrap();
    drop(read);

    let running = run_in_background(DuplexBridge::new(service), None, Some(write));
    let mut callback = handles.inputs.recv().unwrap();
    callback(&[0xFE]);

    let err = running.join().unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Codec(CodecError::Io(_))));
}

#[test]
fn endpoint_removal_stops_bridge() {
    let (service, handles) = fake_service(false);
    let (_read, write) = pipe().unwrap();

    let bridge = DuplexBridge::new(service).with_source_endpoint(Some(0));
    let running = run_in_background(bridge, None, Some(write));

    let _callback = handles.inputs.recv().unwrap();
    let mut notify = handles
        .notifiers
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    let removed = endpoint(0, EndpointKind::Source);
    notify(Notification::EndpointRemoved(removed.clone()));

    assert_eq!(
        running.join().unwrap().unwrap(),
        Shutdown::EndpointRemoved(removed)
    );
}

#[test]
fn virtual_endpoints_are_not_watched() {
    let (service, handles) = fake_service(false);
    let (_read, write) = pipe().unwrap();

    let bridge = DuplexBridge::new(service);
    let stop = bridge.stop_handle();
    let running = run_in_background(bridge, None, Some(write));

    let _callback = handles.inputs.recv().unwrap();
    stop.stop();
    assert_eq!(running.join().unwrap().unwrap(), Shutdown::Stopped);
    assert!(handles.notifiers.try_recv().is_err());
}

#[test]
fn unknown_endpoint_fails_before_bridging() {
    let (service, _handles) = fake_service(false);
    let (_read, write) = pipe().unwrap();

    let err = DuplexBridge::new(service)
        .with_source_endpoint(Some(3))
        .run(None::<ReadEnd>, Some(write))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::NoSuchEndpoint {
            kind: EndpointKind::Source,
            index: 3
        }
    ));
}

#[test]
fn nothing_to_bridge_is_rejected() {
    let (service, _handles) = fake_service(false);
    let err = DuplexBridge::new(service)
        .run(None::<ReadEnd>, None::<WriteEnd>)
        .unwrap_err();
    assert!(matches!(err, BridgeError::NothingToBridge));
}

#[test]
fn both_directions_through_a_child() {
    let (service, handles) = fake_service(false);
    let wiring = ChildWiring::new(Directions::BOTH, ChildSlots::default()).unwrap();
    let mut command = Command::new("/bin/cat");
    let (mut child, ends) = wiring.spawn(&mut command).unwrap();

    let running = run_in_background(DuplexBridge::new(service), ends.from_child, ends.to_child);

    let mut callback = handles.inputs.recv().unwrap();
    callback(&[0x90, 0x3C, 0x64]);
    callback(&[0xF8]);
    callback(&[0x80, 0x3C, 0x00]);
    // Closing the service input closes the child's stdin, so cat exits and
    // the bridge sees end of stream on the child's stdout.
    drop(callback);

    assert_eq!(running.join().unwrap().unwrap(), Shutdown::EndOfStream);
    assert!(child.wait().unwrap().success());
    assert_eq!(
        *handles.sent.lock().unwrap(),
        vec![vec![0x90, 0x3C, 0x64], vec![0xF8], vec![0x80, 0x3C, 0x00]]
    );
}
