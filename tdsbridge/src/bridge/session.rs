//! One bridged client.
use std::{
    io::{Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::Arc,
    thread,
};

use crate::{
    ErrorKind,
    bridge::BridgeEvents,
    common::verbose,
    sni::SniDriver,
    tds::{FrameInspector, InspectEvent},
    transport::{
        ReceiveOutcome, SniTransport,
        config::{OpenOptions, ServerTarget},
    },
};

/// Fits the largest negotiable TDS packet.
const RECV_BUF_LEN: usize = 32 * 1024;

const CLIENT_BUF_LEN: usize = 4096;

/// Client socket plus the server-side transport, pumped both ways.
pub(crate) struct Session<D: SniDriver> {
    client: TcpStream,
    peer: SocketAddr,
    driver: Arc<D>,
    target: ServerTarget,
    options: OpenOptions,
    events: Arc<dyn BridgeEvents>,
}

impl<D: SniDriver> Session<D> {
    pub(crate) fn new(
        client: TcpStream,
        peer: SocketAddr,
        driver: Arc<D>,
        target: ServerTarget,
        options: OpenOptions,
        events: Arc<dyn BridgeEvents>,
    ) -> Session<D> {
        Session { client, peer, driver, target, options, events }
    }

    /// Relay until either side hangs up or a fatal transport failure.
    pub(crate) fn run(self) {
        let Session { mut client, peer, driver, target, options, events } = self;

        let transport = Arc::new(SniTransport::new(driver));
        match transport.initialize(&target, &options) {
            Ok(instance_name) => {
                if !instance_name.is_empty() {
                    verbose!("connected to instance {instance_name}");
                }
            }
            Err(err) => {
                events.session_error(peer, &err);
                let _ = client.shutdown(Shutdown::Both);
                events.connection_closed(peer);
                return;
            }
        }

        let downstream = match client.try_clone() {
            Ok(writer) => {
                let transport = transport.clone();
                let events = events.clone();
                thread::spawn(move || pump_downstream(transport, writer, peer, events))
            }
            Err(err) => {
                events.session_error(peer, &err.into());
                transport.close();
                let _ = client.shutdown(Shutdown::Both);
                events.connection_closed(peer);
                return;
            }
        };

        // Upstream pump: client bytes into the transport, with the
        // inspector watching the stream for log events.
        let mut inspector = FrameInspector::new();
        let mut buf = [0u8; CLIENT_BUF_LEN];
        loop {
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for event in inspector.push(&buf[..n]) {
                        match event {
                            InspectEvent::Packet(header) => events.packet_seen(peer, &header),
                            InspectEvent::Batch(sql) => events.batch_seen(peer, &sql),
                        }
                    }
                    if let Err(err) = transport.send(&buf[..n]) {
                        events.session_error(peer, &err);
                        break;
                    }
                }
                Err(err) => {
                    events.session_error(peer, &err.into());
                    break;
                }
            }
        }

        transport.close();
        let _ = client.shutdown(Shutdown::Both);
        let _ = downstream.join();
        events.connection_closed(peer);
    }
}

/// Server bytes back to the client. Runs on its own thread because the
/// bounded receive blocks.
fn pump_downstream<D: SniDriver>(
    transport: Arc<SniTransport<D>>,
    mut client: TcpStream,
    peer: SocketAddr,
    events: Arc<dyn BridgeEvents>,
) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        match transport.receive(&mut buf) {
            Ok(ReceiveOutcome::Data(n)) => {
                if client.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Ok(ReceiveOutcome::NoDataYet) => continue,
            Err(err) => {
                // Closed by the upstream pump's teardown: normal exit.
                if !matches!(err.kind(), ErrorKind::State(_)) {
                    events.session_error(peer, &err);
                }
                break;
            }
        }
    }
    let _ = client.shutdown(Shutdown::Both);
}
