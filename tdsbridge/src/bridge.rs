//! Listening side of the bridge.
//!
//! One accept thread, one session per client. A session failure is
//! reported through [`BridgeEvents`] and never takes down the listener or
//! the other sessions.
mod session;

use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use crate::{
    Result,
    error::Error,
    sni::SniDriver,
    tds::PacketHeader,
    transport::config::{OpenOptions, ServerTarget},
};
use session::Session;

/// Observer for bridge lifecycle and relayed traffic.
///
/// Every method has a no-op default; implement what you want to see.
/// Callbacks run on listener/session threads and must not block for long.
pub trait BridgeEvents: Send + Sync + 'static {
    fn connection_accepted(&self, peer: SocketAddr) {
        let _ = peer;
    }

    fn connection_closed(&self, peer: SocketAddr) {
        let _ = peer;
    }

    /// A whole TDS packet passed through, client to server.
    fn packet_seen(&self, peer: SocketAddr, header: &PacketHeader) {
        let _ = (peer, header);
    }

    /// A whole SQL batch passed through, client to server.
    fn batch_seen(&self, peer: SocketAddr, sql: &str) {
        let _ = (peer, sql);
    }

    /// Fatal failure of one session. The session is already terminating.
    fn session_error(&self, peer: SocketAddr, error: &Error) {
        let _ = (peer, error);
    }

    fn listener_error(&self, error: &io::Error) {
        let _ = error;
    }
}

/// Events sink that ignores everything.
pub struct NullEvents;

impl BridgeEvents for NullEvents { }

/// Accepts clients and relays each one toward the configured target.
pub struct Bridge<D: SniDriver> {
    driver: Arc<D>,
    target: ServerTarget,
    options: OpenOptions,
    events: Arc<dyn BridgeEvents>,
    listener: TcpListener,
    stop: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl<D: SniDriver> Bridge<D> {
    /// Bind the listening socket. The accept loop does not run until
    /// [`start`][Bridge::start].
    pub fn bind(
        addr: impl ToSocketAddrs,
        driver: Arc<D>,
        target: ServerTarget,
        options: OpenOptions,
        events: Arc<dyn BridgeEvents>,
    ) -> Result<Bridge<D>> {
        let listener = TcpListener::bind(addr)?;
        Ok(Bridge {
            driver,
            target,
            options,
            events,
            listener,
            stop: Arc::new(AtomicBool::new(false)),
            accept: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawn the accept loop.
    pub fn start(&mut self) -> io::Result<()> {
        let listener = self.listener.try_clone()?;
        let stop = self.stop.clone();
        let driver = self.driver.clone();
        let target = self.target.clone();
        let options = self.options.clone();
        let events = self.events.clone();

        self.accept = Some(thread::spawn(move || {
            accept_loop(listener, stop, driver, target, options, events);
        }));
        Ok(())
    }

    /// Stop accepting and join the accept thread. Idempotent.
    ///
    /// Sessions already running keep relaying until their client or the
    /// server hangs up.
    pub fn stop(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblock the accept call with a throwaway connection.
        if let Ok(addr) = self.listener.local_addr() {
            let _ = TcpStream::connect((std::net::Ipv4Addr::LOCALHOST, addr.port()));
        }
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
    }
}

impl<D: SniDriver> Drop for Bridge<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop<D: SniDriver>(
    listener: TcpListener,
    stop: Arc<AtomicBool>,
    driver: Arc<D>,
    target: ServerTarget,
    options: OpenOptions,
    events: Arc<dyn BridgeEvents>,
) {
    for conn in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match conn {
            Ok(client) => {
                let Ok(peer) = client.peer_addr() else { continue };
                events.connection_accepted(peer);

                let session = Session::new(
                    client,
                    peer,
                    driver.clone(),
                    target.clone(),
                    options.clone(),
                    events.clone(),
                );
                thread::spawn(move || session.run());
            }
            Err(err) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                events.listener_error(&err);
            }
        }
    }
}
