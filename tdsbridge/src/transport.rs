//! The native transport adapter.
//!
//! [`SniTransport`] owns one connection to the server-side native stack and
//! exposes the three operations the bridge needs: `initialize`, `send`,
//! `receive`. Every native status code funnels through
//! [`Status::classify`][crate::sni::Status::classify]; the adapter never
//! retries internally and never swallows a fatal status.
pub mod config;

use std::{
    fmt, mem,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    Result,
    common::{span, verbose},
    sni::{ConnHandle, InstanceName, IoDirection, OpenParams, Packet, SniDriver, Status, status},
};
use config::{ConsumerConfig, OpenOptions, ServerTarget};

/// Default bounded wait applied to each receive call.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of one bounded receive call.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A whole packet was drained into the caller buffer.
    Data(usize),
    /// No complete packet arrived within the wait window. Not an error:
    /// call `receive` again.
    NoDataYet,
}

enum Lifecycle<D: SniDriver> {
    Uninitialized,
    Open(Arc<ConnHandle<D>>),
    Closed,
}

impl<D: SniDriver> Lifecycle<D> {
    fn name(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Open(_) => "open",
            Lifecycle::Closed => "closed",
        }
    }
}

/// Synchronous adapter over one native transport connection.
///
/// Operations either return immediately or block the calling thread up to a
/// bounded timeout; there is no internal background thread. One thread may
/// pump `send` while another pumps `receive`: the lifecycle lock is held
/// only to read or swap the state, never across a native call, and
/// in-flight operations hold shared ownership of the handle so a concurrent
/// `close` cannot release it from under them.
pub struct SniTransport<D: SniDriver> {
    driver: Arc<D>,
    consumer: ConsumerConfig,
    spn: Option<Vec<u8>>,
    recv_timeout: Duration,
    lifecycle: Mutex<Lifecycle<D>>,
}

impl<D: SniDriver> SniTransport<D> {
    pub fn new(driver: Arc<D>) -> SniTransport<D> {
        SniTransport {
            driver,
            consumer: ConsumerConfig::default(),
            spn: None,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        }
    }

    pub fn with_consumer(mut self, consumer: ConsumerConfig) -> SniTransport<D> {
        self.consumer = consumer;
        self
    }

    /// Security principal name for integrated auth. Absent for SQL auth.
    pub fn with_spn(mut self, spn: Vec<u8>) -> SniTransport<D> {
        self.spn = Some(spn);
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> SniTransport<D> {
        self.recv_timeout = timeout;
        self
    }

    /// Open the connection toward `target`.
    ///
    /// Valid only before the first successful call; on failure the adapter
    /// stays uninitialized and the error carries the native status. The
    /// returned instance name is only meaningful for named, non-default
    /// endpoints.
    pub fn initialize(&self, target: &ServerTarget, options: &OpenOptions) -> Result<InstanceName> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if !matches!(&*lifecycle, Lifecycle::Uninitialized) {
            return Err(StateError { op: "initialize", state: lifecycle.name() }.into());
        }

        span!("initialize");
        let connection_string = target.connection_string();
        verbose!("opening {connection_string:?}");

        let params = OpenParams {
            connection_string: &connection_string,
            spn: self.spn.as_deref(),
            consumer: &self.consumer,
            override_cache: options.override_cache,
            synchronous: options.synchronous,
            timeout_ms: options.timeout_ms(),
            parallel: options.parallel,
            ip_preference: options.ip_preference,
            dns_cache: options.dns_cache.as_ref(),
        };

        let (handle, instance_name) = ConnHandle::open(self.driver.clone(), &params)?;
        *lifecycle = Lifecycle::Open(Arc::new(handle));
        Ok(instance_name)
    }

    /// Push one packet's worth of bytes toward the server.
    ///
    /// A non-success write status does not change state; the caller decides
    /// whether to close. The packet is released whether the write succeeds
    /// or fails.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let conn = self.conn("send")?;
        verbose!("sending {} bytes", bytes.len());

        let packet = Packet::alloc(self.driver.clone(), conn.raw(), IoDirection::Write)?;
        packet.set_data(bytes);

        let code = self.driver.write(conn.raw(), packet.raw());
        if code != status::SUCCESS {
            return Err(WriteError { status: code }.into());
        }
        Ok(())
    }

    /// Pull one packet from the server, waiting at most the configured
    /// receive timeout.
    ///
    /// Pending and wait-timeout statuses both yield
    /// [`ReceiveOutcome::NoDataYet`]; no packet was produced and the caller
    /// simply calls again. Any other non-success status is fatal for the
    /// session.
    pub fn receive(&self, buf: &mut [u8]) -> Result<ReceiveOutcome> {
        let conn = self.conn("receive")?;

        let timeout_ms = self.recv_timeout.as_millis().min(i32::MAX as u128) as i32;
        let (code, raw) = self.driver.read(conn.raw(), timeout_ms);

        match Status::classify(code) {
            Status::NoDataYet => {
                // The pending/timeout pair never yields a packet.
                debug_assert!(raw.is_null());
                Ok(ReceiveOutcome::NoDataYet)
            }
            Status::Fatal(code) => {
                if !raw.is_null() {
                    drop(Packet::from_raw(self.driver.clone(), raw, IoDirection::Read));
                }
                Err(ReadError { status: code }.into())
            }
            Status::Success => {
                if raw.is_null() {
                    return Err(ReadError { status: code }.into());
                }
                let packet = Packet::from_raw(self.driver.clone(), raw, IoDirection::Read);
                let size = packet.read_data(buf)?;
                verbose!("received {size} bytes");
                Ok(ReceiveOutcome::Data(size))
            }
        }
    }

    /// Tear the connection down. Valid from any state, idempotent.
    ///
    /// The state flips to closed immediately; the exactly-once native
    /// release runs as soon as the last in-flight operation drops its
    /// shared ownership of the handle.
    pub fn close(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        let previous = mem::replace(&mut *lifecycle, Lifecycle::Closed);
        drop(lifecycle);
        drop(previous);
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.lifecycle.lock().unwrap(), Lifecycle::Open(_))
    }

    fn conn(&self, op: &'static str) -> Result<Arc<ConnHandle<D>>> {
        let lifecycle = self.lifecycle.lock().unwrap();
        match &*lifecycle {
            Lifecycle::Open(handle) => Ok(handle.clone()),
            state => Err(StateError { op, state: state.name() }.into()),
        }
    }
}

impl<D: SniDriver> Drop for SniTransport<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: SniDriver> fmt::Debug for SniTransport<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniTransport")
            .field("state", &self.lifecycle.lock().unwrap().name())
            .finish()
    }
}

/// Operation issued outside its valid lifecycle state.
///
/// The native layer is not invoked.
pub struct StateError {
    pub(crate) op: &'static str,
    pub(crate) state: &'static str,
}

impl std::error::Error for StateError { }

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is invalid while the transport is {}", self.op, self.state)
    }
}

impl fmt::Debug for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// The native write reported a non-success status.
pub struct WriteError {
    pub(crate) status: u32,
}

impl WriteError {
    pub fn status(&self) -> u32 {
        self.status
    }
}

impl std::error::Error for WriteError { }

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native write failed with status {}", self.status)
    }
}

impl fmt::Debug for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// The native read reported a fatal status, or a success with no packet.
pub struct ReadError {
    pub(crate) status: u32,
}

impl ReadError {
    pub fn status(&self) -> u32 {
        self.status
    }
}

impl std::error::Error for ReadError { }

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status == status::SUCCESS {
            f.write_str("native read reported success but produced no packet")
        } else {
            write!(f, "native read failed with status {}", self.status)
        }
    }
}

impl fmt::Debug for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use super::*;
    use crate::ErrorKind;
    use crate::sni::mock::MockSni;

    fn open_transport(driver: &Arc<MockSni>) -> SniTransport<MockSni> {
        let transport = SniTransport::new(driver.clone());
        transport
            .initialize(&ServerTarget::tcp("localhost", 1433), &OpenOptions::default())
            .unwrap();
        transport
    }

    #[test]
    fn scenario_initialize_send_receive() {
        let driver = MockSni::new();
        driver.set_instance_name(b"MSSQLSERVER");

        let transport = SniTransport::new(driver.clone());
        let name = transport
            .initialize(&ServerTarget::host_spec(r"localhost\sql2022"), &OpenOptions::default())
            .unwrap();
        assert_eq!(name.as_bytes(), b"MSSQLSERVER");
        assert!(transport.is_open());

        transport.send(&[0x12, 0x34, 0x56]).unwrap();
        assert_eq!(driver.writes(), vec![vec![0x12, 0x34, 0x56]]);

        driver.push_read(&[0xAA, 0xBB]);
        let mut buf = [0u8; 16];
        assert_eq!(transport.receive(&mut buf).unwrap(), ReceiveOutcome::Data(2));
        assert_eq!(&buf[..2], &[0xAA, 0xBB]);
    }

    #[test]
    fn initialize_failure_stays_uninitialized() {
        let driver = MockSni::new();
        driver.fail_open(10054);

        let transport = SniTransport::new(driver.clone());
        let err = transport
            .initialize(&ServerTarget::tcp("localhost", 1433), &OpenOptions::default())
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Connect(e) if e.status() == 10054));
        assert!(!transport.is_open());

        // A later attempt may still succeed.
        driver.succeed_open();
        transport
            .initialize(&ServerTarget::tcp("localhost", 1433), &OpenOptions::default())
            .unwrap();
        assert!(transport.is_open());
    }

    #[test]
    fn double_initialize_is_rejected() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        let err = transport
            .initialize(&ServerTarget::tcp("localhost", 1433), &OpenOptions::default())
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::State(_)));
        assert_eq!(driver.open_count(), 1);
    }

    #[test]
    fn operations_gated_before_initialize() {
        let driver = MockSni::new();
        let transport = SniTransport::new(driver.clone());

        let err = transport.send(&[1]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::State(_)));
        let err = transport.receive(&mut [0u8; 8]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::State(_)));

        // The native layer was never touched.
        assert_eq!(driver.open_count(), 0);
        assert_eq!(driver.read_count(), 0);
        assert!(driver.writes().is_empty());
    }

    #[test]
    fn operations_gated_after_close() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        transport.close();

        let err = transport.send(&[1]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::State(_)));
        let err = transport.receive(&mut [0u8; 8]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::State(_)));
        assert_eq!(driver.read_count(), 0);
    }

    #[test]
    fn close_releases_exactly_once() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);

        transport.close();
        transport.close();
        assert_eq!(driver.close_count(), 1);

        drop(transport);
        assert_eq!(driver.close_count(), 1);
    }

    #[test]
    fn drop_closes_an_open_transport() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        drop(transport);
        assert_eq!(driver.close_count(), 1);
    }

    #[test]
    fn send_surfaces_allocation_failure() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        driver.fail_alloc();

        let err = transport.send(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Alloc(_)));
        assert!(driver.writes().is_empty());
    }

    #[test]
    fn send_surfaces_write_failure_and_releases_packet() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        driver.fail_write(10053);

        let err = transport.send(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Write(e) if e.status() == 10053));
        assert_eq!(driver.live_packets(), 0);

        // Failure does not change state.
        assert!(transport.is_open());
    }

    #[test]
    fn send_releases_packet_on_success() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        transport.send(&[9]).unwrap();
        assert_eq!(driver.live_packets(), 0);
        assert_eq!(driver.release_count(), 1);
    }

    #[test]
    fn receive_empty_is_no_data_yet() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);

        let mut buf = [0u8; 8];
        assert_eq!(transport.receive(&mut buf).unwrap(), ReceiveOutcome::NoDataYet);
        assert_eq!(transport.receive(&mut buf).unwrap(), ReceiveOutcome::NoDataYet);
        assert!(transport.is_open());
    }

    #[test]
    fn receive_fatal_status() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        driver.fail_read(233);

        let err = transport.receive(&mut [0u8; 8]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Read(e) if e.status() == 233));
    }

    #[test]
    fn receive_releases_packet_after_drain() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        driver.push_read(&[1, 2, 3]);

        let mut buf = [0u8; 8];
        transport.receive(&mut buf).unwrap();
        assert_eq!(driver.live_packets(), 0);
    }

    #[test]
    fn receive_truncation_is_buffer_too_small() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);
        driver.push_read(&[1, 2, 3, 4]);

        let mut buf = [0u8; 2];
        let err = transport.receive(&mut buf).unwrap_err();
        match err.kind() {
            ErrorKind::BufferTooSmall(e) => {
                assert_eq!(e.needed(), 4);
                assert_eq!(e.capacity(), 2);
            }
            other => panic!("unexpected error kind: {other}"),
        }
        // Nothing was written into the undersized destination, and the
        // packet was still released.
        assert_eq!(buf, [0, 0]);
        assert_eq!(driver.live_packets(), 0);
    }

    #[test]
    fn receive_returns_within_the_wait_window() {
        let driver = MockSni::new();
        driver.sleep_on_empty();

        let transport = SniTransport::new(driver.clone())
            .with_recv_timeout(Duration::from_millis(50));
        transport
            .initialize(&ServerTarget::tcp("localhost", 1433), &OpenOptions::default())
            .unwrap();

        let started = Instant::now();
        let mut buf = [0u8; 8];
        assert_eq!(transport.receive(&mut buf).unwrap(), ReceiveOutcome::NoDataYet);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn round_trip() {
        let driver = MockSni::new();
        let transport = open_transport(&driver);

        let payload = b"\x01\x01\x00\x0dhello";
        transport.send(payload).unwrap();
        driver.deliver_last_write();

        let mut buf = [0u8; 64];
        assert_eq!(
            transport.receive(&mut buf).unwrap(),
            ReceiveOutcome::Data(payload.len()),
        );
        assert_eq!(&buf[..payload.len()], payload);
    }
}
