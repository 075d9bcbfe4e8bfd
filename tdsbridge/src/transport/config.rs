//! Connection target and open-call configuration.
use std::{borrow::Cow, ffi::c_void, fmt, time::Duration};

/// Default consumer buffer size handed to the open call.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Infinite-timeout sentinel of the native open/read calls.
pub(crate) const TIMEOUT_INFINITE: i32 = -1;

/// The server endpoint the bridge forwards to.
///
/// A host spec is passed through to the native stack as-is: `name`,
/// `name\instance`, or `address,port`. LocalDB selects the local default
/// instance and ignores any port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerTarget {
    kind: TargetKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum TargetKind {
    Host { spec: String },
    LocalDb,
}

impl ServerTarget {
    /// Target a TCP endpoint as `address,port`.
    pub fn tcp(host: &str, port: u16) -> ServerTarget {
        let mut port_buf = itoa::Buffer::new();
        let port = port_buf.format(port);
        let mut spec = String::with_capacity(host.len() + 1 + port.len());
        spec.push_str(host);
        spec.push(',');
        spec.push_str(port);
        ServerTarget { kind: TargetKind::Host { spec } }
    }

    /// Target a raw host spec (`name` or `name\instance`).
    pub fn host_spec(spec: impl Into<String>) -> ServerTarget {
        ServerTarget { kind: TargetKind::Host { spec: spec.into() } }
    }

    /// Target the LocalDB default instance.
    pub fn local_db() -> ServerTarget {
        ServerTarget { kind: TargetKind::LocalDb }
    }

    /// Parse a CLI token.
    ///
    /// The literal `localdb` (case-insensitive) selects LocalDB and ignores
    /// `port`; a token carrying `\` names an instance; anything else is an
    /// address paired with `port`.
    pub fn parse(token: &str, port: u16) -> Result<ServerTarget, ParseError> {
        if token.is_empty() {
            return Err(ParseError { reason: "server address is empty".into() });
        }
        if token.eq_ignore_ascii_case("localdb") {
            return Ok(ServerTarget::local_db());
        }
        if token.contains('\\') {
            return Ok(ServerTarget::host_spec(token));
        }
        Ok(ServerTarget::tcp(token, port))
    }

    pub fn is_local_db(&self) -> bool {
        matches!(self.kind, TargetKind::LocalDb)
    }

    /// The connection string handed to the native open call.
    pub fn connection_string(&self) -> String {
        match &self.kind {
            TargetKind::Host { spec } => spec.clone(),
            TargetKind::LocalDb => r"(localdb)\MSSQLLocalDB".into(),
        }
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connection_string())
    }
}

/// Error when parsing a server target.
pub struct ParseError {
    pub(crate) reason: Cow<'static, str>,
}

impl std::error::Error for ParseError { }

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse server target: {}", self.reason)
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// IP address family preference during name resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IpPreference {
    #[default]
    IPv4First,
    IPv6First,
    PlatformDefault,
}

impl IpPreference {
    pub(crate) fn native(self) -> i32 {
        match self {
            IpPreference::IPv4First => 0,
            IpPreference::IPv6First => 1,
            IpPreference::PlatformDefault => 2,
        }
    }
}

/// Cached resolution info handed to the open call, four optional strings.
#[derive(Clone, Debug, Default)]
pub struct DnsCacheInfo {
    pub fqdn: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub port: Option<String>,
}

/// Completion callback slot signature of the native consumer block.
pub type CompletionFn = unsafe extern "C" fn(key: *mut c_void, packet: *mut c_void, status: u32);

/// Consumer descriptor supplied at open time.
///
/// With both callback slots empty the native stack runs synchronously:
/// every send/receive is a blocking call bounded by an explicit timeout.
/// The slots are a reserved extension point for a future asynchronous
/// mode and are always `None` today.
#[derive(Clone, Copy, Debug)]
pub struct ConsumerConfig {
    pub buffer_size: usize,
    pub read_callback: Option<CompletionFn>,
    pub write_callback: Option<CompletionFn>,
    /// Opaque correlation key echoed back through the callbacks.
    pub key: usize,
}

impl Default for ConsumerConfig {
    fn default() -> ConsumerConfig {
        ConsumerConfig {
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_callback: None,
            write_callback: None,
            key: 0,
        }
    }
}

/// Options for one open attempt, discarded after the call returns.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    pub override_cache: bool,
    pub synchronous: bool,
    /// `None` maps to the native infinite sentinel.
    pub timeout: Option<Duration>,
    pub parallel: bool,
    pub ip_preference: IpPreference,
    pub dns_cache: Option<DnsCacheInfo>,
}

impl OpenOptions {
    pub(crate) fn timeout_ms(&self) -> i32 {
        match self.timeout {
            Some(timeout) => timeout.as_millis().min(i32::MAX as u128) as i32,
            None => TIMEOUT_INFINITE,
        }
    }
}

impl Default for OpenOptions {
    fn default() -> OpenOptions {
        OpenOptions {
            override_cache: false,
            synchronous: true,
            timeout: Some(Duration::from_secs(10)),
            parallel: false,
            ip_preference: IpPreference::default(),
            dns_cache: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_address() {
        let target = ServerTarget::parse("10.0.0.5", 1433).unwrap();
        assert_eq!(target.connection_string(), "10.0.0.5,1433");
        assert!(!target.is_local_db());
    }

    #[test]
    fn parse_named_instance() {
        let target = ServerTarget::parse(r"db01\reporting", 1433).unwrap();
        assert_eq!(target.connection_string(), r"db01\reporting");
    }

    #[test]
    fn parse_localdb_ignores_port() {
        for token in ["localdb", "LocalDB", "LOCALDB"] {
            let target = ServerTarget::parse(token, 9999).unwrap();
            assert!(target.is_local_db());
            assert_eq!(target.connection_string(), r"(localdb)\MSSQLLocalDB");
        }
    }

    #[test]
    fn parse_empty_spec() {
        assert!(ServerTarget::parse("", 1433).is_err());
    }

    #[test]
    fn open_timeout_sentinel() {
        let mut options = OpenOptions::default();
        assert_eq!(options.timeout_ms(), 10_000);
        options.timeout = None;
        assert_eq!(options.timeout_ms(), TIMEOUT_INFINITE);
        options.timeout = Some(Duration::from_millis(250));
        assert_eq!(options.timeout_ms(), 250);
    }

    #[test]
    fn consumer_defaults_are_synchronous() {
        let consumer = ConsumerConfig::default();
        assert_eq!(consumer.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(consumer.read_callback.is_none());
        assert!(consumer.write_callback.is_none());
    }
}
