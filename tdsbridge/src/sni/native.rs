//! Runtime loading and raw call layer for the real SNI library.
//!
//! The library exports C entry points; the parameter block of the open
//! call is a fixed binary layout reproduced here field for field. Nothing
//! outside this module touches a raw pointer.
use std::{ffi::c_void, fmt, ptr};

use libloading::Library;

use super::{ConnRef, INSTANCE_NAME_LEN, IoDirection, OpenParams, PacketRef, SniDriver, Status, status};
use crate::transport::config::{CompletionFn, DnsCacheInfo, TIMEOUT_INFINITE};

/// Library file name resolved through the loader search path.
pub const SNI_LIBRARY: &str = "Microsoft.Data.SqlClient.SNI.dll";

/// Four-byte platform BOOL.
type Bool = i32;

fn to_bool(value: bool) -> Bool {
    value as Bool
}

/// `UNKNOWN_PREFIX`: let the library pick the provider from the
/// connection string.
const PREFIX_UNKNOWN: i32 = 0;

/// Transparent network resolution stays disabled.
const TNR_DISABLED: u8 = 0;

/// Consumer slots of the open parameter block.
#[repr(C)]
pub(crate) struct RawConsumerInfo {
    pub default_user_data_length: i32,
    pub consumer_key: *const c_void,
    pub fn_read_comp: *const c_void,
    pub fn_write_comp: *const c_void,
    pub fn_trace: *const c_void,
    pub fn_accept_comp: *const c_void,
    pub num_prots: u32,
    pub listen_info: *const c_void,
    pub node_affinity: *const c_void,
}

/// DNS cache sub-struct: four optional wide strings.
#[repr(C)]
pub(crate) struct RawDnsCacheInfo {
    pub fqdn: *const u16,
    pub ipv4: *const u16,
    pub ipv6: *const u16,
    pub port: *const u16,
}

/// The open call's full parameter block.
#[repr(C)]
pub(crate) struct RawClientConsumerInfo {
    pub consumer: RawConsumerInfo,
    pub connection_string: *const u16,
    pub network_library: i32,
    pub spn: *const u8,
    pub spn_len: u32,
    pub instance_name: *mut u8,
    pub instance_name_len: u32,
    pub override_last_connect_cache: Bool,
    pub synchronous_connection: Bool,
    pub timeout: i32,
    pub parallel: Bool,
    pub transparent_network_resolution: u8,
    pub total_timeout: i32,
    pub azure_sql_endpoint: Bool,
    pub ip_address_preference: i32,
    pub dns_cache: RawDnsCacheInfo,
}

/// Error record filled by `SNIGetLastError`.
#[repr(C)]
pub(crate) struct RawErrorRecord {
    pub provider: i32,
    pub error_message: [u16; 261],
    pub native_error: u32,
    pub sni_error: u32,
    pub file_name: *const u16,
    pub function: *const u16,
    pub line_number: u32,
}

type OpenSyncExFn = unsafe extern "C" fn(*mut RawClientConsumerInfo, *mut *mut c_void) -> u32;
type CloseFn = unsafe extern "C" fn(*mut c_void) -> u32;
type PacketAllocateFn = unsafe extern "C" fn(*mut c_void, i32) -> *mut c_void;
type PacketReleaseFn = unsafe extern "C" fn(*mut c_void);
type PacketSetDataFn = unsafe extern "C" fn(*mut c_void, *const u8, u32);
type PacketGetDataFn = unsafe extern "C" fn(*mut c_void, *mut u8, u32, *mut u32) -> u32;
type ReadSyncOverAsyncFn = unsafe extern "C" fn(*mut c_void, *mut *mut c_void, i32) -> u32;
type WriteSyncOverAsyncFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32;
type InitializeFn = unsafe extern "C" fn(*mut c_void) -> u32;
type TerminateFn = unsafe extern "C" fn() -> u32;
type GetLastErrorFn = unsafe extern "C" fn(*mut RawErrorRecord);

/// The real native transport stack.
///
/// Loaded once; symbols are resolved at load time and the
/// initialize/terminate pair is tied to this value's lifetime.
pub struct NativeSni {
    open_sync_ex: OpenSyncExFn,
    close: CloseFn,
    packet_allocate: PacketAllocateFn,
    packet_release: PacketReleaseFn,
    packet_set_data: PacketSetDataFn,
    packet_get_data: PacketGetDataFn,
    read_sync_over_async: ReadSyncOverAsyncFn,
    write_sync_over_async: WriteSyncOverAsyncFn,
    terminate: TerminateFn,
    get_last_error: GetLastErrorFn,
    _lib: Library,
}

impl NativeSni {
    /// Load [`SNI_LIBRARY`] from the loader search path.
    pub fn load() -> Result<NativeSni, LoadError> {
        NativeSni::load_from(SNI_LIBRARY)
    }

    /// Load a specific library file.
    pub fn load_from(path: &str) -> Result<NativeSni, LoadError> {
        // Safety: the SNI library's init routines have no unsound
        // side effects on load.
        let lib = unsafe { Library::new(path) }?;

        macro_rules! sym {
            ($ty:ty, $name:literal) => {
                // Safety: the signature matches the library export.
                *unsafe { lib.get::<$ty>($name) }?
            };
        }

        let initialize = sym!(InitializeFn, b"SNIInitialize\0");
        let open_sync_ex = sym!(OpenSyncExFn, b"SNIOpenSyncExWrapper\0");
        let close = sym!(CloseFn, b"SNICloseWrapper\0");
        let packet_allocate = sym!(PacketAllocateFn, b"SNIPacketAllocateWrapper\0");
        let packet_release = sym!(PacketReleaseFn, b"SNIPacketRelease\0");
        let packet_set_data = sym!(PacketSetDataFn, b"SNIPacketSetData\0");
        let packet_get_data = sym!(PacketGetDataFn, b"SNIPacketGetDataWrapper\0");
        let read_sync_over_async = sym!(ReadSyncOverAsyncFn, b"SNIReadSyncOverAsync\0");
        let write_sync_over_async = sym!(WriteSyncOverAsyncFn, b"SNIWriteSyncOverAsync\0");
        let terminate = sym!(TerminateFn, b"SNITerminate\0");
        let get_last_error = sym!(GetLastErrorFn, b"SNIGetLastError\0");

        // Safety: pairs with SNITerminate in drop; the failure path never
        // constructs the value.
        let code = unsafe { initialize(ptr::null_mut()) };
        if code != status::SUCCESS {
            return Err(LoadError { kind: LoadErrorKind::Initialize(code) });
        }

        Ok(NativeSni {
            open_sync_ex,
            close,
            packet_allocate,
            packet_release,
            packet_set_data,
            packet_get_data,
            read_sync_over_async,
            write_sync_over_async,
            terminate,
            get_last_error,
            _lib: lib,
        })
    }

    /// Fetch and decode the library's last-error record.
    fn last_error(&self) -> LastError {
        let mut record = RawErrorRecord {
            provider: 0,
            error_message: [0; 261],
            native_error: 0,
            sni_error: 0,
            file_name: ptr::null(),
            function: ptr::null(),
            line_number: 0,
        };
        // Safety: the record is caller-allocated at the layout the
        // library fills.
        unsafe { (self.get_last_error)(&mut record) };

        let end = record
            .error_message
            .iter()
            .position(|c| *c == 0)
            .unwrap_or(record.error_message.len());
        LastError {
            provider: record.provider,
            message: String::from_utf16_lossy(&record.error_message[..end]),
            native_error: record.native_error,
            sni_error: record.sni_error,
        }
    }

    fn log_failure(&self, _op: &'static str, _code: u32) {
        #[cfg(feature = "log")]
        {
            let detail = self.last_error();
            log::error!("native {_op} failed with status {_code}: {detail}");
        }
        #[cfg(not(feature = "log"))]
        let _ = self.last_error();
    }
}

impl Drop for NativeSni {
    fn drop(&mut self) {
        // Safety: paired with the successful SNIInitialize in load_from.
        let _ = unsafe { (self.terminate)() };
    }
}

impl fmt::Debug for NativeSni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeSni")
    }
}

impl SniDriver for NativeSni {
    fn open(&self, params: &OpenParams<'_>, instance_name: &mut [u8; INSTANCE_NAME_LEN]) -> (ConnRef, u32) {
        let connection_string = wide(params.connection_string);
        let dns = params.dns_cache.map(|cache| DnsWide::new(cache));

        let consumer = params.consumer;
        let mut info = RawClientConsumerInfo {
            consumer: RawConsumerInfo {
                default_user_data_length: consumer.buffer_size as i32,
                consumer_key: consumer.key as *const c_void,
                fn_read_comp: callback_ptr(consumer.read_callback),
                fn_write_comp: callback_ptr(consumer.write_callback),
                fn_trace: ptr::null(),
                fn_accept_comp: ptr::null(),
                num_prots: 0,
                listen_info: ptr::null(),
                node_affinity: ptr::null(),
            },
            connection_string: connection_string.as_ptr(),
            network_library: PREFIX_UNKNOWN,
            spn: params.spn.map_or(ptr::null(), <[u8]>::as_ptr),
            spn_len: params.spn.map_or(0, |spn| spn.len() as u32),
            instance_name: instance_name.as_mut_ptr(),
            instance_name_len: INSTANCE_NAME_LEN as u32,
            override_last_connect_cache: to_bool(params.override_cache),
            synchronous_connection: to_bool(params.synchronous),
            timeout: params.timeout_ms,
            parallel: to_bool(params.parallel),
            transparent_network_resolution: TNR_DISABLED,
            total_timeout: TIMEOUT_INFINITE,
            azure_sql_endpoint: to_bool(false),
            ip_address_preference: params.ip_preference.native(),
            dns_cache: dns.as_ref().map_or_else(DnsWide::null_raw, DnsWide::raw),
        };

        let mut conn = ptr::null_mut();
        // Safety: every pointer in `info` refers to a local or caller
        // buffer that outlives the call.
        let code = unsafe { (self.open_sync_ex)(&mut info, &mut conn) };
        if code != status::SUCCESS {
            self.log_failure("open", code);
        }
        (ConnRef(conn as usize), code)
    }

    fn close(&self, conn: ConnRef) -> u32 {
        // Safety: the owning handle guarantees `conn` is live and closed
        // at most once.
        unsafe { (self.close)(conn.0 as *mut c_void) }
    }

    fn packet_alloc(&self, conn: ConnRef, dir: IoDirection) -> PacketRef {
        // Safety: `conn` is live for the duration of the call.
        let packet = unsafe { (self.packet_allocate)(conn.0 as *mut c_void, dir.native()) };
        PacketRef(packet as usize)
    }

    fn packet_release(&self, packet: PacketRef) {
        // Safety: the owning wrapper releases each packet at most once.
        unsafe { (self.packet_release)(packet.0 as *mut c_void) }
    }

    fn packet_set_data(&self, packet: PacketRef, data: &[u8]) {
        // Safety: `data` is valid for `data.len()` bytes; the library
        // copies into its own backing buffer.
        unsafe { (self.packet_set_data)(packet.0 as *mut c_void, data.as_ptr(), data.len() as u32) }
    }

    fn packet_get_data(&self, packet: PacketRef, buf: &mut [u8]) -> (u32, usize) {
        let mut size: u32 = 0;
        // Safety: the library writes at most `buf.len()` bytes and fails
        // with the required size when the payload does not fit.
        let code = unsafe {
            (self.packet_get_data)(
                packet.0 as *mut c_void,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut size,
            )
        };
        (code, size as usize)
    }

    fn write(&self, conn: ConnRef, packet: PacketRef) -> u32 {
        // Safety: both refs are live; the packet was filled by set_data.
        let code = unsafe { (self.write_sync_over_async)(conn.0 as *mut c_void, packet.0 as *mut c_void) };
        if code != status::SUCCESS {
            self.log_failure("write", code);
        }
        code
    }

    fn read(&self, conn: ConnRef, timeout_ms: i32) -> (u32, PacketRef) {
        let mut packet = ptr::null_mut();
        // Safety: `conn` is live; the library hands ownership of any
        // produced packet to the caller.
        let code = unsafe { (self.read_sync_over_async)(conn.0 as *mut c_void, &mut packet, timeout_ms) };
        if let Status::Fatal(code) = Status::classify(code) {
            self.log_failure("read", code);
        }
        (code, PacketRef(packet as usize))
    }
}

/// Wide strings for the DNS cache sub-struct, kept alive across the
/// open call.
struct DnsWide {
    fqdn: Option<Vec<u16>>,
    ipv4: Option<Vec<u16>>,
    ipv6: Option<Vec<u16>>,
    port: Option<Vec<u16>>,
}

impl DnsWide {
    fn new(cache: &DnsCacheInfo) -> DnsWide {
        DnsWide {
            fqdn: cache.fqdn.as_deref().map(wide),
            ipv4: cache.ipv4.as_deref().map(wide),
            ipv6: cache.ipv6.as_deref().map(wide),
            port: cache.port.as_deref().map(wide),
        }
    }

    fn raw(&self) -> RawDnsCacheInfo {
        fn ptr_of(value: &Option<Vec<u16>>) -> *const u16 {
            value.as_ref().map_or(ptr::null(), |v| v.as_ptr())
        }
        RawDnsCacheInfo {
            fqdn: ptr_of(&self.fqdn),
            ipv4: ptr_of(&self.ipv4),
            ipv6: ptr_of(&self.ipv6),
            port: ptr_of(&self.port),
        }
    }

    fn null_raw() -> RawDnsCacheInfo {
        RawDnsCacheInfo {
            fqdn: ptr::null(),
            ipv4: ptr::null(),
            ipv6: ptr::null(),
            port: ptr::null(),
        }
    }
}

/// NUL-terminated UTF-16.
fn wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

fn callback_ptr(callback: Option<CompletionFn>) -> *const c_void {
    callback.map_or(ptr::null(), |f| f as usize as *const c_void)
}

/// Decoded last-error record.
struct LastError {
    provider: i32,
    message: String,
    native_error: u32,
    sni_error: u32,
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (provider {}, native error {}, sni error {})",
            self.message, self.provider, self.native_error, self.sni_error,
        )
    }
}

/// Failed to load the library, resolve a symbol, or initialize the stack.
pub struct LoadError {
    kind: LoadErrorKind,
}

enum LoadErrorKind {
    Library(libloading::Error),
    Initialize(u32),
}

impl From<libloading::Error> for LoadError {
    fn from(error: libloading::Error) -> LoadError {
        LoadError { kind: LoadErrorKind::Library(error) }
    }
}

impl std::error::Error for LoadError { }

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LoadErrorKind::Library(e) => write!(f, "failed to load the native library: {e}"),
            LoadErrorKind::Initialize(code) => {
                write!(f, "native stack initialization failed with status {code}")
            }
        }
    }
}

impl fmt::Debug for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
