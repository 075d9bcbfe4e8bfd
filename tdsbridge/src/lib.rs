//! Transparent TDS bridge.
//!
//! Accepts clients on a listening port, opens a matching connection toward
//! a real SQL Server (or LocalDB) through the native SNI stack, and relays
//! packets both ways, optionally logging decoded batches.
//!
//! # Examples
//!
//! Relay a local port to a server:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tdsbridge::{Bridge, NativeSni, NullEvents, OpenOptions, ServerTarget};
//!
//! # fn app() -> tdsbridge::Result<()> {
//! let driver = Arc::new(NativeSni::load()?);
//!
//! let mut bridge = Bridge::bind(
//!     ("0.0.0.0", 1533),
//!     driver,
//!     ServerTarget::tcp("127.0.0.1", 1433),
//!     OpenOptions::default(),
//!     Arc::new(NullEvents),
//! )?;
//! bridge.start()?;
//! // ...
//! bridge.stop();
//! # Ok(())
//! # }
//! ```
//!
//! Drive the transport adapter directly:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tdsbridge::{NativeSni, OpenOptions, ReceiveOutcome, ServerTarget, SniTransport};
//!
//! # fn app() -> tdsbridge::Result<()> {
//! let transport = SniTransport::new(Arc::new(NativeSni::load()?));
//! let instance = transport.initialize(&ServerTarget::host_spec(r"db01\reporting"), &OpenOptions::default())?;
//! println!("instance: {instance}");
//!
//! transport.send(&[0x12, 0x01, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00])?;
//!
//! let mut buf = [0u8; 4096];
//! loop {
//!     match transport.receive(&mut buf)? {
//!         ReceiveOutcome::Data(n) => break println!("{n} bytes"),
//!         ReceiveOutcome::NoDataYet => continue,
//!     }
//! }
//! transport.close();
//! # Ok(())
//! # }
//! ```

mod common;
mod error;

// Native stack boundary
pub mod sni;

// Operation
pub mod transport;

// Collaborators
pub mod bridge;
pub mod tds;

pub use bridge::{Bridge, BridgeEvents, NullEvents};
pub use error::{Error, ErrorKind, Result};
pub use sni::{InstanceName, SniDriver};
pub use transport::{ReceiveOutcome, SniTransport};
pub use transport::config::{ConsumerConfig, IpPreference, OpenOptions, ServerTarget};

#[cfg(feature = "native")]
pub use sni::NativeSni;
