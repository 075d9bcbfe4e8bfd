//! Owned native connection resource.
use std::{fmt, mem, sync::Arc};

use super::{ConnRef, InstanceName, OpenParams, SniDriver, status};

/// One native connection, released exactly once.
///
/// Move-only by construction: ownership is exclusive to the adapter that
/// opened it, and the drop path is the single release site. Operations
/// borrow the raw ref without taking ownership.
pub struct ConnHandle<D: SniDriver> {
    driver: Arc<D>,
    raw: ConnRef,
    open_status: u32,
}

impl<D: SniDriver> ConnHandle<D> {
    /// Perform the open call.
    ///
    /// On a non-success status or a null returned ref the attempt fails
    /// with the native status; a live ref handed back alongside a failure
    /// status is closed before returning.
    pub(crate) fn open(
        driver: Arc<D>,
        params: &OpenParams<'_>,
    ) -> Result<(ConnHandle<D>, InstanceName), OpenError> {
        let mut name = InstanceName::zeroed();
        let (raw, open_status) = driver.open(params, name.buf());

        if open_status != status::SUCCESS || raw.is_null() {
            if !raw.is_null() {
                let _status = driver.close(raw);
                #[cfg(feature = "log")]
                if _status != status::SUCCESS {
                    log::error!("closing failed connection reported status {_status}");
                }
            }
            return Err(OpenError { status: open_status });
        }

        Ok((ConnHandle { driver, raw, open_status }, name))
    }

    pub(crate) fn raw(&self) -> ConnRef {
        self.raw
    }

    /// Raw status the open call reported. Diagnostics only.
    pub fn open_status(&self) -> u32 {
        self.open_status
    }
}

impl<D: SniDriver> Drop for ConnHandle<D> {
    fn drop(&mut self) {
        let raw = mem::replace(&mut self.raw, ConnRef::NULL);
        if raw.is_null() {
            return;
        }
        // Close never fails by contract; there is no recovery action, so a
        // non-zero status is logged and swallowed.
        let _status = self.driver.close(raw);
        #[cfg(feature = "log")]
        if _status != status::SUCCESS {
            log::error!("native close reported status {_status}");
        }
    }
}

impl<D: SniDriver> fmt::Debug for ConnHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("raw", &self.raw)
            .field("open_status", &self.open_status)
            .finish()
    }
}

/// The open call did not yield a usable handle.
pub struct OpenError {
    pub(crate) status: u32,
}

impl OpenError {
    /// The raw native failure code.
    pub fn status(&self) -> u32 {
        self.status
    }
}

impl std::error::Error for OpenError { }

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection open failed with native status {}", self.status)
    }
}

impl fmt::Debug for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sni::mock::MockSni;
    use crate::transport::config::ConsumerConfig;

    fn params(consumer: &ConsumerConfig) -> OpenParams<'_> {
        OpenParams {
            connection_string: "localhost,1433",
            spn: None,
            consumer,
            override_cache: false,
            synchronous: true,
            timeout_ms: 10_000,
            parallel: false,
            ip_preference: Default::default(),
            dns_cache: None,
        }
    }

    #[test]
    fn drop_releases_once() {
        let driver = MockSni::new();
        let consumer = ConsumerConfig::default();
        let (handle, _) = ConnHandle::open(driver.clone(), &params(&consumer)).unwrap();
        assert_eq!(handle.open_status(), status::SUCCESS);
        drop(handle);
        assert_eq!(driver.close_count(), 1);
    }

    #[test]
    fn failed_open_closes_stray_live_ref() {
        let driver = MockSni::new();
        driver.fail_open_with_live_handle(4);
        let consumer = ConsumerConfig::default();
        let err = ConnHandle::open(driver.clone(), &params(&consumer)).unwrap_err();
        assert_eq!(err.status(), 4);
        assert_eq!(driver.close_count(), 1);
    }

    #[test]
    fn failed_open_with_null_ref_closes_nothing() {
        let driver = MockSni::new();
        driver.fail_open(87);
        let consumer = ConsumerConfig::default();
        let err = ConnHandle::open(driver.clone(), &params(&consumer)).unwrap_err();
        assert_eq!(err.status(), 87);
        assert_eq!(driver.close_count(), 0);
    }
}
