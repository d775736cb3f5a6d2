// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB HID transport to the test fixture.
//!
//! The fixture multiplexes every instrument over one interrupt endpoint
//! carrying fixed 64-byte reports. This crate owns the hidapi plumbing and
//! exposes exactly the seam the instrument bus consumes: a blocking
//! [`ReportChannel`] of 64-byte reports.

mod cancel;
pub mod scripted;

use core::fmt;

use derive_more::From;

pub use cancel::CancelToken;

/// Bytes in every report, on both directions.
pub const REPORT_LEN: usize = 64;
/// Report id carried by every outbound report.
pub const OUT_REPORT_ID: u8 = 0x81;

pub const VENDOR_ID: u16 = 0x0483;
pub const PRODUCT_ID: u16 = 0x5710;

// Blocking reads are sliced so a cancel request is noticed promptly.
const READ_SLICE_MS: i32 = 100;

/// The byte-report seam between the instrument bus and the USB stack.
pub trait ReportChannel {
    fn write_report(
        &mut self,
        report_id: u8,
        payload: &[u8; REPORT_LEN],
    ) -> Result<(), HidError>;

    /// Block until a full report arrives.
    fn read_report(&mut self) -> Result<[u8; REPORT_LEN], HidError>;
}

#[derive(Debug, From)]
pub enum HidError {
    /// No device matched the vendor/product id.
    NotFound { vendor_id: u16, product_id: u16 },
    /// The device returned fewer bytes than one report.
    ShortReport(usize),
    /// A cancel request interrupted a blocking read.
    Cancelled,
    #[from]
    Io(hidapi::HidError),
}

impl fmt::Display for HidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HidError::NotFound {
                vendor_id,
                product_id,
            } => write!(
                f,
                "no HID device {vendor_id:04x}:{product_id:04x} attached"
            ),
            HidError::ShortReport(len) => {
                write!(f, "short HID report: {len} of {REPORT_LEN} bytes")
            }
            HidError::Cancelled => f.write_str("read cancelled"),
            HidError::Io(e) => write!(f, "HID I/O failed: {e}"),
        }
    }
}

impl std::error::Error for HidError {}

/// hidapi-backed fixture transport.
pub struct HidTransport {
    device: hidapi::HidDevice,
    cancel: CancelToken,
}

impl HidTransport {
    /// Open the first attached fixture.
    pub fn open(cancel: CancelToken) -> Result<Self, HidError> {
        Self::open_device(VENDOR_ID, PRODUCT_ID, cancel)
    }

    pub fn open_device(
        vendor_id: u16,
        product_id: u16,
        cancel: CancelToken,
    ) -> Result<Self, HidError> {
        let api = hidapi::HidApi::new()?;
        let device = api.open(vendor_id, product_id).map_err(|_| {
            HidError::NotFound {
                vendor_id,
                product_id,
            }
        })?;
        log::debug!("opened fixture {vendor_id:04x}:{product_id:04x}");
        Ok(Self { device, cancel })
    }
}

impl ReportChannel for HidTransport {
    fn write_report(
        &mut self,
        report_id: u8,
        payload: &[u8; REPORT_LEN],
    ) -> Result<(), HidError> {
        // hidapi prepends the report id byte.
        let mut buffer = [0u8; REPORT_LEN + 1];
        buffer[0] = report_id;
        buffer[1..].copy_from_slice(payload);
        self.device.write(&buffer)?;
        Ok(())
    }

    fn read_report(&mut self) -> Result<[u8; REPORT_LEN], HidError> {
        let mut report = [0u8; REPORT_LEN];
        loop {
            if self.cancel.is_cancelled() {
                return Err(HidError::Cancelled);
            }
            let n = self.device.read_timeout(&mut report, READ_SLICE_MS)?;
            if n == 0 {
                continue;
            }
            if n < REPORT_LEN {
                return Err(HidError::ShortReport(n));
            }
            return Ok(report);
        }
    }
}
