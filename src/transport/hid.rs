use std::ffi::CString;
use std::sync::Mutex;

use crate::apdu::ApduCommand;
use crate::error::TransportError;
use crate::transport::{DeviceSelector, Transport};

const HW1_VID: u16 = 0x2581;
const HW1_PID: u16 = 0x3B7C;
const LEDGER_VID: u16 = 0x2c97;
const LEDGER_USAGE_PAGE: u16 = 0xFFA0;
const LEDGER_CHANNEL: u16 = 0x0101;
const LEDGER_TAG: u8 = 0x05;
const LEDGER_PACKET_WRITE_SIZE: usize = 65;
const LEDGER_PACKET_READ_SIZE: usize = 64;
const LEDGER_TIMEOUT_MS: i32 = 30_000;
const CHUNK_SIZE: usize = LEDGER_PACKET_WRITE_SIZE - 6;

/// HW.1 is told apart by VID/PID; Ledger devices by the upper byte of the PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Hw1,
    NanoS,
    NanoSPlus,
    NanoX,
    Unknown(u16),
}

impl DeviceType {
    pub fn from_ids(vid: u16, pid: u16) -> Self {
        if vid == HW1_VID {
            return Self::Hw1;
        }
        match pid >> 8 {
            0x10 => Self::NanoS,
            0x40 => Self::NanoX,
            0x50 => Self::NanoSPlus,
            _ => Self::Unknown(pid),
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hw1 => write!(f, "HW.1"),
            Self::NanoS => write!(f, "Nano S"),
            Self::NanoSPlus => write!(f, "Nano S+"),
            Self::NanoX => write!(f, "Nano X"),
            Self::Unknown(pid) => write!(f, "Unknown (0x{pid:04X})"),
        }
    }
}

/// One enumerated dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: String,
    pub serial: Option<String>,
    pub device_type: DeviceType,
}

impl DeviceInfo {
    fn matches(&self, selector: &DeviceSelector) -> bool {
        match selector {
            DeviceSelector::Any => true,
            DeviceSelector::Path(p) => &self.path == p,
            DeviceSelector::Serial(s) => self.serial.as_deref() == Some(s.as_str()),
        }
    }
}

fn is_supported(info: &hidapi::DeviceInfo) -> bool {
    (info.vendor_id() == HW1_VID && info.product_id() == HW1_PID)
        || (info.vendor_id() == LEDGER_VID && info.usage_page() == LEDGER_USAGE_PAGE)
}

fn hid_err(e: hidapi::HidError) -> TransportError {
    TransportError::Comm(e.to_string())
}

pub struct HidTransport {
    device: Mutex<Option<hidapi::HidDevice>>,
    path: CString,
    device_type: DeviceType,
}

impl HidTransport {
    /// Enumerate every connected dongle.
    pub fn list() -> Result<Vec<DeviceInfo>, TransportError> {
        let api = hidapi::HidApi::new().map_err(hid_err)?;
        Ok(api
            .device_list()
            .filter(|info| is_supported(info))
            .map(|info| DeviceInfo {
                path: info.path().to_string_lossy().into_owned(),
                serial: info.serial_number().map(str::to_owned),
                device_type: DeviceType::from_ids(info.vendor_id(), info.product_id()),
            })
            .collect())
    }

    /// Open the first device that matches `selector`.
    pub fn open(selector: &DeviceSelector) -> Result<Self, TransportError> {
        let api = hidapi::HidApi::new().map_err(hid_err)?;

        for info in api.device_list() {
            if !is_supported(info) {
                continue;
            }
            let device_type = DeviceType::from_ids(info.vendor_id(), info.product_id());
            let candidate = DeviceInfo {
                path: info.path().to_string_lossy().into_owned(),
                serial: info.serial_number().map(str::to_owned),
                device_type,
            };
            if !candidate.matches(selector) {
                continue;
            }
            let device = info.open_device(&api).map_err(hid_err)?;
            log::info!("connected to {device_type} at {}", candidate.path);
            return Ok(Self {
                device: Mutex::new(Some(device)),
                path: info.path().to_owned(),
                device_type,
            });
        }

        Err(TransportError::DeviceNotFound)
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn write_apdu(device: &hidapi::HidDevice, apdu: &[u8]) -> Result<(), TransportError> {
        // HID framing: 2-byte length prefix, then APDU, split into 59-byte chunks
        let mut payload = Vec::with_capacity(2 + apdu.len());
        payload.push(((apdu.len() >> 8) & 0xFF) as u8);
        payload.push((apdu.len() & 0xFF) as u8);
        payload.extend_from_slice(apdu);

        let mut buffer = vec![0u8; LEDGER_PACKET_WRITE_SIZE];

        for (seq_idx, chunk) in payload.chunks(CHUNK_SIZE).enumerate() {
            buffer[0] = 0x00;
            buffer[1] = ((LEDGER_CHANNEL >> 8) & 0xFF) as u8;
            buffer[2] = (LEDGER_CHANNEL & 0xFF) as u8;
            buffer[3] = LEDGER_TAG;
            buffer[4] = ((seq_idx >> 8) & 0xFF) as u8;
            buffer[5] = (seq_idx & 0xFF) as u8;

            buffer[6..].fill(0);
            buffer[6..6 + chunk.len()].copy_from_slice(chunk);

            device.write(&buffer).map_err(hid_err)?;
        }

        Ok(())
    }

    fn read_apdu(device: &hidapi::HidDevice) -> Result<Vec<u8>, TransportError> {
        let mut buffer = vec![0u8; LEDGER_PACKET_READ_SIZE];
        let mut result = Vec::new();
        let mut expected_len = 0usize;
        let mut seq_idx: u16 = 0;

        loop {
            let n = device
                .read_timeout(&mut buffer, LEDGER_TIMEOUT_MS)
                .map_err(hid_err)?;

            if n == 0 {
                return Err(TransportError::Timeout(LEDGER_TIMEOUT_MS as u32));
            }

            let channel = ((buffer[0] as u16) << 8) | (buffer[1] as u16);
            if channel != LEDGER_CHANNEL {
                return Err(TransportError::Comm("HID channel mismatch".into()));
            }
            if buffer[2] != LEDGER_TAG {
                return Err(TransportError::Comm("HID tag mismatch".into()));
            }

            let pkt_seq = ((buffer[3] as u16) << 8) | (buffer[4] as u16);
            if pkt_seq != seq_idx {
                return Err(TransportError::Comm(format!(
                    "sequence mismatch: expected {seq_idx}, got {pkt_seq}"
                )));
            }

            // First packet has a 2-byte length prefix before the data
            let data_start = if seq_idx == 0 { 7 } else { 5 };
            if n < data_start {
                return Err(TransportError::Comm(format!(
                    "HID short read: got {n} bytes, need at least {data_start}"
                )));
            }
            if seq_idx == 0 {
                expected_len = ((buffer[5] as usize) << 8) | (buffer[6] as usize);
            }

            let remaining = expected_len - result.len();
            let take = remaining.min(n - data_start);
            result.extend_from_slice(&buffer[data_start..data_start + take]);

            if result.len() >= expected_len {
                break;
            }

            seq_idx += 1;
        }

        Ok(result)
    }
}

impl Transport for HidTransport {
    fn exchange(&self, command: &ApduCommand) -> Result<Vec<u8>, TransportError> {
        let guard = self
            .device
            .lock()
            .map_err(|e| TransportError::Comm(format!("mutex poisoned: {e}")))?;
        let device = guard.as_ref().ok_or(TransportError::Closed)?;
        Self::write_apdu(device, &command.serialize())?;
        Self::read_apdu(device)
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut guard = self
            .device
            .lock()
            .map_err(|e| TransportError::Comm(format!("mutex poisoned: {e}")))?;
        if guard.take().is_some() {
            log::info!("closed {}", self.device_type);
        }
        Ok(())
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        let mut guard = self
            .device
            .lock()
            .map_err(|e| TransportError::Comm(format!("mutex poisoned: {e}")))?;
        guard.take();
        let api = hidapi::HidApi::new().map_err(hid_err)?;
        let device = api
            .open_path(&self.path)
            .map_err(|_| TransportError::DeviceNotFound)?;
        log::info!("reconnected to {}", self.device_type);
        *guard = Some(device);
        Ok(())
    }
}
