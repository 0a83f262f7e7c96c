//! Enttec DMX-USB-PRO back-end: USB-serial framed protocol at 57,600 baud,
//! 8N1. State machine: `Closed -> Opening -> Open -> Broken -> Opening -> …`.

use super::OutputBackend;
use crate::error::OutputError;
use crate::model::{Frame, UniverseId, FRAME_LEN};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;

const START_BYTE: u8 = 0x7E;
const DMX_PACKET_LABEL: u8 = 0x06;
const END_BYTE: u8 = 0xE7;
const START_CODE: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Closed,
    Opening,
    Open,
    Broken,
}

struct EnttecInner {
    state: DriverState,
    port: Option<tokio_serial::SerialStream>,
}

pub struct EnttecBackend {
    configured_port: Option<String>,
    baud: u32,
    reconnect_attempts: u32,
    inner: Mutex<EnttecInner>,
}

impl EnttecBackend {
    pub fn new(configured_port: Option<String>, baud: u32, reconnect_attempts: u32) -> Self {
        Self {
            configured_port,
            baud,
            reconnect_attempts,
            inner: Mutex::new(EnttecInner {
                state: DriverState::Closed,
                port: None,
            }),
        }
    }

    fn resolve_port_path(&self) -> Option<String> {
        if let Some(p) = &self.configured_port {
            return Some(p.clone());
        }
        autodetect_enttec_port()
    }

    async fn open(&self) -> Result<tokio_serial::SerialStream, OutputError> {
        let path = self
            .resolve_port_path()
            .ok_or_else(|| OutputError::Transport("no enttec serial port configured or detected".into()))?;
        tokio_serial::new(path, self.baud)
            .open_native_async()
            .map_err(|e| OutputError::Transport(e.to_string()))
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), OutputError> {
        let packet = build_packet(frame);
        let mut guard = self.inner.lock().await;

        if guard.state != DriverState::Open || guard.port.is_none() {
            guard.state = DriverState::Opening;
            let mut attempts = 0;
            loop {
                match self.open().await {
                    Ok(stream) => {
                        guard.port = Some(stream);
                        guard.state = DriverState::Open;
                        break;
                    }
                    Err(e) => {
                        attempts += 1;
                        if attempts >= self.reconnect_attempts {
                            guard.state = DriverState::Broken;
                            return Err(e);
                        }
                    }
                }
            }
        }

        let write_result = if let Some(port) = guard.port.as_mut() {
            port.write_all(&packet).await
        } else {
            return Err(OutputError::NotOpen);
        };

        match write_result {
            Ok(()) => Ok(()),
            Err(e) => {
                guard.port = None;
                guard.state = DriverState::Broken;
                Err(OutputError::Transport(e.to_string()))
            }
        }
    }
}

fn build_packet(frame: &Frame) -> Vec<u8> {
    let payload_len: u16 = (FRAME_LEN + 1) as u16; // start code + 512 slots = 513
    let mut packet = Vec::with_capacity(4 + payload_len as usize + 1);
    packet.push(START_BYTE);
    packet.push(DMX_PACKET_LABEL);
    packet.push((payload_len & 0xff) as u8);
    packet.push((payload_len >> 8) as u8);
    packet.push(START_CODE);
    packet.extend_from_slice(frame);
    packet.push(END_BYTE);
    packet
}

/// FTDI vendor ID and the DMX-USB-PRO's product ID, as enumerated over USB.
const ENTTEC_VENDOR_ID: &str = "0403";
const ENTTEC_PRODUCT_ID: &str = "6001";

/// Probe `/dev/serial/by-id` entries and match each against the Enttec
/// DMX-USB-PRO's USB vendor/product ID via the kernel's `tty` sysfs class,
/// rather than trusting the udev-generated symlink name. Optional: if
/// nothing matches, the caller stays in `Closed`/`Broken` and transport
/// errors are reported through metrics like any other connect failure.
fn autodetect_enttec_port() -> Option<String> {
    let candidates = std::fs::read_dir("/dev/serial/by-id").ok()?;
    for entry in candidates.flatten() {
        let link_path = entry.path();
        let Ok(target) = std::fs::canonicalize(&link_path) else { continue };
        let Some(tty_name) = target.file_name().and_then(|n| n.to_str()) else { continue };
        if tty_matches_enttec_ids(tty_name) {
            return link_path.to_str().map(str::to_string);
        }
    }
    None
}

/// Walk up from `/sys/class/tty/<tty_name>/device` to the first ancestor
/// exposing `idVendor`/`idProduct` (the owning USB device node) and compare
/// against the known Enttec IDs.
fn tty_matches_enttec_ids(tty_name: &str) -> bool {
    let sys_device = std::path::PathBuf::from(format!("/sys/class/tty/{tty_name}/device"));
    let Ok(device_path) = std::fs::canonicalize(&sys_device) else {
        return false;
    };
    for ancestor in device_path.ancestors() {
        let id_vendor = std::fs::read_to_string(ancestor.join("idVendor"));
        let id_product = std::fs::read_to_string(ancestor.join("idProduct"));
        if let (Ok(vendor), Ok(product)) = (id_vendor, id_product) {
            return vendor.trim().eq_ignore_ascii_case(ENTTEC_VENDOR_ID)
                && product.trim().eq_ignore_ascii_case(ENTTEC_PRODUCT_ID);
        }
    }
    false
}

#[async_trait]
impl OutputBackend for EnttecBackend {
    async fn send(&self, _universe: UniverseId, frame: &Frame) -> Result<(), OutputError> {
        // A single Enttec widget serves one universe at a time; the
        // scheduler is expected to own one `EnttecBackend` per device.
        self.write_frame(frame).await
    }
}
