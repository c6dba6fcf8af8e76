//! USB-serial peripheral registry.
//!
//! Enumerates attached serial ports, matches them against the known
//! adapter table by USB vendor/product id, identifies each candidate with
//! the `'i'` command, and keeps at most one open connection per logical
//! role. Every actuator call degrades to a no-op when its device is absent,
//! so callers fire commands unconditionally and the session keeps running
//! with whatever hardware is present.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};
use thiserror::Error;
use tracing::{debug, info, warn};

use pendula_core::protocol::{self, command, Side, SlaveStatus};

// ============================================================================
// Errors
// ============================================================================

/// Errors from device probing and command writes.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Serial port layer failure
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Raw I/O failure on an open connection
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device reply could not be interpreted
    #[error(transparent)]
    Protocol(#[from] pendula_core::ProtocolError),

    /// No identity string arrived before the read deadline
    #[error("identification timed out on {port}")]
    IdentTimeout {
        /// Port that failed to identify
        port: String,
    },

    /// The device answered with an identity no role matches
    #[error("unrecognized identity {identity:?} on {port}")]
    UnknownIdentity {
        /// Port that answered
        port: String,
        /// The identity string it sent
        identity: String,
    },
}

/// Result type for registry operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

// ============================================================================
// Descriptor Table
// ============================================================================

/// Static description of a USB-serial adapter a peripheral may sit behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Adapter name, for logs only
    pub name: &'static str,
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Baud rate the peripheral firmware expects
    pub baud_rate: u32,
    /// Whether the firmware echoes received bytes before replying
    pub echo: bool,
}

/// Adapters the peripherals ship with. Matching is by (vid, pid) only; the
/// identity string decides the role.
pub const DESCRIPTORS: &[DeviceDescriptor] = &[
    DeviceDescriptor {
        name: "cp210x",
        vendor_id: 0x10C4,
        product_id: 0xEA60,
        baud_rate: 115_200,
        echo: false,
    },
    DeviceDescriptor {
        name: "ch340",
        vendor_id: 0x1A86,
        product_id: 0x7523,
        baud_rate: 115_200,
        echo: true,
    },
    DeviceDescriptor {
        name: "arduino-nano",
        vendor_id: 0x2341,
        product_id: 0x0043,
        baud_rate: 57_600,
        echo: false,
    },
];

/// Find the descriptor for a USB (vendor, product) pair.
#[must_use]
pub fn match_descriptor(vendor_id: u16, product_id: u16) -> Option<&'static DeviceDescriptor> {
    DESCRIPTORS
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}

// ============================================================================
// Roles and Identification
// ============================================================================

/// Logical role of an identified peripheral.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// LED bar (or the master controller that fronts one)
    Lightbar,
    /// Tactile buzzer pair
    Buzzer,
    /// Physiological sensor board
    Sensor,
}

const IDENT_LIGHTBAR: &str = "EMDR Lightbar";
const IDENT_MASTER: &str = "EMDR Master Controller";
const IDENT_BUZZER: &str = "EMDR Buzzer";
const IDENT_SENSOR: &str = "EMDR Sensor";

/// Map an identity reply to a role by prefix. A master controller routes
/// lightbar commands, so it classifies as [`DeviceRole::Lightbar`].
#[must_use]
pub fn classify_identity(reply: &str) -> Option<DeviceRole> {
    let reply = reply.trim();
    if reply.starts_with(IDENT_LIGHTBAR) || reply.starts_with(IDENT_MASTER) {
        Some(DeviceRole::Lightbar)
    } else if reply.starts_with(IDENT_BUZZER) {
        Some(DeviceRole::Buzzer)
    } else if reply.starts_with(IDENT_SENSOR) {
        Some(DeviceRole::Sensor)
    } else {
        None
    }
}

// ============================================================================
// Connections
// ============================================================================

/// An open serial connection bound to a role.
struct DeviceConnection {
    port: Box<dyn SerialPort>,
    port_name: String,
    identity: String,
}

/// Availability snapshot after a probe; what a status display observes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// A lightbar or master controller answered
    pub lightbar: bool,
    /// A buzzer answered
    pub buzzer: bool,
    /// A sensor board answered
    pub sensor: bool,
    /// Identity strings of everything that answered
    pub identities: Vec<String>,
}

/// How long to wait for an identity reply.
const IDENT_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Registry
// ============================================================================

/// Owner of every open peripheral connection.
///
/// Construct one at startup and share it between the session driver (writes)
/// and the acquisition spawner (which takes a cloned sensor handle). Probing
/// closes existing connections first, so a re-probe after replugging always
/// starts clean.
#[derive(Default)]
pub struct SerialDeviceRegistry {
    lightbar: Option<DeviceConnection>,
    buzzer: Option<DeviceConnection>,
    sensor: Option<DeviceConnection>,
    buzzer_duration_ms: u32,
}

impl SerialDeviceRegistry {
    /// Create an empty registry; call [`probe`](Self::probe) to attach.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buzzer_duration_ms: 100,
            ..Self::default()
        }
    }

    /// Enumerate, identify, and claim every matching peripheral.
    ///
    /// Never fails: enumeration errors and per-port failures are logged and
    /// skipped, and the returned report simply reflects what answered.
    pub fn probe(&mut self) -> ProbeReport {
        self.lightbar = None;
        self.buzzer = None;
        self.sensor = None;

        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("serial enumeration failed: {e}");
                return ProbeReport::default();
            }
        };

        let mut report = ProbeReport::default();
        for port_info in ports {
            let SerialPortType::UsbPort(usb) = &port_info.port_type else {
                continue;
            };
            let Some(descriptor) = match_descriptor(usb.vid, usb.pid) else {
                continue;
            };

            match Self::identify_port(&port_info.port_name, descriptor) {
                Ok((role, connection)) => {
                    info!(
                        "{} on {} ({})",
                        connection.identity, connection.port_name, descriptor.name
                    );
                    report.identities.push(connection.identity.clone());
                    match role {
                        DeviceRole::Lightbar => {
                            report.lightbar = true;
                            self.claim(DeviceRole::Lightbar, connection);
                        }
                        DeviceRole::Buzzer => {
                            report.buzzer = true;
                            self.claim(DeviceRole::Buzzer, connection);
                        }
                        DeviceRole::Sensor => {
                            report.sensor = true;
                            self.claim(DeviceRole::Sensor, connection);
                        }
                    }
                }
                Err(e) => {
                    debug!("skipping {}: {e}", port_info.port_name);
                }
            }
        }

        report
    }

    fn claim(&mut self, role: DeviceRole, connection: DeviceConnection) {
        let slot = match role {
            DeviceRole::Lightbar => &mut self.lightbar,
            DeviceRole::Buzzer => &mut self.buzzer,
            DeviceRole::Sensor => &mut self.sensor,
        };
        if let Some(existing) = slot {
            debug!(
                "ignoring duplicate {role:?} on {}; keeping {}",
                connection.port_name, existing.port_name
            );
            return;
        }
        *slot = Some(connection);
    }

    /// Open a port, send the identification command, and classify the reply.
    fn identify_port(
        port_name: &str,
        descriptor: &DeviceDescriptor,
    ) -> DeviceResult<(DeviceRole, DeviceConnection)> {
        let mut port = serialport::new(port_name, descriptor.baud_rate)
            .timeout(IDENT_TIMEOUT)
            .open()?;

        port.write_all(&command::identify())?;
        port.flush()?;

        let mut identity = Self::read_line(&mut port, port_name)?;
        if descriptor.echo && classify_identity(&identity).is_none() {
            // The adapter echoed our command bytes; the real reply follows
            identity = Self::read_line(&mut port, port_name)?;
        }

        let role = classify_identity(&identity).ok_or_else(|| DeviceError::UnknownIdentity {
            port: port_name.to_string(),
            identity: identity.trim().to_string(),
        })?;

        Ok((
            role,
            DeviceConnection {
                port,
                port_name: port_name.to_string(),
                identity: identity.trim().to_string(),
            },
        ))
    }

    fn read_line(port: &mut Box<dyn SerialPort>, port_name: &str) -> DeviceResult<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match port.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == b'\n' {
                        return Ok(String::from_utf8_lossy(&line).into_owned());
                    }
                    line.push(byte[0]);
                    if line.len() > 128 {
                        return Err(DeviceError::IdentTimeout {
                            port: port_name.to_string(),
                        });
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(DeviceError::IdentTimeout {
                        port: port_name.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Availability
    // ------------------------------------------------------------------------

    /// Whether a role currently has an open connection.
    #[must_use]
    pub fn available(&self, role: DeviceRole) -> bool {
        match role {
            DeviceRole::Lightbar => self.lightbar.is_some(),
            DeviceRole::Buzzer => self.buzzer.is_some(),
            DeviceRole::Sensor => self.sensor.is_some(),
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write raw bytes to a role's connection and flush.
    ///
    /// A missing device is a silent no-op (`Ok`), which is what makes every
    /// actuator call safe to issue unconditionally. A failed write closes
    /// the connection — the device is gone until the next probe.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error after closing the connection.
    pub fn write(&mut self, role: DeviceRole, bytes: &[u8]) -> DeviceResult<()> {
        let slot = match role {
            DeviceRole::Lightbar => &mut self.lightbar,
            DeviceRole::Buzzer => &mut self.buzzer,
            DeviceRole::Sensor => &mut self.sensor,
        };

        let Some(connection) = slot.as_mut() else {
            return Ok(());
        };

        let result = connection
            .port
            .write_all(bytes)
            .and_then(|()| connection.port.flush());

        if let Err(e) = result {
            warn!("{role:?} on {} dropped: {e}", connection.port_name);
            *slot = None;
            return Err(e.into());
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lightbar actuators
    // ------------------------------------------------------------------------

    /// Light the LED at 1-based `index` (0 = all off); a negative index
    /// triggers the all-on test pattern instead.
    ///
    /// # Errors
    ///
    /// Propagates write failures; absent device is `Ok`.
    pub fn set_led(&mut self, index: i32) -> DeviceResult<()> {
        let frame = if index < 0 {
            command::all_on()
        } else {
            command::set_led(index.min(255) as u8)
        };
        self.write(DeviceRole::Lightbar, &frame)
    }

    /// Set the sweep color from packed RGB.
    ///
    /// # Errors
    ///
    /// Propagates write failures; absent device is `Ok`.
    pub fn set_color(&mut self, rgb: u32) -> DeviceResult<()> {
        self.write(DeviceRole::Lightbar, &command::set_color(rgb))
    }

    // ------------------------------------------------------------------------
    // Buzzer actuators
    // ------------------------------------------------------------------------

    /// Remember the buzz length used by [`do_buzzer`](Self::do_buzzer).
    pub fn set_buzzer_duration(&mut self, duration_ms: u32) {
        self.buzzer_duration_ms = duration_ms;
    }

    /// Fire the buzzer on one side for the configured duration.
    ///
    /// # Errors
    ///
    /// Propagates write failures; absent device is `Ok`.
    pub fn do_buzzer(&mut self, side: Side) -> DeviceResult<()> {
        let cmd = protocol::buzz_command(side, self.buzzer_duration_ms);
        self.write(DeviceRole::Buzzer, &cmd)
    }

    // ------------------------------------------------------------------------
    // Sensor control
    // ------------------------------------------------------------------------

    /// Tell the sensor board to start streaming packets.
    ///
    /// # Errors
    ///
    /// Propagates write failures; absent device is `Ok`.
    pub fn start_capture(&mut self) -> DeviceResult<()> {
        self.write(DeviceRole::Sensor, &[protocol::START_CAPTURE])
    }

    /// Tell the sensor board to stop streaming packets.
    ///
    /// # Errors
    ///
    /// Propagates write failures; absent device is `Ok`.
    pub fn stop_capture(&mut self) -> DeviceResult<()> {
        self.write(DeviceRole::Sensor, &[protocol::STOP_CAPTURE])
    }

    /// Ask the coordinator which slave boards are attached.
    ///
    /// # Errors
    ///
    /// Returns an error when no sensor is connected, the reply times out,
    /// or the reply is malformed.
    pub fn enumerate_slaves(&mut self) -> DeviceResult<Vec<SlaveStatus>> {
        self.write(DeviceRole::Sensor, &[protocol::ENUMERATE_SLAVES])?;

        let Some(connection) = self.sensor.as_mut() else {
            return Ok(Vec::new());
        };

        let mut head = [0u8; 3];
        connection.port.read_exact(&mut head)?;
        let count = head[2] as usize;

        let mut reply = head.to_vec();
        reply.resize(3 + count * 2, 0);
        connection.port.read_exact(&mut reply[3..])?;

        Ok(protocol::parse_slave_reply(&reply)?)
    }

    /// Clone the sensor connection for the acquisition thread.
    ///
    /// The clone reads sample packets on its own short timeout while the
    /// registry keeps the original handle for control writes; the serial
    /// layer is safe for that split.
    ///
    /// # Errors
    ///
    /// Returns an error when no sensor is connected or cloning fails.
    pub fn clone_sensor_reader(&self) -> DeviceResult<Box<dyn SerialPort>> {
        let Some(connection) = self.sensor.as_ref() else {
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no sensor connected",
            )));
        };
        Ok(connection.port.try_clone()?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_table_matches_by_vid_pid() {
        let d = match_descriptor(0x10C4, 0xEA60).unwrap();
        assert_eq!(d.name, "cp210x");
        assert_eq!(d.baud_rate, 115_200);

        assert!(match_descriptor(0xDEAD, 0xBEEF).is_none());
    }

    #[test]
    fn identity_classification() {
        assert_eq!(
            classify_identity("EMDR Lightbar v2.1\r"),
            Some(DeviceRole::Lightbar)
        );
        assert_eq!(
            classify_identity("EMDR Master Controller"),
            Some(DeviceRole::Lightbar)
        );
        assert_eq!(classify_identity("EMDR Buzzer"), Some(DeviceRole::Buzzer));
        assert_eq!(
            classify_identity("EMDR Sensor rev3"),
            Some(DeviceRole::Sensor)
        );
        assert_eq!(classify_identity("GPS receiver"), None);
        assert_eq!(classify_identity(""), None);
    }

    #[test]
    fn writes_without_devices_are_noops() {
        let mut registry = SerialDeviceRegistry::new();

        assert!(registry.set_led(5).is_ok());
        assert!(registry.set_led(-1).is_ok());
        assert!(registry.set_color(0x00FF00).is_ok());
        assert!(registry.do_buzzer(Side::Left).is_ok());
        assert!(registry.start_capture().is_ok());
        assert!(registry.stop_capture().is_ok());

        assert!(!registry.available(DeviceRole::Lightbar));
        assert!(!registry.available(DeviceRole::Buzzer));
        assert!(!registry.available(DeviceRole::Sensor));
    }

    #[test]
    fn probe_without_hardware_is_nonfatal() {
        let mut registry = SerialDeviceRegistry::new();
        let report = registry.probe();
        // No EMDR hardware in a test environment; the call must still
        // return a coherent (empty) report instead of failing.
        assert!(!report.lightbar || !report.identities.is_empty());
    }

    #[test]
    fn sensor_reader_clone_requires_connection() {
        let registry = SerialDeviceRegistry::new();
        assert!(registry.clone_sensor_reader().is_err());
    }
}
