// Wallet-level libraries for bitcoin protocol by LNP/BP Association
//
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// This software is distributed without any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

use serde_json::{json, Value};

use crate::credentials::Credentials;
use crate::signer::SignerError;

/// Kind of the signing backend.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum DeviceType {
    /// Service co-signer reached over the session transport.
    #[display("green-backend")]
    GreenBackend,

    /// No signing capability; keys are provided as public material.
    #[display("watch-only")]
    WatchOnly,

    /// In-process software signer holding the seed.
    #[display("software")]
    Software,

    /// External hardware signer.
    #[display("hardware")]
    Hardware,
}

/// Degree of Liquid support a signing backend provides.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[repr(u32)]
pub enum LiquidSupport {
    /// Liquid is not supported.
    #[display("none")]
    None = 0,

    /// Confidential transactions without host unblinding.
    #[display("lite")]
    Lite = 1,

    /// Full confidential transaction support.
    #[display("full")]
    Full = 2,
}

/// Degree of anti-exfil protocol support.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[repr(u32)]
pub enum AeProtocolSupport {
    /// Anti-exfil signing is not available.
    #[display("none")]
    None = 0,

    /// Anti-exfil signing may be requested.
    #[display("optional")]
    Optional = 1,

    /// Anti-exfil signing is always used.
    #[display("required")]
    Required = 2,
}

/// Capability descriptor of a signing backend.
///
/// The green-backend, watch-only and software variants have fixed canonical
/// values; only hardware devices describe themselves, and must carry a
/// non-empty name.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Device {
    /// Backend kind.
    pub device_type: DeviceType,

    /// Device name; non-empty for hardware devices, empty otherwise.
    pub name: String,

    /// Whether signatures are ground to low-R form.
    pub supports_low_r: bool,

    /// Whether scripts outside the wallet templates can be signed.
    pub supports_arbitrary_scripts: bool,

    /// Whether the host may derive blinding private keys.
    pub supports_host_unblinding: bool,

    /// Whether blinding data produced outside the device is accepted.
    pub supports_external_blinding: bool,

    /// Liquid support level.
    pub supports_liquid: LiquidSupport,

    /// Anti-exfil protocol support level.
    pub supports_ae_protocol: AeProtocolSupport,
}

impl Device {
    /// Canonical descriptor of the service co-signer backend.
    pub fn green_backend() -> Device {
        Device {
            device_type: DeviceType::GreenBackend,
            name: String::new(),
            supports_low_r: true,
            supports_arbitrary_scripts: true,
            supports_host_unblinding: false,
            supports_external_blinding: true,
            supports_liquid: LiquidSupport::Lite,
            supports_ae_protocol: AeProtocolSupport::None,
        }
    }

    /// Canonical descriptor of a watch-only wallet.
    pub fn watch_only() -> Device {
        Device {
            device_type: DeviceType::WatchOnly,
            name: String::new(),
            supports_low_r: true,
            supports_arbitrary_scripts: true,
            supports_host_unblinding: true,
            supports_external_blinding: true,
            supports_liquid: LiquidSupport::Lite,
            supports_ae_protocol: AeProtocolSupport::None,
        }
    }

    /// Canonical descriptor of the in-process software signer.
    pub fn software() -> Device {
        Device {
            device_type: DeviceType::Software,
            name: String::new(),
            supports_low_r: true,
            supports_arbitrary_scripts: true,
            supports_host_unblinding: true,
            supports_external_blinding: true,
            supports_liquid: LiquidSupport::Lite,
            supports_ae_protocol: AeProtocolSupport::None,
        }
    }

    /// Builds the descriptor from a hardware-device JSON and the already
    /// parsed credentials.
    ///
    /// A non-empty `hw_device.device` object describes the backend itself
    /// and excludes login credentials; otherwise the canonical descriptor
    /// matching the credential kind is used. Green-backend settings cannot
    /// be overridden.
    pub fn from_json(hw_device: &Value, credentials: &Credentials) -> Result<Device, SignerError> {
        let device = hw_device.get("device").filter(|d| {
            d.as_object().map(|obj| !obj.is_empty()).unwrap_or(false)
        });

        let device = match device {
            Some(device) => {
                if !matches!(credentials, Credentials::Remote) {
                    return Err(SignerError::CredentialsWithDevice);
                }
                device
            }
            None => {
                return match credentials {
                    Credentials::WatchOnly { .. }
                    | Credentials::Descriptors { .. }
                    | Credentials::Slip132 { .. } => Ok(Device::watch_only()),
                    Credentials::Mnemonic { .. } | Credentials::HexSeed { .. } => {
                        Ok(Device::software())
                    }
                    Credentials::Remote => Err(SignerError::CredentialsRequired),
                };
            }
        };

        let device_type = device
            .get("device_type")
            .and_then(Value::as_str)
            .unwrap_or("hardware");
        match device_type {
            "green-backend" => Ok(Device::green_backend()),
            "hardware" => {
                let name = device
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if name.is_empty() {
                    return Err(SignerError::MissingDeviceName);
                }
                Ok(Device {
                    device_type: DeviceType::Hardware,
                    name: name.to_owned(),
                    supports_low_r: bool_field(device, "supports_low_r"),
                    supports_arbitrary_scripts: bool_field(device, "supports_arbitrary_scripts"),
                    supports_host_unblinding: bool_field(device, "supports_host_unblinding"),
                    supports_external_blinding: bool_field(device, "supports_external_blinding"),
                    supports_liquid: liquid_field(device)?,
                    supports_ae_protocol: ae_field(device)?,
                })
            }
            "software" => Ok(Device::software()),
            "watch-only" => Ok(Device::watch_only()),
            unknown => Err(SignerError::UnknownDeviceType(unknown.to_owned())),
        }
    }

    /// JSON form of the descriptor, as exposed on the session API.
    pub fn to_json(&self) -> Value {
        json!({
            "device_type": self.device_type.to_string(),
            "name": self.name,
            "supports_low_r": self.supports_low_r,
            "supports_arbitrary_scripts": self.supports_arbitrary_scripts,
            "supports_host_unblinding": self.supports_host_unblinding,
            "supports_external_blinding": self.supports_external_blinding,
            "supports_liquid": self.supports_liquid as u32,
            "supports_ae_protocol": self.supports_ae_protocol as u32,
        })
    }
}

fn bool_field(device: &Value, key: &str) -> bool {
    device.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn liquid_field(device: &Value) -> Result<LiquidSupport, SignerError> {
    match device.get("supports_liquid").and_then(Value::as_u64) {
        None | Some(0) => Ok(LiquidSupport::None),
        Some(1) => Ok(LiquidSupport::Lite),
        Some(2) => Ok(LiquidSupport::Full),
        Some(other) => Err(SignerError::InvalidCapability(format!(
            "supports_liquid = {}",
            other
        ))),
    }
}

fn ae_field(device: &Value) -> Result<AeProtocolSupport, SignerError> {
    match device.get("supports_ae_protocol").and_then(Value::as_u64) {
        None | Some(0) => Ok(AeProtocolSupport::None),
        Some(1) => Ok(AeProtocolSupport::Optional),
        Some(2) => Ok(AeProtocolSupport::Required),
        Some(other) => Err(SignerError::InvalidCapability(format!(
            "supports_ae_protocol = {}",
            other
        ))),
    }
}
