use serde::Deserialize;

use super::{device_id, ensure_supported, finite, non_empty, optional_finite};
use crate::{
    Command, DeviceFamily, FirmwareQuery, Outcome, ProtocolError, SensorReading, Verb, VerbKind,
};

/// Fermentation profile used when a PicoFerm registers without naming one.
pub const DEFAULT_FERMENT_PROFILE: &str = "ferment";

/// Query string sent by PicoFerm fermentation monitors.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PicoFermParams {
    pub uid: Option<String>,
    #[serde(rename = "sesId")]
    pub ses_id: Option<String>,
    pub profile: Option<String>,
    pub temp: Option<f64>,
    pub pres: Option<f64>,
    pub ok: Option<bool>,
    pub force: Option<bool>,
    pub fw: Option<String>,
}

impl PicoFermParams {
    pub fn into_command(self, verb: VerbKind) -> Result<Command, ProtocolError> {
        ensure_supported(DeviceFamily::PicoFerm, verb)?;
        let device_id = device_id(self.uid, "uid")?;

        let verb = match verb {
            VerbKind::Register => Verb::Register {
                recipe: non_empty(self.profile)
                    .unwrap_or_else(|| DEFAULT_FERMENT_PROFILE.to_string()),
                force: self.force.unwrap_or(false),
            },
            VerbKind::NextStep => Verb::NextStep,
            VerbKind::Sensor => Verb::Sensor {
                reading: SensorReading::Ferment {
                    temp_c: finite(self.temp, "temp")?,
                    pressure_psi: optional_finite(self.pres, "pres")?,
                },
            },
            VerbKind::Complete => Verb::Complete {
                outcome: Outcome::from_ok(self.ok),
                reason: None,
            },
            VerbKind::Log | VerbKind::Fault => {
                return Err(ProtocolError::UnsupportedVerb {
                    family: DeviceFamily::PicoFerm,
                    verb,
                });
            }
        };

        Ok(Command {
            device_id,
            family: DeviceFamily::PicoFerm,
            firmware_version: non_empty(self.fw),
            session_id: non_empty(self.ses_id),
            verb,
        })
    }

    pub fn firmware_query(self) -> Result<FirmwareQuery, ProtocolError> {
        Ok(FirmwareQuery {
            device_id: device_id(self.uid, "uid")?,
            family: DeviceFamily::PicoFerm,
            version: non_empty(self.fw),
        })
    }
}
