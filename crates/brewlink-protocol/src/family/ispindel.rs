use serde::Deserialize;

use super::{FlexId, device_id, ensure_supported, finite, non_empty, optional_finite};
use crate::{Command, DeviceFamily, Outcome, ProtocolError, SensorReading, Verb, VerbKind};

/// Monitoring profile used when an iSpindel registers without naming one.
pub const DEFAULT_MONITOR_PROFILE: &str = "monitor";

/// JSON body posted by iSpindel hydrometers.
///
/// The chip `ID` is the device identifier; `name` is the user label and is
/// only used when the firmware omits `ID`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ISpindelParams {
    #[serde(rename = "ID")]
    pub id: Option<FlexId>,
    pub name: Option<String>,
    pub angle: Option<f64>,
    pub temperature: Option<f64>,
    pub battery: Option<f64>,
    pub gravity: Option<f64>,
    pub profile: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub ok: Option<bool>,
    pub force: Option<bool>,
}

impl ISpindelParams {
    pub fn into_command(self, verb: VerbKind) -> Result<Command, ProtocolError> {
        ensure_supported(DeviceFamily::ISpindel, verb)?;
        let raw_id = self.id.map(FlexId::into_string).or(self.name);
        let device_id = device_id(raw_id, "ID")?;

        let verb = match verb {
            VerbKind::Register => Verb::Register {
                recipe: non_empty(self.profile)
                    .unwrap_or_else(|| DEFAULT_MONITOR_PROFILE.to_string()),
                force: self.force.unwrap_or(false),
            },
            VerbKind::Sensor => Verb::Sensor {
                reading: SensorReading::Hydrometer {
                    angle: finite(self.angle, "angle")?,
                    temp_c: finite(self.temperature, "temperature")?,
                    battery_v: optional_finite(self.battery, "battery")?,
                    gravity: optional_finite(self.gravity, "gravity")?,
                },
            },
            VerbKind::Complete => Verb::Complete {
                outcome: Outcome::from_ok(self.ok),
                reason: None,
            },
            VerbKind::NextStep | VerbKind::Log | VerbKind::Fault => {
                return Err(ProtocolError::UnsupportedVerb {
                    family: DeviceFamily::ISpindel,
                    verb,
                });
            }
        };

        Ok(Command {
            device_id,
            family: DeviceFamily::ISpindel,
            firmware_version: None,
            session_id: non_empty(self.session_id),
            verb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stock_firmware_payload() {
        let body = r#"{
            "name": "iSpindel000",
            "ID": 14520538,
            "angle": 83.49,
            "temperature": 21.06,
            "temp_units": "C",
            "battery": 4.06,
            "gravity": 1.0513,
            "interval": 900,
            "RSSI": -76
        }"#;
        let params: ISpindelParams = serde_json::from_str(body).unwrap();
        let cmd = params.into_command(VerbKind::Sensor).unwrap();
        assert_eq!(cmd.device_id, "14520538");
        match cmd.verb {
            Verb::Sensor {
                reading: SensorReading::Hydrometer { gravity, .. },
            } => assert_eq!(gravity, Some(1.0513)),
            other => panic!("unexpected verb {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_name() {
        let params: ISpindelParams =
            serde_json::from_str(r#"{"name": "spindel-kitchen"}"#).unwrap();
        let cmd = params.into_command(VerbKind::Register).unwrap();
        assert_eq!(cmd.device_id, "spindel-kitchen");
    }

    #[test]
    fn next_step_is_unsupported() {
        let params: ISpindelParams = serde_json::from_str(r#"{"ID": 1}"#).unwrap();
        assert!(matches!(
            params.into_command(VerbKind::NextStep),
            Err(ProtocolError::UnsupportedVerb { .. })
        ));
    }
}
