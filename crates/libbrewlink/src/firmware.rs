use std::collections::HashMap;

use brewlink_protocol::{DeviceFamily, ProtocolError};

/// Latest published firmware per family.
pub trait FirmwareCatalog: Send + Sync {
    fn latest(&self, family: DeviceFamily) -> Option<String>;
}

/// Whether a device reporting `reported` should fetch `latest`.
/// A device that does not report its version is always offered the update.
pub fn update_available(latest: Option<&str>, reported: Option<&str>) -> bool {
    match (latest, reported) {
        (Some(latest), Some(reported)) => latest != reported,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticFirmware {
    latest: HashMap<DeviceFamily, String>,
}

impl StaticFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, family: DeviceFamily, version: impl Into<String>) -> Self {
        self.latest.insert(family, version.into());
        self
    }

    /// Build from a `family name -> version` table, as found in config.
    pub fn from_table(table: &HashMap<String, String>) -> Result<Self, ProtocolError> {
        let mut catalog = Self::new();
        for (family, version) in table {
            catalog.latest.insert(family.parse()?, version.clone());
        }
        Ok(catalog)
    }
}

impl FirmwareCatalog for StaticFirmware {
    fn latest(&self, family: DeviceFamily) -> Option<String> {
        self.latest.get(&family).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_rules() {
        assert!(update_available(Some("0.1.34"), Some("0.1.11")));
        assert!(!update_available(Some("0.1.34"), Some("0.1.34")));
        assert!(update_available(Some("0.1.34"), None));
        assert!(!update_available(None, Some("0.1.11")));
    }

    #[test]
    fn table_rejects_unknown_family() {
        let mut table = HashMap::new();
        table.insert("Pico".to_string(), "0.1.34".to_string());
        let catalog = StaticFirmware::from_table(&table).unwrap();
        assert_eq!(catalog.latest(DeviceFamily::Pico).as_deref(), Some("0.1.34"));

        table.insert("kettle".to_string(), "1".to_string());
        assert!(StaticFirmware::from_table(&table).is_err());
    }
}
