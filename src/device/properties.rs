//! Device property bag and its reported-property names

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simulator_shared::{now_ms, PropertyMap, Value};

/// Reported-property names used outside the plain property mapping
pub mod reported {
    pub const DEVICE_STATE: &str = "Device.DeviceState";
    pub const STARTUP_TIME: &str = "Device.StartupTime";
    pub const FIRMWARE_VERSION: &str = "System.FirmwareVersion";
    pub const CONFIGURATION_VERSION: &str = "System.ConfigurationVersion";
    pub const TEMPERATURE_MEAN_VALUE: &str = "Config.TemperatureMeanValue";
    pub const TELEMETRY_INTERVAL: &str = "Config.TelemetryInterval";
}

pub const DEVICE_ID: &str = "DeviceID";
pub const DEVICE_STATE: &str = "DeviceState";
pub const FIRMWARE_VERSION: &str = "FirmwareVersion";
pub const CONFIGURATION_VERSION: &str = "ConfigurationVersion";
pub const HUB_ENABLED_STATE: &str = "HubEnabledState";

/// Device property name -> reported-property name
const PROPERTY_MAPPING: &[(&str, &str)] = &[
    ("CreatedTime", "Device.CreatedTime"),
    ("UpdatedTime", "Device.UpdatedTime"),
    (DEVICE_STATE, reported::DEVICE_STATE),
    ("Manufacturer", "System.Manufacturer"),
    ("ModelNumber", "System.ModelNumber"),
    ("SerialNumber", "System.SerialNumber"),
    (FIRMWARE_VERSION, reported::FIRMWARE_VERSION),
    (CONFIGURATION_VERSION, reported::CONFIGURATION_VERSION),
    ("Platform", "System.Platform"),
    ("Processor", "System.Processor"),
    ("InstalledRAM", "System.InstalledRAM"),
    ("Latitude", "Device.Location.Latitude"),
    ("Longitude", "Device.Location.Longitude"),
];

const SAMPLE_LOCATIONS: &[(f64, f64)] = &[
    (47.659159, -122.141515),
    (47.593307, -122.332165),
    (47.617025, -122.191285),
    (47.583582, -122.130622),
];

/// Reported-property name for a device property, if it has one
pub fn reported_name(property: &str) -> Option<&'static str> {
    PROPERTY_MAPPING
        .iter()
        .find(|(name, _)| *name == property)
        .map(|(_, reported)| *reported)
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the device ID and salt, with a separator between them
fn sample_seed(device_id: &str, salt: &str) -> u64 {
    device_id
        .bytes()
        .chain(std::iter::once(0xff))
        .chain(salt.bytes())
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
}

/// Deterministic pick in `0..max` derived from the device ID
fn pick(device_id: &str, salt: &str, max: u64) -> u64 {
    StdRng::seed_from_u64(sample_seed(device_id, salt)).gen_range(0..max)
}

/// Free-form property bag owned by one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProperties {
    values: PropertyMap,
}

impl DeviceProperties {
    /// Sample hardware descriptors, stable for a given device ID
    pub fn sample(device_id: &str) -> Self {
        let now = now_ms() as i64;
        let (latitude, longitude) =
            SAMPLE_LOCATIONS[pick(device_id, "Location", SAMPLE_LOCATIONS.len() as u64) as usize];

        let mut values = PropertyMap::new();
        values.insert(DEVICE_ID.into(), Value::text(device_id));
        values.insert(DEVICE_STATE.into(), Value::text("normal"));
        values.insert(HUB_ENABLED_STATE.into(), Value::flag(true));
        values.insert("Manufacturer".into(), Value::text("Contoso Inc."));
        values.insert(
            "ModelNumber".into(),
            Value::text(format!("MD-{}", pick(device_id, "ModelNumber", 1000))),
        );
        values.insert(
            "SerialNumber".into(),
            Value::text(format!("SER{}", pick(device_id, "SerialNumber", 10000))),
        );
        values.insert(
            FIRMWARE_VERSION.into(),
            Value::text(format!("1.{}", pick(device_id, "FirmwareVersion", 100))),
        );
        values.insert(
            "Platform".into(),
            Value::text(format!("Plat-{}", pick(device_id, "Platform", 100))),
        );
        values.insert(
            "Processor".into(),
            Value::text(format!("i3-{}", pick(device_id, "Processor", 10000))),
        );
        values.insert(
            "InstalledRAM".into(),
            Value::text(format!("{} MB", pick(device_id, "InstalledRAM", 100))),
        );
        values.insert("Latitude".into(), Value::number(latitude));
        values.insert("Longitude".into(), Value::number(longitude));
        values.insert("CreatedTime".into(), Value::integer(now));
        values.insert("UpdatedTime".into(), Value::integer(now));

        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
        self.values
            .insert("UpdatedTime".into(), Value::integer(now_ms() as i64));
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.text(DEVICE_ID)
    }

    pub fn device_state(&self) -> Option<&str> {
        self.text(DEVICE_STATE)
    }

    pub fn set_device_state(&mut self, state: impl Into<String>) {
        self.set(DEVICE_STATE, state.into());
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.text(FIRMWARE_VERSION)
    }

    pub fn set_firmware_version(&mut self, version: impl Into<String>) {
        self.set(FIRMWARE_VERSION, version.into());
    }

    pub fn configuration_version(&self) -> Option<&str> {
        self.text(CONFIGURATION_VERSION)
    }

    pub fn set_configuration_version(&mut self, version: impl Into<String>) {
        self.set(CONFIGURATION_VERSION, version.into());
    }

    pub fn hub_enabled_state(&self) -> Option<bool> {
        self.values.get(HUB_ENABLED_STATE).and_then(Value::as_bool)
    }

    /// All properties, as sent in a device info event
    pub fn to_map(&self) -> PropertyMap {
        self.values.clone()
    }

    /// Every mapped property under its reported-property name
    pub fn reported_snapshot(&self) -> PropertyMap {
        self.values
            .iter()
            .filter_map(|(name, value)| {
                reported_name(name).map(|reported| (reported.to_string(), value.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_stable_per_device() {
        let a = DeviceProperties::sample("cooler-1");
        let b = DeviceProperties::sample("cooler-1");

        assert_eq!(a.get("SerialNumber"), b.get("SerialNumber"));
        assert_eq!(a.firmware_version(), b.firmware_version());
        assert_eq!(a.device_id(), Some("cooler-1"));
        assert_eq!(a.device_state(), Some("normal"));
        assert_eq!(a.hub_enabled_state(), Some(true));
        assert!(a.configuration_version().is_none());
    }

    #[test]
    fn test_sample_seed_is_fixed_and_spreads_across_devices() {
        // FNV-1a is pinned, so samples do not move between builds
        assert_eq!(sample_seed("cooler-01", "Location"), 0x94c2_836b_8d06_3b15);
        assert_eq!(sample_seed("", ""), 0xaf64_724c_8602_eb6e);
        assert_ne!(sample_seed("ab", "c"), sample_seed("a", "bc"));

        for id in ["cooler-01", "cooler-02", "x"] {
            assert!(pick(id, "Location", 4) < 4);
            assert_eq!(pick(id, "Location", 4), pick(id, "Location", 4));
        }
        let serials: std::collections::HashSet<_> = (0..20)
            .map(|n| {
                DeviceProperties::sample(&format!("cooler-{n}"))
                    .get("SerialNumber")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect();
        assert!(serials.len() > 1);
    }

    #[test]
    fn test_reported_snapshot_uses_mapped_names() {
        let mut properties = DeviceProperties::sample("cooler-1");
        properties.set_firmware_version("2.0");
        properties.set_device_state("maintenance");

        let snapshot = properties.reported_snapshot();
        assert_eq!(
            snapshot.get(reported::FIRMWARE_VERSION).and_then(Value::as_str),
            Some("2.0")
        );
        assert_eq!(
            snapshot.get(reported::DEVICE_STATE).and_then(Value::as_str),
            Some("maintenance")
        );
        // unmapped names stay out of the reported view
        assert!(!snapshot.contains_key(DEVICE_ID));
        assert!(!snapshot.contains_key(HUB_ENABLED_STATE));
        assert!(snapshot.contains_key("Device.Location.Latitude"));
    }

    #[test]
    fn test_reported_name_lookup() {
        assert_eq!(reported_name("Manufacturer"), Some("System.Manufacturer"));
        assert_eq!(reported_name("DeviceID"), None);
    }
}
