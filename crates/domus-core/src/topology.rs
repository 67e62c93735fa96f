// ── Device topology assembly ──
//
// Converts the flat, ordered device listing into physical devices and
// their attached sensors. The listing order is load-bearing: a sensor
// component follows the device that owns it, so assembly is a single
// pass tracking the last physical device and the last device of any
// kind.

use tracing::{debug, trace};

use domus_api::models::DeviceDefinition;

use crate::model::{Device, DeviceUrl};
use crate::registry::DeviceRegistry;

/// Attach a flat device listing to the registry.
///
/// Records whose component index is 1 are physical devices. Other
/// records are either adopted as a sensor by an adjacent owner (checked
/// against the last device seen, then the last physical device) or
/// promoted to standalone physical devices.
///
/// Devices already known by URL are left untouched so that their state
/// and subscribers survive a re-fetch; only new records register.
///
/// Returns the top-level physical device URLs of this listing.
pub(crate) fn attach(registry: &DeviceRegistry, records: &[DeviceDefinition]) -> Vec<DeviceUrl> {
    let mut top_level: Vec<DeviceUrl> = Vec::new();
    let mut last_main: Option<DeviceUrl> = None;
    let mut last_device: Option<DeviceUrl> = None;

    for record in records {
        let url = DeviceUrl::new(record.device_url.clone());

        if url.component_index() == 1 {
            if registry.register(Device::from_definition(record, None)) {
                debug!(%url, ui_class = %record.definition.ui_class, "registered physical device");
            }
            registry.mark_root(&url);
            top_level.push(url.clone());
            last_main = Some(url.clone());
            last_device = Some(url);
            continue;
        }

        // Non-main component: try to find an adjacent owner.
        let owner = [last_device.as_ref(), last_main.as_ref()]
            .into_iter()
            .flatten()
            .find(|candidate| {
                registry
                    .get(candidate)
                    .is_some_and(|device| owns_sensor(&device, record))
            })
            .cloned();

        match owner {
            Some(owner_url) => {
                if registry.register(Device::from_definition(record, Some(owner_url.clone()))) {
                    debug!(sensor = %url, owner = %owner_url, "attached sensor");
                    registry.attach_sensor(&owner_url, &url);
                }
            }
            None => {
                trace!(%url, "no adjacent owner, promoting to standalone device");
                if registry.register(Device::from_definition(record, None)) {
                    debug!(%url, "registered standalone device");
                }
                registry.mark_root(&url);
                top_level.push(url.clone());
                last_device = Some(url);
            }
        }
    }

    top_level
}

/// The canonical sensor-ownership rules, keyed by the sensor's UI class
/// first, then by its protocol-qualified type name.
fn owns_sensor(candidate: &Device, sensor: &DeviceDefinition) -> bool {
    match sensor.definition.ui_class.as_str() {
        "TemperatureSensor" => matches!(
            candidate.ui_class.as_str(),
            "HeatingSystem" | "WaterHeatingSystem" | "ExteriorHeatingSystem"
        ),
        "ContactSensor" => matches!(candidate.ui_class.as_str(), "Window" | "GarageDoor"),
        _ => match sensor.controllable_name.as_str() {
            "io:TotalElectricalEnergyConsumptionSensor" => matches!(
                candidate.controllable_name.as_str(),
                "io:AtlanticPassAPCHeatPumpComponent" | "io:AtlanticPassAPCBoilerComponent"
            ),
            _ => false,
        },
    }
}
