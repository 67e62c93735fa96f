// Setup endpoints: device listing and state refresh.

use tracing::debug;

use crate::client::PortalClient;
use crate::error::Error;
use crate::models::{DeviceDefinition, DeviceStateDefinition};

impl PortalClient {
    /// List every device paired with the gateway, sensors included.
    ///
    /// `GET setup/devices` — the ordering of the result is meaningful:
    /// sensor components appear adjacent to their owning device.
    pub async fn list_devices(&self) -> Result<Vec<DeviceDefinition>, Error> {
        let url = self.url("setup/devices")?;
        debug!("listing devices");
        self.get_json(url).await
    }

    /// Fetch the current states of a single device.
    ///
    /// `GET setup/devices/{deviceURL}/states`
    pub async fn get_device_states(
        &self,
        device_url: &str,
    ) -> Result<Vec<DeviceStateDefinition>, Error> {
        let url = self.device_url(device_url, "states")?;
        debug!(device_url, "fetching device states");
        self.get_json(url).await
    }

    /// Ask the gateway to re-read and publish the states of all devices.
    ///
    /// `PUT setup/devices/states/refresh` — completion is signalled
    /// asynchronously by a `RefreshAllDevicesStatesCompletedEvent` on the
    /// event feed.
    pub async fn refresh_all_states(&self) -> Result<(), Error> {
        let url = self.url("setup/devices/states/refresh")?;
        debug!("requesting refresh of all device states");
        self.put_no_content(url).await
    }

    /// Ask the gateway to re-read the states of one device.
    ///
    /// `POST setup/devices/{deviceURL}/states/refresh`
    pub async fn refresh_device_states(&self, device_url: &str) -> Result<(), Error> {
        let url = self.device_url(device_url, "states/refresh")?;
        debug!(device_url, "requesting device state refresh");
        self.post_no_content(url).await
    }
}
