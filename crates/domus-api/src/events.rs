// Event feed endpoints: listener registration and event fetching.

use tracing::{debug, warn};

use crate::client::PortalClient;
use crate::error::Error;
use crate::models::{ListenerRegistration, PortalEvent};

impl PortalClient {
    /// Register a new event listener.
    ///
    /// `POST events/register` — the returned id is the handle for
    /// subsequent fetches. The portal keeps one listener per session and
    /// silently expires listeners that are not polled.
    pub async fn register_event_listener(&self) -> Result<String, Error> {
        let url = self.url("events/register")?;
        debug!("registering event listener");
        let reg: ListenerRegistration = self.post_empty_json(url).await?;
        debug!(listener_id = %reg.id, "event listener registered");
        Ok(reg.id)
    }

    /// Fetch the events queued since the previous fetch.
    ///
    /// `POST events/{listener}/fetch` — the batch is decoded element by
    /// element: a malformed entry is logged and skipped so it cannot
    /// poison the rest of the batch.
    pub async fn fetch_events(&self, listener_id: &str) -> Result<Vec<PortalEvent>, Error> {
        let url = self.url(&format!("events/{}/fetch", urlencoding::encode(listener_id)))?;
        let raw: Vec<serde_json::Value> = self.post_empty_json(url).await?;

        let mut events = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<PortalEvent>(value) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "skipping malformed event in batch"),
            }
        }
        Ok(events)
    }

    /// Drop an event listener.
    ///
    /// `POST events/{listener}/unregister` — best-effort; the portal
    /// expires unused listeners on its own.
    pub async fn unregister_event_listener(&self, listener_id: &str) -> Result<(), Error> {
        let url = self.url(&format!(
            "events/{}/unregister",
            urlencoding::encode(listener_id)
        ))?;
        debug!(listener_id, "unregistering event listener");
        self.post_no_content(url).await
    }
}
