// Execution endpoints: applying, cancelling, and listing command batches.

use tracing::debug;

use crate::client::PortalClient;
use crate::error::Error;
use crate::models::{ApplyRequest, ApplyResponse, CurrentExecution};

impl PortalClient {
    /// Submit a command batch for execution.
    ///
    /// `POST exec/apply`, or `POST exec/apply/highPriority` for batches
    /// that must preempt the gateway-side queue. Returns the execution id
    /// that subsequent `ExecutionStateChangedEvent`s correlate against.
    pub async fn apply_actions(
        &self,
        request: &ApplyRequest,
        high_priority: bool,
    ) -> Result<String, Error> {
        let path = if high_priority {
            "exec/apply/highPriority"
        } else {
            "exec/apply"
        };
        let url = self.url(path)?;
        debug!(label = %request.label, actions = request.actions.len(), "applying actions");
        let resp: ApplyResponse = self.post_json(url, request).await?;
        debug!(exec_id = %resp.exec_id, "execution accepted");
        Ok(resp.exec_id)
    }

    /// Request cancellation of a running execution.
    ///
    /// `DELETE exec/current/setup/{execId}` — best-effort; the portal
    /// remains authoritative and reports the outcome on the event feed.
    pub async fn cancel_execution(&self, exec_id: &str) -> Result<(), Error> {
        let url = self.url(&format!(
            "exec/current/setup/{}",
            urlencoding::encode(exec_id)
        ))?;
        debug!(exec_id, "cancelling execution");
        self.delete_no_content(url).await
    }

    /// List the executions currently running on the gateway.
    ///
    /// `GET exec/current`
    pub async fn current_executions(&self) -> Result<Vec<CurrentExecution>, Error> {
        let url = self.url("exec/current")?;
        debug!("listing current executions");
        self.get_json(url).await
    }
}
