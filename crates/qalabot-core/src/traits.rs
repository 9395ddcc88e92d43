use crate::{
    error::QalaError,
    update::{Reply, Update},
    validate::ReportCategory,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Messaging transport trait.
///
/// Every messaging platform implements this trait to receive updates and
/// send replies. Delivery ordering and retries are the platform's concern;
/// the engine only relies on in-order delivery per transport identity.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start listening for inbound updates.
    /// Returns a receiver that yields updates as they arrive.
    async fn start(&self) -> Result<tokio::sync::mpsc::Receiver<Update>, QalaError>;

    /// Send a reply back through this channel.
    async fn send(&self, reply: Reply) -> Result<(), QalaError>;

    /// Send a typing indicator while a step is being processed.
    async fn send_typing(&self, _target: &str) -> Result<(), QalaError> {
        Ok(())
    }

    /// Graceful shutdown.
    async fn stop(&self) -> Result<(), QalaError>;
}

/// A fully assembled report, ready for submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub category: ReportCategory,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// The authenticated backend user, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

/// A short event listing as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub starts_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Backend API trait — the domain side of every flow.
///
/// Network failures and application-level rejections both surface as
/// `QalaError::Backend`; the engine treats them identically (preserve the
/// draft, tell the user, allow a retry of the same step).
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Register a new citizen. Returns the backend user id.
    async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        phone_number: &str,
    ) -> Result<i64, QalaError>;

    /// Log in an existing citizen. Returns the backend user id.
    async fn login(&self, phone_number: &str, password: &str) -> Result<i64, QalaError>;

    /// Submit a report. Returns the backend report id.
    async fn create_report(&self, report: &NewReport) -> Result<i64, QalaError>;

    /// List upcoming community events.
    async fn list_events(&self) -> Result<Vec<EventSummary>, QalaError>;

    /// Join an event on behalf of a user.
    async fn join_event(&self, user_id: Option<i64>, event_id: i64) -> Result<(), QalaError>;
}

/// Photo storage trait.
///
/// Takes a transport-hosted (short-lived) photo URL and returns a durable
/// public URL the backend can keep.
#[async_trait]
pub trait PhotoStorage: Send + Sync {
    async fn store(&self, source_url: &str) -> Result<String, QalaError>;
}
