//! Call-record store port

use crate::domain::call::record::CallRecord;
use crate::domain::shared::result::Result;
use async_trait::async_trait;

/// Destination of finished calls.
///
/// Defined in the domain layer as a trait (port) and implemented in the
/// infrastructure layer (adapter).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Submit a finished call
    async fn submit(&self, record: &CallRecord) -> Result<()>;
}
