//! Ambient actor and request metadata attached to every audit record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is acting and through which request.
///
/// Supplied by the request pipeline through a `ContextProvider`.  Every field
/// is optional because background jobs and startup code have no HTTP request
/// and no signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub http_method: Option<String>,
    pub request_url: Option<String>,
}

impl RequestContext {
    /// A context for work that runs outside any user request.
    pub fn system() -> Self {
        Self {
            user_id: Some("system".to_string()),
            user_name: Some("system".to_string()),
            correlation_id: Some(new_correlation_id()),
            ..Self::default()
        }
    }
}

/// Generate a fresh correlation id for a unit of work.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
