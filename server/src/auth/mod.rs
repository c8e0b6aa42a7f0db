pub mod jwt;
pub mod middleware;

use crate::db::models::Role;

/// Who is on the other end of a socket or request, as asserted by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    /// Business the admin works for, or the business a client is talking to
    /// when connecting to its notification stream
    pub business_id: Option<String>,
    pub name: Option<String>,
}
