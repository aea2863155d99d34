mod rate_limit;
mod request_auth;

pub use rate_limit::rate_limit;
pub use request_auth::{require_auth, AuthContext, AuthSource, API_KEY_HEADER};
