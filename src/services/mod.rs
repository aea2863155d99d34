mod api_key;
mod audit;
mod event_store;
mod oauth;
mod rate_limiter;
mod session;
mod users;

pub use api_key::ApiKeyService;
pub use audit::{hash_ip, redact_email, AuditService};
pub use event_store::{EventStore, NewEvent};
pub use oauth::{
    parse_scope, IntrospectionResponse, OAuthService, OAuthTokenResponse,
    GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_REFRESH_TOKEN,
};
pub use rate_limiter::{hash_identifier, RateLimitDecision, RateLimiterService, RouteClass};
pub use session::{session_token_from_cookie_header, SessionService, SESSION_COOKIE};
pub use users::{UserRecord, UsersStore, DESTINATION_AUTH_EVENTS};
