pub mod jwt;
pub mod pkce;
pub mod seal;
pub mod secret;
