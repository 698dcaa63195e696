mod config;
mod jwt;

pub use config::AuthConfig;
pub use jwt::JwtClaims;
