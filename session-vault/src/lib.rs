pub mod database;
pub mod session_manager;
pub mod vault;

pub use database::PgSessionStore;
pub use session_manager::{SessionError, SessionManager, DEFAULT_SESSION_TTL_HOURS};
pub use vault::{CredentialVault, CryptoError};
