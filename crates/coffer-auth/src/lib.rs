//! coffer-auth: who is calling, and what key they hold
//!
//! - `token`: HS256 session tokens binding a login to the caller's public key
//! - `password`: Argon2id password hashes
//! - `session`: the server-side interceptor gating every vault call, plus the
//!   client-side interceptor that presents the token

pub mod password;
pub mod session;
pub mod token;

pub use password::{hash_password, verify_password};
pub use session::{attach_token, read_token, BearerToken, Session, SessionGuard};
pub use token::{Claims, TokenAuthority, TokenError, TOKEN_TTL};
