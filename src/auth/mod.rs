//! Bearer credential verification.
//!
//! Token issuance lives in a separate service; this crate only verifies a
//! bearer token and yields the subject it was issued to.

mod middleware;
mod token;

pub use middleware::*;
pub use token::*;
