pub mod rate_limit;
pub mod replay_guard;
pub mod signing;
pub mod tokens;

pub use rate_limit::{IdentityRateLimiter, RateLimited};
pub use replay_guard::ReplayGuard;
pub use signing::{Signature, Signer, canonical_payload, is_fresh};
pub use tokens::{bearer_token, token_matches};
