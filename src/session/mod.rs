pub mod presence;

pub use presence::{PresenceSession, SubmitOutcome};
