pub mod checkin;
pub mod cooldown;
pub mod events;
pub mod history;
pub mod snippets;
pub mod traits;

pub use checkin::{CheckIn, DEFAULT_MAX_MESSAGE_CHARS, MAX_TAGS, truncate_message};
pub use cooldown::{CooldownGate, MAX_COOLDOWN_MINUTES, format_remaining, period_from_minutes};
pub use events::{ClientEvent, ConnectionState};
pub use history::{DEFAULT_MAX_HISTORY_SIZE, HistoryBuffer, HistoryEntry, UpsertOutcome};
pub use traits::{DisplaySink, Identity, IdentityProvider, StaticIdentity, StaticTags, TagSource};
