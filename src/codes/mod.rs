//! Game code catalog: games, code records and point-in-time snapshots.

pub mod filter;
pub mod game;
pub mod record;
pub mod snapshot;

pub use filter::CodeFilter;
pub use game::Game;
pub use record::{CodeRecord, CodeType};
pub use snapshot::{NewCodes, Snapshot};
