pub mod barrier;
pub mod bet;
pub mod store;
pub mod winners;

pub use barrier::CompletionBarrier;
pub use bet::AgencyId;
pub use store::{BetLedger, BetStore, FileStore};
pub use winners::WinnerResolver;
