// Number of bytes used to represent the size of a frame
pub const LENGTH_BYTES: usize = 4;

// Upper bound for a single frame, protects against bogus length prefixes
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

pub mod message_type {
    /// The following frames carry batches of bets
    pub const BETDATA: &str = "BETDATA";
    /// The following frame carries the agency asking for its winners
    pub const REQWINN: &str = "REQWINN";
    /// Not every agency has finished submitting its bets
    pub const NOWINN: &str = "NOWINN";
    /// A frame with the list of winners will follow
    pub const WINNERS: &str = "WINNERS";
}

pub mod codec;
pub mod connection;
pub mod message;
