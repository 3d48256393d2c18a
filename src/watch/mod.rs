//! Watch subscription management.
//!
//! ```text
//!                    +-----------------------------+
//!   subscribe(scope) |          WatchHub           |
//!  ------------------>  connections: scope -> conn |
//!                    +--------------+--------------+
//!                                   | one task per scope
//!                    +--------------v--------------+
//!                    |       ScopeConnection       |
//!                    |  watch -> pump -> dispatch  |
//!                    |  reconnect w/ backoff       |
//!                    |  resync on expired resume   |
//!                    +--+---------+---------+------+
//!                       |         |         |   ordered, per-listener
//!                    +--v--+   +--v--+   +--v--+
//!                    | sub |   | sub |   | sub |
//!                    +-----+   +-----+   +-----+
//! ```
//!
//! The hub deduplicates physical watches: all subscribers of one scope share
//! one server stream. A connection survives subscriber churn and tears down
//! when the last subscriber drops. Reconnects resume from the last delivered
//! revision; an expired resume token triggers list-and-diff resynthesis so
//! listeners converge without ever observing reordered events.

mod connection;
mod hub;

pub(crate) use connection::*;
pub use hub::*;
