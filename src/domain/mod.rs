//! Domain models - ratings, aggregates and the display contract
//!
//! - `types` - identifiers, `Rating`, `RatingRecord`, `PerformanceUnit`
//! - `aggregate` - the rating set of the active group and the state derived from it
//! - `frame` - `DisplayFrame`, what the presentation layer renders

pub mod aggregate;
pub mod frame;
pub mod types;

pub use aggregate::{AggregateState, Direction, RatingSet, Tenths, TieBreak, VoterLine};
pub use frame::{CountUp, DisplayFrame, RevealPhase};
pub use types::{GroupId, ParticipantId, PerformanceUnit, Rating, RatingRecord};
