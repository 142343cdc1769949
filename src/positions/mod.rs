pub mod formula;
pub mod history;
pub mod vote;

pub use history::UserScore;
pub use vote::{record_vote, user_positions, VoteOutcome};
