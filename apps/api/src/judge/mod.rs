// Judge: retrospective trust scoring of a stored evaluation or debate
// (quality, consistency with similar runs, timing). Scores the run, never
// the candidate, and never modifies the result it scores.

pub mod handlers;
pub mod scorer;
pub mod similarity;
