// Chat continuation: follow-up questions answered against a stored debate or
// evaluation, in one persona's voice or the whole panel's.

pub mod engine;
pub mod handlers;
pub mod prompts;
