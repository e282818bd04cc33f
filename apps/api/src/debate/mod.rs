// Moderated debate: a moderator opens, the personas take turns in
// `selected_personas` order, the moderator closes. Turns are strictly
// sequential because every prompt carries the transcript so far.

pub mod handlers;
pub mod orchestrator;
pub mod prompts;
