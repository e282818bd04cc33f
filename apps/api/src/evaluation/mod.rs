// Persona evaluation: every selected persona judges the candidate in
// parallel, the aggregator folds the verdicts into one combined decision.
// All LLM calls go through llm_client::policy.

pub mod aggregator;
pub mod handlers;
pub mod prompts;
pub mod runner;
pub mod verdict;
