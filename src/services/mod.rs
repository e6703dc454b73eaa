pub mod bundle;
pub mod characters;
pub mod extract;
pub mod image;
pub mod llm;
pub mod plan;
pub mod prompt;
pub mod scheduler;
pub mod workflow;

#[cfg(test)]
pub(crate) mod mock;
