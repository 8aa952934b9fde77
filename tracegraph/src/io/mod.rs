//! Side-effecting seams: collaborator traits, inference, prompts and files.

pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod inference;
pub mod patterns_store;
pub mod prompt;
