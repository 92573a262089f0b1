pub mod events;
pub mod predictions;
pub mod tasks;
