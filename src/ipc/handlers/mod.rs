pub mod conflicts;
pub mod core;
pub mod export;
pub mod generation;
pub mod setup;
pub mod wizard;
