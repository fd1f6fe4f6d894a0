pub mod health;
pub mod training;

pub use crate::AppState;
