pub mod constants;
pub mod grid;
pub mod state;
