pub mod driver;
pub mod imex;
