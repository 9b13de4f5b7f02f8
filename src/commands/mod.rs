pub mod index;
pub mod label;
pub mod pairs;
pub mod results;
pub mod score;
pub mod solve;
