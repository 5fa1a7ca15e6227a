pub mod fetch;
pub mod turn;
