pub mod health;
pub mod operator_stub;
