pub mod health;
pub mod history;
pub mod process;
pub mod session;
