pub mod naming;
pub mod retry;
