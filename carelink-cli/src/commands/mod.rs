pub mod serve;
pub mod session;
