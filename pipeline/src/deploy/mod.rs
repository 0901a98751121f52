//! Deployment helpers shared by the stage workers

pub mod env;
pub mod fsm;
pub mod git;
pub mod lifecycle;
pub mod source;
