pub mod compliance;
pub mod coordinator;
pub mod health;
pub mod network;
pub mod planner;
pub mod retry;
pub mod transport;
