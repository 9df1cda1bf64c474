//! Backend pool, health checking and load balancing.

pub mod backend;
pub mod health;
pub mod load_balancer;
pub mod pool;
pub mod strategy;

pub use backend::{Backend, ConnectionGuard};
pub use load_balancer::LoadBalancer;
pub use pool::Pool;
pub use strategy::{LeastConnections, RandomWeight, RoundRobin, Strategy};
