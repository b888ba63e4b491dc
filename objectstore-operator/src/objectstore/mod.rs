//! Reconciliation of `ObjectStore` resources.

pub mod arbiter;
pub mod builders;
pub mod controller;
pub mod error;
pub mod health;
pub mod resources;
pub mod router;
pub mod runner;

#[cfg(test)]
pub mod fixtures;

pub const APP_NAME: &str = "s3gw";
pub const OPERATOR_NAME: &str = "objectstore.hiro.io";
pub const CONTROLLER_NAME: &str = "objectstore";
pub const ROLE_NAME: &str = "gateway";
pub const ROLE_GROUP_NAME: &str = "default";
