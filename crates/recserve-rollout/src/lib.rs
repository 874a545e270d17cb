//! recserve rollout routing: decides which model version serves a request.
//!
//! Routing is a pure function of the live [`RolloutConfig`] and the user id.
//! The config itself is owned by a [`SharedRollout`] handle that the service
//! creates at startup and injects wherever routing decisions are needed.
//!
//! # Components
//!
//! - **`strategy`**: Strategy enum, rollout config, partial updates
//! - **`router`**: `route()` and the routing decision it returns
//! - **`shared`**: Read-mostly shared handle around the live config
//!
//! # Known limitations
//!
//! Buckets are `user_id % 100` (canary) and `user_id % 2` (A/B) on the raw
//! id, with no hashing. A user keeps the same variant across retries while
//! the config is unchanged, but skewed id distributions (sequential test
//! traffic, for example) skew exposure accordingly.

pub mod error;
pub mod router;
pub mod shared;
pub mod strategy;

pub use error::{RolloutError, RolloutResult};
pub use router::{RoutingDecision, Variant, route};
pub use shared::SharedRollout;
pub use strategy::{RolloutConfig, RolloutUpdate, Strategy};
