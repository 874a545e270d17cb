//! recserve-models: the model version manager.
//!
//! Owns every loaded model instance for one model name, exposes the active
//! one for inference, and hot-swaps the active version on demand.
//!
//! # Lifecycle of one version
//!
//! ```text
//! Unloaded ──load──▶ Loading ──ok──▶ Loaded (cached) ──switch──▶ Active
//!                       │
//!                       └──err──▶ Unloaded   (nothing cached)
//! ```
//!
//! Any number of versions may be cached; exactly one is active. The active
//! model is never evicted.

pub mod cache;
pub mod error;
pub mod manager;

pub use cache::ModelCache;
pub use error::{ManagerError, ManagerResult};
pub use manager::{LoadedModel, ModelVersionManager, SwitchResult};
