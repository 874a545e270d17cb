//! recserve-registry: versioned model artifacts and their metadata.
//!
//! The model version manager only talks to the [`ModelRegistry`] trait.
//! [`FsRegistry`] is the on-disk implementation used by the daemon:
//!
//! ```text
//! <root>/<version>/meta.{json,yaml,yml}      version metadata (optional)
//! <root>/<version>/<model>/model.json        factor artifact
//! <root>/<version>/<model>/meta.json         model metadata (optional)
//! ```

pub mod error;
pub mod factor;
pub mod fs;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use factor::FactorModel;
pub use fs::FsRegistry;
pub use types::*;
