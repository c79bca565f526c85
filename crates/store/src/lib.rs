//! Persistence adapters for FaqWorks.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Implements the `ConfigStore` and `StateStore` ports
//! from `domain`. No business rules live here.
//!
//! | Adapter | Port | Backing |
//! |---------|------|---------|
//! | [`InMemoryConfigStore`] | `ConfigStore` | A map; tests and ephemeral runs |
//! | [`TomlConfigStore`] | `ConfigStore` | The `[workers]` table of the settings file |
//! | [`JsonStateStore`] | `StateStore` | A JSON document in the state directory |

mod file;
pub mod memory;
pub mod state_file;
pub mod toml_file;

pub use memory::InMemoryConfigStore;
pub use state_file::JsonStateStore;
pub use toml_file::TomlConfigStore;
