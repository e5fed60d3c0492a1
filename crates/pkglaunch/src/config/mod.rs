//! Configuration store, package schema, overrides and substitution

mod overrides;
mod schema;
mod store;
mod substitution;
mod version;

pub use overrides::*;
pub use schema::*;
pub use store::*;
pub use substitution::*;
pub use version::*;
