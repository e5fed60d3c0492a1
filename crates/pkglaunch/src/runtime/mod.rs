//! Runtime components: resolution, composition, delegates and launching

pub mod catalog;
pub mod delegate;
pub mod dependency;
pub mod environment;
pub mod info;
pub mod launcher;
pub mod policy;
pub mod process;

pub use catalog::*;
pub use delegate::*;
pub use dependency::*;
pub use environment::*;
pub use info::*;
pub use launcher::*;
pub use policy::*;
pub use process::*;
