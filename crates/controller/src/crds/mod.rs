pub mod bootdependency;

pub use bootdependency::*;
