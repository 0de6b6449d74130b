pub mod copier;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod linkscript;
pub mod pipeline;
pub mod platform;
pub mod registry;
pub mod resolve;
pub mod tools;
