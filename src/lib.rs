pub mod api;
pub mod energy;
pub mod model;
pub mod orchestrator;
pub mod settings;
pub mod sink;
pub mod soc;
pub mod source;
pub mod store;

pub use api::Error;
