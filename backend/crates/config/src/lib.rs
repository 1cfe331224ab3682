pub mod definition;
pub mod env;
pub mod template;
pub mod tracing_init;

pub use definition::{
    load_definitions, parse_definitions, DestinationSpec, SourceSpec, SyncDefinition,
    WatermarkPolicy,
};
pub use env::{AppConfig, DestinationSettings, MySqlSettings, StateSettings};
pub use template::QueryTemplate;
pub use tracing_init::init_tracing;
