pub mod container;

pub use container::{Container, ContainerConfig, DEFAULT_DB_FILE};
