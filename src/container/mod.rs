//! Container lifecycle for zdockerd
//!
//! - `state`: the container record and its status machine
//! - `manager`: create, start, stop, remove and exit tracking
//! - `executor`: consumers of exec sessions
//! - `logs`: log file following

pub mod executor;
pub mod logs;
mod manager;
pub mod names;
mod state;

pub use manager::ContainerManager;
pub use state::{
    generate_id, parse_cpu_set, parse_memory, shares_to_weight, validate_cpu_share, Admission,
    Container, ContainerStatus, PortBinding, Protocol, Transition, VolumeBinding,
};
