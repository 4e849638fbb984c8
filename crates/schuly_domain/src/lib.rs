pub mod agenda;
pub mod clock;
pub mod error;
pub mod memory;
pub mod notifications;
pub mod permissions;
pub mod scheduler;
pub mod service;
pub mod settings;

pub use crate::service::{SchulyService, SchulyServiceBuilder};
