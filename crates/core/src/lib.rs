pub mod apnx;
pub mod batch;
pub mod config;
pub mod cover;
pub mod detect;
pub mod error;
pub mod pages;
pub mod patch;
pub mod progress;
pub mod readers;
pub mod scan;
pub mod thumbnail;

pub mod prelude {
    pub use crate::batch::{BatchOptions, BatchReport, FileOutcome, FileStatus};
    pub use crate::config::AppConfig;
    pub use crate::error::*;
    pub use crate::readers::{ContainerReader, MobiContainer};
}
