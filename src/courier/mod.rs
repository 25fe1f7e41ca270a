// Courier module - page media extraction, video resolution and batched delivery

pub mod acquisition;
pub mod bypass;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod extractors;
pub mod hosts;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod selection;
pub mod tools;
pub mod traits;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use config::CourierConfig;
pub use delivery::OutboxDestination;
pub use errors::CourierError;
pub use models::{DeliveryReport, EventKind, PipelineEvent};
pub use pipeline::{Collaborators, Courier};
pub use resolver::YtDlpDownloader;
pub use traits::{ChallengeSolver, Destination, StreamDownloader, Transport};
pub use transport::ReqwestTransport;
