//! The processing pipeline: walking parsed chat documents for raw
//! participants and enriching them through the upstream client pool.

mod enrich;
mod extract;

pub use enrich::{Enricher, EnricherConfig, EnrichmentError, EnrichmentReport};
pub use extract::extract_raw_participants;
