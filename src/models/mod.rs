pub mod challenge;
pub mod config;
pub mod metadata;

pub use challenge::{ChallengeDetail, ChallengeSummary, Envelope};
pub use config::UserConfig;
pub use metadata::ChallengeMetadata;
