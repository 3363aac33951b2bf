//! Repository layer for data access

pub mod campaigns;
pub mod queue;

// Re-export concrete repository implementations with simple names
pub use campaigns::DbCampaignRepository;
pub use queue::DbQueueRepository;

// Re-export repository traits
pub use campaigns::CampaignRepository;
pub use queue::QueueRepository;
