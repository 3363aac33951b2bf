//! Companion REST API - side-effecting campaign operations

mod client;

pub use client::{ApiAuth, BulkMessageApi, CampaignCommand};
