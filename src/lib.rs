//! satstore - onboard image storage and downlink coordination for satellite
//! payloads.
//!
//! A log-structured store over NOR-flash-like block storage with
//! tombstone-based garbage collection, a priority engine ranking stored
//! imagery for a bandwidth-limited downlink, and a framed serial protocol to
//! the mission-management controller. Space is reclaimed only after the
//! controller confirms receipt (confirm-then-reclaim), and the priority
//! engine's ranking is exactly the garbage collector's retention signal.

pub mod classify;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod link;
pub mod observability;
pub mod selection;
pub mod store;
