//! HTTP clients for the collaborators the booking flow calls out to.

pub mod storage;
pub mod stylist;
