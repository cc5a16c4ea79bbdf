pub mod claim;
pub mod htlc;
pub mod matcher;
