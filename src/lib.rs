pub mod error;
pub mod lightning;
pub mod logging;
pub mod onchain;
pub mod swap;

pub mod proto {
    pub mod v1 {
        tonic::include_proto!("swap_settlement.v1");
    }
}
