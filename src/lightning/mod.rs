pub mod invoice;
pub mod ldk;
