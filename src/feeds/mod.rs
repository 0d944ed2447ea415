pub mod deribit;
pub mod snapshot;
