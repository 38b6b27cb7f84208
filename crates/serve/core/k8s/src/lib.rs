#[cfg(feature = "manager")]
pub mod manager;
pub mod owner;
