pub mod block;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod increment;
pub mod lrl;
pub mod manifest;
pub mod materialize;
pub mod platform;
pub mod recovery;
pub mod space;
pub mod stream;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
