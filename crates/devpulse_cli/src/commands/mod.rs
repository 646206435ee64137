pub(crate) mod access;
pub(crate) mod migrate;
pub(crate) mod monitor;
pub(crate) mod output;
pub(crate) mod repos;
pub(crate) mod schedule;
pub(crate) mod shared;
pub(crate) mod sync;
