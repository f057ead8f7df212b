pub mod dedup;
pub mod throttle;
