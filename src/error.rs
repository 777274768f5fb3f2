use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported rate interval {millis}ms (supported: 1000ms, 60000ms)")]
    UnsupportedRateUnit { millis: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
