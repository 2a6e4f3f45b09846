use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Why the server could not start, or stopped.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not initialise logging")]
    Telemetry,
    #[display("storage directory unusable")]
    Storage,
    #[display("transcoder unusable")]
    Transcode,
    #[display("listener failed")]
    Listener,
}
