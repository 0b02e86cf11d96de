use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    /// A component could not be constructed from the configuration.
    #[display("could not set up {_0}")]
    Setup(#[error(not(source))] &'static str),
    #[display("could not read request input")]
    Input,
    #[display("could not encode response")]
    Output,
    #[display("request failed")]
    Pipeline,
}
