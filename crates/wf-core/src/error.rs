use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

/// Error reasons originating from node and edge machinery (spec.md §4).
#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("window build error")]
    WindowBuild,
    #[error("predicate evaluation error")]
    PredicateEval,
    #[error("alert sink error")]
    AlertSink,
    #[error("data format error")]
    DataFormat,
    #[error("udf bridge error")]
    UdfBridge,
    #[error("sink dispatch error")]
    SinkDispatch,
    #[error("edge aborted")]
    Aborted,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::WindowBuild => 1001,
            Self::PredicateEval => 1002,
            Self::AlertSink => 1003,
            Self::DataFormat => 1004,
            Self::UdfBridge => 1005,
            Self::SinkDispatch => 1006,
            Self::Aborted => 1007,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
