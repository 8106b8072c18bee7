use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::task::TaskKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot connect to coordinator at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("rpc to coordinator failed: {0}")]
    Rpc(#[from] tarpc::client::RpcError),

    #[error("cannot read input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} function failed: {source}")]
    UserFunction {
        kind: TaskKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("{kind} task aborted: {source}")]
    Aborted {
        kind: TaskKind,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl Error {
    /// Transport errors mean the coordinator cannot be reached, so the
    /// worker cannot even report a failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::Rpc(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
