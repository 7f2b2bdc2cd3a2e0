//! crate error type
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", path.display())]
    Hcl {
        path: PathBuf,
        #[source]
        source: hcl::Error,
    },
    #[error("failed to parse {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to format generated hcl")]
    Format(#[source] hcl::Error),
    #[error("{} not found, run 'terraform init' first", path.display())]
    NotInitialized { path: PathBuf },
    #[error("source not found for module {0}, is it in modules.json?")]
    UnresolvedModule(String),
    #[error("failed to vendor module {module}")]
    Vendor {
        module: String,
        #[source]
        source: Box<Error>,
    },
    #[error("failed to apply overrides to {module}")]
    Patch {
        module: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn read(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::Read { path, source }
    }

    pub(crate) fn write(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::Write { path, source }
    }
}
