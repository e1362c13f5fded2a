//! Static site handler: maps request paths onto a directory.

use std::path::{Component, Path, PathBuf};

use axum::http::StatusCode;

use crate::connection::{HttpConnection, SendDataOptions, SendFileOptions, SendFileOutcome, SendOutcome};
use crate::http::server::ConnectionHandler;

/// Serves files under `root`; directories answer with their index file.
#[derive(Debug, Clone)]
pub struct StaticSite {
    root: PathBuf,
    index: String,
}

impl StaticSite {
    pub fn new(root: impl Into<PathBuf>, index: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            index: index.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a request pathname under the root. `None` for paths that try
    /// to leave it.
    pub fn resolve(&self, pathname: &str) -> Option<PathBuf> {
        let relative = Path::new(pathname.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }

    fn answer(connection: &HttpConnection, status: StatusCode, message: &'static str) {
        if connection.send_data(SendDataOptions::new(message).status(status)) != SendOutcome::Success {
            tracing::debug!(exchange_id = %connection.exchange().id(), %status, "Error response not delivered");
        }
    }
}

impl ConnectionHandler for StaticSite {
    async fn handle(&self, connection: HttpConnection) {
        let Some(path) = self.resolve(connection.pathname()) else {
            tracing::warn!(pathname = %connection.pathname(), "Rejected path outside the site root");
            return Self::answer(&connection, StatusCode::NOT_FOUND, "Not Found");
        };

        let mut outcome = connection.send_file(SendFileOptions::new(&path)).await;
        if outcome == SendFileOutcome::FailedDirectory {
            outcome = connection.send_file(SendFileOptions::new(path.join(&self.index))).await;
        }

        match outcome {
            SendFileOutcome::Success | SendFileOutcome::FailedNoFurtherAction => {}
            SendFileOutcome::FailedStatsNotFound | SendFileOutcome::FailedDirectory => {
                Self::answer(&connection, StatusCode::NOT_FOUND, "Not Found");
            }
            SendFileOutcome::FailedUnknownStats => {
                Self::answer(&connection, StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        }
    }
}
