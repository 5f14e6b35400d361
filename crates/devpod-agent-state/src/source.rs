//! The four workspace source descriptors named in spec.md §3.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum WorkspaceSource {
    GitRepo {
        url: String,
        reference: Option<String>,
    },
    LocalFolder {
        path: PathBuf,
    },
    Image {
        reference: String,
    },
    Container {
        id: String,
    },
}
