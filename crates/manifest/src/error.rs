// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ValidationError {
    #[error("{body_type}: `{field}` is required")]
    Required { body_type: &'static str, field: &'static str },
    #[error("{body_type}: `{field}` requires `{needs}` to also be set")]
    Needs {
        body_type: &'static str,
        field: &'static str,
        needs: &'static str,
    },
    #[error("{body_type}: `{field}` conflicts with `{conflicts_with}`")]
    Conflicts {
        body_type: &'static str,
        field: &'static str,
        conflicts_with: &'static str,
    },
    #[error("{body_type}: `{field}` must be an absolute path")]
    NotAbsolute { body_type: &'static str, field: &'static str },
    #[error("{body_type}: `{field}` is not a valid permission mask")]
    InvalidPerm { body_type: &'static str, field: &'static str },
    #[error("{body_type}: `{field}` is not a valid regular expression")]
    InvalidRegex { body_type: &'static str, field: &'static str },
    #[error("{body_type}: `{field}` has an invalid value `{value}`")]
    InvalidEnum {
        body_type: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("repos: unknown branch `{branch}`")]
    UnknownBranch { branch: String },
    #[error("unknown module type: {0}")]
    UnknownModuleType(String),
    #[error("duplicate module id: {0}")]
    DuplicateId(String),
    #[error("invalid module id `{0}`, must match ^[A-Za-z][A-Za-z0-9_]*$")]
    InvalidId(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read manifest {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse manifest {path} as YAML")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("parse manifest {path} as JSON")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
