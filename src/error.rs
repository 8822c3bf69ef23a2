// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum ApkError {
    #[error("initializing filesystem entry {0}: {1:?}")]
    Init(String, std::io::Error),

    #[error("package database file {0}: {1}")]
    Database(String, String),

    #[error("HTTP fetch of {0} failed: {1}")]
    Network(String, String),

    #[error("authentication rejected for {0} (HTTP {1})")]
    Auth(String, u16),

    #[error("integrity failure for {0}: {1}")]
    Integrity(String, String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("package cache path {0}: {1:?}")]
    Cache(String, std::io::Error),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("malformed version string: {0}")]
    Version(String),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("public key parsing error: {0:?}")]
    PublicKey(#[from] rsa::pkcs8::spki::Error),

    #[error("RSA error: {0:?}")]
    Rsa(#[from] rsa::Error),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, ApkError>;
