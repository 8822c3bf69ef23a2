// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP credential resolution.

Remote fetches consult an [Authenticator] to obtain optional Basic auth
credentials for a request's host. [StaticAuth] serves one configured host;
[ChainAuth] consults a list of authenticators in order and returns the
first match.
*/

use crate::error::Result;

/// A username/password pair applied as HTTP Basic auth.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Resolves credentials for HTTP hosts.
pub trait Authenticator: Send + Sync {
    /// Obtain credentials for the given host, if any are configured.
    ///
    /// `host` includes the port when the URL carries a non-default one,
    /// matching the form in `Url::host_str()` plus `Url::port()`.
    fn for_host(&self, host: &str) -> Result<Option<Credentials>>;
}

/// An [Authenticator] that never has credentials.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn for_host(&self, _host: &str) -> Result<Option<Credentials>> {
        Ok(None)
    }
}

/// An [Authenticator] holding credentials for exactly one host.
#[derive(Clone, Debug)]
pub struct StaticAuth {
    host: String,
    credentials: Credentials,
}

impl StaticAuth {
    pub fn new(
        host: impl ToString,
        username: impl ToString,
        password: impl ToString,
    ) -> Self {
        Self {
            host: host.to_string(),
            credentials: Credentials {
                username: username.to_string(),
                password: password.to_string(),
            },
        }
    }
}

impl Authenticator for StaticAuth {
    fn for_host(&self, host: &str) -> Result<Option<Credentials>> {
        if host == self.host {
            Ok(Some(self.credentials.clone()))
        } else {
            Ok(None)
        }
    }
}

/// An [Authenticator] consulting sub-authenticators in order.
#[derive(Default)]
pub struct ChainAuth {
    authenticators: Vec<Box<dyn Authenticator>>,
}

impl ChainAuth {
    pub fn new(authenticators: Vec<Box<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }

    /// Append an authenticator to the end of the chain.
    pub fn push(&mut self, authenticator: impl Authenticator + 'static) {
        self.authenticators.push(Box::new(authenticator));
    }
}

impl Authenticator for ChainAuth {
    fn for_host(&self, host: &str) -> Result<Option<Credentials>> {
        for authenticator in &self.authenticators {
            if let Some(credentials) = authenticator.for_host(host)? {
                return Ok(Some(credentials));
            }
        }

        Ok(None)
    }
}
