// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! System package update.
//!
//! Refreshes package lists and performs a distribution upgrade. Hosts on
//! restricted networks usually reach the mirrors through an HTTP proxy, but
//! the same configuration is often reused on hosts where that proxy does not
//! exist. So the proxy is probed first, and only used if it accepts a
//! connection.

use crate::{
    apt,
    config::UpdateSettings,
    syscall::{with_spinner, CommandRunner, Invocation, SyscallError},
};

use std::{sync::Arc, time::Duration};
use tokio::{net::TcpStream, time::timeout};
use tracing::{debug, info, instrument, warn};

/// Extract host and port from a proxy URL.
///
/// Port defaults to 80 for `http`, 443 for `https`, and 3128 otherwise.
pub fn proxy_address(url: &str) -> Option<(String, u16)> {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("", url),
    };

    let authority = rest.split('/').next()?;
    let authority = authority.rsplit('@').next()?;
    if authority.is_empty() {
        return None;
    }

    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => 3128,
    };

    // INVARIANT: Bracketed IPv6 literals keep their colons.
    if let Some(stripped) = authority.strip_prefix('[') {
        let (host, after) = stripped.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None => default_port,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((authority.to_string(), default_port)),
    }
}

/// Check if proxy accepts TCP connections within given time.
pub async fn probe_proxy(url: &str, wait: Duration) -> bool {
    let Some((host, port)) = proxy_address(url) else {
        warn!("cannot parse proxy address {url:?}");
        return false;
    };

    match timeout(wait, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(error)) => {
            debug!("proxy {host}:{port} refused connection: {error}");
            false
        }
        Err(_) => {
            debug!("proxy {host}:{port} timed out");
            false
        }
    }
}

/// System updater.
pub struct Updater<R>
where
    R: CommandRunner,
{
    runner: Arc<R>,
    settings: UpdateSettings,
}

impl<R> Updater<R>
where
    R: CommandRunner,
{
    /// Construct new system updater.
    pub fn new(runner: Arc<R>, settings: UpdateSettings) -> Self {
        Self { runner, settings }
    }

    /// Determine proxy to use, if any is configured and reachable.
    pub async fn resolve_proxy(&self) -> Option<String> {
        let proxy = self.settings.proxy.as_deref()?;
        let wait = Duration::from_secs(self.settings.probe_timeout_secs);
        if probe_proxy(proxy, wait).await {
            info!("using proxy {proxy}");
            Some(proxy.to_string())
        } else {
            warn!("proxy {proxy} unreachable, continuing without it");
            None
        }
    }

    /// Apt steps of a full update.
    pub fn steps(&self, proxy: Option<&str>) -> Vec<Invocation> {
        let mut steps = vec![
            apt::apt_get(["update"], proxy),
            apt::apt_get(["-y", "dist-upgrade"], proxy),
        ];
        if self.settings.autoremove {
            steps.push(apt::apt_get(["-y", "autoremove"], proxy));
        }
        steps
    }

    /// Refresh package lists and upgrade the distribution.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError`] of the first step that fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn run(&self) -> Result<(), SyscallError> {
        let proxy = self.resolve_proxy().await;
        for step in self.steps(proxy.as_deref()) {
            info!("{step}");
            with_spinner(step.to_string(), || self.runner.output(&step))?;
        }

        Ok(())
    }
}
