// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Apt invocations.

use crate::syscall::Invocation;

/// Build an `apt-get` invocation that never asks questions.
///
/// When a proxy is given it is passed to apt for both HTTP and HTTPS
/// repositories through `-o` options, so it only affects this call.
pub fn apt_get(args: impl IntoIterator<Item = impl Into<String>>, proxy: Option<&str>) -> Invocation {
    let mut full: Vec<String> = Vec::new();
    if let Some(proxy) = proxy {
        full.extend([
            "-o".to_string(),
            format!("Acquire::http::Proxy={proxy}"),
            "-o".to_string(),
            format!("Acquire::https::Proxy={proxy}"),
        ]);
    }
    full.extend(args.into_iter().map(Into::into));

    Invocation::new("apt-get", full).env("DEBIAN_FRONTEND", "noninteractive")
}

/// Build an `apt-get install -y` invocation for given packages.
pub fn install(packages: impl IntoIterator<Item = impl Into<String>>) -> Invocation {
    let mut args = vec!["install".to_string(), "-y".to_string()];
    args.extend(packages.into_iter().map(Into::into));
    apt_get(args, None)
}
