// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod host;
pub mod probe;

pub use host::{resolve_helper, HostConfig, HostEvent, PtyHost, HELPER_BINARY};
pub use probe::ProbeTracker;
