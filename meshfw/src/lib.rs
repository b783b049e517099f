// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! The semver versioning covers the CLI only. The Rust APIs can change at any
//! time, even in patch releases.

pub mod cipher;
pub mod cli;
pub mod crypto;
pub mod device;
pub mod format;
pub mod pipeline;
pub mod util;
