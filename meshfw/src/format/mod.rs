// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

pub mod checksum;
pub mod header;
pub mod partition;
