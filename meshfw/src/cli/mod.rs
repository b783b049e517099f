// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

pub mod args;

macro_rules! status {
    ($($arg:tt)*) => {
        println!("\x1b[1m[*] {}\x1b[0m", format!($($arg)*))
    }
}

pub(crate) use status;
