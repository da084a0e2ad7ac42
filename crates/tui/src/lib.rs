// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

pub use self::reexport::*;

/// Provide a standard approach to ratatui based TUI in moss
mod reexport {
    pub use crossterm::style::Stylize;
    pub use indicatif::*;
}
