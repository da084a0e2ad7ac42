// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Renders the package service's event bus (spec.md §6) to the terminal:
//! a line per before/after phase transition, and one progress bar per
//! in-flight download/install, the way `moss::client` drives per-package
//! bars under a shared `MultiProgress`.

use std::collections::HashMap;
use std::sync::Mutex;

use apm_package::{Event, EventState, Publisher};
use apm_tui::{MultiProgress, ProgressBar, ProgressStyle, Stylize};

pub struct ConsolePublisher {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl Default for ConsolePublisher {
    fn default() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }
}

impl Publisher for ConsolePublisher {
    fn publish(&self, event: Event) {
        match event.state {
            EventState::Before => println!("{} {}", "::".blue(), event.name),
            EventState::After => self.publish_after(event),
        }
    }
}

impl ConsolePublisher {
    fn publish_after(&self, event: Event) {
        let Some(key) = event.event_view.clone() else {
            if let Some(text) = &event.progress_done_text {
                println!("{} {text}", "done".green());
            }
            return;
        };

        let finished = event.progress_done_text.is_some();
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        let bar = bars.entry(key.clone()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(
                ProgressStyle::with_template("{msg} |{bar:20.cyan/blue}| {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("■≡=- "),
            );
            bar.set_message(event.name.to_owned());
            bar
        });

        if let Some(percent) = event.progress_percent {
            bar.set_position(percent as u64);
        }
        if let Some(text) = &event.progress_done_text {
            bar.finish_with_message(text.clone());
        }

        if finished {
            bars.remove(&key);
        }
    }
}
