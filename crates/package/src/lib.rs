// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Package-action facade consumed by the `packages`, `kernel`, `repos`, and
//! `branding` module handlers: simulate-then-apply semantics over an
//! injected [`AptBackend`], coalesced install/remove planning, a throttled
//! progress bus, and a change-plan preview.
//!
//! The native APT binding itself is out of scope (spec.md §1) — this crate
//! only defines the contract an implementer plugs in, mirroring the way
//! `moss::registry::Plugin` (see `moss/src/registry/plugin.rs`) abstracts
//! over backend-specific package sources behind one enum/trait boundary.

use std::sync::Mutex;

use thiserror::Error;

mod throttle;

pub use throttle::Throttler;

/// Outcome of a simulated or applied package transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePlan {
    pub new_installed: Vec<String>,
    pub upgraded: Vec<String>,
    pub removed: Vec<String>,
    pub extra_installed: Vec<String>,
    pub download_size: u64,
    pub install_size: u64,
}

/// Introspection result for `GetInfo`/`Search`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub summary: String,
    pub installed: bool,
}

/// One progress tick emitted while a transaction applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    DownloadProgress,
    DownloadComplete,
    InstallProgress,
}

/// A progress callback: package name, kind, current unit, total units.
pub type ProgressFn<'a> = dyn Fn(&str, ProgressKind, u64, u64) + Send + Sync + 'a;

/// `state ∈ {before, after}` marker, per spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Before,
    After,
}

/// One tagged progress/state-transition event, as surfaced by the shared
/// bus that out-of-core frontends (CLI, DBus, WebSocket) translate.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub state: EventState,
    pub name: &'static str,
    pub progress_percent: Option<f32>,
    pub event_view: Option<String>,
    pub progress_done_text: Option<String>,
}

impl Event {
    fn named(state: EventState, name: &'static str) -> Self {
        Self {
            state,
            name,
            progress_percent: None,
            event_view: None,
            progress_done_text: None,
        }
    }
}

/// Observer for the shared event bus. An implementer routes these to the
/// CLI, DBus, or WebSocket frontends (out of scope here).
pub trait Publisher: Send + Sync {
    fn publish(&self, event: Event);
}

/// A `Publisher` that drops every event, for callers that don't need the
/// bus (e.g. unattended builds).
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _event: Event) {}
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("package not found: {0}")]
    NotFound(String),
    #[error("package conflict: {0}")]
    PackageConflict(String),
    #[error("ambiguous virtual package: {0}")]
    VirtualPackageAmbiguous(String),
    #[error("already installed: {0}")]
    AlreadyInstalled(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// The raw APT binding's contract, consumed by [`PackageService`]. An
/// implementer wraps the native library or shells out to `apt-get`; this
/// crate only depends on the trait.
pub trait AptBackend: Send + Sync {
    fn simulate_install(&self, pkgs: &[String]) -> Result<ChangePlan, Error>;
    fn simulate_remove(&self, pkgs: &[String], purge: bool, depends: bool) -> Result<ChangePlan, Error>;
    fn simulate_autoremove(&self) -> Result<ChangePlan, Error>;
    fn simulate_reinstall(&self, pkgs: &[String]) -> Result<ChangePlan, Error>;
    fn simulate_change(&self, install: &[String], remove: &[String], purge: bool, depends: bool) -> Result<ChangePlan, Error>;
    fn simulate_dist_upgrade(&self) -> Result<ChangePlan, Error>;

    fn install_packages(&self, pkgs: &[String], progress: &ProgressFn<'_>) -> Result<ChangePlan, Error>;
    fn remove_packages(&self, pkgs: &[String], purge: bool, depends: bool, progress: &ProgressFn<'_>) -> Result<ChangePlan, Error>;
    fn reinstall_packages(&self, pkgs: &[String], progress: &ProgressFn<'_>) -> Result<ChangePlan, Error>;
    fn combine_install_remove_packages(
        &self,
        ops: &[String],
        purge: bool,
        depends: bool,
        progress: &ProgressFn<'_>,
    ) -> Result<ChangePlan, Error>;
    fn dist_upgrade(&self, progress: &ProgressFn<'_>) -> Result<ChangePlan, Error>;
    fn update(&self, progress: &ProgressFn<'_>) -> Result<(), Error>;

    fn get_info(&self, name: &str) -> Result<Option<PackageInfo>, Error>;
    fn search(&self, substr: &str) -> Result<Vec<PackageInfo>, Error>;
}

/// The simulate-then-apply facade the `packages`/`kernel`/`repos`/`branding`
/// module handlers consume, wrapping an [`AptBackend`] with a shared
/// progress bus and a per-package throttler.
pub struct PackageService<B> {
    backend: B,
    publisher: Box<dyn Publisher>,
    throttle: Mutex<Throttler>,
}

impl<B: AptBackend> PackageService<B> {
    pub fn new(backend: B, publisher: Box<dyn Publisher>) -> Self {
        Self {
            backend,
            publisher,
            throttle: Mutex::new(Throttler::new()),
        }
    }

    pub fn simulate_install(&self, pkgs: &[String]) -> Result<ChangePlan, Error> {
        self.around("system.Check", || self.backend.simulate_install(pkgs))
    }

    pub fn simulate_remove(&self, pkgs: &[String], purge: bool, depends: bool) -> Result<ChangePlan, Error> {
        self.around("system.Check", || self.backend.simulate_remove(pkgs, purge, depends))
    }

    pub fn simulate_autoremove(&self) -> Result<ChangePlan, Error> {
        self.around("system.Check", || self.backend.simulate_autoremove())
    }

    pub fn simulate_reinstall(&self, pkgs: &[String]) -> Result<ChangePlan, Error> {
        self.around("system.Check", || self.backend.simulate_reinstall(pkgs))
    }

    pub fn simulate_change(&self, install: &[String], remove: &[String], purge: bool, depends: bool) -> Result<ChangePlan, Error> {
        self.around("system.Check", || {
            self.backend.simulate_change(install, remove, purge, depends)
        })
    }

    pub fn simulate_dist_upgrade(&self) -> Result<ChangePlan, Error> {
        self.around("system.Check", || self.backend.simulate_dist_upgrade())
    }

    pub fn install_packages(&self, pkgs: &[String]) -> Result<ChangePlan, Error> {
        self.around("system.Working", || self.backend.install_packages(pkgs, &self.progress_fn()))
    }

    pub fn remove_packages(&self, pkgs: &[String], purge: bool, depends: bool) -> Result<ChangePlan, Error> {
        self.around("system.Working", || {
            self.backend.remove_packages(pkgs, purge, depends, &self.progress_fn())
        })
    }

    pub fn reinstall_packages(&self, pkgs: &[String]) -> Result<ChangePlan, Error> {
        self.around("system.Working", || self.backend.reinstall_packages(pkgs, &self.progress_fn()))
    }

    /// Coalesced install+remove planning: the `packages` module body builds
    /// one `ops` list (`pkg+` to install, `pkg-` to remove) rather than two
    /// separate transactions, per spec.md §4.7.
    pub fn combine_install_remove_packages(&self, ops: &[String], purge: bool, depends: bool) -> Result<ChangePlan, Error> {
        self.around("system.Working", || {
            self.backend.combine_install_remove_packages(ops, purge, depends, &self.progress_fn())
        })
    }

    pub fn dist_upgrade(&self) -> Result<ChangePlan, Error> {
        self.around("system.Upgrade", || self.backend.dist_upgrade(&self.progress_fn()))
    }

    /// Backs both `packages.update` and `packages.upgrade` (spec.md §9 open
    /// question 3: the source calls the same facade op for both, and this
    /// redesign follows that rather than guessing a distinct operation).
    pub fn update(&self) -> Result<(), Error> {
        self.around("system.Update", || self.backend.update(&self.progress_fn()))
    }

    pub fn get_info(&self, name: &str) -> Result<Option<PackageInfo>, Error> {
        self.backend.get_info(name)
    }

    pub fn search(&self, substr: &str) -> Result<Vec<PackageInfo>, Error> {
        self.backend.search(substr)
    }

    fn around<T>(&self, phase: &'static str, f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
        self.publisher.publish(Event::named(EventState::Before, phase));
        let result = f();
        let mut after = Event::named(EventState::After, phase);
        if result.is_ok() {
            after.progress_percent = Some(100.0);
            after.progress_done_text = Some("done".to_owned());
        }
        self.publisher.publish(after);
        result
    }

    fn progress_fn(&self) -> impl Fn(&str, ProgressKind, u64, u64) + '_ {
        move |pkg, kind, cur, total| {
            let event_name: &'static str = match kind {
                ProgressKind::DownloadProgress | ProgressKind::DownloadComplete => "system.downloadProgress",
                ProgressKind::InstallProgress => "system.installProgress",
            };
            let percent = if total == 0 { 100.0 } else { (cur as f64 / total as f64 * 100.0) as f32 };

            let mut throttle = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
            if !throttle.should_emit(pkg, percent) {
                return;
            }

            self.publisher.publish(Event {
                state: EventState::After,
                name: event_name,
                progress_percent: Some(percent),
                event_view: Some(format!("{event_name}-{pkg}")),
                progress_done_text: (percent >= 100.0).then(|| format!("{pkg} done")),
            });
        }
    }
}

/// Builds the `ops` list the `packages` module hands to
/// `CombineInstallRemovePackages`: `pkg+` for installs, `pkg-` for removes.
pub fn combine_ops(install: &[String], remove: &[String]) -> Vec<String> {
    install
        .iter()
        .map(|p| format!("{p}+"))
        .chain(remove.iter().map(|p| format!("{p}-")))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeBackend;

    impl AptBackend for FakeBackend {
        fn simulate_install(&self, pkgs: &[String]) -> Result<ChangePlan, Error> {
            Ok(ChangePlan {
                new_installed: pkgs.to_vec(),
                ..Default::default()
            })
        }
        fn simulate_remove(&self, pkgs: &[String], _purge: bool, _depends: bool) -> Result<ChangePlan, Error> {
            Ok(ChangePlan {
                removed: pkgs.to_vec(),
                ..Default::default()
            })
        }
        fn simulate_autoremove(&self) -> Result<ChangePlan, Error> {
            Ok(ChangePlan::default())
        }
        fn simulate_reinstall(&self, _pkgs: &[String]) -> Result<ChangePlan, Error> {
            Ok(ChangePlan::default())
        }
        fn simulate_change(&self, install: &[String], remove: &[String], _purge: bool, _depends: bool) -> Result<ChangePlan, Error> {
            Ok(ChangePlan {
                new_installed: install.to_vec(),
                removed: remove.to_vec(),
                ..Default::default()
            })
        }
        fn simulate_dist_upgrade(&self) -> Result<ChangePlan, Error> {
            Ok(ChangePlan::default())
        }
        fn install_packages(&self, pkgs: &[String], progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
            progress(pkgs.first().map(String::as_str).unwrap_or(""), ProgressKind::InstallProgress, 1, 1);
            Ok(ChangePlan {
                new_installed: pkgs.to_vec(),
                ..Default::default()
            })
        }
        fn remove_packages(&self, pkgs: &[String], _purge: bool, _depends: bool, _progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
            Ok(ChangePlan {
                removed: pkgs.to_vec(),
                ..Default::default()
            })
        }
        fn reinstall_packages(&self, _pkgs: &[String], _progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
            Ok(ChangePlan::default())
        }
        fn combine_install_remove_packages(
            &self,
            ops: &[String],
            _purge: bool,
            _depends: bool,
            _progress: &ProgressFn<'_>,
        ) -> Result<ChangePlan, Error> {
            let new_installed = ops.iter().filter_map(|o| o.strip_suffix('+')).map(String::from).collect();
            let removed = ops.iter().filter_map(|o| o.strip_suffix('-')).map(String::from).collect();
            Ok(ChangePlan {
                new_installed,
                removed,
                ..Default::default()
            })
        }
        fn dist_upgrade(&self, _progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
            Ok(ChangePlan::default())
        }
        fn update(&self, _progress: &ProgressFn<'_>) -> Result<(), Error> {
            Ok(())
        }
        fn get_info(&self, name: &str) -> Result<Option<PackageInfo>, Error> {
            Ok(Some(PackageInfo {
                name: name.to_owned(),
                version: "1.0".to_owned(),
                summary: String::new(),
                installed: false,
            }))
        }
        fn search(&self, _substr: &str) -> Result<Vec<PackageInfo>, Error> {
            Ok(vec![])
        }
    }

    struct CountingPublisher(Arc<AtomicUsize>);

    impl Publisher for CountingPublisher {
        fn publish(&self, _event: Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn combine_ops_tags_install_and_remove() {
        let ops = combine_ops(&["a".to_owned()], &["b".to_owned()]);
        assert_eq!(ops, vec!["a+".to_owned(), "b-".to_owned()]);
    }

    #[test]
    fn combine_install_remove_round_trips_through_backend() {
        let count = Arc::new(AtomicUsize::new(0));
        let service = PackageService::new(FakeBackend, Box::new(CountingPublisher(count.clone())));

        let ops = combine_ops(&["pkg-a".to_owned()], &["pkg-b".to_owned()]);
        let plan = service.combine_install_remove_packages(&ops, false, false).unwrap();

        assert_eq!(plan.new_installed, vec!["pkg-a".to_owned()]);
        assert_eq!(plan.removed, vec!["pkg-b".to_owned()]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn simulate_install_does_not_mutate_backend_state() {
        let service = PackageService::new(FakeBackend, Box::new(NullPublisher));
        let plan = service.simulate_install(&["pkg".to_owned()]).unwrap();
        assert_eq!(plan.new_installed, vec!["pkg".to_owned()]);
    }
}
