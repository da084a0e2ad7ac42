// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Drives a flattened manifest through its modules in order, per spec.md
//! §4.6: per-module state machine (condition → env scope → body resolution
//! → dispatch → output capture → env restore), halting the chain on the
//! first error, annotated with the failing module's label.

use std::collections::HashMap;

use apm_expr::{Lookup, Value};
use apm_flatten::{FlatModule, Flattened};
use apm_manifest::Module;
use apm_modules::{HandlerCtx, RepoService};
use apm_package::{AptBackend, PackageService};
use thiserror::Error;

/// Per-module record the executor keeps, addressable from later modules'
/// placeholders as `Modules.<id>.Output.<key>` and, in principle, whether it
/// ran at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapModule {
    pub ran: bool,
    pub output: HashMap<String, String>,
}

#[derive(Debug, Error)]
#[error("module `{label}`: {source}")]
pub struct Error {
    label: String,
    #[source]
    source: StepError,
}

#[derive(Debug, Error)]
enum StepError {
    #[error("evaluate `if` condition")]
    Condition(#[source] apm_expr::Error),
    #[error("resolve body placeholders")]
    Resolve(#[source] apm_expr::Error),
    #[error("serialize module body for resolution")]
    Serialize(#[source] serde_json::Error),
    #[error("decode resolved module body")]
    Deserialize(#[source] serde_json::Error),
    #[error("execute module body")]
    Handler(#[source] apm_modules::Error),
    #[error("evaluate output expression `{expr}`")]
    Output {
        expr: String,
        #[source]
        source: apm_expr::Error,
    },
}

fn fail(module: &Module, source: StepError) -> Error {
    Error {
        label: module.label(),
        source,
    }
}

/// The placeholder-evaluation environment for one module: the process/flat/
/// module env union, outputs accumulated from earlier modules, and the
/// running binary's own version.
struct ExecContext<'a> {
    env: &'a HashMap<String, String>,
    modules: &'a HashMap<String, HashMap<String, String>>,
    version: apm_buildinfo::Version,
}

impl Lookup for ExecContext<'_> {
    fn lookup(&self, path: &[&str]) -> Option<Value> {
        match path {
            ["Env", name] => self.env.get(*name).cloned().map(Value::Str),
            ["Modules", id, "Output", key] => self.modules.get(*id)?.get(*key).cloned().map(Value::Str),
            ["Version", "Major"] => Some(Value::Int(self.version.major as i64)),
            ["Version", "Minor"] => Some(Value::Int(self.version.minor as i64)),
            ["Version", "Patch"] => Some(Value::Int(self.version.patch as i64)),
            ["Version", "Commits"] => Some(Value::Int(self.version.commits as i64)),
            _ => None,
        }
    }
}

/// Layers the handler's raw JSON return value over an [`ExecContext`] under
/// `Result.<key>`, so a module's own `output` expressions can reference the
/// value its handler just produced. Not named in spec.md's field-path list,
/// which only documents cross-module `Modules.*` access; this is the
/// natural same-module counterpart and is recorded as an open-question
/// decision.
struct ResultContext<'a> {
    base: &'a ExecContext<'a>,
    result: &'a serde_json::Value,
}

impl Lookup for ResultContext<'_> {
    fn lookup(&self, path: &[&str]) -> Option<Value> {
        if let ["Result", key] = path {
            return json_to_value(self.result.as_object()?.get(*key)?);
        }
        self.base.lookup(path)
    }
}

fn json_to_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::String(s) => Some(Value::Str(s.clone())),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Int).or_else(|| n.as_f64().map(Value::Float)),
        serde_json::Value::Array(items) => {
            let strings = items.iter().map(|v| v.as_str().map(str::to_owned)).collect::<Option<Vec<_>>>()?;
            Some(Value::List(strings))
        }
        _ => None,
    }
}

/// Scoped environment-variable mutation: applies `overrides` and returns a
/// guard that restores the prior values (or unsets keys that did not exist)
/// when dropped, guaranteeing `EnvRestored` on every exit path.
struct EnvScope {
    saved: Vec<(String, Option<String>)>,
}

impl EnvScope {
    fn apply(overrides: &HashMap<String, String>) -> Self {
        let saved = overrides
            .iter()
            .map(|(k, v)| {
                let prior = std::env::var(k).ok();
                std::env::set_var(k, v);
                (k.clone(), prior)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        for (key, prior) in self.saved.drain(..).rev() {
            match prior {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Runs every module of a [`Flattened`] manifest in order against a live
/// filesystem (the "host apply" mode of spec.md §4.8; the "image build"
/// mode re-enters this same executor once per module inside a container, a
/// level up the call stack that this crate has no knowledge of).
pub struct Executor<B> {
    packages: PackageService<B>,
    repos: Box<dyn RepoService>,
    version: apm_buildinfo::Version,
}

impl<B: AptBackend> Executor<B> {
    pub fn new(packages: PackageService<B>, repos: Box<dyn RepoService>) -> Self {
        Self {
            packages,
            repos,
            version: apm_buildinfo::version(),
        }
    }

    /// Runs the full module chain, returning every named module's record.
    /// Halts and returns the first error, labeled by the failing module.
    pub fn run(&self, flattened: &Flattened, process_env: &HashMap<String, String>) -> Result<HashMap<String, MapModule>, Error> {
        let mut results = HashMap::new();
        let mut outputs: HashMap<String, HashMap<String, String>> = HashMap::new();

        for flat in &flattened.modules {
            let record = self.run_one(flat, process_env, &outputs)?;

            if let Some(id) = &flat.module.id {
                outputs.insert(id.clone(), record.output.clone());
                results.insert(id.clone(), record);
            }
        }

        Ok(results)
    }

    /// Runs exactly one already-flattened module, with no prior modules'
    /// outputs available. Used by the containerized re-entry invocation
    /// (`apm system image build --flat-index <i>`), where each module
    /// executes in its own process inside the working container: a module
    /// whose body references `Modules.*` is never cacheable and therefore
    /// never dispatched this way in practice, but is not rejected here —
    /// its placeholder simply resolves to an unknown-field error, same as
    /// any other unset lookup.
    pub fn run_single(&self, flat: &FlatModule, process_env: &HashMap<String, String>) -> Result<MapModule, Error> {
        self.run_one(flat, process_env, &HashMap::new())
    }

    fn run_one(
        &self,
        flat: &FlatModule,
        process_env: &HashMap<String, String>,
        outputs: &HashMap<String, HashMap<String, String>>,
    ) -> Result<MapModule, Error> {
        let module = &flat.module;

        let mut env = process_env.clone();
        env.extend(flat.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let ctx = ExecContext {
            env: &env,
            modules: outputs,
            version: self.version,
        };

        if let Some(expr) = &module.if_ {
            let runs = apm_expr::eval_bool(expr, &ctx).map_err(|e| fail(module, StepError::Condition(e)))?;
            if !runs {
                return Ok(MapModule::default());
            }
        }

        let raw_body = serde_json::to_value(&module.body).map_err(|e| fail(module, StepError::Serialize(e)))?;
        let resolved_value = apm_expr::resolve_json(raw_body, &ctx).map_err(|e| fail(module, StepError::Resolve(e)))?;
        let resolved_body: apm_manifest::body::ModuleBody =
            serde_json::from_value(resolved_value).map_err(|e| fail(module, StepError::Deserialize(e)))?;

        let _scope = EnvScope::apply(&module.env);

        let handler_ctx = HandlerCtx {
            base_dir: &flat.base_dir,
            resources_dir: &flat.base_dir,
        };
        let output_value = apm_modules::dispatch(&resolved_body, &handler_ctx, &self.packages, self.repos.as_ref())
            .map_err(|e| fail(module, StepError::Handler(e)))?;

        drop(_scope);

        let mut output = HashMap::new();
        if !module.output.is_empty() {
            let result_ctx = ResultContext {
                base: &ctx,
                result: &output_value,
            };
            for (key, expr) in &module.output {
                let value = apm_expr::eval(expr, &result_ctx).map_err(|e| {
                    fail(
                        module,
                        StepError::Output {
                            expr: expr.clone(),
                            source: e,
                        },
                    )
                })?;
                output.insert(key.clone(), value);
            }
        }

        Ok(MapModule { ran: true, output })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use apm_manifest::body::{CopyBody, ModuleBody, ShellBody};
    use apm_modules::FsRepoService;
    use apm_package::{ChangePlan, Error as PackageError, NullPublisher, PackageInfo};
    use std::path::PathBuf;

    struct NoopBackend;

    impl AptBackend for NoopBackend {
        fn simulate_install(&self, _pkgs: &[String]) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn simulate_remove(&self, _pkgs: &[String], _purge: bool, _depends: bool) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn simulate_autoremove(&self) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn simulate_reinstall(&self, _pkgs: &[String]) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn simulate_change(&self, _install: &[String], _remove: &[String], _purge: bool, _depends: bool) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn simulate_dist_upgrade(&self) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn install_packages(&self, _pkgs: &[String], _progress: &apm_package::ProgressFn<'_>) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn remove_packages(
            &self,
            _pkgs: &[String],
            _purge: bool,
            _depends: bool,
            _progress: &apm_package::ProgressFn<'_>,
        ) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn reinstall_packages(&self, _pkgs: &[String], _progress: &apm_package::ProgressFn<'_>) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn combine_install_remove_packages(
            &self,
            _ops: &[String],
            _purge: bool,
            _depends: bool,
            _progress: &apm_package::ProgressFn<'_>,
        ) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn dist_upgrade(&self, _progress: &apm_package::ProgressFn<'_>) -> Result<ChangePlan, PackageError> {
            Ok(ChangePlan::default())
        }
        fn update(&self, _progress: &apm_package::ProgressFn<'_>) -> Result<(), PackageError> {
            Ok(())
        }
        fn get_info(&self, _name: &str) -> Result<Option<PackageInfo>, PackageError> {
            Ok(None)
        }
        fn search(&self, _substr: &str) -> Result<Vec<PackageInfo>, PackageError> {
            Ok(vec![])
        }
    }

    fn executor() -> Executor<NoopBackend> {
        Executor::new(
            PackageService::new(NoopBackend, Box::new(NullPublisher)),
            Box::new(FsRepoService {
                sources_dir: PathBuf::from("/tmp/apm-test-repos"),
            }),
        )
    }

    fn flat_module(body: ModuleBody, id: Option<&str>, if_: Option<&str>) -> FlatModule {
        FlatModule {
            module: Module {
                name: None,
                id: id.map(str::to_owned),
                if_: if_.map(str::to_owned),
                env: HashMap::new(),
                body,
                output: HashMap::new(),
            },
            source_file: "manifest.yml".to_owned(),
            base_dir: PathBuf::from("/tmp"),
            env: HashMap::new(),
        }
    }

    #[test]
    fn skips_module_with_false_condition() {
        let exec = executor();
        let flattened = Flattened {
            image: "unused".to_owned(),
            root_env: HashMap::new(),
            modules: vec![flat_module(
                ModuleBody::Shell(ShellBody {
                    command: "true".to_owned(),
                    quiet: true,
                }),
                Some("skip_me"),
                Some("false"),
            )],
        };

        let results = exec.run(&flattened, &HashMap::new()).unwrap();
        assert!(!results["skip_me"].ran);
    }

    #[test]
    fn runs_shell_module_and_records_output() {
        let exec = executor();
        let mut module = flat_module(
            ModuleBody::Shell(ShellBody {
                command: "true".to_owned(),
                quiet: true,
            }),
            Some("step"),
            None,
        );
        module.module.output.insert("code".to_owned(), "Result.exit_code".to_owned());

        let flattened = Flattened {
            image: "unused".to_owned(),
            root_env: HashMap::new(),
            modules: vec![module],
        };

        let results = exec.run(&flattened, &HashMap::new()).unwrap();
        assert!(results["step"].ran);
        assert_eq!(results["step"].output.get("code"), Some(&"0".to_owned()));
    }

    #[test]
    fn error_is_annotated_with_module_label() {
        let exec = executor();
        let flattened = Flattened {
            image: "unused".to_owned(),
            root_env: HashMap::new(),
            modules: vec![flat_module(
                ModuleBody::Copy(CopyBody {
                    source: "/does/not/exist".to_owned(),
                    destination: "/tmp/apm-exec-test-dst".to_owned(),
                    replace: true,
                }),
                Some("bad_copy"),
                None,
            )],
        };

        let err = exec.run(&flattened, &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("id=bad_copy"));
    }
}
