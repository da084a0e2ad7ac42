// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `apm system image build`: walks a flattened manifest's cacheable prefix
//! against the layer cache (spec.md §4.8), then drives `buildah` one module
//! at a time, re-entering this same binary inside each working container
//! via `--flat-index`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use apm_cache::LayerCache;
use apm_container::{BindMode, Container, Driver};
use apm_executor::Executor;
use apm_expr::{Lookup, Value};
use apm_flatten::Flattened;
use apm_modules::FsRepoService;
use apm_package::PackageService;
use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::apt::ShellAptBackend;
use crate::config;
use crate::env::Env;
use crate::publisher::ConsolePublisher;

/// Directory of bundled module resources and helpers shipped alongside the
/// `apm` binary, bind-mounted read-only into every working container
/// (spec.md §6: "config file, resources dir, apm binary, `/usr/share/apm`").
const SHARE_DIR: &str = "/usr/share/apm";

#[derive(Debug, Parser)]
pub struct Command {
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Build a container image from a manifest
    Build(BuildCommand),
}

#[derive(Debug, Parser)]
pub struct BuildCommand {
    /// Path to the manifest to build
    #[arg(long)]
    config: PathBuf,
    /// Directory of bundled module resources, bind-mounted read-only into
    /// every working container
    #[arg(long)]
    resources: Option<PathBuf>,
    /// Tag to apply to the finished image. Required unless `--flat-index`
    /// is given.
    #[arg(long)]
    tag: Option<String>,
    /// Runs exactly one already-flattened module by its index, inside the
    /// working container `buildah run` invoked us in. Not meant to be
    /// passed by hand.
    #[arg(long = "flat-index", hide = true)]
    flat_index: Option<usize>,
    /// Path to the `buildah` binary
    #[arg(long, default_value = "buildah")]
    buildah: PathBuf,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("load manifest")]
    Config(#[from] config::Error),
    #[error("container")]
    Container(#[from] apm_container::Error),
    #[error("layer cache")]
    Cache(#[from] apm_cache::Error),
    #[error("hash module")]
    Hash(#[from] apm_hash::Error),
    #[error("run module")]
    Executor(#[from] apm_executor::Error),
    #[error("--tag is required unless --flat-index is given")]
    MissingTag,
    #[error("flat index {index} is out of range ({count} modules)")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("locate current executable")]
    CurrentExe(#[source] std::io::Error),
}

pub async fn handle(command: Command, env: Env) -> Result<(), Error> {
    match command.action {
        Action::Build(build) => handle_build(build, env).await,
    }
}

async fn handle_build(command: BuildCommand, env: Env) -> Result<(), Error> {
    let BuildCommand {
        config: config_path,
        resources,
        tag,
        flat_index,
        buildah,
    } = command;

    let resources_dir = resources.unwrap_or_else(|| env.resources_dir.clone());
    let (_, flattened) = config::load(&config_path).await?;

    if let Some(index) = flat_index {
        return run_single(&flattened, index, &env);
    }

    let Some(tag) = tag else { return Err(Error::MissingTag) };
    build_image(&config_path, &resources_dir, &flattened, &tag, &buildah, &env)
}

fn build_executor(env: &Env) -> Executor<ShellAptBackend> {
    let publisher: Box<dyn apm_package::Publisher> = Box::new(ConsolePublisher::default());
    Executor::new(
        PackageService::new(ShellAptBackend::default(), publisher),
        Box::new(FsRepoService {
            sources_dir: env.repos_dir.clone(),
        }),
    )
}

fn run_single(flattened: &Flattened, index: usize, env: &Env) -> Result<(), Error> {
    let flat = flattened
        .modules
        .get(index)
        .ok_or(Error::IndexOutOfRange { index, count: flattened.modules.len() })?;

    let executor = build_executor(env);
    let process_env: HashMap<String, String> = std::env::vars().collect();
    executor.run_single(flat, &process_env)?;
    Ok(())
}

struct HashLookup<'a> {
    env: &'a HashMap<String, String>,
    version: apm_buildinfo::Version,
}

impl Lookup for HashLookup<'_> {
    fn lookup(&self, path: &[&str]) -> Option<Value> {
        match path {
            ["Env", name] => self.env.get(*name).cloned().map(Value::Str),
            ["Version", "Major"] => Some(Value::Int(self.version.major as i64)),
            ["Version", "Minor"] => Some(Value::Int(self.version.minor as i64)),
            ["Version", "Patch"] => Some(Value::Int(self.version.patch as i64)),
            ["Version", "Commits"] => Some(Value::Int(self.version.commits as i64)),
            _ => None,
        }
    }
}

fn module_hash(flat: &apm_flatten::FlatModule, prior: &str) -> Result<String, Error> {
    let ctx = HashLookup {
        env: &flat.env,
        version: apm_buildinfo::version(),
    };
    let env: BTreeMap<String, String> = flat.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(apm_hash::compute(&flat.module, &ctx, &env, prior, Path::new(&flat.source_file), &flat.base_dir)?)
}

/// Walks the manifest's leading cacheable run against the layer cache,
/// then drives the remainder one module at a time via `buildah run` of
/// this same binary, committing a new layer after every module.
fn build_image(
    config_path: &Path,
    resources_dir: &Path,
    flattened: &Flattened,
    tag: &str,
    buildah: &Path,
    env: &Env,
) -> Result<(), Error> {
    let mut cache = LayerCache::load(&env.cache_dir)?;
    let driver = Driver::with_binary(buildah.to_path_buf());

    let mut prior_hash = flattened.image.clone();
    let mut current_image = flattened.image.clone();
    let mut resume_at = flattened.modules.len();

    for (index, flat) in flattened.modules.iter().enumerate() {
        if !apm_hash::is_cacheable(&flat.module) {
            resume_at = index;
            break;
        }

        let hash = module_hash(flat, &prior_hash)?;
        match cache.get(&hash) {
            Some(entry) => {
                current_image = entry.layer_id.clone();
                prior_hash = hash;
            }
            None => {
                resume_at = index;
                break;
            }
        }
    }

    if resume_at >= flattened.modules.len() {
        log::info!("all {} modules are cached, tagging {tag}", flattened.modules.len());
        driver.tag(&current_image, tag)?;
        return Ok(());
    }

    let apm_binary = std::env::current_exe().map_err(Error::CurrentExe)?;
    let mut working = driver.from_image(&current_image)?;

    for index in resume_at..flattened.modules.len() {
        let flat = &flattened.modules[index];
        log::info!("building module {index} ({})", flat.module.label());

        let container = Container::new()
            .bind(config_path.to_path_buf(), config_path.to_path_buf(), BindMode::ReadOnly)
            .bind(resources_dir.to_path_buf(), resources_dir.to_path_buf(), BindMode::ReadOnly)
            .bind(apm_binary.clone(), apm_binary.clone(), BindMode::ReadOnly)
            .bind(SHARE_DIR, SHARE_DIR, BindMode::ReadOnly)
            .work_dir(flat.base_dir.clone());

        let command = vec![
            apm_binary.display().to_string(),
            "system".to_owned(),
            "image".to_owned(),
            "build".to_owned(),
            "--config".to_owned(),
            config_path.display().to_string(),
            "--resources".to_owned(),
            resources_dir.display().to_string(),
            "--flat-index".to_owned(),
            index.to_string(),
        ];

        working.run(&container, &command)?;
        let layer_id = working.commit(None)?;

        if apm_hash::is_cacheable(&flat.module) {
            let hash = module_hash(flat, &prior_hash)?;
            cache.set(hash.clone(), layer_id, flattened.image.clone())?;
            prior_hash = hash;
        }
    }

    working.commit(Some(tag))?;
    log::info!("image build complete: {tag}");
    Ok(())
}
