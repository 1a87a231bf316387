pub mod backend;
pub mod cli;
pub mod columns;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod preferences;
pub mod remote;
pub mod render;
pub mod session;
pub mod storage;
pub mod store;
pub mod task;
pub mod toast;

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<bool> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting momentum CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let storage =
    storage::FileStorage::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open local storage \
         at {}",
        data_dir.display()
      )
    })?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_time()
      .enable_io()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  let command = cli
    .command
    .unwrap_or(cli::Command::List {
      filter: None,
      sort:   None
    });

  let ok = runtime.block_on(async {
    let mut app = commands::App::open(
      &cfg,
      Arc::new(storage),
      cfg
        .get_bool("offline")
        .unwrap_or(false)
    )?;

    let mut out = io::stdout().lock();
    let ok = commands::dispatch(
      &mut app, command, &mut out
    )
    .await;
    commands::flush_toasts(
      &app,
      &mut io::stderr().lock()
    )?;
    ok
  })?;

  info!(ok, "done");
  Ok(ok)
}
