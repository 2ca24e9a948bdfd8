// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod logging;
mod runtime;

use anyhow::{Context, Result};
use config::Config;
use runtime::ApiRuntime;
use sklad_api::Client;
use sklad_app::AppState;
use sklad_local::Preferences;
use sklad_testkit::FakeApi;
use sklad_tui::ViewOptions;
use std::env;
use std::path::PathBuf;

const DEMO_SEED: u64 = 42;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `sklad --print-example-config` to generate a v1 template",
            options.config_path.display()
        )
    })?;

    let state_path = if options.demo {
        PathBuf::from(":memory:")
    } else {
        config.state_path()?
    };
    if options.print_state_path {
        println!("{}", state_path.display());
        return Ok(());
    }

    logging::init(config.log_level(), &config.log_file()?)?;

    // Kept alive for the whole session; dropping it stops the server.
    let demo_api = if options.demo {
        Some(FakeApi::with_demo_data(DEMO_SEED).context("start demo inventory API")?)
    } else {
        None
    };
    let base_url = match &demo_api {
        Some(api) => api.base_url().to_owned(),
        None => config.api_base_url().to_owned(),
    };

    let client = Client::new(&base_url, config.api_timeout()?).with_context(|| {
        format!(
            "invalid [api] config in {}; fix base_url/timeout values",
            options.config_path.display()
        )
    })?;
    let preferences = Preferences::open(&state_path).with_context(|| {
        format!(
            "open state {} -- if this path is wrong, set [storage].state_path or SKLAD_STATE_PATH",
            state_path.display()
        )
    })?;
    tracing::info!(base_url = %base_url, state = %state_path.display(), demo = options.demo, "starting");

    if options.check_only {
        client.ping()?;
        println!("ok: {base_url}");
        return Ok(());
    }

    let mut state = AppState::with_tab(preferences.restore_tab());
    let mut runtime = ApiRuntime::new(client, preferences);
    let view = ViewOptions {
        page_size: config.page_size(),
        compensation: config.compensation(),
    };
    let outcome = sklad_tui::run_app(&mut state, &mut runtime, view);
    drop(demo_api);
    outcome
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    print_config_path: bool,
    print_state_path: bool,
    demo: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        print_config_path: false,
        print_state_path: false,
        demo: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-state-path" => {
                options.print_state_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--demo" => {
                options.demo = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow::anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("sklad: warehouse inventory client");
    println!("  --config <path>          Use a specific config path");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-state-path       Print resolved local state path");
    println!("  --print-example-config   Print a v1 config template");
    println!("  --demo                   Launch against a seeded in-process API");
    println!("  --check                  Validate config and ping the API");
    println!("  --help                   Show this help");
}
