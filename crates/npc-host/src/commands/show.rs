use super::{HostPaths, load_config, open_store, shell_words};
use anyhow::Result;
use serde::Serialize;
use service_host::{DesiredState, HostConfig, LaunchResolver};
use std::path::PathBuf;

#[derive(Serialize)]
struct Overview {
    data_dir: PathBuf,
    config_file: Option<PathBuf>,
    preferences: DesiredState,
    /// Empty when no command is set
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
}

fn overview(paths: &HostPaths, config: &HostConfig, state: DesiredState) -> Overview {
    let spec = config.resolver().resolve(&state.cmd_str);
    let argv = if state.cmd_str.is_empty() {
        Vec::new()
    } else {
        spec.argv()
    };
    Overview {
        data_dir: paths.data_dir.clone(),
        config_file: paths.config.clone(),
        preferences: state,
        argv,
        working_dir: spec.working_dir,
    }
}

pub async fn run(paths: &HostPaths, json: bool) -> Result<()> {
    let config = load_config(paths)?;
    let store = open_store(paths).await?;
    let state = DesiredState::load(&store).await;
    let overview = overview(paths, &config, state);

    if json {
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(());
    }

    let prefs = &overview.preferences;
    println!("Data directory: {}", overview.data_dir.display());
    match &overview.config_file {
        Some(path) => println!("Config file:    {}", path.display()),
        None => println!("Config file:    (defaults)"),
    }
    println!("Auto start:     {}", prefs.auto_start);
    println!("Running:        {}", prefs.running);
    println!("Log output:     {}", prefs.log_output_enabled);
    println!("Command:        {}", prefs.cmd_str);
    if overview.argv.is_empty() {
        println!("Invocation:     (no command set)");
    } else {
        println!("Invocation:     {}", shell_words(&overview.argv));
    }
    if let Some(dir) = &overview.working_dir {
        println!("Working dir:    {}", dir.display());
    }
    Ok(())
}
