use super::{HostPaths, open_store};
use anyhow::{Context, Result};
use serde_json::Value;
use service_host::{DesiredState, PreferenceStore, keys};

/// Preference values given on the command line
#[derive(Debug, Default)]
pub struct Changes {
    pub auto_start: Option<bool>,
    pub running: Option<bool>,
    pub cmd: Option<String>,
    pub log: Option<bool>,
}

impl Changes {
    fn entries(self) -> Vec<(&'static str, Value)> {
        let mut entries = Vec::new();
        if let Some(auto_start) = self.auto_start {
            entries.push((keys::AUTO_START, Value::Bool(auto_start)));
        }
        if let Some(running) = self.running {
            entries.push((keys::RUNNING, Value::Bool(running)));
        }
        if let Some(cmd) = self.cmd {
            entries.push((keys::CMD_STR, Value::String(cmd)));
        }
        if let Some(log) = self.log {
            entries.push((keys::LOG_OUTPUT_ENABLED, Value::Bool(log)));
        }
        entries
    }
}

/// Write the given preferences; a running host picks them up on its next start
pub async fn run(paths: &HostPaths, changes: Changes) -> Result<()> {
    let entries = changes.entries();
    if entries.is_empty() {
        println!("Nothing to change");
        return Ok(());
    }

    let store = open_store(paths)
        .await
        .context("Is another npc-host using the same data directory?")?;
    apply(&store, entries).await?;

    let state = DesiredState::load(&store).await;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn apply(store: &dyn PreferenceStore, entries: Vec<(&'static str, Value)>) -> Result<()> {
    for (key, value) in entries {
        store
            .put(key, value)
            .await
            .with_context(|| format!("Failed to write preference {key}"))?;
    }
    Ok(())
}
