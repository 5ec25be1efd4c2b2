//! Operator console.
//!
//! Reads one command per line from stdin and turns it into engine calls.
//! Players are addressed by name; the [`PlayerDirectory`] hands out a fresh
//! [`PlayerId`] per join, the same way a proxy would per connection.

use crate::config::AppConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tablist_engine::{PlayerId, TabListEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const HELP: &str = "commands: join <name> <server> | leave <name> | switch <name> <server> | \
ping <name> <ms> | attr <name> <key> [value] | reload | status | templates | help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Join { name: String, server: String },
    Leave { name: String },
    Switch { name: String, server: String },
    Ping { name: String, ping: u32 },
    /// A missing value clears the attribute
    Attr { name: String, key: String, value: Option<String> },
    Reload,
    Status,
    Templates,
    Help,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or_else(|| "empty command".to_string())?;
        let mut arg = |what: &str| {
            words
                .next()
                .map(str::to_string)
                .ok_or_else(|| format!("{command}: missing <{what}>"))
        };

        let parsed = match command {
            "join" => ConsoleCommand::Join { name: arg("name")?, server: arg("server")? },
            "leave" => ConsoleCommand::Leave { name: arg("name")? },
            "switch" => ConsoleCommand::Switch { name: arg("name")?, server: arg("server")? },
            "ping" => {
                let name = arg("name")?;
                let ping = arg("ms")?
                    .parse()
                    .map_err(|_| "ping: <ms> must be a non-negative integer".to_string())?;
                ConsoleCommand::Ping { name, ping }
            }
            "attr" => {
                let name = arg("name")?;
                let key = arg("key")?;
                let rest: Vec<&str> = words.collect();
                let value = (!rest.is_empty()).then(|| rest.join(" "));
                ConsoleCommand::Attr { name, key, value }
            }
            "reload" => ConsoleCommand::Reload,
            "status" => ConsoleCommand::Status,
            "templates" => ConsoleCommand::Templates,
            "help" | "?" => ConsoleCommand::Help,
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(parsed)
    }
}

#[derive(Default)]
struct DirectoryInner {
    by_name: HashMap<String, PlayerId>,
    by_id: HashMap<PlayerId, String>,
}

/// Name to id mapping for players joined through the console.
#[derive(Default)]
pub struct PlayerDirectory {
    inner: RwLock<DirectoryInner>,
}

impl PlayerDirectory {
    /// Returns the id for `name`, allocating one if the name is new.
    pub fn register(&self, name: &str) -> PlayerId {
        let mut inner = self.inner.write();
        if let Some(id) = inner.by_name.get(name) {
            return *id;
        }
        let id = PlayerId::new();
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(id, name.to_string());
        id
    }

    pub fn lookup(&self, name: &str) -> Option<PlayerId> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn name_of(&self, id: PlayerId) -> Option<String> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<PlayerId> {
        let mut inner = self.inner.write();
        let id = inner.by_name.remove(name)?;
        inner.by_id.remove(&id);
        Some(id)
    }
}

/// Replaces the engine's templates with the ones currently on disk.
pub async fn reload_templates(engine: &TabListEngine, config_path: &Path) -> anyhow::Result<()> {
    let templates = AppConfig::load_templates(config_path).await?;
    engine.reload(&templates)?;
    info!("🔄 Templates reloaded from {}", config_path.display());
    Ok(())
}

pub struct Console {
    engine: Arc<TabListEngine>,
    directory: Arc<PlayerDirectory>,
    config_path: PathBuf,
}

impl Console {
    pub fn new(engine: Arc<TabListEngine>, directory: Arc<PlayerDirectory>, config_path: PathBuf) -> Self {
        Self {
            engine,
            directory,
            config_path,
        }
    }

    /// Reads commands until stdin closes.
    pub async fn run(self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("⌨️ Console ready ({})", HELP);

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("❌ Failed to read console input: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match line.parse::<ConsoleCommand>() {
                Ok(command) => {
                    if let Err(e) = self.execute(command).await {
                        warn!("⚠️ {}", e);
                    }
                }
                Err(e) => warn!("⚠️ {} ({})", e, HELP),
            }
        }
        info!("Console input closed");
    }

    fn require(&self, name: &str) -> anyhow::Result<PlayerId> {
        self.directory
            .lookup(name)
            .ok_or_else(|| anyhow::anyhow!("no player named '{name}' is online"))
    }

    pub async fn execute(&self, command: ConsoleCommand) -> anyhow::Result<()> {
        match command {
            ConsoleCommand::Join { name, server } => {
                let id = self.directory.register(&name);
                info!("👋 {} ({}) joined {}", name, id.short(), server);
                self.engine.join(id, name, server);
            }
            ConsoleCommand::Leave { name } => {
                let id = self.require(&name)?;
                self.directory.remove(&name);
                info!("👋 {} left", name);
                self.engine.disconnect(id);
            }
            ConsoleCommand::Switch { name, server } => {
                let id = self.require(&name)?;
                info!("🔀 {} switched to {}", name, server);
                self.engine.server_switch(id, server);
            }
            ConsoleCommand::Ping { name, ping } => {
                let id = self.require(&name)?;
                self.engine.ping_sample(id, ping);
            }
            ConsoleCommand::Attr { name, key, value } => {
                let id = self.require(&name)?;
                self.engine.set_attribute(id, key, value);
            }
            ConsoleCommand::Reload => reload_templates(&self.engine, &self.config_path).await?,
            ConsoleCommand::Status => {
                info!("📊 {}", serde_json::to_string_pretty(&self.engine.status())?);
            }
            ConsoleCommand::Templates => {
                let templates = self.engine.templates();
                info!("📝 Active templates:\n{}", toml::to_string_pretty(templates.raw())?);
            }
            ConsoleCommand::Help => info!("{}", HELP),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ConsoleTransport;
    use std::time::Duration;
    use tablist_engine::{EngineConfig, RawTemplateSet};
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "join Alice lobby".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Join { name: "Alice".to_string(), server: "lobby".to_string() })
        );
        assert_eq!(
            "ping Alice 42".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Ping { name: "Alice".to_string(), ping: 42 })
        );
        assert_eq!(
            "attr Alice prefix [VIP] gold".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Attr {
                name: "Alice".to_string(),
                key: "prefix".to_string(),
                value: Some("[VIP] gold".to_string()),
            })
        );
        assert_eq!(
            "attr Alice prefix".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Attr { name: "Alice".to_string(), key: "prefix".to_string(), value: None })
        );
        assert_eq!("  status ".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Status));
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<ConsoleCommand>().is_err());
        assert!("dance".parse::<ConsoleCommand>().is_err());
        assert_eq!(
            "switch Alice".parse::<ConsoleCommand>(),
            Err("switch: missing <server>".to_string())
        );
        assert!("ping Alice -3".parse::<ConsoleCommand>().is_err());
    }

    #[test]
    fn test_directory_reuses_and_forgets_ids() {
        let directory = PlayerDirectory::default();
        let alice = directory.register("Alice");
        assert_eq!(directory.register("Alice"), alice);
        assert_eq!(directory.name_of(alice).as_deref(), Some("Alice"));
        assert_eq!(directory.lookup("Alice"), Some(alice));

        assert_eq!(directory.remove("Alice"), Some(alice));
        assert_eq!(directory.lookup("Alice"), None);
        assert_eq!(directory.name_of(alice), None);
        assert_ne!(directory.register("Alice"), alice);
    }

    fn console(config_path: PathBuf) -> (Console, Arc<TabListEngine>) {
        let directory = Arc::new(PlayerDirectory::default());
        let transport = Arc::new(ConsoleTransport::new(directory.clone()));
        let config = EngineConfig {
            tick_interval_ms: 5,
            ..EngineConfig::default()
        };
        let engine = Arc::new(TabListEngine::new(config, &RawTemplateSet::default(), transport).unwrap());
        (Console::new(engine.clone(), directory, config_path), engine)
    }

    #[tokio::test]
    async fn test_join_and_leave_reach_the_roster() {
        let (console, engine) = console(PathBuf::from("unused.toml"));
        engine.start().unwrap();

        console.execute("join Alice lobby".parse().unwrap()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while engine.roster().len() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        console.execute("leave Alice".parse().unwrap()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !engine.roster().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(console.execute("leave Alice".parse().unwrap()).await.is_err());
        engine.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_reload_reads_templates_from_disk() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "[templates]\nheader = \"Fresh %viewer%\"\n")
            .await
            .unwrap();
        let (console, engine) = console(file.path().to_path_buf());

        console.execute(ConsoleCommand::Reload).await.unwrap();
        assert_eq!(engine.templates().raw().header, "Fresh %viewer%");

        tokio::fs::write(file.path(), "[templates]\nheader = \"%broken\"\n")
            .await
            .unwrap();
        assert!(console.execute(ConsoleCommand::Reload).await.is_err());
        assert_eq!(engine.templates().raw().header, "Fresh %viewer%");
    }
}
