//! Chat-command surface for the plugin market.
//!
//! Parses `market`/`search`/`install`/`update` commands, gates install and
//! update behind the invoker's admin flag, and drives the catalog and the
//! install pipeline to produce reply text. Presentation beyond plain reply
//! text is the host bot's concern.

use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;

use plugmart_catalog::{
    fetch_catalog_snapshot, render_market_page, render_search_results, CatalogSnapshot,
    CATALOG_USER_AGENT,
};
use plugmart_installer::{InstallOutcome, Installer, InstallerConfig, RepoRef};
use plugmart_runtime::HostRuntime;

pub mod config;

pub use config::{default_market_config_path, load_market_config, MarketConfig};

pub const PLUGIN_MARKET_USAGE: &str =
    "usage: /plugin <market [page]|search <term> [page]|install <key|index|url>|update <key|index|url>>";

/// Who issued the command. Install and update are admin-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoker {
    pub display_name: String,
    pub is_admin: bool,
}

/// Where an install request points: a catalog key/index resolved against a
/// fresh snapshot, or a raw repository URL bypassing the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    CatalogRef(String),
    DirectRepositoryUrl(String),
}

impl InstallSource {
    fn parse(argument: &str) -> Self {
        if argument.starts_with("http://") || argument.starts_with("https://") {
            InstallSource::DirectRepositoryUrl(argument.to_string())
        } else {
            InstallSource::CatalogRef(argument.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketCommand {
    Market { page: usize },
    Search { term: String, page: usize },
    Install { source: InstallSource },
    Update { source: InstallSource },
}

/// Parses the argument text of a `/plugin` command. A leading `plugin`
/// token (with or without the slash) is tolerated so callers may pass the
/// full message text.
pub fn parse_market_command(input: &str) -> Result<MarketCommand> {
    let mut tokens: Vec<&str> = input.split_whitespace().collect();
    if matches!(tokens.first(), Some(&"plugin") | Some(&"/plugin")) {
        tokens.remove(0);
    }
    let Some((&subcommand, arguments)) = tokens.split_first() else {
        bail!("{PLUGIN_MARKET_USAGE}");
    };

    match subcommand {
        "market" => {
            let page = match arguments {
                [] => 1,
                [page] => page
                    .parse::<usize>()
                    .map_err(|_| anyhow!("invalid page '{page}'; {PLUGIN_MARKET_USAGE}"))?,
                _ => bail!("{PLUGIN_MARKET_USAGE}"),
            };
            Ok(MarketCommand::Market { page: page.max(1) })
        }
        "search" => {
            let mut terms = arguments.to_vec();
            if terms.is_empty() {
                bail!("search needs a keyword; {PLUGIN_MARKET_USAGE}");
            }
            let mut page = 1;
            if terms.len() > 1 {
                if let Ok(parsed) = terms[terms.len() - 1].parse::<usize>() {
                    page = parsed.max(1);
                    terms.pop();
                }
            }
            Ok(MarketCommand::Search {
                term: terms.join(" "),
                page,
            })
        }
        "install" | "update" => {
            let [argument] = arguments else {
                bail!(
                    "{subcommand} needs exactly one plugin key, index, or repository URL; {PLUGIN_MARKET_USAGE}"
                );
            };
            let source = InstallSource::parse(argument);
            if subcommand == "install" {
                Ok(MarketCommand::Install { source })
            } else {
                Ok(MarketCommand::Update { source })
            }
        }
        other => bail!("unknown subcommand '{other}'; {PLUGIN_MARKET_USAGE}"),
    }
}

/// One market instance per hosting bot: shares the catalog client and the
/// install pipeline (with its per-target locks) across commands.
pub struct MarketService {
    config: MarketConfig,
    catalog_http: reqwest::Client,
    installer: Installer,
}

impl MarketService {
    pub fn new(config: MarketConfig) -> Result<Self> {
        let catalog_http = reqwest::Client::builder()
            .user_agent(CATALOG_USER_AGENT)
            .build()
            .context("failed to construct catalog HTTP client")?;
        let installer = Installer::new(installer_config(&config))?;
        Ok(Self {
            config,
            catalog_http,
            installer,
        })
    }

    /// Handles one command and always produces reply text; failures are
    /// rendered, never propagated, so the hosting bot stays up.
    pub async fn handle(
        &self,
        runtime: &dyn HostRuntime,
        invoker: &Invoker,
        input: &str,
    ) -> String {
        let command = match parse_market_command(input) {
            Ok(command) => command,
            Err(error) => return format!("{error:#}"),
        };
        tracing::debug!(
            invoker = invoker.display_name.as_str(),
            command = ?command,
            "handling plugin market command"
        );

        match command {
            MarketCommand::Market { page } => match self.snapshot().await {
                Ok(snapshot) => render_market_page(&snapshot, page),
                Err(error) => format!("failed to refresh plugin catalog: {error:#}"),
            },
            MarketCommand::Search { term, page } => match self.snapshot().await {
                Ok(snapshot) => render_search_results(&snapshot, &term, page),
                Err(error) => format!("failed to refresh plugin catalog: {error:#}"),
            },
            MarketCommand::Install { source } => {
                self.run_install(runtime, invoker, &source, false).await
            }
            MarketCommand::Update { source } => {
                self.run_install(runtime, invoker, &source, true).await
            }
        }
    }

    async fn snapshot(&self) -> Result<CatalogSnapshot> {
        fetch_catalog_snapshot(
            &self.catalog_http,
            &self.config.api_endpoints,
            Duration::from_millis(self.config.catalog_timeout_ms),
        )
        .await
    }

    async fn run_install(
        &self,
        runtime: &dyn HostRuntime,
        invoker: &Invoker,
        source: &InstallSource,
        is_update: bool,
    ) -> String {
        let verb = if is_update { "update" } else { "install" };
        if !invoker.is_admin {
            return format!("permission denied: plugin {verb} requires an administrator");
        }
        let (name, repo_url) = match self.resolve_install_source(source).await {
            Ok(resolved) => resolved,
            Err(error) => return format!("cannot {verb}: {error:#}"),
        };
        let outcome = self
            .installer
            .install(runtime, &name, &repo_url, is_update)
            .await;
        render_outcome_reply(&name, is_update, &outcome)
    }

    async fn resolve_install_source(&self, source: &InstallSource) -> Result<(String, String)> {
        match source {
            InstallSource::CatalogRef(reference) => {
                let snapshot = self.snapshot().await?;
                let entry = snapshot.resolve(reference)?;
                Ok((entry.key.clone(), entry.repo.clone()))
            }
            InstallSource::DirectRepositoryUrl(url) => {
                let repo = RepoRef::parse(url).map_err(|error| anyhow!("{error}"))?;
                Ok((repo.name, url.clone()))
            }
        }
    }
}

fn installer_config(config: &MarketConfig) -> InstallerConfig {
    let mut installer = InstallerConfig::new(config.plugins_dir.clone());
    installer.mirror_prefixes = config.mirror_prefixes.clone();
    installer.probe_timeout = Duration::from_millis(config.probe_timeout_ms);
    installer.download_timeout = Duration::from_millis(config.download_timeout_ms);
    installer.release_timeout = Duration::from_millis(config.release_timeout_ms);
    installer
}

/// Builds the user-facing reply for one finished install/update request.
pub fn render_outcome_reply(name: &str, is_update: bool, outcome: &InstallOutcome) -> String {
    match outcome {
        InstallOutcome::Success { activated_name } => {
            if is_update {
                format!("plugin '{activated_name}' updated and reloaded")
            } else {
                format!("plugin '{activated_name}' installed and activated")
            }
        }
        InstallOutcome::Failed { stage, error } => {
            let verb = if is_update { "update" } else { "install" };
            let mut reply = format!("plugin '{name}' {verb} failed at {stage}: {error}");
            if error.rollback().is_some_and(|status| status.is_urgent()) {
                reply.push_str(
                    "\nwarning: rollback also failed; the plugin directory may need manual repair",
                );
            }
            reply
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;

    use plugmart_installer::{InstallError, RollbackStatus};

    use super::*;

    struct NoopRuntime;

    #[async_trait]
    impl HostRuntime for NoopRuntime {
        async fn load(&self, _directory_name: &str) -> Result<()> {
            Ok(())
        }

        async fn reload(&self, _registered_name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn admin() -> Invoker {
        Invoker {
            display_name: "ops".to_string(),
            is_admin: true,
        }
    }

    fn member() -> Invoker {
        Invoker {
            display_name: "guest".to_string(),
            is_admin: false,
        }
    }

    #[test]
    fn unit_parse_market_with_and_without_page() {
        assert_eq!(
            parse_market_command("market").expect("parse"),
            MarketCommand::Market { page: 1 }
        );
        assert_eq!(
            parse_market_command("/plugin market 3").expect("parse"),
            MarketCommand::Market { page: 3 }
        );
        assert!(parse_market_command("market abc").is_err());
    }

    #[test]
    fn unit_parse_search_splits_trailing_page_number() {
        assert_eq!(
            parse_market_command("search weather alerts 2").expect("parse"),
            MarketCommand::Search {
                term: "weather alerts".to_string(),
                page: 2
            }
        );
        assert_eq!(
            parse_market_command("search 42").expect("parse"),
            MarketCommand::Search {
                term: "42".to_string(),
                page: 1
            }
        );
        let error = parse_market_command("search").expect_err("keyword required");
        assert!(error.to_string().contains("keyword"));
    }

    #[test]
    fn unit_parse_install_distinguishes_catalog_and_direct_url() {
        assert_eq!(
            parse_market_command("install 7").expect("parse"),
            MarketCommand::Install {
                source: InstallSource::CatalogRef("7".to_string())
            }
        );
        assert_eq!(
            parse_market_command("update https://github.com/zgojin/weather").expect("parse"),
            MarketCommand::Update {
                source: InstallSource::DirectRepositoryUrl(
                    "https://github.com/zgojin/weather".to_string()
                )
            }
        );
        assert!(parse_market_command("install one two").is_err());
        assert!(parse_market_command("frobnicate").is_err());
    }

    #[test]
    fn unit_outcome_replies_cover_success_failure_and_urgent_rollback() {
        let success = InstallOutcome::Success {
            activated_name: "weather".to_string(),
        };
        assert_eq!(
            render_outcome_reply("weather", false, &success),
            "plugin 'weather' installed and activated"
        );
        assert_eq!(
            render_outcome_reply("weather", true, &success),
            "plugin 'weather' updated and reloaded"
        );

        let failed = InstallOutcome::from(InstallError::Download {
            attempts: 3,
            last_error: "status 502".to_string(),
        });
        let reply = render_outcome_reply("weather", false, &failed);
        assert!(reply.contains("failed at download"));
        assert!(!reply.contains("manual repair"));

        let urgent = InstallOutcome::from(InstallError::Swap {
            cause: "rename failed".to_string(),
            rollback: RollbackStatus::Failed("disk full".to_string()),
        });
        let reply = render_outcome_reply("weather", true, &urgent);
        assert!(reply.contains("failed at swap"));
        assert!(reply.contains("manual repair"));
    }

    #[tokio::test]
    async fn functional_install_is_refused_for_non_admin_before_any_work() {
        let service = MarketService::new(MarketConfig::default()).expect("service");
        let reply = service.handle(&NoopRuntime, &member(), "install 1").await;
        assert!(reply.contains("permission denied"));
    }

    #[tokio::test]
    async fn unit_unparseable_input_replies_with_usage() {
        let service = MarketService::new(MarketConfig::default()).expect("service");
        let reply = service.handle(&NoopRuntime, &admin(), "").await;
        assert!(reply.contains("usage:"));
    }

    #[tokio::test]
    async fn regression_catalog_outage_renders_error_reply() {
        let mut config = MarketConfig::default();
        // unroutable endpoint: the reply must surface the failure, not panic
        config.api_endpoints = vec!["http://127.0.0.1:1/plugins".to_string()];
        config.catalog_timeout_ms = 1_000;
        let service = MarketService::new(config).expect("service");

        let reply = service.handle(&NoopRuntime, &admin(), "market").await;
        assert!(reply.contains("failed to refresh plugin catalog"));
    }
}
