//! Command line: one document in, one convergence run out.

use crate::cloud::credentials::Credentials;
use crate::cloud::snapshot;
use crate::core::context::CancelToken;
use crate::core::error::{CastError, Result};
use crate::core::types::{RunReport, TopologyDoc};
use crate::core::{executor, parser};
use crate::tripwire::hasher;
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "cloudcast",
    version,
    about = "Converge a declared cloud topology against its control plane"
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Simulated account state file
    #[arg(long, default_value = "cloud-state.json")]
    pub cloud_state: PathBuf,

    /// Append provenance events (JSONL) to this file
    #[arg(long)]
    pub event_log: Option<PathBuf>,

    /// Topology document (JSON, or YAML by extension)
    pub file: PathBuf,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Parse and validate, reporting every problem at once.
pub fn parse_and_validate(file: &Path) -> Result<(TopologyDoc, String)> {
    let (doc, text) = parser::parse_document_file(file)?;
    let errors = parser::validate_document(&doc);
    if !errors.is_empty() {
        for e in &errors {
            log::error!("{}: {}", file.display(), e);
        }
        return Err(CastError::Invalid(errors));
    }
    Ok((doc, text))
}

/// Run one convergence and persist the resulting account.
pub fn run(cli: &Cli) -> Result<RunReport> {
    let creds = Credentials::resolve();
    log::info!("Using {} credentials", creds.source());

    let (doc, text) = parse_and_validate(&cli.file)?;
    let digest = hasher::hash_string(&text);
    let document = cli.file.display().to_string();

    let mut cloud = snapshot::open(&cli.cloud_state, &doc.aws.zone)?;
    let cfg = executor::ConvergeConfig {
        doc: &doc,
        document: &document,
        digest: &digest,
        credentials: creds.source(),
        event_log: cli.event_log.as_deref(),
        cancel: CancelToken::new(),
    };
    let outcome = executor::converge(&mut cloud, &cfg);

    // Partial progress is real progress; keep it for the next run.
    snapshot::save(&cli.cloud_state, &mut cloud)?;
    let report = outcome?;
    println!("Converged: {}.", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ControlPlane;
    use crate::core::types::fixtures;

    fn cli_for(dir: &Path, file: &str) -> Cli {
        Cli {
            verbose: 0,
            cloud_state: dir.join("state").join("cloud.json"),
            event_log: Some(dir.join("events.jsonl")),
            file: dir.join(file),
        }
    }

    #[test]
    fn test_args_parse() {
        let cli = Cli::try_parse_from(["cloudcast", "-vv", "--cloud-state", "s.json", "prod.json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_level(), log::LevelFilter::Trace);
        assert_eq!(cli.cloud_state, PathBuf::from("s.json"));
        assert!(cli.event_log.is_none());

        let cli = Cli::try_parse_from(["cloudcast", "prod.yaml"]).unwrap();
        assert_eq!(cli.cloud_state, PathBuf::from("cloud-state.json"));
        assert_eq!(cli.log_level(), log::LevelFilter::Info);

        assert!(Cli::try_parse_from(["cloudcast"]).is_err());
    }

    #[test]
    fn test_run_persists_and_reruns_quiet() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prod.json"), fixtures::SCENARIO_JSON).unwrap();
        let cli = cli_for(dir.path(), "prod.json");

        let first = run(&cli).unwrap();
        assert!(first.created > 0);
        assert!(cli.cloud_state.exists());

        let second = run(&cli).unwrap();
        assert!(second.is_quiescent(), "{}", second);

        let cloud = snapshot::load(&cli.cloud_state).unwrap().unwrap();
        assert_eq!(cloud.list_vpcs().unwrap().len(), 1);
        let log = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(log.lines().filter(|l| l.contains("\"run_completed\"")).count(), 2);
        let source = format!("\"credentials\":\"{}\"", Credentials::resolve().source());
        assert_eq!(log.lines().filter(|l| l.contains(&source)).count(), 2);
    }

    #[test]
    fn test_invalid_document_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let broken = fixtures::SCENARIO_JSON.replace("\"count\": 1", "\"count\": 1, \"elb\": \"ghost\"");
        std::fs::write(dir.path().join("prod.json"), broken).unwrap();
        let cli = cli_for(dir.path(), "prod.json");
        let err = run(&cli).unwrap_err();
        assert!(matches!(err, CastError::Invalid(ref e) if e.len() == 1));
        assert!(!cli.cloud_state.exists());
    }

    #[test]
    fn test_failed_run_still_saves_progress() {
        let dir = tempfile::tempdir().unwrap();
        // no certificate named "missing" exists in a fresh account
        let doc = fixtures::SCENARIO_JSON.replace(
            "\"to_prot\": \"HTTP\"}",
            "\"to_prot\": \"HTTP\", \"cert\": \"missing\"}",
        );
        std::fs::write(dir.path().join("prod.json"), doc).unwrap();
        let cli = cli_for(dir.path(), "prod.json");
        let err = run(&cli).unwrap_err();
        assert!(matches!(err, CastError::Missing { kind: "certificate", .. }));
        let cloud = snapshot::load(&cli.cloud_state).unwrap().unwrap();
        assert_eq!(cloud.list_vpcs().unwrap().len(), 1);
    }

    #[test]
    fn test_yaml_document() {
        let dir = tempfile::tempdir().unwrap();
        let doc = fixtures::scenario();
        std::fs::write(
            dir.path().join("prod.yaml"),
            serde_yaml_ng::to_string(&doc).unwrap(),
        )
        .unwrap();
        let cli = cli_for(dir.path(), "prod.yaml");
        let report = run(&cli).unwrap();
        assert!(report.warnings.is_empty());
    }
}
