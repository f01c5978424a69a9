//! Operator requests: a one-line command grammar, the permitted-directory
//! policy every path goes through, and dispatch onto the corruptor and the
//! recovery engine.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::{
    config::ForensicsConfig,
    corruptor::{CorruptionInfo, CorruptionReport, Corruptor},
    recovery::{RecoveryEngine, RecoveryReport, scan::RegionFinding},
    types::{
        DEFAULT_PAGE_SIZE,
        error::{DatabaseError, Result},
        is_legal_page_size,
        scenario::Scenario,
    },
    utils::{
        mock::{FixtureSpec, write_fixture},
        paths::normalize_path,
    },
};

pub const USAGE: &str = "\
  corrupt <source> <output> <scenario|all>...
  recover <corrupt> <output> <scenario> [reference]
  recover_all <corrupt> <output> [reference]
  scan <corrupt> [reference]
  fixture <output> [page_size]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Corrupt {
        source: PathBuf,
        output: PathBuf,
        scenarios: Vec<Scenario>,
    },
    Recover {
        corrupt: PathBuf,
        output: PathBuf,
        scenario: Scenario,
        reference: Option<PathBuf>,
    },
    RecoverAll {
        corrupt: PathBuf,
        output: PathBuf,
        reference: Option<PathBuf>,
    },
    Scan {
        corrupt: PathBuf,
        reference: Option<PathBuf>,
    },
    Fixture {
        output: PathBuf,
        page_size: usize,
    },
}

fn invalid(details: impl Into<String>) -> DatabaseError {
    DatabaseError::InvalidRequest {
        details: details.into(),
    }
}

fn arity(name: &str, args: &[&str], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(invalid(format!(
            "{} takes {} argument(s), got {}\nusage:\n{}",
            name,
            if min == max {
                min.to_string()
            } else if max == usize::MAX {
                format!("at least {}", min)
            } else {
                format!("{} to {}", min, max)
            },
            args.len(),
            USAGE
        )));
    }
    Ok(())
}

fn parse_scenarios(words: &[&str]) -> Result<Vec<Scenario>> {
    let mut scenarios = Vec::new();
    for word in words {
        if word.eq_ignore_ascii_case("all") {
            scenarios.extend(Scenario::ALL);
        } else {
            scenarios.push(word.parse::<Scenario>()?);
        }
    }
    Ok(scenarios)
}

impl Request {
    /// Parse one command line. Paths are whitespace separated and cannot
    /// contain spaces.
    pub fn parse(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((command, args)) = words.split_first() else {
            return Err(invalid(format!("empty request\nusage:\n{}", USAGE)));
        };

        match command.to_lowercase().as_str() {
            "corrupt" => {
                arity("corrupt", args, 3, usize::MAX)?;
                Ok(Request::Corrupt {
                    source: PathBuf::from(args[0]),
                    output: PathBuf::from(args[1]),
                    scenarios: parse_scenarios(&args[2..])?,
                })
            }
            "recover" => {
                arity("recover", args, 3, 4)?;
                Ok(Request::Recover {
                    corrupt: PathBuf::from(args[0]),
                    output: PathBuf::from(args[1]),
                    scenario: args[2].parse()?,
                    reference: args.get(3).map(PathBuf::from),
                })
            }
            "recover_all" | "recover-all" => {
                arity("recover_all", args, 2, 3)?;
                Ok(Request::RecoverAll {
                    corrupt: PathBuf::from(args[0]),
                    output: PathBuf::from(args[1]),
                    reference: args.get(2).map(PathBuf::from),
                })
            }
            "scan" => {
                arity("scan", args, 1, 2)?;
                Ok(Request::Scan {
                    corrupt: PathBuf::from(args[0]),
                    reference: args.get(1).map(PathBuf::from),
                })
            }
            "fixture" => {
                arity("fixture", args, 1, 2)?;
                let page_size = match args.get(1) {
                    Some(raw) => raw
                        .parse::<usize>()
                        .ok()
                        .filter(|size| is_legal_page_size(*size))
                        .ok_or_else(|| invalid(format!("{} is not a legal page size", raw)))?,
                    None => DEFAULT_PAGE_SIZE,
                };
                Ok(Request::Fixture {
                    output: PathBuf::from(args[0]),
                    page_size,
                })
            }
            other => Err(invalid(format!("unknown command {:?}\nusage:\n{}", other, USAGE))),
        }
    }
}

/// Restricts every path a request touches to a set of directories.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    allowed: Vec<PathBuf>,
}

impl PathPolicy {
    pub fn new<P: AsRef<Path>>(dirs: &[P]) -> Self {
        Self {
            allowed: dirs.iter().map(|dir| normalize_path(dir.as_ref())).collect(),
        }
    }

    /// Canonical form of `path` if it lies inside a permitted directory.
    pub fn check(&self, path: &Path) -> Result<PathBuf> {
        let normalized = normalize_path(path);
        if self.allowed.iter().any(|dir| normalized.starts_with(dir)) {
            Ok(normalized)
        } else {
            Err(DatabaseError::PathNotPermitted {
                path: path.to_path_buf(),
            })
        }
    }

    fn check_optional(&self, path: Option<&PathBuf>) -> Result<Option<PathBuf>> {
        path.map(|path| self.check(path)).transpose()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Corrupted {
        reports: Vec<CorruptionReport>,
        info: CorruptionInfo,
    },
    Recovered {
        success: bool,
        report: RecoveryReport,
    },
    Scanned {
        findings: Vec<RegionFinding>,
    },
    FixtureWritten {
        path: PathBuf,
        page_size: usize,
    },
}

impl Response {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Check every path against the configured directories, then run the request.
pub fn execute(request: &Request, config: &ForensicsConfig) -> Result<Response> {
    let policy = PathPolicy::new(&config.allowed_dirs);
    match request {
        Request::Corrupt {
            source,
            output,
            scenarios,
        } => {
            let source = policy.check(source)?;
            let output = policy.check(output)?;
            let mut corruptor = Corruptor::new(&source, &output)?;
            if let Some(seed) = config.seed {
                corruptor = corruptor.with_seed(seed);
            }
            let reports = corruptor.apply(scenarios)?;
            let info = corruptor.info()?;
            info!(output = %output.display(), scenarios = reports.len(), "corrupt request done");
            Ok(Response::Corrupted { reports, info })
        }
        Request::Recover {
            corrupt,
            output,
            scenario,
            reference,
        } => {
            let corrupt = policy.check(corrupt)?;
            let output = policy.check(output)?;
            let reference = policy.check_optional(reference.as_ref())?;
            let mut engine = RecoveryEngine::open(&corrupt, &output, reference.as_deref())?;
            engine.scan_database();
            let success = engine.recover(*scenario)?;
            Ok(Response::Recovered {
                success,
                report: engine.report(),
            })
        }
        Request::RecoverAll {
            corrupt,
            output,
            reference,
        } => {
            let corrupt = policy.check(corrupt)?;
            let output = policy.check(output)?;
            let reference = policy.check_optional(reference.as_ref())?;
            let mut engine = RecoveryEngine::open(&corrupt, &output, reference.as_deref())?;
            engine.scan_database();
            let success = engine.recover_all()?;
            info!(output = %output.display(), success, "recover_all request done");
            Ok(Response::Recovered {
                success,
                report: engine.report(),
            })
        }
        Request::Scan { corrupt, reference } => {
            let corrupt = policy.check(corrupt)?;
            let reference = policy.check_optional(reference.as_ref())?;
            let mut engine = RecoveryEngine::inspect(&corrupt, reference.as_deref())?;
            Ok(Response::Scanned {
                findings: engine.scan_database(),
            })
        }
        Request::Fixture { output, page_size } => {
            let output = policy.check(output)?;
            write_fixture(&output, &FixtureSpec::with_page_size(*page_size))?;
            Ok(Response::FixtureWritten {
                path: output,
                page_size: *page_size,
            })
        }
    }
}
