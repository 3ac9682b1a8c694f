use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::{OutputMatcher, clean};

pub const MANIFEST_FILE: &str = "problem.json";
pub const ANSWER_FILE: &str = "answer";

static TEST_CASE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test-([0-9]+)\.(in|out)$").expect("test case pattern is valid"));

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("problem {0} has no problem.json")]
    MissingManifest(String),
    #[error("problem {id} has a malformed problem.json: {source}")]
    Manifest {
        id: String,
        source: serde_json::Error,
    },
    #[error("problem {0} has no test cases")]
    NoTestCases(String),
    #[error("word problem {0} has no answer file")]
    MissingAnswer(String),
    #[error("word problem {0} has an empty answer file")]
    EmptyAnswer(String),
    #[error("problem {id} has an invalid pattern in {file}: {source}")]
    Pattern {
        id: String,
        file: String,
        source: regex::Error,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    Program,
    Word,
    Golf,
}

/// Contents of `problem.json`
#[derive(Deserialize, Debug)]
pub struct Manifest {
    pub name: String,
    pub time_limit: TimeLimit,
    pub kind: ProblemKind,
    pub letter: Option<String>,
}

/// Milliseconds, written either as a number or as a numeric string
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "RawTimeLimit")]
pub struct TimeLimit(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimeLimit {
    Number(u64),
    Text(String),
}

impl TryFrom<RawTimeLimit> for TimeLimit {
    type Error = String;

    fn try_from(raw: RawTimeLimit) -> Result<Self, Self::Error> {
        match raw {
            RawTimeLimit::Number(ms) => Ok(Self(ms)),
            RawTimeLimit::Text(text) => text
                .trim()
                .parse()
                .map(Self)
                .map_err(|_| format!("time_limit {text:?} is not a number of milliseconds")),
        }
    }
}

#[derive(Debug)]
pub struct TestCase {
    pub index: u32,
    pub input: PathBuf,
    /// One matcher per non-blank line of the `.out` file
    pub expected: Vec<OutputMatcher>,
}

/// How a submission to a problem gets judged
#[derive(Debug)]
pub enum Judging {
    TestCases(Vec<TestCase>),
    Answer(OutputMatcher),
}

#[derive(Debug)]
pub struct Problem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub time_limit: Duration,
    pub kind: ProblemKind,
    pub letter: Option<String>,
    pub judging: Judging,
}

impl Problem {
    /// Loads one problem from its directory; the directory name is the id
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let id = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut file_names = read_file_names(dir)?;
        file_names.sort();

        if !file_names.iter().any(|f| f == MANIFEST_FILE) {
            return Err(CatalogError::MissingManifest(id));
        }
        let manifest_contents = read_text(&dir.join(MANIFEST_FILE))?;
        let manifest: Manifest = serde_json::from_str(&manifest_contents).map_err(|source| {
            CatalogError::Manifest {
                id: id.clone(),
                source,
            }
        })?;

        let description = match file_names.iter().find(|f| f.ends_with(".md")) {
            Some(file) => read_text(&dir.join(file))?,
            None => {
                log::warn!("Problem {id} has no description file");
                String::new()
            }
        };

        let judging = match manifest.kind {
            ProblemKind::Word => Judging::Answer(load_answer(&id, dir)?),
            ProblemKind::Program | ProblemKind::Golf => {
                Judging::TestCases(load_test_cases(&id, dir, &file_names)?)
            }
        };

        Ok(Self {
            id,
            name: manifest.name,
            description,
            time_limit: Duration::from_millis(manifest.time_limit.0),
            kind: manifest.kind,
            letter: manifest.letter,
            judging,
        })
    }

    pub fn test_cases(&self) -> &[TestCase] {
        match &self.judging {
            Judging::TestCases(cases) => cases,
            Judging::Answer(_) => &[],
        }
    }
}

/// Every problem under a root directory, keyed by directory name
#[derive(Debug, Default)]
pub struct Catalog {
    problems: BTreeMap<String, Problem>,
}

impl Catalog {
    /// Loads every sub-directory of `root` as a problem.
    ///
    /// Any malformed problem fails the whole load; this runs once at startup.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let root = root.as_ref();
        let entries = fs::read_dir(root).map_err(|source| CatalogError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let mut problems = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|source| CatalogError::Io {
                path: root.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let problem = Problem::load(&path)?;
            log::debug!(
                "Loaded problem {} ({:?}, {} test cases)",
                problem.id,
                problem.kind,
                problem.test_cases().len()
            );
            problems.insert(problem.id.clone(), problem);
        }

        log::info!("Loaded {} problems from {}", problems.len(), root.display());
        Ok(Self { problems })
    }

    pub fn get(&self, id: &str) -> Option<&Problem> {
        self.problems.get(id)
    }

    pub fn insert(&mut self, problem: Problem) {
        self.problems.insert(problem.id.clone(), problem);
    }

    /// Problems in id order
    pub fn problems(&self) -> impl Iterator<Item = &Problem> {
        self.problems.values()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

fn load_test_cases(id: &str, dir: &Path, file_names: &[String]) -> Result<Vec<TestCase>, CatalogError> {
    let mut inputs = BTreeMap::new();
    let mut outputs = BTreeMap::new();

    for file in file_names {
        let Some(caps) = TEST_CASE_FILE.captures(file) else {
            continue;
        };
        let Ok(index) = caps[1].parse::<u32>() else {
            continue;
        };
        match &caps[2] {
            "in" => inputs.insert(index, file.as_str()),
            _ => outputs.insert(index, file.as_str()),
        };
    }

    let mut cases = Vec::with_capacity(inputs.len());
    for (index, input) in inputs {
        let Some(output) = outputs.get(&index) else {
            log::warn!("Problem {id}: {input} has no matching output file, skipped");
            continue;
        };

        let contents = read_text(&dir.join(output))?;
        let expected = clean(&contents)
            .into_iter()
            .map(OutputMatcher::from_line)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| CatalogError::Pattern {
                id: id.to_string(),
                file: output.to_string(),
                source,
            })?;

        cases.push(TestCase {
            index,
            input: dir.join(input),
            expected,
        });
    }

    if cases.is_empty() {
        return Err(CatalogError::NoTestCases(id.to_string()));
    }

    Ok(cases)
}

fn load_answer(id: &str, dir: &Path) -> Result<OutputMatcher, CatalogError> {
    let path = dir.join(ANSWER_FILE);
    if !path.is_file() {
        return Err(CatalogError::MissingAnswer(id.to_string()));
    }

    let contents = read_text(&path)?;
    let line = clean(&contents)
        .into_iter()
        .next()
        .ok_or_else(|| CatalogError::EmptyAnswer(id.to_string()))?;

    OutputMatcher::from_line(line).map_err(|source| CatalogError::Pattern {
        id: id.to_string(),
        file: ANSWER_FILE.to_string(),
        source,
    })
}

fn read_file_names(dir: &Path) -> Result<Vec<String>, CatalogError> {
    let entries = fs::read_dir(dir).map_err(|source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

fn read_text(path: &Path) -> Result<String, CatalogError> {
    fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}
