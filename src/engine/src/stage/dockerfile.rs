//! Dockerfile parser.
//!
//! Parses a Dockerfile into global (meta) ARGs and an ordered list of
//! stages. Supports line continuations (`\`), comments, both shell and JSON
//! (exec) forms, and multi-pair `ARG`/`ENV`/`LABEL` instructions. Every step
//! keeps its raw text, which is what the digest engine folds into cache keys.

use std::collections::HashMap;

use stagekey_core::error::{DigestError, Result};

use super::backend::InstructionParser;

/// A single Dockerfile instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `FROM [--platform=<p>] <image> [AS <alias>]`
    From {
        image: String,
        alias: Option<String>,
    },
    /// `ARG <name>[=<default>] ...`
    Arg { args: Vec<ArgDecl> },
    /// `ENV <key>=<value> ...` or `ENV <key> <value>`
    Env { vars: Vec<(String, String)> },
    /// `ADD [--flags] <src>... <dst>`
    Add { src: Vec<String>, dst: String },
    /// `COPY [--from=<stage>] [--flags] <src>... <dst>`
    Copy {
        src: Vec<String>,
        dst: String,
        from: Option<String>,
    },
    /// `ONBUILD <instruction>`
    Onbuild { trigger: String },
    /// `RUN <command>`
    Run { command: String },
    /// `WORKDIR <path>`
    Workdir { path: String },
    /// `ENTRYPOINT ["exec", "form"]` or `ENTRYPOINT command`
    Entrypoint { exec: Vec<String> },
    /// `CMD ["exec", "form"]` or `CMD command`
    Cmd { exec: Vec<String> },
    /// `EXPOSE <port>[/<proto>] ...`
    Expose { ports: Vec<String> },
    /// `LABEL <key>=<value> ...`
    Label { labels: Vec<(String, String)> },
    /// `USER <user>[:<group>]`
    User { user: String },
    /// `VOLUME ["/path"]` or `VOLUME /path ...`
    Volume { paths: Vec<String> },
    /// `SHELL ["executable", "params"]`
    Shell { exec: Vec<String> },
    /// `STOPSIGNAL <signal>`
    StopSignal { signal: String },
    /// `HEALTHCHECK [options] CMD command` or `HEALTHCHECK NONE`
    Healthcheck { spec: String },
    /// `MAINTAINER <name>`
    Maintainer { name: String },
}

/// One `ARG` declaration; `default` keeps its raw (unresolved) text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDecl {
    pub name: String,
    pub default: Option<String>,
}

/// A parsed instruction together with its source location and raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// 1-based line where the instruction starts
    pub line: usize,
    /// Logical line as written (continuations joined)
    pub text: String,
    pub instruction: Instruction,
}

/// One `FROM`-delimited build stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Position in the file
    pub index: usize,
    /// Lowercased `AS` name
    pub name: Option<String>,
    /// Base image reference, possibly containing unresolved variables
    pub base_name: String,
    /// Raw `FROM` line
    pub text: String,
    pub steps: Vec<Step>,
}

/// Parsed Dockerfile: meta ARGs followed by stages.
#[derive(Debug, Clone)]
pub struct Dockerfile {
    /// `ARG` instructions that appear before the first `FROM`
    pub meta_args: Vec<Step>,
    pub stages: Vec<Stage>,
}

impl Dockerfile {
    /// Parse a Dockerfile from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for (line_num, line) in join_continuation_lines(content) {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            steps.push(parse_step(trimmed, line_num)?);
        }

        if steps.is_empty() {
            return Err(DigestError::ParseError {
                line: 0,
                message: "Dockerfile is empty or contains no instructions".to_string(),
            });
        }

        let mut meta_args = Vec::new();
        let mut stages: Vec<Stage> = Vec::new();
        let mut name_to_index: HashMap<String, usize> = HashMap::new();

        for mut step in steps {
            if let Instruction::From { image, alias } = &step.instruction {
                let index = stages.len();
                if let Some(name) = alias {
                    name_to_index.insert(name.clone(), index);
                }
                stages.push(Stage {
                    index,
                    name: alias.clone(),
                    base_name: image.clone(),
                    text: step.text,
                    steps: Vec::new(),
                });
                continue;
            }

            match stages.last_mut() {
                Some(stage) => {
                    // `COPY --from=<name>` points at the stage index once known
                    if let Instruction::Copy {
                        from: Some(from), ..
                    } = &mut step.instruction
                    {
                        if let Some(index) = name_to_index.get(&from.to_lowercase()) {
                            *from = index.to_string();
                        }
                    }
                    stage.steps.push(step);
                }
                None if matches!(step.instruction, Instruction::Arg { .. }) => {
                    meta_args.push(step);
                }
                None => {
                    return Err(DigestError::ParseError {
                        line: step.line,
                        message: "First instruction must be FROM (or ARG before FROM)"
                            .to_string(),
                    });
                }
            }
        }

        if stages.is_empty() {
            return Err(DigestError::ParseError {
                line: 0,
                message: "Dockerfile declares no FROM stage".to_string(),
            });
        }

        Ok(Dockerfile { meta_args, stages })
    }

    /// Parse a Dockerfile from a file path.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DigestError::ConfigError(format!(
                "Failed to read Dockerfile at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Index of the stage named `target`, or of the last stage.
    pub fn target_index(&self, target: Option<&str>) -> Result<usize> {
        match target {
            None => Ok(self.stages.len() - 1),
            Some(name) => self
                .stages
                .iter()
                .position(|s| {
                    s.name
                        .as_deref()
                        .map_or(false, |n| n.eq_ignore_ascii_case(name))
                })
                .ok_or_else(|| DigestError::StageNotFound(name.to_string())),
        }
    }
}

/// Default parser used for `ONBUILD` triggers and base image metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerfileParser;

impl InstructionParser for DockerfileParser {
    fn parse_instruction(&self, text: &str) -> Result<Step> {
        let logical: Vec<(usize, String)> = join_continuation_lines(text)
            .into_iter()
            .filter(|(_, l)| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            })
            .collect();

        match logical.as_slice() {
            [(line, single)] => parse_step(single.trim(), *line),
            [] => Err(DigestError::ParseError {
                line: 0,
                message: "Empty instruction".to_string(),
            }),
            _ => Err(DigestError::ParseError {
                line: 0,
                message: format!("Expected a single instruction, got {:?}", text),
            }),
        }
    }

    fn parse_trigger(&self, text: &str) -> Result<Step> {
        let step = self.parse_instruction(text)?;
        validate_trigger(&step)?;
        Ok(step)
    }
}

/// Reject instructions that may not appear as `ONBUILD` triggers.
fn validate_trigger(step: &Step) -> Result<()> {
    let keyword = match step.instruction {
        Instruction::Onbuild { .. } => "ONBUILD",
        Instruction::From { .. } => "FROM",
        Instruction::Maintainer { .. } => "MAINTAINER",
        _ => return Ok(()),
    };
    Err(DigestError::ParseError {
        line: step.line,
        message: format!("{} isn't allowed as an ONBUILD trigger", keyword),
    })
}

/// Join lines ending with `\` into single logical lines.
///
/// Returns each logical line with the 1-based number of its first line.
/// Comment lines inside a continuation are dropped.
fn join_continuation_lines(content: &str) -> Vec<(usize, String)> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (idx, line) in content.lines().enumerate() {
        if !current.is_empty() && line.trim_start().starts_with('#') {
            continue;
        }
        if current.is_empty() {
            start = idx + 1;
        }

        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            logical_lines.push((start, std::mem::take(&mut current)));
        }
    }

    // Handle trailing continuation without final line
    if !current.is_empty() {
        logical_lines.push((start, current));
    }

    logical_lines
}

/// Parse a single logical line into a step.
fn parse_step(line: &str, line_num: usize) -> Result<Step> {
    Ok(Step {
        line: line_num,
        text: line.to_string(),
        instruction: parse_instruction(line, line_num)?,
    })
}

fn parse_instruction(line: &str, line_num: usize) -> Result<Instruction> {
    // Split into keyword and rest
    let (keyword, rest) = split_first_word(line);
    let keyword_upper = keyword.to_uppercase();

    if rest.is_empty() {
        return Err(syntax(
            line_num,
            format!("{} requires at least one argument", keyword_upper),
        ));
    }

    match keyword_upper.as_str() {
        "FROM" => parse_from(rest, line_num),
        "ARG" => parse_arg(rest, line_num),
        "ENV" => parse_env(rest, line_num),
        "ADD" => parse_add(rest, line_num),
        "COPY" => parse_copy(rest, line_num),
        "ONBUILD" => parse_onbuild(rest, line_num),
        "RUN" => parse_run(rest, line_num),
        "WORKDIR" => Ok(Instruction::Workdir {
            path: rest.to_string(),
        }),
        "ENTRYPOINT" => Ok(Instruction::Entrypoint {
            exec: parse_exec(rest, line_num)?,
        }),
        "CMD" => Ok(Instruction::Cmd {
            exec: parse_exec(rest, line_num)?,
        }),
        "EXPOSE" => Ok(Instruction::Expose {
            ports: rest.split_whitespace().map(str::to_string).collect(),
        }),
        "LABEL" => Ok(Instruction::Label {
            labels: parse_key_values(rest, "LABEL", line_num)?,
        }),
        "USER" => Ok(Instruction::User {
            user: rest.split_whitespace().next().unwrap_or(rest).to_string(),
        }),
        "VOLUME" => {
            let paths = if rest.starts_with('[') {
                parse_json_array(rest, line_num)?
            } else {
                split_words(rest)
            };
            Ok(Instruction::Volume { paths })
        }
        "SHELL" => {
            if !rest.starts_with('[') {
                return Err(syntax(line_num, "SHELL requires the JSON form".to_string()));
            }
            Ok(Instruction::Shell {
                exec: parse_json_array(rest, line_num)?,
            })
        }
        "STOPSIGNAL" => Ok(Instruction::StopSignal {
            signal: rest.to_string(),
        }),
        "HEALTHCHECK" => Ok(Instruction::Healthcheck {
            spec: rest.to_string(),
        }),
        "MAINTAINER" => Ok(Instruction::Maintainer {
            name: rest.to_string(),
        }),
        _ => Err(syntax(
            line_num,
            format!("Unknown instruction '{}'", keyword),
        )),
    }
}

fn syntax(line: usize, message: String) -> DigestError {
    DigestError::ParseError { line, message }
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

// --- Individual instruction parsers ---

fn parse_from(rest: &str, line_num: usize) -> Result<Instruction> {
    let words: Vec<String> = split_words(rest)
        .into_iter()
        .skip_while(|w| w.starts_with("--"))
        .collect();

    match words.as_slice() {
        [image] => Ok(Instruction::From {
            image: image.clone(),
            alias: None,
        }),
        [image, kw, alias] if kw.eq_ignore_ascii_case("AS") => Ok(Instruction::From {
            image: image.clone(),
            alias: Some(alias.to_lowercase()),
        }),
        [] => Err(syntax(
            line_num,
            "FROM requires an image argument".to_string(),
        )),
        _ => Err(syntax(
            line_num,
            "FROM requires either one or three arguments".to_string(),
        )),
    }
}

fn parse_arg(rest: &str, line_num: usize) -> Result<Instruction> {
    let mut args = Vec::new();
    for word in split_words(rest) {
        let decl = match word.split_once('=') {
            Some((name, default)) => ArgDecl {
                name: name.to_string(),
                default: Some(default.to_string()),
            },
            None => ArgDecl {
                name: word.clone(),
                default: None,
            },
        };
        if decl.name.is_empty() {
            return Err(syntax(line_num, "ARG names can not be blank".to_string()));
        }
        args.push(decl);
    }
    Ok(Instruction::Arg { args })
}

fn parse_env(rest: &str, line_num: usize) -> Result<Instruction> {
    Ok(Instruction::Env {
        vars: parse_key_values(rest, "ENV", line_num)?,
    })
}

/// Parse `KEY=VALUE ...` pairs, or the legacy `KEY VALUE...` form.
///
/// Values keep their quotes; the word resolver removes them.
fn parse_key_values(rest: &str, keyword: &str, line_num: usize) -> Result<Vec<(String, String)>> {
    let words = split_words(rest);
    let first_is_pair = words
        .first()
        .map_or(false, |w| w.contains('='));

    if !first_is_pair {
        // Legacy form: KEY VALUE
        let (key, value) = split_first_word(rest);
        if value.is_empty() {
            return Err(syntax(
                line_num,
                format!("{} {} is missing a value", keyword, key),
            ));
        }
        return Ok(vec![(key.to_string(), value.to_string())]);
    }

    let mut pairs = Vec::new();
    for word in words {
        let (key, value) = word.split_once('=').ok_or_else(|| {
            syntax(
                line_num,
                format!("{} expects KEY=VALUE pairs, got '{}'", keyword, word),
            )
        })?;
        if key.is_empty() {
            return Err(syntax(
                line_num,
                format!("{} names can not be blank", keyword),
            ));
        }
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

/// Split `--flag=value` options off the front of an instruction.
fn split_flags(rest: &str) -> (Vec<&str>, &str) {
    let mut flags = Vec::new();
    let mut remaining = rest.trim();
    while remaining.starts_with("--") {
        let (flag, after) = split_first_word(remaining);
        flags.push(flag);
        remaining = after;
    }
    (flags, remaining)
}

/// Split sources and destination for ADD/COPY.
fn parse_sources_and_dest(
    rest: &str,
    keyword: &str,
    line_num: usize,
) -> Result<(Vec<String>, String)> {
    let mut parts = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?
    } else {
        split_words(rest)
    };

    if parts.len() < 2 {
        return Err(syntax(
            line_num,
            format!("{} requires at least one source and a destination", keyword),
        ));
    }

    let dst = parts.pop().unwrap_or_default();
    Ok((parts, dst))
}

fn parse_add(rest: &str, line_num: usize) -> Result<Instruction> {
    let (flags, remaining) = split_flags(rest);
    if flags.iter().any(|f| f.starts_with("--from=")) {
        return Err(syntax(line_num, "ADD does not support --from".to_string()));
    }
    let (src, dst) = parse_sources_and_dest(remaining, "ADD", line_num)?;
    Ok(Instruction::Add { src, dst })
}

fn parse_copy(rest: &str, line_num: usize) -> Result<Instruction> {
    let (flags, remaining) = split_flags(rest);
    let from = flags
        .iter()
        .find_map(|f| f.strip_prefix("--from="))
        .map(str::to_string);
    if from.as_deref() == Some("") {
        return Err(syntax(line_num, "COPY --from requires a value".to_string()));
    }

    let (src, dst) = parse_sources_and_dest(remaining, "COPY", line_num)?;
    Ok(Instruction::Copy { src, dst, from })
}

fn parse_onbuild(rest: &str, line_num: usize) -> Result<Instruction> {
    let trigger = parse_step(rest, line_num)?;
    validate_trigger(&trigger)?;
    Ok(Instruction::Onbuild {
        trigger: rest.to_string(),
    })
}

fn parse_run(rest: &str, line_num: usize) -> Result<Instruction> {
    // If JSON array form, extract and join
    let command = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?.join(" ")
    } else {
        rest.to_string()
    };

    Ok(Instruction::Run { command })
}

/// Parse ENTRYPOINT/CMD: JSON exec form, or shell form wrapped in `sh -c`.
fn parse_exec(rest: &str, line_num: usize) -> Result<Vec<String>> {
    if rest.starts_with('[') {
        parse_json_array(rest, line_num)
    } else {
        Ok(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            rest.to_string(),
        ])
    }
}

// --- Helpers ---

/// Parse a JSON array string like `["a", "b", "c"]` into a Vec<String>.
fn parse_json_array(s: &str, line_num: usize) -> Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| {
        syntax(
            line_num,
            format!("Invalid JSON array '{}': {}", s, e),
        )
    })
}

/// Split on unquoted whitespace.
///
/// Quotes and escapes stay in the words so that variable resolution
/// sees exactly what was written.
fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            (None, '\'') | (None, '"') => {
                quote = Some(ch);
                current.push(ch);
            }
            (Some(q), c) if c == q => {
                quote = None;
                current.push(ch);
            }
            (Some('\''), c) => current.push(c),
            (_, '\\') => {
                current.push('\\');
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (_, c) => current.push(c),
        }
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}
